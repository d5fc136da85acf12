// Market depth (.depth) codec
// 64-byte header followed by 24-byte little-endian records; records group
// into batches closed by an END_OF_BATCH flag

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{read_full, CodecError};
use crate::core::types::{DepthBatch, DepthCommand, DepthRecord, Side, END_OF_BATCH};

pub const SCDD_MAGIC: u32 = 0x4444_4353; // "SCDD" little-endian
pub const DEPTH_HEADER_SIZE: usize = 64;
pub const DEPTH_RECORD_SIZE: usize = 24;

/// Parsed .depth header. The raw 64 bytes are kept so a rewrite reproduces
/// the version word and reserve area verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthHeader {
    raw: [u8; DEPTH_HEADER_SIZE],
}

impl DepthHeader {
    pub fn parse(raw: [u8; DEPTH_HEADER_SIZE]) -> Result<Self, CodecError> {
        let magic = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if magic != SCDD_MAGIC {
            return Err(CodecError::BadMagic {
                expected: SCDD_MAGIC,
                found: magic,
            });
        }
        let header_size = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        if header_size != DEPTH_HEADER_SIZE as u32 {
            return Err(CodecError::BadHeaderSize {
                expected: DEPTH_HEADER_SIZE as u32,
                found: header_size,
            });
        }
        let record_size = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
        if record_size != DEPTH_RECORD_SIZE as u32 {
            return Err(CodecError::BadRecordSize {
                expected: DEPTH_RECORD_SIZE as u32,
                found: record_size,
            });
        }
        Ok(Self { raw })
    }

    pub fn new_default() -> Self {
        let mut raw = [0u8; DEPTH_HEADER_SIZE];
        raw[0..4].copy_from_slice(&SCDD_MAGIC.to_le_bytes());
        raw[4..8].copy_from_slice(&(DEPTH_HEADER_SIZE as u32).to_le_bytes());
        raw[8..12].copy_from_slice(&(DEPTH_RECORD_SIZE as u32).to_le_bytes());
        raw[12..16].copy_from_slice(&1u32.to_le_bytes());
        Self { raw }
    }

    pub fn raw(&self) -> &[u8; DEPTH_HEADER_SIZE] {
        &self.raw
    }

    pub fn version(&self) -> u32 {
        u32::from_le_bytes([self.raw[12], self.raw[13], self.raw[14], self.raw[15]])
    }
}

pub fn decode_record(buf: &[u8; DEPTH_RECORD_SIZE]) -> Result<DepthRecord, CodecError> {
    let dt_us = u64::from_le_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ]);
    let command = DepthCommand::from_u8(buf[8]).ok_or_else(|| CodecError::MalformedBatch {
        dt_us,
        reason: format!("unknown command byte {}", buf[8]),
    })?;
    Ok(DepthRecord {
        dt_us,
        command,
        flags: buf[9],
        num_orders: u16::from_le_bytes([buf[10], buf[11]]),
        price: f32::from_bits(u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]])),
        quantity: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
        reserved: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
    })
}

/// Encode a record, forcing the END_OF_BATCH bit to the caller's batching and
/// the reserved word to zero. Any other flag bits pass through untouched.
pub fn encode_record(rec: &DepthRecord, end_of_batch: bool) -> [u8; DEPTH_RECORD_SIZE] {
    let mut buf = [0u8; DEPTH_RECORD_SIZE];
    buf[0..8].copy_from_slice(&rec.dt_us.to_le_bytes());
    buf[8] = rec.command as u8;
    buf[9] = (rec.flags & !END_OF_BATCH) | if end_of_batch { END_OF_BATCH } else { 0 };
    buf[10..12].copy_from_slice(&rec.num_orders.to_le_bytes());
    buf[12..16].copy_from_slice(&rec.price.to_bits().to_le_bytes());
    buf[16..20].copy_from_slice(&rec.quantity.to_le_bytes());
    // reserved stays zero
    buf
}

/// Streaming .depth reader yielding whole batches.
///
/// A batch is the maximal run of records ending at an END_OF_BATCH flag;
/// rewritten files carry reassigned microsecond counters inside a batch, so
/// the flag alone delimits. The decoder validates that no bid-side command
/// follows an ask-side command within a batch. Book-level invariants are the
/// Book's concern, not the decoder's.
pub struct DepthReader<R: Read> {
    reader: R,
    header: DepthHeader,
    day_window_us: Option<(u64, u64)>,
    records_read: u64,
    batches_read: u64,
    finished: bool,
}

impl DepthReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, CodecError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> DepthReader<R> {
    pub fn new(mut reader: R) -> Result<Self, CodecError> {
        let mut raw = [0u8; DEPTH_HEADER_SIZE];
        let n = read_full(&mut reader, &mut raw)?;
        if n != DEPTH_HEADER_SIZE {
            return Err(CodecError::TruncatedStream(format!(
                "depth header: {} of {} bytes",
                n, DEPTH_HEADER_SIZE
            )));
        }
        Ok(Self {
            reader,
            header: DepthHeader::parse(raw)?,
            day_window_us: None,
            records_read: 0,
            batches_read: 0,
            finished: false,
        })
    }

    /// Reject records outside `[start_us, end_us)`. Depth files roll at
    /// 00:00:00 UTC, so a record outside the run day means the wrong file.
    pub fn with_day_window_us(mut self, start_us: u64, end_us: u64) -> Self {
        self.day_window_us = Some((start_us, end_us));
        self
    }

    pub fn header(&self) -> &DepthHeader {
        &self.header
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    pub fn batches_read(&self) -> u64 {
        self.batches_read
    }

    fn read_record(&mut self) -> Result<Option<DepthRecord>, CodecError> {
        let mut buf = [0u8; DEPTH_RECORD_SIZE];
        match read_full(&mut self.reader, &mut buf)? {
            0 => Ok(None),
            DEPTH_RECORD_SIZE => {
                let rec = decode_record(&buf)?;
                if let Some((start, end)) = self.day_window_us {
                    if rec.dt_us < start || rec.dt_us >= end {
                        return Err(CodecError::RecordOutsideDay { dt_us: rec.dt_us });
                    }
                }
                self.records_read += 1;
                Ok(Some(rec))
            }
            n => Err(CodecError::TruncatedStream(format!(
                "depth record {}: {} of {} bytes",
                self.records_read, n, DEPTH_RECORD_SIZE
            ))),
        }
    }
}

impl<R: Read> Iterator for DepthReader<R> {
    type Item = Result<DepthBatch, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut records: Vec<DepthRecord> = Vec::new();
        let mut seen_ask = false;
        loop {
            let rec = match self.read_record() {
                Ok(Some(rec)) => rec,
                Ok(None) => {
                    self.finished = true;
                    if records.is_empty() {
                        return None;
                    }
                    // EOF inside a batch: the partial batch is dropped
                    return Some(Err(CodecError::TruncatedStream(format!(
                        "depth stream ended inside a batch of {} records at {}us",
                        records.len(),
                        records[0].dt_us
                    ))));
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };

            match rec.command.side() {
                Some(Side::Ask) => seen_ask = true,
                Some(Side::Bid) if seen_ask => {
                    self.finished = true;
                    return Some(Err(CodecError::MalformedBatch {
                        dt_us: rec.dt_us,
                        reason: "bid-side record after ask-side record".to_string(),
                    }));
                }
                _ => {}
            }

            let end = rec.is_end_of_batch();
            records.push(rec);
            if end {
                self.batches_read += 1;
                return Some(Ok(DepthBatch { records }));
            }
        }
    }
}

/// Streaming .depth writer. Writes the header verbatim, then whole batches;
/// END_OF_BATCH is set on the last record of each batch and cleared on the
/// rest, and the reserved word is forced to zero.
pub struct DepthWriter<W: Write> {
    writer: W,
    records_written: u64,
    batches_written: u64,
}

impl DepthWriter<BufWriter<File>> {
    pub fn create(path: &Path, header: &DepthHeader) -> Result<Self, CodecError> {
        Self::new(BufWriter::new(File::create(path)?), header)
    }

    /// Flush buffered batches and fsync the file.
    pub fn finish(self) -> Result<(), CodecError> {
        let file = self
            .writer
            .into_inner()
            .map_err(|e| CodecError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }
}

impl<W: Write> DepthWriter<W> {
    pub fn new(mut writer: W, header: &DepthHeader) -> Result<Self, CodecError> {
        writer.write_all(header.raw())?;
        Ok(Self {
            writer,
            records_written: 0,
            batches_written: 0,
        })
    }

    pub fn write_batch(&mut self, records: &[DepthRecord]) -> Result<(), CodecError> {
        if records.is_empty() {
            return Ok(());
        }
        let last = records.len() - 1;
        for (i, rec) in records.iter().enumerate() {
            self.writer.write_all(&encode_record(rec, i == last))?;
            self.records_written += 1;
        }
        self.batches_written += 1;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn batches_written(&self) -> u64 {
        self.batches_written
    }

    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(dt_us: u64, command: DepthCommand, price: f32, qty: u32, eob: bool) -> DepthRecord {
        DepthRecord {
            dt_us,
            command,
            flags: if eob { END_OF_BATCH } else { 0 },
            num_orders: 1,
            price,
            quantity: qty,
            reserved: 0,
        }
    }

    fn stream_of(batches: &[Vec<DepthRecord>]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(DepthHeader::new_default().raw());
        for batch in batches {
            let last = batch.len() - 1;
            for (i, r) in batch.iter().enumerate() {
                bytes.extend_from_slice(&encode_record(r, i == last));
            }
        }
        bytes
    }

    #[test]
    fn test_header_round_trip() {
        let header = DepthHeader::new_default();
        assert_eq!(header.version(), 1);
        assert_eq!(DepthHeader::parse(*header.raw()).unwrap(), header);
    }

    #[test]
    fn test_batch_grouping() {
        let bytes = stream_of(&[
            vec![
                rec(1_000, DepthCommand::ClearBook, 0.0, 0, false),
                rec(1_000, DepthCommand::AddBidLevel, 100.0, 5, false),
                rec(1_000, DepthCommand::AddAskLevel, 100.25, 3, true),
            ],
            vec![rec(2_000, DepthCommand::DeleteAskLevel, 100.25, 0, true)],
        ]);
        let reader = DepthReader::new(std::io::Cursor::new(bytes)).unwrap();
        let batches: Vec<_> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 3);
        assert!(batches[0].is_snapshot());
        assert_eq!(batches[1].dt_us(), 2_000);
    }

    #[test]
    fn test_bid_after_ask_is_malformed() {
        let bytes = stream_of(&[vec![
            rec(1_000, DepthCommand::AddAskLevel, 100.25, 3, false),
            rec(1_000, DepthCommand::AddBidLevel, 100.0, 5, true),
        ]]);
        let mut reader = DepthReader::new(std::io::Cursor::new(bytes)).unwrap();
        assert!(matches!(
            reader.next().unwrap(),
            Err(CodecError::MalformedBatch { .. })
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_reassigned_sub_microseconds_still_group_into_one_batch() {
        // rewritten files carry per-record microsecond counters inside an
        // EOB-delimited batch; the flag, not the timestamp, ends the batch
        let bytes = stream_of(&[vec![
            rec(1_000, DepthCommand::AddBidLevel, 100.0, 5, false),
            rec(1_001, DepthCommand::AddAskLevel, 100.25, 3, true),
        ]]);
        let reader = DepthReader::new(std::io::Cursor::new(bytes)).unwrap();
        let batches: Vec<_> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0].dt_us(), 1_000);
    }

    #[test]
    fn test_eof_inside_batch_is_truncation() {
        let bytes = stream_of(&[vec![rec(1_000, DepthCommand::AddBidLevel, 100.0, 5, false)]]);
        let mut reader = DepthReader::new(std::io::Cursor::new(bytes)).unwrap();
        let err = reader.next().unwrap().unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn test_day_window_rejects_stray_record() {
        let bytes = stream_of(&[vec![rec(5_000, DepthCommand::AddBidLevel, 100.0, 5, true)]]);
        let mut reader = DepthReader::new(std::io::Cursor::new(bytes))
            .unwrap()
            .with_day_window_us(10_000, 20_000);
        assert!(matches!(
            reader.next().unwrap(),
            Err(CodecError::RecordOutsideDay { dt_us: 5_000 })
        ));
    }

    #[test]
    fn test_writer_sets_eob_and_zeroes_reserved() {
        let mut out = Vec::new();
        {
            let mut writer = DepthWriter::new(&mut out, &DepthHeader::new_default()).unwrap();
            let mut a = rec(1_000, DepthCommand::AddBidLevel, 100.0, 5, true);
            a.reserved = 0xDEAD_BEEF; // must not reach the wire
            let b = rec(1_000, DepthCommand::AddAskLevel, 100.25, 3, false);
            writer.write_batch(&[a, b]).unwrap();
            writer.flush().unwrap();
        }
        let reader = DepthReader::new(std::io::Cursor::new(out)).unwrap();
        let batch = reader.map(|b| b.unwrap()).next().unwrap();
        assert!(!batch.records[0].is_end_of_batch());
        assert!(batch.records[1].is_end_of_batch());
        assert_eq!(batch.records[0].reserved, 0);
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(DepthHeader::new_default().raw());
        let mut raw = encode_record(&rec(1_000, DepthCommand::ClearBook, 0.0, 0, true), true);
        raw[8] = 9;
        bytes.extend_from_slice(&raw);
        let mut reader = DepthReader::new(std::io::Cursor::new(bytes)).unwrap();
        assert!(matches!(
            reader.next().unwrap(),
            Err(CodecError::MalformedBatch { .. })
        ));
    }
}
