// Intraday (.scid) codec
// 56-byte header followed by fixed 40-byte little-endian records

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{read_full, CodecError};
use crate::core::types::ScidRecord;

pub const SCID_MAGIC: u32 = 0x4449_4353; // "SCID" little-endian
pub const SCID_HEADER_SIZE: usize = 56;
pub const SCID_RECORD_SIZE: usize = 40;

/// Parsed .scid header. The raw 56 bytes are kept so a rewrite can reproduce
/// the reserve area verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScidHeader {
    raw: [u8; SCID_HEADER_SIZE],
}

impl ScidHeader {
    pub fn parse(raw: [u8; SCID_HEADER_SIZE]) -> Result<Self, CodecError> {
        let magic = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if magic != SCID_MAGIC {
            return Err(CodecError::BadMagic {
                expected: SCID_MAGIC,
                found: magic,
            });
        }
        let header_size = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        if header_size != SCID_HEADER_SIZE as u32 {
            return Err(CodecError::BadHeaderSize {
                expected: SCID_HEADER_SIZE as u32,
                found: header_size,
            });
        }
        let record_size = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
        if record_size != SCID_RECORD_SIZE as u32 {
            return Err(CodecError::BadRecordSize {
                expected: SCID_RECORD_SIZE as u32,
                found: record_size,
            });
        }
        Ok(Self { raw })
    }

    /// Canonical header for newly created files: version 1, zero reserve.
    pub fn new_default() -> Self {
        let mut raw = [0u8; SCID_HEADER_SIZE];
        raw[0..4].copy_from_slice(&SCID_MAGIC.to_le_bytes());
        raw[4..8].copy_from_slice(&(SCID_HEADER_SIZE as u32).to_le_bytes());
        raw[8..12].copy_from_slice(&(SCID_RECORD_SIZE as u32).to_le_bytes());
        raw[12..14].copy_from_slice(&1u16.to_le_bytes());
        Self { raw }
    }

    pub fn raw(&self) -> &[u8; SCID_HEADER_SIZE] {
        &self.raw
    }

    pub fn version(&self) -> u16 {
        u16::from_le_bytes([self.raw[12], self.raw[13]])
    }

    pub fn utc_start_index(&self) -> u32 {
        u32::from_le_bytes([self.raw[16], self.raw[17], self.raw[18], self.raw[19]])
    }
}

pub fn decode_record(buf: &[u8; SCID_RECORD_SIZE]) -> ScidRecord {
    let u32_at = |o: usize| u32::from_le_bytes([buf[o], buf[o + 1], buf[o + 2], buf[o + 3]]);
    let f32_at = |o: usize| f32::from_bits(u32_at(o));
    ScidRecord {
        dt_us: u64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ]),
        open: f32_at(8),
        high: f32_at(12),
        low: f32_at(16),
        close: f32_at(20),
        num_trades: u32_at(24),
        total_volume: u32_at(28),
        bid_volume: u32_at(32),
        ask_volume: u32_at(36),
    }
}

pub fn encode_record(rec: &ScidRecord) -> [u8; SCID_RECORD_SIZE] {
    let mut buf = [0u8; SCID_RECORD_SIZE];
    buf[0..8].copy_from_slice(&rec.dt_us.to_le_bytes());
    // float fields go through to_bits so NaN payloads and sentinel patterns
    // survive byte-exact
    buf[8..12].copy_from_slice(&rec.open.to_bits().to_le_bytes());
    buf[12..16].copy_from_slice(&rec.high.to_bits().to_le_bytes());
    buf[16..20].copy_from_slice(&rec.low.to_bits().to_le_bytes());
    buf[20..24].copy_from_slice(&rec.close.to_bits().to_le_bytes());
    buf[24..28].copy_from_slice(&rec.num_trades.to_le_bytes());
    buf[28..32].copy_from_slice(&rec.total_volume.to_le_bytes());
    buf[32..36].copy_from_slice(&rec.bid_volume.to_le_bytes());
    buf[36..40].copy_from_slice(&rec.ask_volume.to_le_bytes());
    buf
}

/// Streaming .scid reader.
///
/// A zero-byte file is legal and yields no records and no header: Sierra has
/// simply not written the contract yet. A file shorter than the header, or
/// with a trailing partial record, reports `TruncatedStream` after yielding
/// every complete record.
pub struct ScidReader<R: Read> {
    reader: R,
    header: Option<ScidHeader>,
    records_read: u64,
    finished: bool,
}

impl ScidReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, CodecError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> ScidReader<R> {
    pub fn new(mut reader: R) -> Result<Self, CodecError> {
        let mut raw = [0u8; SCID_HEADER_SIZE];
        let n = read_full(&mut reader, &mut raw)?;
        let header = match n {
            0 => None,
            SCID_HEADER_SIZE => Some(ScidHeader::parse(raw)?),
            _ => {
                return Err(CodecError::TruncatedStream(format!(
                    "scid header: {} of {} bytes",
                    n, SCID_HEADER_SIZE
                )))
            }
        };
        Ok(Self {
            reader,
            header,
            records_read: 0,
            finished: false,
        })
    }

    pub fn header(&self) -> Option<&ScidHeader> {
        self.header.as_ref()
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }
}

impl<R: Read> Iterator for ScidReader<R> {
    type Item = Result<ScidRecord, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut buf = [0u8; SCID_RECORD_SIZE];
        match read_full(&mut self.reader, &mut buf) {
            Ok(0) => {
                self.finished = true;
                None
            }
            Ok(SCID_RECORD_SIZE) => {
                self.records_read += 1;
                Some(Ok(decode_record(&buf)))
            }
            Ok(n) => {
                self.finished = true;
                Some(Err(CodecError::TruncatedStream(format!(
                    "scid record {}: {} of {} bytes",
                    self.records_read, n, SCID_RECORD_SIZE
                ))))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e.into()))
            }
        }
    }
}

/// Streaming .scid writer. Writes the given header once, then appends
/// records.
pub struct ScidWriter<W: Write> {
    writer: W,
    records_written: u64,
}

impl ScidWriter<BufWriter<File>> {
    pub fn create(path: &Path, header: &ScidHeader) -> Result<Self, CodecError> {
        Self::new(BufWriter::new(File::create(path)?), header)
    }

    /// Flush buffered records and fsync the file.
    pub fn finish(self) -> Result<(), CodecError> {
        let file = self
            .writer
            .into_inner()
            .map_err(|e| CodecError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }
}

impl<W: Write> ScidWriter<W> {
    pub fn new(mut writer: W, header: &ScidHeader) -> Result<Self, CodecError> {
        writer.write_all(header.raw())?;
        Ok(Self {
            writer,
            records_written: 0,
        })
    }

    pub fn append(&mut self, rec: &ScidRecord) -> Result<(), CodecError> {
        self.writer.write_all(&encode_record(rec))?;
        self.records_written += 1;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{TradeKind, DEPTH_MARKER_BITS, FIRST_SUB_TRADE_BITS};

    fn sample_record(dt_us: u64) -> ScidRecord {
        ScidRecord {
            dt_us,
            open: 0.0,
            high: 101.25,
            low: 101.0,
            close: 101.25,
            num_trades: 1,
            total_volume: 3,
            bid_volume: 0,
            ask_volume: 3,
        }
    }

    #[test]
    fn test_record_round_trip_is_byte_exact() {
        let mut rec = sample_record(1_234_567);
        rec.open = f32::from_bits(FIRST_SUB_TRADE_BITS);
        let bytes = encode_record(&rec);
        let back = decode_record(&bytes);
        assert_eq!(back.open.to_bits(), FIRST_SUB_TRADE_BITS);
        assert_eq!(encode_record(&back), bytes);
    }

    #[test]
    fn test_nan_marker_survives_round_trip() {
        let mut rec = sample_record(9);
        rec.open = f32::from_bits(DEPTH_MARKER_BITS);
        let back = decode_record(&encode_record(&rec));
        assert_eq!(back.kind(), TradeKind::DepthMarker);
        assert_eq!(back.open.to_bits(), DEPTH_MARKER_BITS);
    }

    #[test]
    fn test_empty_file_yields_nothing() {
        let mut reader = ScidReader::new(std::io::Cursor::new(Vec::new())).unwrap();
        assert!(reader.header().is_none());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_header_round_trip() {
        let header = ScidHeader::new_default();
        assert_eq!(header.version(), 1);
        assert_eq!(header.utc_start_index(), 0);
        let parsed = ScidHeader::parse(*header.raw()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut raw = *ScidHeader::new_default().raw();
        raw[0] = b'X';
        assert!(matches!(
            ScidHeader::parse(raw),
            Err(CodecError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_truncated_tail_reported_after_complete_records() {
        let header = ScidHeader::new_default();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(header.raw());
        bytes.extend_from_slice(&encode_record(&sample_record(1)));
        bytes.extend_from_slice(&encode_record(&sample_record(2)));
        bytes.extend_from_slice(&[0u8; 17]); // partial third record

        let mut reader = ScidReader::new(std::io::Cursor::new(bytes)).unwrap();
        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_ok());
        let err = reader.next().unwrap().unwrap_err();
        assert!(err.is_truncation());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_writer_then_reader() {
        let header = ScidHeader::new_default();
        let mut out = Vec::new();
        {
            let mut writer = ScidWriter::new(&mut out, &header).unwrap();
            writer.append(&sample_record(10)).unwrap();
            writer.append(&sample_record(11)).unwrap();
            assert_eq!(writer.records_written(), 2);
            writer.flush().unwrap();
        }
        let reader = ScidReader::new(std::io::Cursor::new(out)).unwrap();
        let records: Vec<_> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].dt_us, 10);
        assert_eq!(records[1].dt_us, 11);
    }
}
