// End-of-run verifier
// Re-reads the two rewritten files and checks the invariants the
// synchronizer promised: count identities, a strictly monotonic merged
// timeline, zeroed reserved words, and book-replay agreement with the BBO
// written into the trade records

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::codec::{CodecError, DepthReader, ScidReader};
use crate::core::sc_time;
use crate::core::types::{DepthCommand, DepthRecord, ScidRecord, Side, TradeKind};
use crate::sync::book::Book;

/// Rolling 64-bit FNV-1a over `(ns, kind tag, key fields)` in emission
/// order. The nanosecond input is derived from the record's on-disk
/// timestamp, so the fold is identical while writing and again on re-read
/// even where a bucket-overflow tail saturated the microsecond field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestHash {
    state: u64,
}

impl Default for ManifestHash {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestHash {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET,
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.state ^= *b as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }

    pub fn fold_trade(&mut self, rec: &ScidRecord) {
        let ns = sc_time::from_platform_us(rec.dt_us);
        let tag: u8 = if rec.kind() == TradeKind::Aggregated { 2 } else { 0 };
        self.update(&ns.to_le_bytes());
        self.update(&[tag]);
        self.update(&rec.open.to_bits().to_le_bytes());
        self.update(&rec.close.to_bits().to_le_bytes());
        self.update(&rec.total_volume.to_le_bytes());
    }

    pub fn fold_depth(&mut self, rec: &DepthRecord) {
        let ns = sc_time::from_platform_us(rec.dt_us);
        self.update(&ns.to_le_bytes());
        self.update(&[1u8]);
        self.update(&[rec.command as u8]);
        self.update(&rec.price.to_bits().to_le_bytes());
        self.update(&rec.quantity.to_le_bytes());
    }

    pub fn value(&self) -> u64 {
        self.state
    }
}

/// Input-side counts the outputs must reconcile against.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyExpectations {
    pub trades_in: u64,
    pub depth_records_in: u64,
    pub batches_in: u64,
}

/// Outcome of one verification pass.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub headers_ok: bool,
    pub trade_count_ok: bool,
    pub depth_count_ok: bool,
    pub monotonic_ok: bool,
    pub reserved_zero_ok: bool,
    pub bbo_replay_mismatches: u64,
    /// Trades whose attached batch did not consume exactly their volume at
    /// the trade price. Informational: attachments the synchronizer flagged
    /// (or made by the single-batch rule) legitimately land here, and the
    /// flag set is not recoverable from the outputs alone.
    pub volume_mismatches: u64,
    pub trade_records: u64,
    pub depth_records: u64,
    pub depth_batches: u64,
    pub manifest_hash: u64,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.headers_ok
            && self.trade_count_ok
            && self.depth_count_ok
            && self.monotonic_ok
            && self.reserved_zero_ok
            && self.bbo_replay_mismatches == 0
    }
}

/// Re-read both outputs and check them against the expectations. Structural
/// failures reading the outputs are returned as errors; semantic failures
/// land in the report.
pub fn verify(
    scid_out: &Path,
    depth_out: &Path,
    expect: &VerifyExpectations,
) -> Result<VerifyReport, CodecError> {
    let mut scid = ScidReader::open(scid_out)?;
    let headers_ok = scid.header().is_some();
    let depth = DepthReader::open(depth_out)?;

    // flatten depth batches back into records, remembering batch ends
    let mut next_trade = scid.next().transpose()?;
    let mut depth_iter = depth.flat_map(|b| match b {
        Ok(batch) => batch.records.into_iter().map(Ok).collect::<Vec<_>>(),
        Err(e) => vec![Err(e)],
    });
    let mut next_depth = depth_iter.next().transpose()?;

    let mut report = VerifyReport {
        headers_ok,
        trade_count_ok: false,
        depth_count_ok: false,
        monotonic_ok: true,
        reserved_zero_ok: true,
        bbo_replay_mismatches: 0,
        volume_mismatches: 0,
        trade_records: 0,
        depth_records: 0,
        depth_batches: 0,
        manifest_hash: 0,
    };

    let mut hash = ManifestHash::new();
    let mut book = Book::new();
    let mut last_ns: Option<i64> = None;
    // per-batch consumption at (side, price), used for the volume check
    let mut batch_consumed: HashMap<(Side, u32), u64> = HashMap::new();
    let mut last_batch_consumed: HashMap<(Side, u32), u64> = HashMap::new();

    loop {
        // merge by timestamp; depth wins ties so replay matches emission order
        let take_depth = match (&next_trade, &next_depth) {
            (None, None) => break,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (Some(t), Some(d)) => d.dt_us <= t.dt_us,
        };

        if take_depth {
            let rec = next_depth.take().expect("peeked depth record");
            next_depth = depth_iter.next().transpose()?;
            let ns = sc_time::from_platform_us(rec.dt_us);
            check_monotonic(&mut report, &mut last_ns, ns);
            if rec.reserved != 0 {
                report.reserved_zero_ok = false;
            }
            hash.fold_depth(&rec);
            if let (Some(side), true) = (rec.command.side(), rec.command.is_modify_or_delete()) {
                let resting = book
                    .depth_of(side, rec.price)
                    .map(|l| l.quantity)
                    .unwrap_or(0);
                let remaining = match rec.command {
                    DepthCommand::DeleteBidLevel | DepthCommand::DeleteAskLevel => 0,
                    _ => rec.quantity,
                };
                let removed = resting.saturating_sub(remaining) as u64;
                if removed > 0 {
                    *batch_consumed.entry((side, rec.price.to_bits())).or_insert(0) += removed;
                }
            }
            let _ = book.apply(&rec);
            report.depth_records += 1;
            if rec.is_end_of_batch() {
                report.depth_batches += 1;
                last_batch_consumed = std::mem::take(&mut batch_consumed);
            }
        } else {
            let rec = next_trade.take().expect("peeked trade record");
            next_trade = scid.next().transpose()?;
            let ns = sc_time::from_platform_us(rec.dt_us);
            check_monotonic(&mut report, &mut last_ns, ns);
            hash.fold_trade(&rec);
            report.trade_records += 1;

            if rec.kind() == TradeKind::SingleTrade && rec.total_volume > 0 {
                let bits = rec.close.to_bits();
                let consumed = last_batch_consumed
                    .get(&(Side::Bid, bits))
                    .or_else(|| last_batch_consumed.get(&(Side::Ask, bits)))
                    .copied()
                    .unwrap_or(0);
                if consumed != rec.total_volume as u64 {
                    report.volume_mismatches += 1;
                }
            }

            if matches!(
                rec.kind(),
                TradeKind::SingleTrade | TradeKind::FirstSubTrade | TradeKind::DepthMarker
            ) {
                let expected_high = book.best_ask().map(|q| q.price).unwrap_or(0.0);
                let expected_low = book.best_bid().map(|q| q.price).unwrap_or(0.0);
                if rec.high.to_bits() != expected_high.to_bits()
                    || rec.low.to_bits() != expected_low.to_bits()
                {
                    report.bbo_replay_mismatches += 1;
                    warn!(
                        dt_us = rec.dt_us,
                        high = rec.high,
                        low = rec.low,
                        expected_high,
                        expected_low,
                        "BBO replay mismatch"
                    );
                }
            }
        }
    }

    report.manifest_hash = hash.value();
    report.trade_count_ok =
        report.trade_records == expect.trades_in + expect.batches_in;
    report.depth_count_ok = report.depth_records == expect.depth_records_in;
    Ok(report)
}

fn check_monotonic(report: &mut VerifyReport, last_ns: &mut Option<i64>, ns: i64) {
    if let Some(prev) = *last_ns {
        if ns <= prev {
            report.monotonic_ok = false;
        }
    }
    *last_ns = Some(ns);
}
