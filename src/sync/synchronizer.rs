// Trade/depth synchronizer
// Consumes the two decoded streams in timestamp order, resolves trades into
// depth batches at millisecond granularity, and emits one unified event
// sequence with fresh strictly-increasing sub-millisecond timestamps

use std::fmt;
use tracing::{debug, warn};

use crate::codec::CodecError;
use crate::core::sc_time;
use crate::core::types::{
    DepthBatch, DepthCommand, EventKind, ScidRecord, Side, TradeKind, UnifiedEvent,
    DEPTH_MARKER_BITS,
};
use crate::sync::book::Book;
use crate::sync::diagnostics::{Anomaly, AnomalyKind, SharedSink};

/// Sub-millisecond slots available inside one bucket.
const SLOTS_PER_MS: usize = 1000;

/// Synchronizer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Init,
    Streaming,
    Draining,
    Done,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Default)]
pub struct SynchronizerStats {
    pub buckets: u64,
    pub trades_in: u64,
    pub aggregates_in: u64,
    pub batches_in: u64,
    pub depth_records_in: u64,
    pub trades_out: u64,
    pub injected_markers: u64,
    pub matched_single_batch: u64,
    pub matched_exact: u64,
    pub matched_bracket: u64,
    pub unresolved: u64,
    pub truncated_trades: bool,
    pub truncated_depth: bool,
}

impl SynchronizerStats {
    pub fn truncated(&self) -> bool {
        self.truncated_trades || self.truncated_depth
    }
}

impl fmt::Display for SynchronizerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SynchronizerStats(buckets={}, trades_in={}, batches_in={}, trades_out={}, unresolved={})",
            self.buckets, self.trades_in, self.batches_in, self.trades_out, self.unresolved
        )
    }
}

/// The pairing engine.
///
/// Both input iterators must be ordered by platform timestamp, ties broken by
/// stream order, which is exactly what the codec readers produce. Buckets are
/// processed in ascending millisecond order; within a bucket the output
/// interleaving is: each batch's records, then the injected marker for that
/// batch, then the trades attached to it.
pub struct Synchronizer<T, D>
where
    T: Iterator<Item = Result<ScidRecord, CodecError>>,
    D: Iterator<Item = Result<DepthBatch, CodecError>>,
{
    trades: T,
    depth: D,
    next_trade: Option<ScidRecord>,
    next_batch: Option<DepthBatch>,
    trades_done: bool,
    depth_done: bool,
    book: Book,
    sink: SharedSink,
    state: SyncState,
    stats: SynchronizerStats,
    batch_seq: u64,
}

impl<T, D> Synchronizer<T, D>
where
    T: Iterator<Item = Result<ScidRecord, CodecError>>,
    D: Iterator<Item = Result<DepthBatch, CodecError>>,
{
    pub fn new(trades: T, depth: D, sink: SharedSink) -> Self {
        Self {
            trades,
            depth,
            next_trade: None,
            next_batch: None,
            trades_done: false,
            depth_done: false,
            book: Book::new(),
            sink,
            state: SyncState::Init,
            stats: SynchronizerStats::default(),
            batch_seq: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn stats(&self) -> &SynchronizerStats {
        &self.stats
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    /// Output batch count so far (input batches only; synthesized hosts for
    /// orphan trades are not batches).
    pub fn batches_emitted(&self) -> u64 {
        self.batch_seq
    }

    fn fill_trade(&mut self) -> Result<(), CodecError> {
        if self.next_trade.is_some() || self.trades_done {
            return Ok(());
        }
        match self.trades.next() {
            None => self.trades_done = true,
            Some(Ok(rec)) => self.next_trade = Some(rec),
            Some(Err(e)) if e.is_truncation() => {
                warn!(error = %e, "trade stream truncated, draining");
                self.stats.truncated_trades = true;
                self.trades_done = true;
            }
            Some(Err(e)) => return Err(e),
        }
        Ok(())
    }

    fn fill_batch(&mut self) -> Result<(), CodecError> {
        if self.next_batch.is_some() || self.depth_done {
            return Ok(());
        }
        match self.depth.next() {
            None => self.depth_done = true,
            Some(Ok(batch)) => self.next_batch = Some(batch),
            Some(Err(e)) if e.is_truncation() => {
                warn!(error = %e, "depth stream truncated, draining");
                self.stats.truncated_depth = true;
                self.depth_done = true;
            }
            Some(Err(e)) => return Err(e),
        }
        Ok(())
    }

    /// Advance one millisecond bucket and return its unified events, or
    /// `None` once both inputs are exhausted.
    pub fn next_bucket(&mut self) -> Option<Result<Vec<UnifiedEvent>, CodecError>> {
        if self.state == SyncState::Done {
            return None;
        }
        if let Err(e) = self.fill_trade() {
            self.state = SyncState::Done;
            return Some(Err(e));
        }
        if let Err(e) = self.fill_batch() {
            self.state = SyncState::Done;
            return Some(Err(e));
        }

        let trade_ms = self
            .next_trade
            .as_ref()
            .map(|r| sc_time::ms_of_platform_us(r.dt_us));
        let batch_ms = self
            .next_batch
            .as_ref()
            .map(|b| sc_time::ms_of_platform_us(b.dt_us()));
        let m = match (trade_ms, batch_ms) {
            (None, None) => {
                debug!(buckets = self.stats.buckets, "all buckets drained");
                self.state = SyncState::Done;
                return None;
            }
            (Some(t), None) => t,
            (None, Some(b)) => b,
            (Some(t), Some(b)) => t.min(b),
        };

        // Gather everything falling into [m, m+1)
        let mut batches: Vec<DepthBatch> = Vec::new();
        let mut trades: Vec<ScidRecord> = Vec::new();
        loop {
            match &self.next_batch {
                Some(b) if sc_time::ms_of_platform_us(b.dt_us()) == m => {
                    batches.push(self.next_batch.take().expect("peeked batch"));
                    if let Err(e) = self.fill_batch() {
                        self.state = SyncState::Done;
                        return Some(Err(e));
                    }
                }
                _ => break,
            }
        }
        loop {
            match &self.next_trade {
                Some(r) if sc_time::ms_of_platform_us(r.dt_us) == m => {
                    trades.push(self.next_trade.take().expect("peeked trade"));
                    if let Err(e) = self.fill_trade() {
                        self.state = SyncState::Done;
                        return Some(Err(e));
                    }
                }
                _ => break,
            }
        }

        self.stats.buckets += 1;
        self.stats.batches_in += batches.len() as u64;
        self.stats.depth_records_in += batches.iter().map(|b| b.len() as u64).sum::<u64>();
        self.stats.trades_in += trades.len() as u64;
        self.stats.aggregates_in += trades.iter().filter(|t| !t.is_tick()).count() as u64;

        self.state = if self.stats.truncated() || self.trades_done != self.depth_done {
            SyncState::Draining
        } else {
            SyncState::Streaming
        };

        // Overflow can only spill into m+1 when that millisecond is silent in
        // both input streams
        let following_ms = [
            self.next_trade
                .as_ref()
                .map(|r| sc_time::ms_of_platform_us(r.dt_us)),
            self.next_batch
                .as_ref()
                .map(|b| sc_time::ms_of_platform_us(b.dt_us())),
        ]
        .into_iter()
        .flatten()
        .min();
        let spill_free = following_ms.map_or(true, |n| n > m + 1);

        Some(Ok(self.assemble_bucket(m, batches, trades, spill_free)))
    }

    // ------------------------------------------------------------------
    // bucket assembly
    // ------------------------------------------------------------------

    fn assemble_bucket(
        &mut self,
        m: i64,
        batches: Vec<DepthBatch>,
        trades: Vec<ScidRecord>,
        spill_free: bool,
    ) -> Vec<UnifiedEvent> {
        let synthesized = batches.is_empty();
        if synthesized {
            self.sink.record(Anomaly::new(
                AnomalyKind::OrphanTradeBucket,
                sc_time::ns_of_ms(m),
                format!("{} trades with no depth batch", trades.len()),
            ));
        }

        let attach = self.resolve_trades(m, &batches, &trades);

        let needed: usize =
            batches.iter().map(|b| b.len() + 1).sum::<usize>() + trades.len();
        let spill_ok = needed > SLOTS_PER_MS && spill_free;
        if needed > SLOTS_PER_MS && (!spill_free || needed > 2 * SLOTS_PER_MS) {
            self.sink.record(Anomaly::new(
                AnomalyKind::BucketOverflow,
                sc_time::ns_of_ms(m),
                format!("{} events for {} slots", needed, SLOTS_PER_MS),
            ));
        }

        // Slots map onto whole microseconds. A tail that exhausts them
        // saturates the on-disk microsecond at 999 while the internal
        // timeline keeps advancing by single nanoseconds, so the emitted
        // sequence stays strictly monotonic. The nanosecond steps never
        // reach the next millisecond boundary.
        let packed_ns = |ms: i64, over: usize| -> i64 {
            sc_time::compose(ms, (SLOTS_PER_MS - 1) as u32) + over.min(SLOTS_PER_MS - 1) as i64
        };
        let slot_ns = |slot: usize| -> i64 {
            if slot < SLOTS_PER_MS {
                sc_time::compose(m, slot as u32)
            } else if spill_ok {
                let over = slot - SLOTS_PER_MS;
                if over < SLOTS_PER_MS {
                    sc_time::compose(m + 1, over as u32)
                } else {
                    packed_ns(m + 1, over - (SLOTS_PER_MS - 1))
                }
            } else {
                packed_ns(m, slot - (SLOTS_PER_MS - 1))
            }
        };

        let mut out: Vec<UnifiedEvent> = Vec::with_capacity(needed);
        let mut slot = 0usize;

        if synthesized {
            // zero-record host batch: trades carry the unchanged book's BBO
            for t in &trades {
                let ns = slot_ns(slot);
                slot += 1;
                out.push(self.emit_trade(*t, ns));
            }
            return out;
        }

        for (batch_index, batch) in batches.iter().enumerate() {
            for r in &batch.records {
                let ns = slot_ns(slot);
                slot += 1;
                if let Some(kind) = self.book.apply(r) {
                    self.sink.record(Anomaly::new(
                        kind,
                        ns,
                        format!("{} price={} qty={}", r.command, r.price, r.quantity),
                    ));
                }
                let mut rec = *r;
                rec.dt_us = sc_time::to_platform_us(ns);
                out.push(UnifiedEvent {
                    ns,
                    kind: EventKind::DepthRecord {
                        record: rec,
                        batch_seq: self.batch_seq,
                    },
                });
            }
            if self.book.is_crossed() {
                self.sink.record(Anomaly::new(
                    AnomalyKind::CrossedBook,
                    sc_time::ns_of_ms(m),
                    format!("{}", self.book),
                ));
            }

            // one injected marker per input batch so the rewritten trade file
            // covers the same event sequence
            let ns = slot_ns(slot);
            slot += 1;
            let marker = ScidRecord {
                dt_us: sc_time::to_platform_us(ns),
                open: f32::from_bits(DEPTH_MARKER_BITS),
                high: self.book.best_ask().map(|q| q.price).unwrap_or(0.0),
                low: self.book.best_bid().map(|q| q.price).unwrap_or(0.0),
                close: 0.0,
                num_trades: 0,
                total_volume: 0,
                bid_volume: 0,
                ask_volume: 0,
            };
            self.stats.injected_markers += 1;
            self.stats.trades_out += 1;
            out.push(UnifiedEvent {
                ns,
                kind: EventKind::Trade(marker),
            });

            for (t_idx, t) in trades.iter().enumerate() {
                if attach[t_idx] != batch_index {
                    continue;
                }
                let ns = slot_ns(slot);
                slot += 1;
                out.push(self.emit_trade(*t, ns));
            }
            self.batch_seq += 1;
        }

        out
    }

    /// Reassign the timestamp, overwrite the BBO where the record kind calls
    /// for it, and wrap into an event.
    fn emit_trade(&mut self, mut rec: ScidRecord, ns: i64) -> UnifiedEvent {
        rec.dt_us = sc_time::to_platform_us(ns);
        let kind = rec.kind();
        if matches!(kind, TradeKind::SingleTrade | TradeKind::FirstSubTrade) {
            rec.high = self.book.best_ask().map(|q| q.price).unwrap_or(0.0);
            rec.low = self.book.best_bid().map(|q| q.price).unwrap_or(0.0);
        }
        self.stats.trades_out += 1;
        UnifiedEvent {
            ns,
            kind: if kind == TradeKind::Aggregated {
                EventKind::AggregateBar(rec)
            } else {
                EventKind::Trade(rec)
            },
        }
    }

    // ------------------------------------------------------------------
    // trade-to-batch resolution
    // ------------------------------------------------------------------

    /// Attach each trade of the bucket to a batch index. The cursor is
    /// monotone: a trade never lands on an earlier batch than its
    /// predecessor, which preserves trade file order in the output.
    fn resolve_trades(
        &mut self,
        m: i64,
        batches: &[DepthBatch],
        trades: &[ScidRecord],
    ) -> Vec<usize> {
        if batches.is_empty() || trades.is_empty() {
            return vec![0; trades.len()];
        }

        // prefix book states: snaps[i] is the book before batch i applies
        let mut snaps: Vec<Book> = Vec::with_capacity(batches.len() + 1);
        snaps.push(self.book.clone());
        for batch in batches {
            let mut next = snaps.last().expect("seeded").clone();
            for r in &batch.records {
                let _ = next.apply(r); // anomalies are reported on the live pass
            }
            snaps.push(next);
        }

        let mut cursor = 0usize;
        let mut attach = Vec::with_capacity(trades.len());
        for t in trades {
            let idx = if !t.is_tick() {
                cursor
            } else if batches.len() == 1 {
                self.stats.matched_single_batch += 1;
                0
            } else {
                self.resolve_tick(m, t, batches, &snaps, cursor)
            };
            cursor = idx;
            attach.push(idx);
        }
        attach
    }

    fn resolve_tick(
        &mut self,
        m: i64,
        t: &ScidRecord,
        batches: &[DepthBatch],
        snaps: &[Book],
        cursor: usize,
    ) -> usize {
        let sides = inferred_sides(t);

        // earliest unconsumed batch with an exact volume match wins
        for i in cursor..batches.len() {
            if exact_match(t, &batches[i], &snaps[i], &sides) {
                self.stats.matched_exact += 1;
                return i;
            }
        }

        // otherwise a single batch whose BBO brackets the trade price
        let bracketing: Vec<usize> = (cursor..batches.len())
            .filter(|&i| brackets(&snaps[i + 1], t.close))
            .collect();
        if bracketing.len() == 1 {
            self.stats.matched_bracket += 1;
            return bracketing[0];
        }

        self.stats.unresolved += 1;
        self.sink.record(Anomaly::new(
            AnomalyKind::UnresolvedTrade,
            sc_time::ns_of_ms(m),
            format!(
                "close={} vol={} trades={} candidates={}",
                t.close,
                t.total_volume,
                t.num_trades,
                batches.len() - cursor
            ),
        ));
        batches.len() - 1
    }
}

/// Book side a tick consumed liquidity from. A single trade at the ask was
/// buyer-initiated, at the bid seller-initiated; when the price matches
/// neither quote both sides are candidates.
fn inferred_sides(t: &ScidRecord) -> Vec<Side> {
    if t.kind() == TradeKind::SingleTrade {
        if t.close.to_bits() == t.high.to_bits() {
            return vec![Side::Ask];
        }
        if t.close.to_bits() == t.low.to_bits() {
            return vec![Side::Bid];
        }
    }
    vec![Side::Bid, Side::Ask]
}

/// Does the batch consume exactly the trade's volume at the trade price?
///
/// Replays the batch over a probe book and sums what the modifications and
/// deletions removed at that price, sequentially. A level the batch itself
/// posted and then consumed counts, which a plain before/after diff would
/// miss.
fn exact_match(t: &ScidRecord, batch: &DepthBatch, before: &Book, sides: &[Side]) -> bool {
    for side in sides {
        let mut probe = before.clone();
        let mut consumed: u64 = 0;
        let mut touching: u32 = 0;
        for r in &batch.records {
            let relevant = r.command.is_modify_or_delete()
                && r.command.side() == Some(*side)
                && r.price.to_bits() == t.close.to_bits();
            if relevant {
                touching += 1;
                let resting = probe
                    .depth_of(*side, t.close)
                    .map(|l| l.quantity)
                    .unwrap_or(0);
                let remaining = match r.command {
                    DepthCommand::DeleteBidLevel | DepthCommand::DeleteAskLevel => 0,
                    _ => r.quantity,
                };
                consumed += resting.saturating_sub(remaining) as u64;
            }
            let _ = probe.apply(r);
        }
        if touching > 0
            && consumed == t.total_volume as u64
            && touching <= t.num_trades.max(1)
        {
            return true;
        }
    }
    false
}

/// Does the post-batch book bracket the price? At least one side must be
/// populated; an empty side does not constrain.
fn brackets(book: &Book, price: f32) -> bool {
    let bid = book.best_bid();
    let ask = book.best_ask();
    if bid.is_none() && ask.is_none() {
        return false;
    }
    bid.map_or(true, |q| q.price <= price) && ask.map_or(true, |q| price <= q.price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DepthCommand, DepthRecord, END_OF_BATCH};
    use crate::sync::diagnostics::AnomalyCounter;
    use std::sync::Arc;

    fn drec(dt_us: u64, command: DepthCommand, price: f32, qty: u32, eob: bool) -> DepthRecord {
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

    fn batch(records: Vec<DepthRecord>) -> DepthBatch {
        DepthBatch { records }
    }

    fn single_trade(dt_us: u64, price: f32, bid: f32, ask: f32, vol: u32) -> ScidRecord {
        ScidRecord {
            dt_us,
            open: 0.0,
            high: ask,
            low: bid,
            close: price,
            num_trades: 1,
            total_volume: vol,
            bid_volume: 0,
            ask_volume: vol,
        }
    }

    fn sync_all(
        trades: Vec<ScidRecord>,
        batches: Vec<DepthBatch>,
    ) -> (Vec<UnifiedEvent>, SynchronizerStats, Arc<AnomalyCounter>) {
        let counter = AnomalyCounter::shared();
        let mut sync = Synchronizer::new(
            trades.into_iter().map(Ok),
            batches.into_iter().map(Ok),
            counter.clone(),
        );
        let mut events = Vec::new();
        while let Some(bucket) = sync.next_bucket() {
            events.extend(bucket.unwrap());
        }
        assert_eq!(sync.state(), SyncState::Done);
        (events, sync.stats().clone(), counter)
    }

    fn trade_records(events: &[UnifiedEvent]) -> Vec<ScidRecord> {
        events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::Trade(r) | EventKind::AggregateBar(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_batch_single_trade() {
        // batch consumes the ask level the trade lifted
        let b = batch(vec![
            drec(1_000_000, DepthCommand::AddBidLevel, 100.00, 5, false),
            drec(1_000_000, DepthCommand::AddAskLevel, 100.25, 3, false),
            drec(1_000_000, DepthCommand::DeleteAskLevel, 100.25, 0, true),
        ]);
        let t = single_trade(1_000_123, 100.25, 100.00, 100.25, 3);
        let (events, stats, _) = sync_all(vec![t], vec![b]);

        // 3 depth records + 1 marker + 1 trade
        assert_eq!(events.len(), 5);
        assert_eq!(stats.matched_single_batch, 1);
        assert_eq!(stats.injected_markers, 1);

        let trades = trade_records(&events);
        assert_eq!(trades.len(), 2);
        // marker first, then the trade
        assert_eq!(trades[0].kind(), TradeKind::DepthMarker);
        let rewritten = trades[1];
        assert_eq!(rewritten.kind(), TradeKind::SingleTrade);
        // ask side emptied, bid survives
        assert_eq!(rewritten.high, 0.0);
        assert_eq!(rewritten.low, 100.00);
        assert_eq!(rewritten.close, 100.25);
        assert_eq!(rewritten.total_volume, 3);
    }

    #[test]
    fn test_two_batches_trade_matches_second() {
        let ms_us = 2_000_000u64;
        let b1 = batch(vec![drec(ms_us, DepthCommand::AddBidLevel, 101.00, 9, true)]);
        let b2 = batch(vec![
            drec(ms_us, DepthCommand::AddAskLevel, 101.00, 4, false),
            drec(ms_us, DepthCommand::DeleteAskLevel, 101.00, 0, true),
        ]);
        // volume 4 only matches the second batch's delete
        let t = single_trade(ms_us + 7, 101.00, 100.75, 101.00, 4);
        let (events, stats, _) = sync_all(vec![t], vec![b1, b2]);

        assert_eq!(stats.matched_exact, 1);
        // b1 rec, b1 marker, b2 rec, b2 rec, b2 marker, trade
        assert_eq!(events.len(), 6);
        let sub_us: Vec<u64> = events
            .iter()
            .map(|e| sc_time::to_platform_us(e.ns) % 1_000)
            .collect();
        assert_eq!(sub_us, vec![0, 1, 2, 3, 4, 5]);
        // the trade is the final event
        match &events[5].kind {
            EventKind::Trade(r) => assert_eq!(r.kind(), TradeKind::SingleTrade),
            other => panic!("expected trade, got {:?}", other),
        }
    }

    #[test]
    fn test_orphan_trade_bucket_synthesizes_host() {
        let t = single_trade(3_000_250, 99.50, 99.25, 99.50, 2);
        let (events, stats, counter) = sync_all(vec![t], vec![]);
        assert_eq!(events.len(), 1);
        assert_eq!(stats.injected_markers, 0);
        assert_eq!(counter.count_of(AnomalyKind::OrphanTradeBucket), 1);
        // empty book: BBO overwritten to zero
        match &events[0].kind {
            EventKind::Trade(r) => {
                assert_eq!(r.high, 0.0);
                assert_eq!(r.low, 0.0);
                assert_eq!(r.close, 99.50);
            }
            other => panic!("expected trade, got {:?}", other),
        }
    }

    #[test]
    fn test_aggregate_passes_through_unchanged() {
        let bar = ScidRecord {
            dt_us: 4_000_000,
            open: 100.0,
            high: 101.5,
            low: 99.5,
            close: 101.0,
            num_trades: 42,
            total_volume: 500,
            bid_volume: 230,
            ask_volume: 270,
        };
        let b = batch(vec![drec(4_000_000, DepthCommand::AddBidLevel, 100.0, 5, true)]);
        let (events, stats, _) = sync_all(vec![bar], vec![b]);

        assert_eq!(stats.aggregates_in, 1);
        let bars: Vec<_> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::AggregateBar(r) => Some(*r),
                _ => None,
            })
            .collect();
        assert_eq!(bars.len(), 1);
        // everything except the timestamp is untouched
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 101.5);
        assert_eq!(bars[0].low, 99.5);
        assert_eq!(bars[0].num_trades, 42);
        assert_eq!(bars[0].total_volume, 500);
    }

    #[test]
    fn test_timeline_strictly_increasing_across_buckets() {
        let mut batches = Vec::new();
        let mut trades = Vec::new();
        for ms in 0..5u64 {
            let us = 10_000_000 + ms * 1_000;
            batches.push(batch(vec![
                drec(us, DepthCommand::AddBidLevel, 100.0 - ms as f32, 5, false),
                drec(us, DepthCommand::AddAskLevel, 100.25 + ms as f32, 5, true),
            ]));
            trades.push(single_trade(us + 17, 100.25, 100.0, 100.25, 5));
        }
        let (events, stats, _) = sync_all(trades, batches);
        assert_eq!(stats.buckets, 5);
        for pair in events.windows(2) {
            assert!(pair[0].ns < pair[1].ns, "{} !< {}", pair[0].ns, pair[1].ns);
        }
    }

    #[test]
    fn test_unresolved_trade_falls_to_last_batch() {
        let ms_us = 6_000_000u64;
        let b1 = batch(vec![drec(ms_us, DepthCommand::AddBidLevel, 90.00, 5, true)]);
        let b2 = batch(vec![drec(ms_us, DepthCommand::AddBidLevel, 91.00, 5, true)]);
        // price 80 below both books' bids, volume matching nothing
        let t = single_trade(ms_us + 3, 80.00, 79.75, 80.00, 7);
        let (events, stats, counter) = sync_all(vec![t], vec![b1, b2]);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(counter.count_of(AnomalyKind::UnresolvedTrade), 1);
        // trade is the very last event (attached to the last batch)
        match &events.last().unwrap().kind {
            EventKind::Trade(r) => assert_eq!(r.close, 80.00),
            other => panic!("expected trade, got {:?}", other),
        }
    }

    #[test]
    fn test_overflow_spills_into_free_millisecond() {
        // one batch of 1100 records; ms+1 is silent in both streams
        let ms_us = 7_000_000u64;
        let mut records = Vec::new();
        for i in 0..1100u32 {
            records.push(drec(
                ms_us,
                DepthCommand::AddBidLevel,
                50.0 + i as f32 * 0.25,
                1,
                i == 1099,
            ));
        }
        let (events, _, counter) = sync_all(vec![], vec![batch(records)]);
        assert_eq!(events.len(), 1101);
        for pair in events.windows(2) {
            assert!(pair[0].ns < pair[1].ns);
        }
        // spilled events sit in the following millisecond
        let first_ms = sc_time::ms_of(events[0].ns);
        let last_ms = sc_time::ms_of(events.last().unwrap().ns);
        assert_eq!(last_ms, first_ms + 1);
        assert_eq!(counter.count_of(AnomalyKind::BucketOverflow), 0);
    }

    #[test]
    fn test_overflow_packs_tail_when_next_millisecond_is_occupied() {
        let ms_us = 8_000_000u64;
        let mut records = Vec::new();
        for i in 0..1100u32 {
            records.push(drec(
                ms_us,
                DepthCommand::AddBidLevel,
                50.0 + i as f32 * 0.25,
                1,
                i == 1099,
            ));
        }
        let blocker = batch(vec![drec(
            ms_us + 1_000,
            DepthCommand::AddAskLevel,
            200.0,
            1,
            true,
        )]);
        let (events, _, counter) = sync_all(vec![], vec![batch(records), blocker]);
        assert_eq!(counter.count_of(AnomalyKind::BucketOverflow), 1);
        // the emitted timeline stays strictly monotonic even through the
        // packed tail
        for pair in events.windows(2) {
            assert!(pair[0].ns < pair[1].ns, "{} !< {}", pair[0].ns, pair[1].ns);
        }
        // the tail saturates the on-disk microsecond at 999 without leaving
        // the bucket's millisecond
        let m = sc_time::ms_of(events[0].ns);
        for ev in &events[999..=1100] {
            assert_eq!(sc_time::to_platform_us(ev.ns) % 1_000, 999);
            assert_eq!(sc_time::ms_of(ev.ns), m);
        }
        // packed events advance by single nanoseconds past slot 999
        assert_eq!(events[1000].ns, sc_time::compose(m, 999) + 1);
        assert_eq!(events[1100].ns - events[999].ns, 101);
    }

    #[test]
    fn test_trade_stream_truncation_drains_depth() {
        let counter = AnomalyCounter::shared();
        let trades: Vec<Result<ScidRecord, CodecError>> = vec![
            Ok(single_trade(9_000_100, 100.25, 100.0, 100.25, 1)),
            Err(CodecError::TruncatedStream("test".into())),
        ];
        let batches = vec![
            batch(vec![drec(9_000_000, DepthCommand::AddAskLevel, 100.25, 1, true)]),
            batch(vec![drec(9_005_000, DepthCommand::AddBidLevel, 100.00, 1, true)]),
        ];
        let mut sync = Synchronizer::new(
            trades.into_iter(),
            batches.into_iter().map(Ok),
            counter,
        );
        let mut events = Vec::new();
        while let Some(bucket) = sync.next_bucket() {
            events.extend(bucket.unwrap());
        }
        assert!(sync.stats().truncated_trades);
        assert!(!sync.stats().truncated_depth);
        // both depth batches still produced their records and markers
        assert_eq!(sync.stats().injected_markers, 2);
        assert_eq!(sync.batches_emitted(), 2);
    }
}
