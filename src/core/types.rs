// Core record types for the trade/depth synchronizer
// On-disk layouts are defined in the codec module; these are the decoded forms

use std::fmt;

// ============================================================================
// Trade (.scid) records
// ============================================================================

/// `open` bit-pattern marking a plain single trade tick.
pub const SINGLE_TRADE_BITS: u32 = 0x0000_0000;
/// `open` bit-pattern marking the first sub-trade of an unbundled aggregate.
pub const FIRST_SUB_TRADE_BITS: u32 = 0xFAE6_E78A;
/// `open` bit-pattern marking the last sub-trade of an unbundled aggregate.
pub const LAST_SUB_TRADE_BITS: u32 = 0xFAE6_E84E;
/// Quiet-NaN payload written into records this tool injects for depth
/// batches. Bitwise distinct from all three platform sentinels; documented in
/// every run manifest.
pub const DEPTH_MARKER_BITS: u32 = 0x7FC0_DEAD;

/// Classification of a trade record by the bit pattern of its `open` field.
///
/// Sentinels are compared bitwise, never by float equality: the two
/// sub-trade markers differ only in low mantissa bits and the injected
/// marker is a NaN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeKind {
    SingleTrade,
    FirstSubTrade,
    LastSubTrade,
    DepthMarker,
    Aggregated,
}

impl TradeKind {
    pub fn from_open_bits(bits: u32) -> Self {
        match bits {
            SINGLE_TRADE_BITS => TradeKind::SingleTrade,
            FIRST_SUB_TRADE_BITS => TradeKind::FirstSubTrade,
            LAST_SUB_TRADE_BITS => TradeKind::LastSubTrade,
            DEPTH_MARKER_BITS => TradeKind::DepthMarker,
            _ => TradeKind::Aggregated,
        }
    }

    /// Tick records describe individual trades; aggregated interval records
    /// and injected markers do not.
    pub fn is_tick(&self) -> bool {
        matches!(
            self,
            TradeKind::SingleTrade | TradeKind::FirstSubTrade | TradeKind::LastSubTrade
        )
    }
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One decoded 40-byte intraday record.
///
/// For tick records `high` carries the ask at the trade, `low` the bid, and
/// `close` the trade price. The microsecond component of `dt_us` is a
/// sequence counter within its millisecond, not physical time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScidRecord {
    pub dt_us: u64,
    pub open: f32,
    pub high: f32,
    pub low: f32,
    pub close: f32,
    pub num_trades: u32,
    pub total_volume: u32,
    pub bid_volume: u32,
    pub ask_volume: u32,
}

impl ScidRecord {
    pub fn kind(&self) -> TradeKind {
        TradeKind::from_open_bits(self.open.to_bits())
    }

    pub fn is_tick(&self) -> bool {
        self.kind().is_tick()
    }
}

impl fmt::Display for ScidRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ScidRecord({:?}, dt_us={}, close={}, vol={}, trades={})",
            self.kind(),
            self.dt_us,
            self.close,
            self.total_volume,
            self.num_trades
        )
    }
}

// ============================================================================
// Depth (.depth) records
// ============================================================================

/// END_OF_BATCH bit in the depth record flags byte.
pub const END_OF_BATCH: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Bid,
    Ask,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Depth stream command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DepthCommand {
    ClearBook = 1,
    AddBidLevel = 2,
    AddAskLevel = 3,
    ModifyBidLevel = 4,
    ModifyAskLevel = 5,
    DeleteBidLevel = 6,
    DeleteAskLevel = 7,
}

impl DepthCommand {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(DepthCommand::ClearBook),
            2 => Some(DepthCommand::AddBidLevel),
            3 => Some(DepthCommand::AddAskLevel),
            4 => Some(DepthCommand::ModifyBidLevel),
            5 => Some(DepthCommand::ModifyAskLevel),
            6 => Some(DepthCommand::DeleteBidLevel),
            7 => Some(DepthCommand::DeleteAskLevel),
            _ => None,
        }
    }

    /// Book side the command touches; `ClearBook` touches both and has none.
    pub fn side(&self) -> Option<Side> {
        match self {
            DepthCommand::ClearBook => None,
            DepthCommand::AddBidLevel
            | DepthCommand::ModifyBidLevel
            | DepthCommand::DeleteBidLevel => Some(Side::Bid),
            DepthCommand::AddAskLevel
            | DepthCommand::ModifyAskLevel
            | DepthCommand::DeleteAskLevel => Some(Side::Ask),
        }
    }

    pub fn is_modify_or_delete(&self) -> bool {
        matches!(
            self,
            DepthCommand::ModifyBidLevel
                | DepthCommand::ModifyAskLevel
                | DepthCommand::DeleteBidLevel
                | DepthCommand::DeleteAskLevel
        )
    }
}

impl fmt::Display for DepthCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One decoded 24-byte market depth record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRecord {
    pub dt_us: u64,
    pub command: DepthCommand,
    pub flags: u8,
    pub num_orders: u16,
    pub price: f32,
    pub quantity: u32,
    pub reserved: u32,
}

impl DepthRecord {
    pub fn is_end_of_batch(&self) -> bool {
        self.flags & END_OF_BATCH != 0
    }
}

impl fmt::Display for DepthRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DepthRecord({}, dt_us={}, price={}, qty={}, orders={}{})",
            self.command,
            self.dt_us,
            self.price,
            self.quantity,
            self.num_orders,
            if self.is_end_of_batch() { ", EOB" } else { "" }
        )
    }
}

/// A maximal run of depth records closed by an END_OF_BATCH flag. In
/// platform-written files every record of a batch shares one timestamp;
/// rewritten files carry per-record microsecond counters instead. Within a
/// batch every bid-side record precedes every ask-side record; either side
/// may be empty.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthBatch {
    pub records: Vec<DepthRecord>,
}

impl DepthBatch {
    pub fn dt_us(&self) -> u64 {
        self.records.first().map(|r| r.dt_us).unwrap_or(0)
    }

    /// Snapshot batches begin with CLEAR_BOOK and replace the running book.
    pub fn is_snapshot(&self) -> bool {
        self.records
            .first()
            .map(|r| r.command == DepthCommand::ClearBook)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// Unified events
// ============================================================================

/// What a unified event carries.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// An input tick or an injected depth-marker record.
    Trade(ScidRecord),
    /// An aggregated interval record, passed through unchanged.
    AggregateBar(ScidRecord),
    /// One depth record, tagged with its output batch index for re-batching.
    DepthRecord { record: DepthRecord, batch_seq: u64 },
}

impl EventKind {
    /// Stable one-byte tag used by the manifest hash.
    pub fn tag(&self) -> u8 {
        match self {
            EventKind::Trade(_) => 0,
            EventKind::DepthRecord { .. } => 1,
            EventKind::AggregateBar(_) => 2,
        }
    }
}

/// One entry of the synchronizer's output sequence. Nanosecond timestamps
/// are unique and strictly increasing across the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedEvent {
    pub ns: i64,
    pub kind: EventKind,
}

impl fmt::Display for UnifiedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EventKind::Trade(r) => write!(f, "UnifiedEvent(ns={}, trade {})", self.ns, r),
            EventKind::AggregateBar(r) => write!(f, "UnifiedEvent(ns={}, bar {})", self.ns, r),
            EventKind::DepthRecord { record, batch_seq } => {
                write!(f, "UnifiedEvent(ns={}, batch #{} {})", self.ns, batch_seq, record)
            }
        }
    }
}
