// Anomaly diagnostics
// Non-fatal conditions are recorded here instead of aborting the run; the
// pipeline reports the tallies at end-of-run

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Every non-fatal condition the book and the synchronizer can repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnomalyKind {
    // book repairs
    AddOverExisting,
    ModifyMissing,
    DeleteMissing,
    NegativeOrZeroQuantity,
    // matching fallbacks
    UnresolvedTrade,
    OrphanTradeBucket,
    BucketOverflow,
    CrossedBook,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One anomaly occurrence, stamped with the nanosecond it was observed at.
#[derive(Debug, Clone)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub ns: i64,
    pub detail: String,
}

impl Anomaly {
    pub fn new(kind: AnomalyKind, ns: i64, detail: impl Into<String>) -> Self {
        Self {
            kind,
            ns,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}ns: {}", self.kind, self.ns, self.detail)
    }
}

/// Receives anomaly records as the run progresses. None of them halt
/// processing; the sink decides what to retain.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, anomaly: Anomaly);
}

pub type SharedSink = Arc<dyn DiagnosticsSink>;

/// Default sink: counts anomalies bucketed by kind.
#[derive(Default)]
pub struct AnomalyCounter {
    counts: RwLock<HashMap<AnomalyKind, u64>>,
}

impl AnomalyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn count_of(&self, kind: AnomalyKind) -> u64 {
        self.counts.read().get(&kind).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> AnomalySummary {
        let counts = self.counts.read();
        let mut by_kind: Vec<(AnomalyKind, u64)> =
            counts.iter().map(|(k, v)| (*k, *v)).collect();
        by_kind.sort();
        AnomalySummary {
            total: by_kind.iter().map(|(_, n)| n).sum(),
            by_kind,
        }
    }
}

impl DiagnosticsSink for AnomalyCounter {
    fn record(&self, anomaly: Anomaly) {
        debug!(kind = %anomaly.kind, ns = anomaly.ns, detail = %anomaly.detail, "anomaly");
        *self.counts.write().entry(anomaly.kind).or_insert(0) += 1;
    }
}

/// End-of-run tally, ordered by kind for deterministic reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnomalySummary {
    pub total: u64,
    pub by_kind: Vec<(AnomalyKind, u64)>,
}

impl fmt::Display for AnomalySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.by_kind.is_empty() {
            return write!(f, "no anomalies");
        }
        write!(f, "{} anomalies (", self.total)?;
        for (i, (kind, n)) in self.by_kind.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", kind, n)?;
        }
        write!(f, ")")
    }
}
