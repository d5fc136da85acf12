// Sync module - the depth book, pairing engine, run pipeline, and verifier

pub mod book;
pub mod diagnostics;
pub mod locator;
pub mod pipeline;
pub mod synchronizer;
pub mod verifier;

// Re-export commonly used items
pub use book::{BestQuote, Book, Level};
pub use diagnostics::{
    Anomaly, AnomalyCounter, AnomalyKind, AnomalySummary, DiagnosticsSink, SharedSink,
};
pub use locator::{
    ClockSource, ContractId, DataRootLocator, FileLocator, LocatorError, SyncPaths, UtcClock,
};
pub use pipeline::{run_sync, run_sync_with_observer, RunReport, RunStatus, SyncError, SyncRequest};
pub use synchronizer::{SyncState, Synchronizer, SynchronizerStats};
pub use verifier::{verify, ManifestHash, VerifyExpectations, VerifyReport};
