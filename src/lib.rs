//! Sierra trade/depth synchronizer library.
//!
//! This crate ingests the two market-data files Sierra Chart writes for one
//! futures contract and one trading day - the intraday tick file (`.scid`)
//! and the per-day market depth file (`.depth`) - and rewrites both so their
//! records sit on a single, strictly monotonic nanosecond timeline:
//!
//! - `core`: record types, sentinel bit-patterns, the 1899-epoch time model,
//!   configuration and logging setup
//! - `codec`: byte-exact readers and writers for both file formats
//! - `sync`: the depth book, the pairing engine that resolves trades into
//!   depth batches, the run pipeline, and the end-of-run verifier
//!
//! The `sierra-sync` binary in `src/bin` is a thin CLI over
//! [`sync::pipeline::run_sync`].

pub mod codec;
pub mod core;
pub mod sync;
