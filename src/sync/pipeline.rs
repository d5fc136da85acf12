// Run orchestration
// Wires locator -> codecs -> synchronizer -> writers for one (symbol, day),
// writes outputs under temporary names, renames them atomically on success,
// and leaves a per-run manifest beside them

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::codec::{
    CodecError, DepthWriter, ScidHeader, ScidWriter, DepthReader, ScidReader,
};
use crate::core::config::SyncConfig;
use crate::core::sc_time;
use crate::core::types::{EventKind, UnifiedEvent, DEPTH_MARKER_BITS};
use crate::sync::diagnostics::{
    Anomaly, AnomalyCounter, AnomalySummary, DiagnosticsSink, SharedSink,
};
use crate::sync::locator::{ClockSource, FileLocator, LocatorError, SyncPaths};
use crate::sync::synchronizer::{Synchronizer, SynchronizerStats};
use crate::sync::verifier::{self, ManifestHash, VerifyExpectations, VerifyReport};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Locator(#[from] LocatorError),
    #[error("failed to rename {from} -> {to}: {source}")]
    OutputRenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One requested run.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub symbol: String,
    pub day: NaiveDate,
    pub dry_run: bool,
    pub run_id: Option<String>,
}

/// Terminal state of a run. Fatal failures surface as `Err(SyncError)` from
/// [`run_sync`]; callers fold those into `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    PartiallyComplete(AnomalySummary),
    Failed(String),
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Complete => write!(f, "Complete"),
            RunStatus::PartiallyComplete(summary) => {
                write!(f, "PartiallyComplete ({})", summary)
            }
            RunStatus::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// Everything a caller needs to know about a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub paths: SyncPaths,
    pub stats: SynchronizerStats,
    pub anomalies: AnomalySummary,
    pub manifest_hash: u64,
    pub verify: Option<VerifyReport>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RunReport({}, trades_in={}, batches_in={}, trades_out={}, {})",
            self.status,
            self.stats.trades_in,
            self.stats.batches_in,
            self.stats.trades_out,
            self.anomalies
        )
    }
}

/// Forwards anomalies to the run's counter and, when present, an external
/// observer (the diagnostics collaborator).
struct FanoutSink {
    counter: Arc<AnomalyCounter>,
    observer: Option<SharedSink>,
}

impl DiagnosticsSink for FanoutSink {
    fn record(&self, anomaly: Anomaly) {
        if let Some(observer) = &self.observer {
            observer.record(anomaly.clone());
        }
        self.counter.record(anomaly);
    }
}

pub fn run_sync(
    cfg: &SyncConfig,
    locator: &dyn FileLocator,
    clock: &dyn ClockSource,
    req: &SyncRequest,
) -> Result<RunReport, SyncError> {
    run_sync_with_observer(cfg, locator, clock, req, None)
}

pub fn run_sync_with_observer(
    cfg: &SyncConfig,
    locator: &dyn FileLocator,
    clock: &dyn ClockSource,
    req: &SyncRequest,
    observer: Option<SharedSink>,
) -> Result<RunReport, SyncError> {
    let paths = locator.locate(&req.symbol, req.day)?;
    info!(
        symbol = %req.symbol,
        day = %req.day,
        stem = %paths.stem,
        scid_in = %paths.scid_in.display(),
        depth_in = %paths.depth_in.display(),
        dry_run = req.dry_run,
        "sync plan"
    );

    if req.dry_run {
        return Ok(RunReport {
            status: RunStatus::Complete,
            paths,
            stats: SynchronizerStats::default(),
            anomalies: AnomalySummary::default(),
            manifest_hash: 0,
            verify: None,
        });
    }

    let counter = AnomalyCounter::shared();
    let sink: SharedSink = Arc::new(FanoutSink {
        counter: counter.clone(),
        observer,
    });

    let (day_start_ns, day_end_ns) = clock.day_bounds_ns(req.day);
    let scid_reader = ScidReader::open(&paths.scid_in)?;
    let depth_reader = DepthReader::open(&paths.depth_in)?.with_day_window_us(
        sc_time::to_platform_us(day_start_ns),
        sc_time::to_platform_us(day_end_ns),
    );

    // input headers are reproduced verbatim; an empty trade input gets the
    // canonical header
    let scid_header = scid_reader
        .header()
        .cloned()
        .unwrap_or_else(ScidHeader::new_default);
    let depth_header = depth_reader.header().clone();

    let scid_tmp = tmp_path(&paths.scid_out);
    let depth_tmp = tmp_path(&paths.depth_out);
    let mut scid_writer = ScidWriter::create(&scid_tmp, &scid_header)?;
    let mut depth_writer = DepthWriter::create(&depth_tmp, &depth_header)?;

    let mut sync = Synchronizer::new(scid_reader, depth_reader, sink);
    let mut hash = ManifestHash::new();

    let stream_result: Result<(), CodecError> = loop {
        match sync.next_bucket() {
            None => break Ok(()),
            Some(Err(e)) => break Err(e),
            Some(Ok(events)) => {
                if let Err(e) =
                    write_bucket(&events, &mut scid_writer, &mut depth_writer, &mut hash)
                {
                    break Err(e);
                }
            }
        }
    };

    if let Err(e) = stream_result {
        // fatal: no partial outputs survive
        error!(error = %e, "sync failed, removing partial outputs");
        drop(scid_writer);
        drop(depth_writer);
        fs::remove_file(&scid_tmp).ok();
        fs::remove_file(&depth_tmp).ok();
        return Err(e.into());
    }

    scid_writer.finish()?;
    depth_writer.finish()?;
    rename_output(&scid_tmp, &paths.scid_out)?;
    if let Err(e) = rename_output(&depth_tmp, &paths.depth_out) {
        fs::remove_file(&paths.scid_out).ok();
        fs::remove_file(&depth_tmp).ok();
        return Err(e);
    }

    let stats = sync.stats().clone();
    let anomalies = counter.summary();
    let status = if stats.truncated() {
        RunStatus::PartiallyComplete(anomalies.clone())
    } else {
        RunStatus::Complete
    };

    let expect = VerifyExpectations {
        trades_in: stats.trades_in,
        depth_records_in: stats.depth_records_in,
        batches_in: stats.batches_in,
    };
    let verify = match verifier::verify(&paths.scid_out, &paths.depth_out, &expect) {
        Ok(report) => {
            if !report.passed() {
                warn!(?report, "verification found problems");
            }
            if report.manifest_hash != hash.value() {
                warn!(
                    written = format_args!("{:#018x}", hash.value()),
                    reread = format_args!("{:#018x}", report.manifest_hash),
                    "manifest hash drifted between write and re-read"
                );
            }
            Some(report)
        }
        Err(e) => {
            error!(error = %e, "verifier could not re-read outputs");
            None
        }
    };

    let report = RunReport {
        status,
        paths,
        stats,
        anomalies,
        manifest_hash: hash.value(),
        verify,
    };

    if cfg.write_manifest {
        if let Err(e) = fs::write(&report.paths.manifest, render_manifest(req, &report)) {
            warn!(error = %e, path = %report.paths.manifest.display(), "manifest write failed");
        }
    }

    info!(%report, "sync done");
    Ok(report)
}

/// Write one bucket of unified events: depth records re-batched by their
/// batch index, trades and bars appended to the trade output, hash folded in
/// emission order.
fn write_bucket<SW: std::io::Write, DW: std::io::Write>(
    events: &[UnifiedEvent],
    scid_writer: &mut ScidWriter<SW>,
    depth_writer: &mut DepthWriter<DW>,
    hash: &mut ManifestHash,
) -> Result<(), CodecError> {
    let mut pending = Vec::new();
    let mut pending_seq: Option<u64> = None;
    for ev in events {
        match &ev.kind {
            EventKind::DepthRecord { record, batch_seq } => {
                if pending_seq != Some(*batch_seq) && !pending.is_empty() {
                    depth_writer.write_batch(&pending)?;
                    pending.clear();
                }
                pending_seq = Some(*batch_seq);
                pending.push(*record);
                hash.fold_depth(record);
            }
            EventKind::Trade(rec) | EventKind::AggregateBar(rec) => {
                if !pending.is_empty() {
                    depth_writer.write_batch(&pending)?;
                    pending.clear();
                    pending_seq = None;
                }
                scid_writer.append(rec)?;
                hash.fold_trade(rec);
            }
        }
    }
    if !pending.is_empty() {
        depth_writer.write_batch(&pending)?;
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn rename_output(from: &Path, to: &Path) -> Result<(), SyncError> {
    fs::rename(from, to).map_err(|source| SyncError::OutputRenameFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })
}

fn render_manifest(req: &SyncRequest, report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str("sierra-sync run manifest\n");
    out.push_str(&format!(
        "run_id: {}\n",
        req.run_id.as_deref().unwrap_or("-")
    ));
    out.push_str(&format!("generated_utc: {}\n", Utc::now().to_rfc3339()));
    out.push_str(&format!("symbol: {}\nday: {}\n", req.symbol, req.day));
    out.push_str(&format!("stem: {}\n", report.paths.stem));
    out.push_str(&format!("status: {}\n", report.status));
    let s = &report.stats;
    out.push_str(&format!(
        "trades_in: {}\naggregates_in: {}\nbatches_in: {}\ndepth_records_in: {}\n",
        s.trades_in, s.aggregates_in, s.batches_in, s.depth_records_in
    ));
    out.push_str(&format!(
        "trades_out: {}\ninjected_markers: {}\n",
        s.trades_out, s.injected_markers
    ));
    out.push_str(&format!("anomalies: {}\n", report.anomalies));
    out.push_str(&format!("manifest_hash: {:#018x}\n", report.manifest_hash));
    // downstream tools key on this to recognize injected records
    out.push_str(&format!(
        "injected_open_bits: {:#010x}\n",
        DEPTH_MARKER_BITS
    ));
    out
}
