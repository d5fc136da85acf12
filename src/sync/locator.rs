// Collaborator contracts: file locator and clock source
// Resolves (symbol, day) to the four file paths of a run and supplies the
// UTC day window the depth input must fall inside

use chrono::{Datelike, NaiveDate};
use std::path::PathBuf;
use thiserror::Error;

use crate::core::config::SyncConfig;
use crate::core::sc_time;

/// CME futures month letters, January through December.
pub const MONTH_CODES: [char; 12] = [
    'F', 'G', 'H', 'J', 'K', 'M', 'N', 'Q', 'U', 'V', 'X', 'Z',
];

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("intraday file missing: {0}")]
    ScidMissing(PathBuf),
    #[error("depth file missing: {0}")]
    DepthMissing(PathBuf),
}

/// Contract identifier parts used to build filename stems, e.g. symbol "ES"
/// in September 2025 with suffix "_FUT_CME" gives stem `ESU25_FUT_CME`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractId {
    pub symbol: String,
    pub month_code: char,
    pub yy: String,
    pub suffix: String,
}

impl ContractId {
    pub fn for_day(symbol: &str, day: NaiveDate, suffix: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            month_code: MONTH_CODES[day.month0() as usize],
            yy: format!("{:02}", day.year().rem_euclid(100)),
            suffix: suffix.to_string(),
        }
    }

    pub fn stem(&self) -> String {
        format!("{}{}{}{}", self.symbol, self.month_code, self.yy, self.suffix)
    }
}

/// Everything a run needs on disk. Outputs carry the `-SYNC` suffix so they
/// never collide with platform-owned files.
#[derive(Debug, Clone)]
pub struct SyncPaths {
    pub stem: String,
    pub scid_in: PathBuf,
    pub depth_in: PathBuf,
    pub scid_out: PathBuf,
    pub depth_out: PathBuf,
    pub manifest: PathBuf,
}

/// Resolves the input and output paths for a `(symbol, day)` run.
pub trait FileLocator {
    fn locate(&self, symbol: &str, day: NaiveDate) -> Result<SyncPaths, LocatorError>;
}

/// Locator over a pair of data root directories using the platform's naming:
/// `<STEM>.scid` for intraday data and `<STEM>.<YYYY-MM-DD>.depth` for depth.
#[derive(Debug, Clone)]
pub struct DataRootLocator {
    scid_root: PathBuf,
    depth_root: PathBuf,
    suffix: String,
}

impl DataRootLocator {
    pub fn new(scid_root: PathBuf, depth_root: PathBuf, suffix: String) -> Self {
        Self {
            scid_root,
            depth_root,
            suffix,
        }
    }

    pub fn from_config(cfg: &SyncConfig) -> Self {
        Self::new(
            cfg.scid_root.clone(),
            cfg.depth_root.clone(),
            cfg.contract_suffix.clone(),
        )
    }
}

impl FileLocator for DataRootLocator {
    fn locate(&self, symbol: &str, day: NaiveDate) -> Result<SyncPaths, LocatorError> {
        let stem = ContractId::for_day(symbol, day, &self.suffix).stem();
        let date = day.format("%Y-%m-%d");

        let scid_in = self.scid_root.join(format!("{stem}.scid"));
        if !scid_in.exists() {
            return Err(LocatorError::ScidMissing(scid_in));
        }
        let depth_in = self.depth_root.join(format!("{stem}.{date}.depth"));
        if !depth_in.exists() {
            return Err(LocatorError::DepthMissing(depth_in));
        }

        Ok(SyncPaths {
            scid_out: self.scid_root.join(format!("{stem}-SYNC.scid")),
            depth_out: self.depth_root.join(format!("{stem}-SYNC.{date}.depth")),
            manifest: self.depth_root.join(format!("{stem}-SYNC.{date}.manifest")),
            stem,
            scid_in,
            depth_in,
        })
    }
}

/// Supplies the UTC day boundaries for a run. Depth files roll at
/// 00:00:00 UTC.
pub trait ClockSource {
    fn day_bounds_ns(&self, day: NaiveDate) -> (i64, i64);
}

/// The production clock: plain UTC calendar days.
#[derive(Debug, Clone, Copy, Default)]
pub struct UtcClock;

impl ClockSource for UtcClock {
    fn day_bounds_ns(&self, day: NaiveDate) -> (i64, i64) {
        sc_time::day_bounds_ns(day)
    }
}
