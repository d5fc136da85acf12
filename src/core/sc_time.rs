// Sierra time model
// Bridges the platform's 1899-epoch microsecond clock, the internal
// nanosecond timeline, and the millisecond grid used for batch alignment

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Microseconds between 1899-12-30 00:00:00 UTC (the Sierra epoch) and the
/// Unix epoch. 25569 days exactly.
pub const SC_EPOCH_OFFSET_US: i64 = 2_209_161_600_000_000;

/// Highest sub-millisecond slot a composed timestamp may carry.
pub const MAX_SUB_MS_TICKS: u32 = 999;

/// Convert a platform microsecond count to internal Unix nanoseconds.
#[inline]
pub fn from_platform_us(us: u64) -> i64 {
    (us as i64 - SC_EPOCH_OFFSET_US) * 1_000
}

/// Convert internal Unix nanoseconds back to platform microseconds.
///
/// Sub-microsecond precision is dropped; round-trips at microsecond
/// resolution are exact.
#[inline]
pub fn to_platform_us(ns: i64) -> u64 {
    (ns.div_euclid(1_000) + SC_EPOCH_OFFSET_US) as u64
}

/// Millisecond-grid index of an internal nanosecond timestamp.
#[inline]
pub fn ms_of(ns: i64) -> i64 {
    ns.div_euclid(1_000_000)
}

/// Nanosecond timestamp at a millisecond boundary.
#[inline]
pub fn ns_of_ms(ms: i64) -> i64 {
    ms * 1_000_000
}

/// Compose a millisecond index and a sub-millisecond slot into a nanosecond
/// timestamp. The slot maps onto the low microseconds of the platform
/// encoding, so `sub_ms_ticks` must stay within `0..=999`.
#[inline]
pub fn compose(ms: i64, sub_ms_ticks: u32) -> i64 {
    debug_assert!(sub_ms_ticks <= MAX_SUB_MS_TICKS);
    ms * 1_000_000 + sub_ms_ticks as i64 * 1_000
}

/// Millisecond-grid index straight from a platform microsecond count.
#[inline]
pub fn ms_of_platform_us(us: u64) -> i64 {
    ms_of(from_platform_us(us))
}

/// UTC day bounds `[start, end)` in internal nanoseconds. Depth files roll at
/// 00:00:00 UTC, so a run's depth records must all fall inside this window.
pub fn day_bounds_ns(day: NaiveDate) -> (i64, i64) {
    let midnight = NaiveDateTime::new(day, NaiveTime::MIN);
    let start = midnight.and_utc().timestamp() * 1_000_000_000;
    (start, start + 86_400 * 1_000_000_000)
}
