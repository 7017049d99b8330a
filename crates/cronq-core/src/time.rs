//! Wall-clock utilities for the scheduler tick.
//!
//! Mirrors pg_cron's `TimestampMinuteStart`/`TimestampMinuteEnd`/
//! `MinutesPassed` and the Vixie-cron-derived clock jump thresholds used by
//! `StartAllPendingRuns`. All matching is done in UTC; see
//! [`effective_now`] for the optional per-job offset extension.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};

/// Truncates `t` to the start of its wall-clock minute.
pub fn minute_start(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0).unwrap().with_nanosecond(0).unwrap()
}

/// Returns the start of the minute following `t`'s minute.
pub fn minute_end(t: DateTime<Utc>) -> DateTime<Utc> {
    minute_start(t) + Duration::seconds(60)
}

/// Floor-divides `(b - a)` into whole minutes; may be negative.
pub fn minutes_between(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    let seconds = (b - a).num_seconds();
    seconds.div_euclid(60)
}

/// One tick's classification of how far the wall clock has moved since the
/// previous tick, per §4.2's delta table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockProgress {
    /// `1 <= delta <= 5` minutes: ordinary forward progress.
    Progressed,
    /// `5 < delta <= 180` minutes: a DST-sized forward jump.
    JumpForward,
    /// `-180 <= delta < 0` minutes: a DST-sized backward jump.
    JumpBackward,
    /// `|delta| > 180` minutes: a clock reset, not a DST transition.
    Change,
}

/// Classifies a minute delta per the table in §4.2. The caller is expected
/// to have already short-circuited on `delta == 0`.
pub fn classify_clock(delta_minutes: i64) -> ClockProgress {
    const MINUTE_COUNT: i64 = 60;
    if delta_minutes > 3 * MINUTE_COUNT {
        ClockProgress::Change
    } else if delta_minutes > 5 {
        ClockProgress::JumpForward
    } else if delta_minutes > 0 {
        ClockProgress::Progressed
    } else if delta_minutes >= -3 * MINUTE_COUNT {
        ClockProgress::JumpBackward
    } else {
        ClockProgress::Change
    }
}

/// Applies a job's optional fixed UTC offset (the extension described in
/// §4.2/§6a) before field matching. `None` leaves `now` untouched.
pub fn effective_now(now: DateTime<Utc>, timezone_offset_hours: Option<i8>) -> DateTime<Utc> {
    match timezone_offset_hours {
        Some(hours) => now + Duration::hours(hours as i64),
        None => now,
    }
}

/// Builds a UTC timestamp from calendar fields, for use in tests.
pub fn ymd_hms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}
