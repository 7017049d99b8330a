//! Cron schedule parser.
//!
//! A Rust port of pg_cron's `entry.c` (itself derived from Vixie cron's
//! `load_entry`): parses a schedule string into a bit-matrix `Schedule`
//! instead of walking a `FILE*`-backed token stream, but preserves the
//! original grammar and error classification field-for-field.

use thiserror::Error;

pub const FIRST_SECOND: u32 = 0;
pub const LAST_SECOND: u32 = 59;
pub const FIRST_MINUTE: u32 = 0;
pub const LAST_MINUTE: u32 = 59;
pub const FIRST_HOUR: u32 = 0;
pub const LAST_HOUR: u32 = 23;
pub const FIRST_DOM: u32 = 1;
pub const LAST_DOM: u32 = 31;
pub const FIRST_MONTH: u32 = 1;
pub const LAST_MONTH: u32 = 12;
pub const FIRST_DOW: u32 = 0;
pub const LAST_DOW: u32 = 7;

/// Schedules longer than this are rejected as `CommandLen`, matching
/// pg_cron's `MAX_FILE_BUFFER_LENGTH` check in `parse_cron_entry`.
pub const MAX_SCHEDULE_LEN: usize = 4096;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DOW_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

bitflags::bitflags! {
    /// Per-schedule flags. Bit names match `include/pg_cron.h`'s `WHEN_REBOOT`
    /// and the `*_STAR` flags set by `parse_cron_entry` when a field's raw
    /// text is literally `*`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ScheduleFlags: u16 {
        const SEC_STAR    = 1 << 0;
        const MIN_STAR    = 1 << 1;
        const HR_STAR     = 1 << 2;
        const DOM_STAR    = 1 << 3;
        const DOW_STAR    = 1 << 4;
        const WHEN_REBOOT = 1 << 5;
    }
}

/// The first field to fail, mirroring `entry.c`'s `ecode_e`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleParseError {
    #[error("invalid seconds field")]
    Second,
    #[error("invalid minute field")]
    Minute,
    #[error("invalid hour field")]
    Hour,
    #[error("invalid day-of-month field")]
    Dom,
    #[error("invalid month field")]
    Month,
    #[error("invalid day-of-week field")]
    Dow,
    #[error("unrecognized @alias")]
    TimeSpec,
    #[error("schedule text exceeds maximum length")]
    CommandLen,
}

/// A parsed schedule: one bitset per field plus the flags that record
/// whether a field's raw text was a bare `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub seconds: FieldBits,
    pub minute: FieldBits,
    pub hour: FieldBits,
    pub dom: FieldBits,
    pub month: FieldBits,
    pub dow: FieldBits,
    pub flags: ScheduleFlags,
}

/// A fixed-low bitset for one cron field. `low` is the field's minimum
/// valid value (e.g. 1 for day-of-month); bit `i` represents value `i+low`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBits {
    low: u32,
    high: u32,
    bits: u64,
}

impl FieldBits {
    fn new(low: u32, high: u32) -> Self {
        FieldBits { low, high, bits: 0 }
    }

    fn set(&mut self, value: u32) -> Result<(), ()> {
        if value < self.low || value > self.high {
            return Err(());
        }
        self.bits |= 1u64 << (value - self.low);
        Ok(())
    }

    fn set_all(&mut self) {
        let span = self.high - self.low + 1;
        self.bits = if span >= 64 { u64::MAX } else { (1u64 << span) - 1 };
    }

    /// Tests whether `value` is set. `value` is the raw field value
    /// (already offset by `low`), matching `bit_test(schedule->x, n)`
    /// where the caller has already subtracted `FIRST_X`.
    pub fn test(&self, value_minus_low: i32) -> bool {
        if value_minus_low < 0 {
            return false;
        }
        let idx = value_minus_low as u32;
        if idx > self.high - self.low {
            return false;
        }
        (self.bits & (1u64 << idx)) != 0
    }
}

impl Schedule {
    fn empty() -> Self {
        Schedule {
            seconds: FieldBits::new(FIRST_SECOND, LAST_SECOND),
            minute: FieldBits::new(FIRST_MINUTE, LAST_MINUTE),
            hour: FieldBits::new(FIRST_HOUR, LAST_HOUR),
            dom: FieldBits::new(FIRST_DOM, LAST_DOM),
            month: FieldBits::new(FIRST_MONTH, LAST_MONTH),
            dow: FieldBits::new(FIRST_DOW, LAST_DOW),
            flags: ScheduleFlags::empty(),
        }
    }

    /// True for `@reboot`/`@restart` schedules, which never fire from the
    /// regular tick and instead fire once at process start (§4.5 step 1).
    pub fn is_reboot(&self) -> bool {
        self.flags.contains(ScheduleFlags::WHEN_REBOOT)
    }
}

/// Parses a schedule string: either a single `@alias` or 5 (or 6, with a
/// leading seconds field) whitespace-separated fields.
pub fn parse(text: &str) -> Result<Schedule, ScheduleParseError> {
    if text.len() >= MAX_SCHEDULE_LEN {
        return Err(ScheduleParseError::CommandLen);
    }

    let trimmed = text.trim();
    if let Some(alias) = trimmed.strip_prefix('@') {
        return parse_alias(alias);
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    let (has_seconds, rest) = match fields.len() {
        5 => (false, &fields[..]),
        6 => (true, &fields[..]),
        _ => return Err(ScheduleParseError::TimeSpec),
    };

    let mut schedule = Schedule::empty();
    let mut idx = 0;

    if has_seconds {
        let field = rest[idx];
        idx += 1;
        if field == "*" {
            schedule.flags |= ScheduleFlags::SEC_STAR;
        }
        parse_list(&mut schedule.seconds, field, None)
            .map_err(|_| ScheduleParseError::Second)?;
    }

    let minute_field = rest[idx];
    idx += 1;
    if minute_field == "*" {
        schedule.flags |= ScheduleFlags::MIN_STAR;
    }
    parse_list(&mut schedule.minute, minute_field, None).map_err(|_| ScheduleParseError::Minute)?;

    let hour_field = rest[idx];
    idx += 1;
    if hour_field == "*" {
        schedule.flags |= ScheduleFlags::HR_STAR;
    }
    parse_list(&mut schedule.hour, hour_field, None).map_err(|_| ScheduleParseError::Hour)?;

    let dom_field = rest[idx];
    idx += 1;
    if dom_field == "*" {
        schedule.flags |= ScheduleFlags::DOM_STAR;
    }
    parse_list(&mut schedule.dom, dom_field, None).map_err(|_| ScheduleParseError::Dom)?;

    let month_field = rest[idx];
    idx += 1;
    parse_list(&mut schedule.month, month_field, Some(&MONTH_NAMES))
        .map_err(|_| ScheduleParseError::Month)?;

    let dow_field = rest[idx];
    if dow_field == "*" {
        schedule.flags |= ScheduleFlags::DOW_STAR;
    }
    parse_list(&mut schedule.dow, dow_field, Some(&DOW_NAMES)).map_err(|_| ScheduleParseError::Dow)?;

    // Sundays: 0 and 7 both mean Sunday, so either bit set implies both.
    if schedule.dow.test(0) || schedule.dow.test(7) {
        let _ = schedule.dow.set(0);
        let _ = schedule.dow.set(7);
    }

    Ok(schedule)
}

fn parse_alias(alias: &str) -> Result<Schedule, ScheduleParseError> {
    let mut schedule = Schedule::empty();
    match alias {
        "reboot" | "restart" => {
            schedule.flags |= ScheduleFlags::WHEN_REBOOT;
        }
        "yearly" | "annually" => {
            let _ = schedule.minute.set(0);
            let _ = schedule.hour.set(0);
            let _ = schedule.dom.set(1);
            let _ = schedule.month.set(1);
            schedule.dow.set_all();
            schedule.flags |= ScheduleFlags::DOW_STAR;
        }
        "monthly" => {
            let _ = schedule.minute.set(0);
            let _ = schedule.hour.set(0);
            let _ = schedule.dom.set(1);
            schedule.month.set_all();
            schedule.dow.set_all();
            schedule.flags |= ScheduleFlags::DOW_STAR;
        }
        "weekly" => {
            let _ = schedule.minute.set(0);
            let _ = schedule.hour.set(0);
            schedule.dom.set_all();
            schedule.flags |= ScheduleFlags::DOM_STAR;
            schedule.month.set_all();
            let _ = schedule.dow.set(0);
        }
        "daily" | "midnight" => {
            let _ = schedule.minute.set(0);
            let _ = schedule.hour.set(0);
            schedule.dom.set_all();
            schedule.month.set_all();
            schedule.dow.set_all();
        }
        "hourly" => {
            let _ = schedule.minute.set(0);
            schedule.hour.set_all();
            schedule.dom.set_all();
            schedule.month.set_all();
            schedule.dow.set_all();
            schedule.flags |= ScheduleFlags::HR_STAR;
        }
        _ => return Err(ScheduleParseError::TimeSpec),
    }
    Ok(schedule)
}

/// `list := range ("," range)*`, mirroring `get_list`.
fn parse_list(field: &mut FieldBits, text: &str, names: Option<&[&str]>) -> Result<(), ()> {
    for range in text.split(',') {
        parse_range(field, range, names)?;
    }
    Ok(())
}

/// `range := "*" | number | number "-" number`, optionally suffixed by
/// `"/" step`. Mirrors `get_range`, including its rejection of a bare
/// `number "/" step` (step without a range).
fn parse_range(field: &mut FieldBits, text: &str, names: Option<&[&str]>) -> Result<(), ()> {
    let (base, step) = match text.split_once('/') {
        Some((base, step_text)) => {
            let step: u32 = step_text.parse().map_err(|_| ())?;
            if step == 0 {
                return Err(());
            }
            (base, Some(step))
        }
        None => (text, None),
    };

    let (lo, hi) = if base == "*" {
        (field.low, field.high)
    } else if let Some((lo_text, hi_text)) = base.split_once('-') {
        let lo = parse_number(lo_text, field.low, names)?;
        let hi = parse_number(hi_text, field.low, names)?;
        (lo, hi)
    } else {
        // Single number: no range, so a step suffix is invalid syntax
        // ("Unsupported syntax: Step specified without range" in get_range).
        if step.is_some() {
            return Err(());
        }
        let n = parse_number(base, field.low, names)?;
        return field.set(n);
    };

    if lo < field.low || lo > field.high || hi < field.low || hi > field.high {
        return Err(());
    }

    let step = step.unwrap_or(1);
    let mut i = lo;
    while i <= hi {
        field.set(i)?;
        i += step;
    }
    Ok(())
}

/// Parses a bare number or, if `names` is given, a case-insensitive
/// three-letter-prefix name resolved to `index + low`. Mirrors
/// `get_number`'s "all digits, or found in the name table" rule.
fn parse_number(text: &str, low: u32, names: Option<&[&str]>) -> Result<u32, ()> {
    if text.is_empty() {
        return Err(());
    }
    if let Some(names) = names {
        let lower = text.to_ascii_lowercase();
        for (i, name) in names.iter().enumerate() {
            if *name == lower {
                return Ok(i as u32 + low);
            }
        }
    }
    text.parse::<u32>().map_err(|_| ())
}
