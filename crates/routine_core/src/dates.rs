//! Pure date arithmetic over epoch-millisecond timestamps (UTC).
//!
//! Every function here is total over well-formed timestamps and reads no
//! ambient time: callers pass `now` explicitly.

use crate::model::{Frequency, Routine, TimeOfDay};
use std::collections::HashSet;
use time::Date;

pub const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;
pub const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

/// Generation never looks further ahead than this.
pub const GENERATION_WINDOW_DAYS: i64 = 7;

const UNIX_EPOCH_JULIAN_DAY: i64 = 2_440_588;

pub fn add_days(ts: i64, days: i64) -> i64 {
    ts + days * MILLIS_PER_DAY
}

pub fn add_hours(ts: i64, hours: i64) -> i64 {
    ts + hours * MILLIS_PER_HOUR
}

fn days_since_epoch(ts: i64) -> i64 {
    ts.div_euclid(MILLIS_PER_DAY)
}

/// Day of week, 0 = Sunday .. 6 = Saturday.
pub fn weekday(ts: i64) -> u8 {
    // 1970-01-01 was a Thursday.
    (days_since_epoch(ts) + 4).rem_euclid(7) as u8
}

pub fn is_weekend(ts: i64) -> bool {
    matches!(weekday(ts), 0 | 6)
}

/// `YYYY-MM-DD` of the UTC calendar day containing `ts`. Used as the
/// dedup key for generated tasks.
pub fn normalize_to_day(ts: i64) -> String {
    let days = days_since_epoch(ts);
    i32::try_from(UNIX_EPOCH_JULIAN_DAY + days)
        .ok()
        .and_then(|julian| Date::from_julian_day(julian).ok())
        .map(|date| {
            format!(
                "{:04}-{:02}-{:02}",
                date.year(),
                u8::from(date.month()),
                date.day()
            )
        })
        .unwrap_or_else(|| format!("day{days}"))
}

/// Start of the UTC day containing `ts`.
pub fn start_of_day(ts: i64) -> i64 {
    days_since_epoch(ts) * MILLIS_PER_DAY
}

/// True when `routine` was undeferred during the 24 hours before `now`.
pub fn was_recently_undeferred(routine: &Routine, now: i64) -> bool {
    routine
        .undeferred_date
        .is_some_and(|undeferred| undeferred <= now && now - undeferred < MILLIS_PER_DAY)
}

/// Ready date of the next instance.
///
/// A routine that was just resumed and has never been completed starts
/// half a period out so restarted routines spread instead of bursting.
pub fn calculate_next_ready_date(
    routine: &Routine,
    last_completed_date: Option<i64>,
    was_recently_undeferred: bool,
    now: i64,
) -> i64 {
    let frequency_days = routine.frequency.days();
    match last_completed_date {
        None if was_recently_undeferred => add_days(now, frequency_days / 2),
        None => now,
        Some(last) => add_days(last, frequency_days),
    }
}

/// Moves `date` forward to the next `ideal_day` (0 = Sunday). Never moves
/// backwards; frequencies under a week are left alone.
pub fn adjust_to_ideal_day(date: i64, ideal_day: u8, frequency: Frequency) -> i64 {
    if !frequency.supports_ideal_day() {
        return date;
    }
    let shift = (i64::from(ideal_day % 7) - i64::from(weekday(date))).rem_euclid(7);
    add_days(date, shift)
}

/// Sunday rolls forward to Monday, Saturday rolls back to Friday.
pub fn adjust_weekend_due_date(ts: i64) -> i64 {
    match weekday(ts) {
        0 => add_days(ts, 1),
        6 => add_days(ts, -1),
        _ => ts,
    }
}

pub fn calculate_due_date(
    ready_date: i64,
    time_of_day: Option<TimeOfDay>,
    frequency: Frequency,
) -> i64 {
    if time_of_day.is_some() {
        return ready_date;
    }
    adjust_weekend_due_date(add_days(ready_date, frequency.days() - 1))
}

/// The next `count` weekday timestamps starting at `start` (inclusive).
pub fn get_business_days_ahead(start: i64, count: usize) -> Vec<i64> {
    let mut days = Vec::with_capacity(count);
    let mut cursor = start;
    while days.len() < count {
        if !is_weekend(cursor) {
            days.push(cursor);
        }
        cursor = add_days(cursor, 1);
    }
    days
}

/// Monday and Thursday of `pairs` consecutive weeks, beginning with the
/// first Monday on or after `start`.
pub fn get_twice_a_week_dates(start: i64, pairs: usize) -> Vec<i64> {
    let to_monday = (1 - i64::from(weekday(start))).rem_euclid(7);
    let monday = add_days(start, to_monday);
    (0..pairs as i64)
        .flat_map(|week| {
            let week_monday = add_days(monday, week * 7);
            [week_monday, add_days(week_monday, 3)]
        })
        .collect()
}

/// Gate every generation path goes through: no generation for deferred
/// routines, none for a day that already holds a pending instance, and
/// nothing beyond the seven-day window.
pub fn should_generate_task(
    routine: &Routine,
    existing_day_keys: &HashSet<String>,
    target_date: i64,
    now: i64,
) -> bool {
    if routine.defer {
        return false;
    }
    if existing_day_keys.contains(&normalize_to_day(target_date)) {
        return false;
    }
    target_date <= add_days(now, GENERATION_WINDOW_DAYS)
}

/// Anchors `ts` to the local hour of `time_of_day` on the same local day,
/// where local time is UTC shifted by `utc_offset_minutes`.
pub fn apply_time_of_day(ts: i64, time_of_day: TimeOfDay, utc_offset_minutes: i32) -> i64 {
    let offset = i64::from(utc_offset_minutes) * 60 * 1000;
    let local = ts + offset;
    let local_midnight = start_of_day(local);
    local_midnight + i64::from(time_of_day.hour()) * MILLIS_PER_HOUR - offset
}
