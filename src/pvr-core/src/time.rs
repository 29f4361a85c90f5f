// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! Calendar and recurrence arithmetic.
//!
//! All recurrence math operates on broken-down local time, not on raw
//! instant arithmetic: a step is applied to the calendar fields and the
//! result renormalized through an instant round-trip, so month/day
//! wraparound and DST transitions are resolved by the local calendar
//! rather than by adding a fixed number of seconds. The wall-clock hour
//! and minute are preserved across DST transitions; the one-hour shift
//! on the transition day itself is accepted as a local-time artifact.

use chrono::{DateTime, Datelike, Duration, Local, Months, TimeZone, Timelike, Weekday};

use crate::job::RecurrenceType;

/// Current wall-clock instant.
pub fn now() -> DateTime<Local> {
    Local::now()
}

/// Advance `dt` by one recurrence step of `kind`, preserving wall-clock
/// hour/minute/second. Every branch renormalizes through a broken-down
/// round-trip rather than mutating a raw field in place.
pub fn advance(dt: DateTime<Local>, kind: RecurrenceType) -> DateTime<Local> {
    match kind {
        RecurrenceType::Single => dt,
        RecurrenceType::Daily => renormalize(dt + Duration::days(1)),
        RecurrenceType::Weekly => renormalize(dt + Duration::days(7)),
        RecurrenceType::Monthly => advance_one_month(dt),
        RecurrenceType::MonFri => advance_until(dt, |wd| !is_weekend(wd)),
        RecurrenceType::SatSun => advance_until(dt, is_weekend),
        RecurrenceType::MonThu => advance_until(dt, |wd| {
            matches!(
                wd,
                Weekday::Mon | Weekday::Tue | Weekday::Wed | Weekday::Thu
            )
        }),
    }
}

/// Bump `dt` forward (without changing the time-of-day) until it is the
/// first valid date for `kind`. Used once, at series creation, so that a
/// Mon-Fri series that was submitted on a Saturday starts on the
/// following Monday rather than being rejected.
pub fn first_valid_start(dt: DateTime<Local>, kind: RecurrenceType) -> DateTime<Local> {
    match kind {
        RecurrenceType::Single | RecurrenceType::Daily | RecurrenceType::Weekly => dt,
        RecurrenceType::Monthly => dt,
        RecurrenceType::MonFri => bump_until(dt, |wd| !is_weekend(wd)),
        RecurrenceType::SatSun => bump_until(dt, is_weekend),
        RecurrenceType::MonThu => bump_until(dt, |wd| {
            matches!(
                wd,
                Weekday::Mon | Weekday::Tue | Weekday::Wed | Weekday::Thu
            )
        }),
    }
}

fn is_weekend(wd: Weekday) -> bool {
    matches!(wd, Weekday::Sat | Weekday::Sun)
}

fn bump_until(mut dt: DateTime<Local>, valid: impl Fn(Weekday) -> bool) -> DateTime<Local> {
    while !valid(dt.weekday()) {
        dt = renormalize(dt + Duration::days(1));
    }
    dt
}

fn advance_until(dt: DateTime<Local>, valid: impl Fn(Weekday) -> bool) -> DateTime<Local> {
    let mut next = renormalize(dt + Duration::days(1));
    while !valid(next.weekday()) {
        next = renormalize(next + Duration::days(1));
    }
    next
}

/// Advance by one calendar month keeping the day-of-month where
/// possible (clamped to the target month's last day), then renormalize.
/// This is the explicit rewrite of the original's pointer-arithmetic
/// month bump (see DESIGN.md).
fn advance_one_month(dt: DateTime<Local>) -> DateTime<Local> {
    match dt.checked_add_months(Months::new(1)) {
        Some(next) => renormalize(next),
        None => dt,
    }
}

/// Round-trip through broken-down local time to pick up any DST
/// adjustment the underlying offset has made.
fn renormalize(dt: DateTime<Local>) -> DateTime<Local> {
    let naive = dt.naive_local();
    Local
        .from_local_datetime(&naive)
        .single()
        .unwrap_or_else(|| Local.from_local_datetime(&naive).earliest().unwrap_or(dt))
}

/// Truncate to whole seconds; the journal and collision tests compare
/// at second granularity.
pub fn truncate_to_second(dt: DateTime<Local>) -> DateTime<Local> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ymd_hms(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    #[test]
    fn daily_advance_preserves_time_of_day() {
        let d = ymd_hms(2026, 1, 31, 20, 0, 0);
        let next = advance(d, RecurrenceType::Daily);
        assert_eq!((next.year(), next.month(), next.day()), (2026, 2, 1));
        assert_eq!((next.hour(), next.minute()), (20, 0));
    }

    #[test]
    fn monthly_advance_clamps_short_month() {
        let d = ymd_hms(2026, 1, 31, 20, 0, 0);
        let next = advance(d, RecurrenceType::Monthly);
        assert_eq!(next.month(), 2);
        assert!(next.day() <= 28);
    }

    #[test]
    fn mon_fri_skips_weekend() {
        // 2026-01-30 is a Friday.
        let fri = ymd_hms(2026, 1, 30, 20, 0, 0);
        assert_eq!(fri.weekday(), Weekday::Fri);
        let next = advance(fri, RecurrenceType::MonFri);
        assert_eq!(next.weekday(), Weekday::Mon);
    }

    #[test]
    fn first_valid_start_bumps_saturday_to_monday() {
        // 2026-01-31 is a Saturday.
        let sat = ymd_hms(2026, 1, 31, 20, 0, 0);
        assert_eq!(sat.weekday(), Weekday::Sat);
        let adjusted = first_valid_start(sat, RecurrenceType::MonFri);
        assert_eq!(adjusted.weekday(), Weekday::Mon);
    }

    #[test]
    fn sat_sun_only_visits_weekend() {
        let sat = ymd_hms(2026, 1, 31, 9, 0, 0);
        let next = advance(sat, RecurrenceType::SatSun);
        assert_eq!(next.weekday(), Weekday::Sun);
        let next2 = advance(next, RecurrenceType::SatSun);
        assert_eq!(next2.weekday(), Weekday::Sat);
    }
}
