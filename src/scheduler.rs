//! Clock logic: trading-window checks, run cadence, and trading-day math.
//!
//! All decisions are pure over an injected `now`, so tests never have to mock
//! the wall clock. The runtime loop in `main` is a thin wrapper that calls
//! `should_run_now` and sleeps `next_check_delay`.

use crate::config::ScheduleSettings;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::time::Duration;

/// Polling cadence inside the active window
const IN_WINDOW_POLL: Duration = Duration::from_secs(60);
/// Coarser cadence outside the window to avoid busy-waiting
const OUT_OF_WINDOW_POLL: Duration = Duration::from_secs(300);
/// Explicit-times mode fires within this many minutes of a listed time
const EXPLICIT_TOLERANCE_MIN: i64 = 2;

/// Regular exchange session, market time
const REGULAR_OPEN: (u32, u32) = (9, 30);
const REGULAR_CLOSE: (u32, u32) = (16, 0);

/// Decide whether a cycle should run at `now`.
///
/// `last_run` is the persisted cursor read at cycle start; it is what makes
/// interval mode stateless here while still running once per interval, and
/// what stops explicit-times mode from firing twice inside one tolerance
/// window.
pub fn should_run_now(
    now: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    cfg: &ScheduleSettings,
) -> bool {
    if !cfg.enabled {
        return false;
    }

    let local = now.with_timezone(&cfg.timezone);
    if cfg.weekdays_only && is_weekend(local.date_naive()) {
        return false;
    }

    let hour = local.time().hour();
    if hour < cfg.start_hour || hour >= cfg.end_hour {
        return false;
    }

    let run_times = cfg.parsed_run_times();
    if !run_times.is_empty() {
        // Explicit-times mode takes precedence over the interval
        return run_times.iter().any(|t| {
            within_tolerance(local.time(), *t)
                && !already_ran_for_slot(last_run, local.date_naive(), *t, &run_times, cfg.timezone)
        });
    }

    match last_run {
        None => true,
        Some(last) => now - last >= chrono::Duration::minutes(cfg.interval_min as i64),
    }
}

/// How long the runtime loop should sleep before checking again
pub fn next_check_delay(now: DateTime<Utc>, cfg: &ScheduleSettings) -> Duration {
    if !cfg.enabled {
        return OUT_OF_WINDOW_POLL;
    }
    let local = now.with_timezone(&cfg.timezone);
    if cfg.weekdays_only && is_weekend(local.date_naive()) {
        return OUT_OF_WINDOW_POLL;
    }
    let hour = local.time().hour();
    if hour < cfg.start_hour || hour >= cfg.end_hour {
        return OUT_OF_WINDOW_POLL;
    }
    IN_WINDOW_POLL
}

fn within_tolerance(now: NaiveTime, slot: NaiveTime) -> bool {
    let diff = (now - slot).num_minutes().abs();
    diff <= EXPLICIT_TOLERANCE_MIN
}

/// A run counts against the one slot nearest to it, so slots closer together
/// than twice the tolerance do not suppress each other.
fn already_ran_for_slot(
    last_run: Option<DateTime<Utc>>,
    today: NaiveDate,
    slot: NaiveTime,
    slots: &[NaiveTime],
    tz: Tz,
) -> bool {
    match last_run {
        None => false,
        Some(last) => {
            let last_local = last.with_timezone(&tz);
            last_local.date_naive() == today
                && within_tolerance(last_local.time(), slot)
                && nearest_slot(last_local.time(), slots) == Some(slot)
        }
    }
}

fn nearest_slot(t: NaiveTime, slots: &[NaiveTime]) -> Option<NaiveTime> {
    slots.iter().copied().min_by_key(|s| (t - *s).num_seconds().abs())
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// True inside the regular 9:30-16:00 exchange session on a weekday. Orders
/// outside it must carry the extended-hours flag.
pub fn is_regular_session(now: DateTime<Utc>, tz: Tz) -> bool {
    let local = now.with_timezone(&tz);
    if is_weekend(local.date_naive()) {
        return false;
    }
    let open = NaiveTime::from_hms_opt(REGULAR_OPEN.0, REGULAR_OPEN.1, 0).unwrap();
    let close = NaiveTime::from_hms_opt(REGULAR_CLOSE.0, REGULAR_CLOSE.1, 0).unwrap();
    let t = local.time();
    t >= open && t < close
}

/// Market-timezone calendar date for `now`; entry trading days and same-day
/// round-trip checks are all anchored to this
pub fn trading_day(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Age of a holding in trading days: weekdays strictly after `entry` up to
/// and including `today`. The entry day itself is day zero.
pub fn trading_day_age(entry: NaiveDate, today: NaiveDate) -> u32 {
    if today <= entry {
        return 0;
    }
    let mut days = 0u32;
    let mut d = entry;
    while d < today {
        d = d.succ_opt().expect("date overflow");
        if !is_weekend(d) {
            days += 1;
        }
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cfg() -> ScheduleSettings {
        ScheduleSettings::default()
    }

    // 14:00 UTC is 10:00 in New York during June (EDT)
    fn june_tuesday(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 4, hour, min, 0).unwrap()
    }

    #[test]
    fn test_runs_inside_window_interval_mode() {
        let now = june_tuesday(14, 0);
        assert!(should_run_now(now, None, &cfg()));
    }

    #[test]
    fn test_interval_mode_respects_cursor() {
        let mut c = cfg();
        c.interval_min = 30;
        let now = june_tuesday(14, 0);
        let recent = june_tuesday(13, 45);
        let stale = june_tuesday(13, 15);
        assert!(!should_run_now(now, Some(recent), &c));
        assert!(should_run_now(now, Some(stale), &c));
    }

    #[test]
    fn test_outside_window_never_runs() {
        // 03:00 New York
        let now = Utc.with_ymd_and_hms(2024, 6, 4, 7, 0, 0).unwrap();
        assert!(!should_run_now(now, None, &cfg()));
        assert_eq!(next_check_delay(now, &cfg()), OUT_OF_WINDOW_POLL);
    }

    #[test]
    fn test_weekend_never_runs() {
        // Saturday noon New York
        let now = Utc.with_ymd_and_hms(2024, 6, 8, 16, 0, 0).unwrap();
        assert!(!should_run_now(now, None, &cfg()));
    }

    #[test]
    fn test_disabled_never_runs() {
        let mut c = cfg();
        c.enabled = false;
        assert!(!should_run_now(june_tuesday(14, 0), None, &c));
    }

    #[test]
    fn test_explicit_times_take_precedence() {
        let mut c = cfg();
        c.interval_min = 1;
        c.run_times = vec!["09:35".to_string()];
        // 10:00 New York is nowhere near 09:35
        assert!(!should_run_now(june_tuesday(14, 0), None, &c));
        // 09:36 New York is within the 2-minute tolerance
        assert!(should_run_now(june_tuesday(13, 36), None, &c));
    }

    #[test]
    fn test_explicit_times_fire_once_per_slot() {
        let mut c = cfg();
        c.run_times = vec!["09:35".to_string()];
        let first = june_tuesday(13, 35);
        let second = june_tuesday(13, 36);
        assert!(should_run_now(first, None, &c));
        assert!(!should_run_now(second, Some(first), &c));
    }

    #[test]
    fn test_adjacent_slots_both_fire() {
        let mut c = cfg();
        c.run_times = vec!["09:35".to_string(), "09:38".to_string()];
        // 09:35 fires, then 09:38 must still fire even though the first
        // run is within tolerance of both slots
        let first = june_tuesday(13, 36);
        let second = june_tuesday(13, 38);
        assert!(should_run_now(first, None, &c));
        assert!(should_run_now(second, Some(first), &c));
    }

    #[test]
    fn test_in_window_delay_is_fine_grained() {
        assert_eq!(next_check_delay(june_tuesday(14, 0), &cfg()), IN_WINDOW_POLL);
    }

    #[test]
    fn test_regular_session_bounds() {
        let tz = chrono_tz::America::New_York;
        // 09:29 New York
        assert!(!is_regular_session(june_tuesday(13, 29), tz));
        // 09:30 New York
        assert!(is_regular_session(june_tuesday(13, 30), tz));
        // 16:00 New York
        assert!(!is_regular_session(june_tuesday(20, 0), tz));
    }

    #[test]
    fn test_trading_day_age_skips_weekends() {
        let fri = NaiveDate::from_ymd_opt(2024, 6, 7).unwrap();
        let mon = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let wed = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();
        assert_eq!(trading_day_age(fri, fri), 0);
        assert_eq!(trading_day_age(fri, mon), 1);
        assert_eq!(trading_day_age(fri, wed), 3);
    }
}
