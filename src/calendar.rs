use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use crate::model::{Ms, Span};

// ── Business Calendar ─────────────────────────────────────────────
//
// One implicit calendar: Monday–Friday, 08:00–20:00, UTC. All functions
// operate on Unix-millisecond instants that have already passed the
// valid-range check, so the chrono conversions below cannot fail.

pub const OPENING_HOUR: u32 = 8;
pub const CLOSING_HOUR: u32 = 20;
pub const BUSINESS_DAY_MS: Ms = 12 * 3_600_000;

fn to_utc(ms: Ms) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).expect("timestamp within validated range")
}

fn is_weekday(day: NaiveDate) -> bool {
    day.weekday().number_from_monday() <= 5
}

/// Millis of `day` at `hour`:00:00.
fn day_at_hour(day: NaiveDate, hour: u32) -> Ms {
    day.and_hms_opt(hour, 0, 0)
        .expect("hour within 0..24")
        .and_utc()
        .timestamp_millis()
}

/// Both endpoints must fall on a weekday; the start at or after opening
/// (hour >= 8) and the end at or before 20:00:00 exactly on its own day.
/// 20:00:00 is allowed, 20:00:00.001 is not. Endpoints are checked
/// independently.
pub fn is_within_business_hours(start: Ms, end: Ms) -> bool {
    let s = to_utc(start);
    let e = to_utc(end);

    if !is_weekday(s.date_naive()) || !is_weekday(e.date_naive()) {
        return false;
    }
    if s.hour() < OPENING_HOUR {
        return false;
    }
    if e.hour() > CLOSING_HOUR {
        return false;
    }
    if e.hour() == CLOSING_HOUR
        && (e.minute() > 0 || e.second() > 0 || e.timestamp_subsec_millis() > 0)
    {
        return false;
    }
    true
}

/// Intersection of `span` with `[window_start, window_end)`, or None if
/// disjoint.
pub fn clip_to_window(span: &Span, window_start: Ms, window_end: Ms) -> Option<Span> {
    let lo = span.start.max(window_start);
    let hi = span.end.min(window_end);
    if hi > lo { Some(Span::new(lo, hi)) } else { None }
}

/// Walk calendar days from start's day to end's day inclusive and sum the
/// intersection of `[start, end)` with each weekday's `[08:00, 20:00)`
/// window. Weekend days contribute zero.
pub fn business_millis_in_day_range(start: Ms, end: Ms) -> Ms {
    if end <= start {
        return 0;
    }
    let mut day = to_utc(start).date_naive();
    let last = to_utc(end).date_naive();
    let mut total: Ms = 0;

    while day <= last {
        if is_weekday(day) {
            let open = day_at_hour(day, OPENING_HOUR);
            let close = day_at_hour(day, CLOSING_HOUR);
            let lo = start.max(open);
            let hi = end.min(close);
            if hi > lo {
                total += hi - lo;
            }
        }
        day = day.succ_opt().expect("date within validated range");
    }
    total
}

/// Calendar days in `[from, to]` (inclusive, by day) whose weekday is Mon–Fri.
pub fn count_business_days(from: Ms, to: Ms) -> i64 {
    let mut day = to_utc(from).date_naive();
    let last = to_utc(to).date_naive();
    let mut count = 0;

    while day <= last {
        if is_weekday(day) {
            count += 1;
        }
        day = day.succ_opt().expect("date within validated range");
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    /// 2025-03-03 is a Monday.
    fn mon(hour: u32, minute: u32) -> Ms {
        at(3, hour, minute, 0)
    }

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> Ms {
        NaiveDate::from_ymd_opt(2025, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    #[test]
    fn weekday_meeting_within_hours() {
        assert!(is_within_business_hours(mon(9, 0), mon(10, 0)));
    }

    #[test]
    fn opening_boundary() {
        assert!(is_within_business_hours(mon(8, 0), mon(9, 0)));
        assert!(!is_within_business_hours(mon(7, 59), mon(9, 0)));
    }

    #[test]
    fn closing_boundary_exact() {
        assert!(is_within_business_hours(mon(19, 0), mon(20, 0)));
        assert!(!is_within_business_hours(mon(19, 0), at(3, 20, 0, 1)));
        assert!(!is_within_business_hours(mon(19, 0), mon(20, 1)));
    }

    #[test]
    fn weekend_rejected() {
        // 2025-03-08 is a Saturday.
        let sat_9 = at(8, 9, 0, 0);
        let sat_10 = at(8, 10, 0, 0);
        assert!(!is_within_business_hours(sat_9, sat_10));
        // Friday into Saturday: end on a weekend day.
        let fri_19 = at(7, 19, 0, 0);
        assert!(!is_within_business_hours(fri_19, sat_9));
    }

    #[test]
    fn clip_inside_outside() {
        let span = Span::new(100, 200);
        assert_eq!(clip_to_window(&span, 0, 300), Some(Span::new(100, 200)));
        assert_eq!(clip_to_window(&span, 150, 300), Some(Span::new(150, 200)));
        assert_eq!(clip_to_window(&span, 0, 150), Some(Span::new(100, 150)));
        assert_eq!(clip_to_window(&span, 200, 300), None);
        assert_eq!(clip_to_window(&span, 0, 100), None);
    }

    #[test]
    fn business_millis_single_day() {
        assert_eq!(business_millis_in_day_range(mon(9, 0), mon(11, 0)), 2 * H);
    }

    #[test]
    fn business_millis_clamped_to_window() {
        // 06:00–10:00 only counts from 08:00.
        assert_eq!(business_millis_in_day_range(mon(6, 0), mon(10, 0)), 2 * H);
        // 19:00–23:00 only counts until 20:00.
        assert_eq!(business_millis_in_day_range(mon(19, 0), mon(23, 0)), H);
    }

    #[test]
    fn business_millis_spans_weekend() {
        // Friday 19:00 → Monday 09:00 (Mar 7 Fri, Mar 10 Mon):
        // one hour on Friday plus one hour on Monday.
        let fri_19 = at(7, 19, 0, 0);
        let next_mon_9 = at(10, 9, 0, 0);
        assert_eq!(business_millis_in_day_range(fri_19, next_mon_9), 2 * H);
    }

    #[test]
    fn business_millis_empty_and_reversed() {
        assert_eq!(business_millis_in_day_range(mon(9, 0), mon(9, 0)), 0);
        assert_eq!(business_millis_in_day_range(mon(11, 0), mon(9, 0)), 0);
    }

    #[test]
    fn business_millis_sub_hour() {
        assert_eq!(
            business_millis_in_day_range(mon(9, 15), mon(9, 45)),
            30 * M
        );
    }

    #[test]
    fn count_business_days_inclusive() {
        // Mon Mar 3 .. Fri Mar 7 → 5 days.
        assert_eq!(count_business_days(mon(0, 0), at(7, 23, 59, 59)), 5);
        // Mon .. next Mon → 6 business days.
        assert_eq!(count_business_days(mon(0, 0), at(10, 0, 0, 0)), 6);
        // Sat .. Sun → 0.
        assert_eq!(count_business_days(at(8, 0, 0, 0), at(9, 23, 0, 0)), 0);
        // Reversed range → 0.
        assert_eq!(count_business_days(at(7, 0, 0, 0), mon(0, 0)), 0);
    }
}
