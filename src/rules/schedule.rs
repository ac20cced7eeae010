use chrono::{DateTime, Datelike, NaiveTime, Utc};

use crate::db::Schedule;

fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M").ok()
}

/// Whether `now` falls inside the schedule window for its UTC weekday.
///
/// No schedule, an empty schedule, or a day with neither bound passes. A
/// start later than the end is an overnight window (e.g. 22:00–02:00).
/// Malformed time strings fail open: a bad schedule must never block
/// forwarding.
pub fn passes_schedule(now: DateTime<Utc>, schedule: Option<&Schedule>) -> bool {
    let Some(schedule) = schedule else {
        return true;
    };
    if schedule.is_empty() {
        return true;
    }

    let weekday = now.weekday().num_days_from_monday() as usize;
    let window = schedule.window(weekday);
    let (start_raw, end_raw) = (window.start.as_deref(), window.end.as_deref());
    if start_raw.is_none() && end_raw.is_none() {
        return true;
    }

    let now_t = now.time();
    let Some(start_t) = parse_hhmm(start_raw.unwrap_or("00:00")) else {
        return true;
    };
    let Some(end_t) = parse_hhmm(end_raw.unwrap_or("23:59")) else {
        return true;
    };

    if start_raw.is_none() {
        return now_t <= end_t;
    }
    if end_raw.is_none() {
        return now_t >= start_t;
    }
    if start_t <= end_t {
        start_t <= now_t && now_t <= end_t
    } else {
        // Overnight range (e.g. 22:00–02:00).
        now_t >= start_t || now_t <= end_t
    }
}
