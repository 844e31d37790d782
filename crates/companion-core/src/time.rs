//! Time helpers: the fetch window and the all-day heuristic.

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};

/// Events spanning at least this many hours are treated as all-day.
pub const DEFAULT_ALL_DAY_HOURS: i64 = 12;

/// Whether an event with concrete start/end times should be presented as
/// an all-day event.
///
/// Providers only flag events created through their "all day" UI; long
/// blocks entered as timed events are not marked, so a duration heuristic
/// fills the gap. `upper_bound_hours` is the span at which an event stops
/// being a meeting.
pub fn is_all_day_span(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    upper_bound_hours: i64,
) -> bool {
    end - start >= Duration::hours(upper_bound_hours)
}

/// The fetch window for a sync round: the start of the current local day
/// up to the start of the next one, both in UTC.
pub fn local_day_window(now: DateTime<Local>) -> (DateTime<Utc>, DateTime<Utc>) {
    let tz = now.timezone();
    let to_utc = |naive: NaiveDateTime| {
        // Around DST transitions midnight can be ambiguous or missing;
        // take the earliest valid instant, or fall back to treating the
        // naive time as UTC.
        tz.from_local_datetime(&naive)
            .earliest()
            .map_or_else(|| naive.and_utc(), |local| local.with_timezone(&Utc))
    };
    let day_start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time");
    (to_utc(day_start), to_utc(day_start + Duration::days(1)))
}
