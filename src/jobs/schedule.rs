/// Wall-clock schedule math for the daily job
use chrono::{DateTime, Duration, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Next instant strictly after `now` at which the local clock in `tz` reads `at`.
///
/// When `at` falls into a DST gap the first valid instant after it is used;
/// when it is ambiguous the earlier of the two instants is used.
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let mut date = local_now.date_naive();

    loop {
        if let Some(candidate) = resolve_local(tz, date.and_time(at)) {
            if candidate > now {
                return candidate;
            }
        }
        date = date.succ_opt().unwrap_or(date);
    }
}

fn resolve_local(tz: Tz, naive: chrono::NaiveDateTime) -> Option<DateTime<Utc>> {
    let mut candidate = naive;
    // Gaps are at most a couple of hours
    for _ in 0..4 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(t) => return Some(t.with_timezone(&Utc)),
            LocalResult::Ambiguous(early, _) => return Some(early.with_timezone(&Utc)),
            LocalResult::None => candidate += Duration::minutes(30),
        }
    }
    None
}
