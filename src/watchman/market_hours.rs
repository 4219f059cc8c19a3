//! US equity/options session times: 09:30-16:00 Eastern, Monday-Friday.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::America::New_York;

/// Regular session window, inclusive on both ends.
fn session_bounds() -> (NaiveTime, NaiveTime) {
    (
        NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
    )
}

/// Weekday in New York, regardless of the clock.
pub fn is_trading_day(now: DateTime<Utc>) -> bool {
    let weekday = now.with_timezone(&New_York).weekday();
    !matches!(weekday, Weekday::Sat | Weekday::Sun)
}

/// Inside the regular session on a weekday. DST is handled by the
/// timezone conversion, not by a fixed UTC offset.
pub fn is_market_hours(now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&New_York);
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let (open, close) = session_bounds();
    let t = local.time();
    t >= open && t <= close
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_midsession_weekday_is_open() {
        // Wed 2025-09-03 10:30 ET (EDT, UTC-4)
        assert!(is_market_hours(utc(2025, 9, 3, 14, 30)));
    }

    #[test]
    fn test_session_bounds_are_inclusive() {
        assert!(is_market_hours(utc(2025, 9, 3, 13, 30))); // 09:30 ET
        assert!(is_market_hours(utc(2025, 9, 3, 20, 0))); // 16:00 ET
        assert!(!is_market_hours(utc(2025, 9, 3, 13, 29)));
        assert!(!is_market_hours(utc(2025, 9, 3, 20, 1)));
    }

    #[test]
    fn test_weekend_is_closed() {
        // Sat 2025-09-06
        assert!(!is_market_hours(utc(2025, 9, 6, 14, 30)));
        assert!(!is_trading_day(utc(2025, 9, 6, 14, 30)));
        assert!(is_trading_day(utc(2025, 9, 3, 14, 30)));
    }

    #[test]
    fn test_winter_offset_shifts_the_utc_window() {
        // Wed 2025-12-03 is EST (UTC-5): 14:30 UTC is 09:30 ET
        assert!(is_market_hours(utc(2025, 12, 3, 14, 30)));
        assert!(!is_market_hours(utc(2025, 12, 3, 14, 29)));
    }
}
