//! Reboot time computation.

use chrono::{DateTime, Duration, Utc};

/// When to reboot after an install at `now`.
///
/// With an active-hours close time the reboot happens when active hours end:
/// today's close if still ahead, otherwise the same clock time tomorrow.
/// Without one, `now + base_delay`.
pub fn compute_reboot_time(
    now: DateTime<Utc>,
    base_delay: Duration,
    active_hours_close: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    match active_hours_close {
        Some(close) if close > now => close,
        Some(close) => close + Duration::hours(24),
        None => now + base_delay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_base_delay() {
        let at = compute_reboot_time(now(), Duration::seconds(21_600), None);
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap());
    }

    #[test]
    fn test_future_close_wins() {
        let close = now() + Duration::hours(2);
        assert_eq!(
            compute_reboot_time(now(), Duration::seconds(21_600), Some(close)),
            close
        );
    }

    #[test]
    fn test_past_close_moves_to_tomorrow() {
        let close = now() - Duration::hours(1);
        assert_eq!(
            compute_reboot_time(now(), Duration::seconds(21_600), Some(close)),
            Utc.with_ymd_and_hms(2024, 3, 2, 11, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_close_exactly_now_moves_to_tomorrow() {
        assert_eq!(
            compute_reboot_time(now(), Duration::zero(), Some(now())),
            now() + Duration::hours(24)
        );
    }
}
