//! Call duration helpers.

use chrono::{DateTime, Utc};

/// Whole seconds from `since` to `now`, clamped at zero.
pub fn elapsed_secs(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_seconds().max(0)
}

/// Format seconds as `mm:ss`. Minutes are not wrapped into hours.
///
/// ```text
/// 0    -> "00:00"
/// 65   -> "01:05"
/// 3725 -> "62:05"
/// ```
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_minutes_and_seconds() {
        let cases = [
            (0, "00:00"),
            (9, "00:09"),
            (59, "00:59"),
            (60, "01:00"),
            (65, "01:05"),
            (3599, "59:59"),
            (3725, "62:05"),
            (6000, "100:00"),
        ];
        for (secs, expected) in cases {
            assert_eq!(format_duration(secs), expected, "secs={secs}");
        }
    }

    #[test]
    fn negative_clamps_to_zero() {
        assert_eq!(format_duration(-5), "00:00");
    }

    #[test]
    fn elapsed_is_clamped() {
        let a = Utc
            .with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
            .single()
            .expect("valid datetime");
        let b = a + chrono::Duration::milliseconds(65_900);
        assert_eq!(elapsed_secs(a, b), 65);
        assert_eq!(elapsed_secs(b, a), 0);
    }
}
