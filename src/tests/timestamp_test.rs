#[cfg(test)]
mod tests {
    use crate::timestamp::{age_seconds, log_stamp, timestamp_now};

    #[test]
    fn now_is_microseconds_past_a_recent_epoch() {
        // mid-2023 in microseconds; anything earlier means the wrong unit
        let first = timestamp_now();
        assert!(first > 1_688_000_000_000_000);
        let second = timestamp_now();
        assert!(second >= first);
    }

    #[test]
    fn log_stamp_has_the_date_time_shape() {
        // "2026-08-01 12:00:00"
        let stamp = log_stamp();
        assert_eq!(stamp.len(), 19);
        let bytes = stamp.as_bytes();
        assert_eq!(bytes[4], b'-');
        assert_eq!(bytes[7], b'-');
        assert_eq!(bytes[10], b' ');
        assert_eq!(bytes[13], b':');
        assert_eq!(bytes[16], b':');
        assert!(stamp
            .chars()
            .all(|c| c.is_ascii_digit() || c == '-' || c == ':' || c == ' '));
    }

    #[test]
    fn age_truncates_to_whole_seconds() {
        assert_eq!(age_seconds(1_500_000, 0), 1);
        assert_eq!(age_seconds(999_999, 0), 0);
        assert_eq!(age_seconds(61_000_000, 1_000_000), 60);
    }

    #[test]
    fn age_of_a_future_stamp_is_negative() {
        assert_eq!(age_seconds(0, 2_000_000), -2);
    }
}
