use chrono::{DateTime, NaiveDateTime, Utc};

// Stored stamps are fixed-width UTC so lexicographic order equals
// chronological order; range queries and find-all consumers depend on it.
pub const STAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn format_stamp(t: DateTime<Utc>) -> String {
    t.format(STAMP_FORMAT).to_string()
}

pub fn now_stamp() -> String {
    format_stamp(Utc::now())
}

/// Parse a stored stamp back into a UTC instant.
pub fn parse_stamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse a client-supplied timestamp. Accepts RFC 3339 or an
/// already-formatted stamp.
pub fn parse_client(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
        .or_else(|| parse_stamp(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stamp_round_trips_to_millisecond_precision() {
        let t = Utc.with_ymd_and_hms(2024, 6, 25, 14, 3, 9).unwrap()
            + chrono::Duration::milliseconds(420);
        let stamp = format_stamp(t);
        assert_eq!(stamp, "2024-06-25T14:03:09.420Z");
        assert_eq!(parse_stamp(&stamp), Some(t));
    }

    #[test]
    fn string_order_matches_chronological_order() {
        let base = Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap();
        let instants = [
            base,
            base + chrono::Duration::milliseconds(1),
            base + chrono::Duration::seconds(1),
            base + chrono::Duration::days(22),
            base + chrono::Duration::days(400),
        ];
        let stamps: Vec<String> = instants.iter().map(|t| format_stamp(*t)).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
    }

    #[test]
    fn client_timestamps_accept_rfc3339_offsets() {
        let parsed = parse_client("2024-06-25T16:03:09.420+02:00").expect("rfc3339 parses");
        assert_eq!(format_stamp(parsed), "2024-06-25T14:03:09.420Z");
        assert!(parse_client("sometime yesterday").is_none());
    }
}
