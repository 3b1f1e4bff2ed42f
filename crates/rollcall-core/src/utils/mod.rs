//! Utility functions

use chrono::{DateTime, NaiveDateTime, Utc};

/// Format a timestamp as LDAP generalized time (`YYYYMMDDHHMMSS.0Z`)
pub fn format_generalized_time(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%d%H%M%S.0Z").to_string()
}

/// Parse LDAP generalized time, with or without a fractional part
pub fn parse_generalized_time(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.trim().trim_end_matches('Z');
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    let naive = NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S").ok()?;
    let nanos = if fraction.is_empty() {
        0
    } else {
        let digits: String = fraction.chars().take(9).collect();
        let scale = 10u32.pow(9 - digits.len() as u32);
        digits.parse::<u32>().ok()? * scale
    };
    Some(naive.and_utc() + chrono::Duration::nanoseconds(nanos as i64))
}

/// Clamp a 64-bit offset or count into the backend's 32-bit range
pub fn clamp_to_backend_index(value: u64) -> u32 {
    value.min(crate::MAX_BACKEND_INDEX) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generalized_time_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 17, 4, 5).unwrap();
        let text = format_generalized_time(&ts);
        assert_eq!(text, "20240309170405.0Z");
        assert_eq!(parse_generalized_time(&text), Some(ts));
        assert_eq!(parse_generalized_time("20240309170405Z"), Some(ts));
        assert_eq!(parse_generalized_time("garbage"), None);
    }

    #[test]
    fn test_clamp_to_backend_index() {
        assert_eq!(clamp_to_backend_index(10), 10);
        assert_eq!(clamp_to_backend_index(u64::MAX), i32::MAX as u32);
    }
}
