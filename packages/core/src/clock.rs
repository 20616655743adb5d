//! Wall-clock timestamps and retry backoff.
//!
//! All timestamps are RFC 3339 UTC strings with fixed millisecond
//! precision, so string comparison is equivalent to chronological
//! comparison everywhere (SQL predicates included).

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Format a timestamp in the canonical storage representation.
pub fn to_iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current wall-clock time in the canonical representation.
pub fn now_iso() -> String {
    to_iso(Utc::now())
}

/// A timestamp `secs` seconds from now. Negative offsets look backwards.
pub fn iso_after_seconds(secs: i64) -> String {
    to_iso(Utc::now() + Duration::seconds(secs))
}

/// Whether a scheduled time has arrived. A missing schedule is always due.
pub fn is_due(ts: Option<&str>, now: &str) -> bool {
    match ts {
        None => true,
        Some(t) => t <= now,
    }
}

/// Retry delay in seconds: `base ^ attempts`, saturating.
pub fn backoff_secs(base: i64, attempts: i64) -> i64 {
    let base = base.max(0);
    let attempts = u32::try_from(attempts.max(0)).unwrap_or(u32::MAX);
    base.saturating_pow(attempts)
}

/// Re-format an operator-supplied RFC 3339 timestamp into the canonical
/// representation, or `None` if it does not parse.
pub fn normalize_iso(ts: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|t| to_iso(t.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_secs(2, 0), 1);
        assert_eq!(backoff_secs(2, 1), 2);
        assert_eq!(backoff_secs(2, 2), 4);
        assert_eq!(backoff_secs(2, 3), 8);
        assert_eq!(backoff_secs(3, 2), 9);
    }

    #[test]
    fn test_backoff_saturates() {
        assert_eq!(backoff_secs(i64::MAX, 2), i64::MAX);
    }

    #[test]
    fn test_is_due_null_is_always_due() {
        assert!(is_due(None, &now_iso()));
    }

    #[test]
    fn test_is_due_past_and_future() {
        let now = now_iso();
        let past = iso_after_seconds(-5);
        let future = iso_after_seconds(5);
        assert!(is_due(Some(&past), &now));
        assert!(!is_due(Some(&future), &now));
    }

    #[test]
    fn test_iso_ordering_is_lexical() {
        let earlier = iso_after_seconds(-60);
        let later = iso_after_seconds(60);
        assert!(earlier < later);
    }

    #[test]
    fn test_normalize_iso_fixes_precision() {
        let normalized = normalize_iso("2026-08-01T12:00:00+02:00").unwrap();
        assert_eq!(normalized, "2026-08-01T10:00:00.000Z");
        assert!(normalize_iso("yesterday").is_none());
    }
}
