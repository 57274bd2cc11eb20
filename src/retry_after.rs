//! `Retry-After` header parsing.

use std::time::{Duration, SystemTime};
use thiserror::Error;

/// A `Retry-After` value that is neither delay-seconds nor an HTTP-date.
///
/// Never surfaced to callers: the classifier logs it and drops the hint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed Retry-After header: {value:?}")]
pub struct MalformedRetryAfter {
    /// The raw header value.
    pub value: String,
}

/// Parse a `Retry-After` value relative to `now`.
///
/// Accepts non-negative integer seconds (`120`) or an HTTP-date
/// (`Wed, 21 Oct 2015 07:28:00 GMT`). Dates in the past yield a zero wait.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Result<Duration, MalformedRetryAfter> {
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    match httpdate::parse_http_date(trimmed) {
        Ok(date) => Ok(date.duration_since(now).unwrap_or(Duration::ZERO)),
        Err(_) => Err(MalformedRetryAfter {
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_seconds() {
        let now = SystemTime::now();
        assert_eq!(parse_retry_after("120", now), Ok(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 0 ", now), Ok(Duration::ZERO));
    }

    #[test]
    fn test_http_date_in_future() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_445_412_480);
        let value = httpdate::fmt_http_date(now + Duration::from_secs(90));
        assert_eq!(parse_retry_after(&value, now), Ok(Duration::from_secs(90)));
    }

    #[test]
    fn test_http_date_in_past_clamps_to_zero() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_445_412_480);
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now + Duration::from_secs(3600)),
            Ok(Duration::ZERO)
        );
    }

    #[test]
    fn test_malformed_values() {
        let now = SystemTime::now();
        for value in ["soon", "-5", "1.5", ""] {
            assert!(parse_retry_after(value, now).is_err(), "value {value:?}");
        }
    }
}
