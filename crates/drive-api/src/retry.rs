//! Retry matrix constants
//!
//! | Condition | Delay | Attempts beyond first |
//! |-----------|-------|-----------------------|
//! | Offline | 5 s | unbounded |
//! | Timeout | 1 s | unbounded |
//! | Other fetch exception | 1 s | exactly 1 |
//! | HTTP 429 | `Retry-After` or 10 s | unbounded, subject to breaker |
//! | HTTP 5xx | 1 s | exactly 1, subject to breaker |

use std::time::Duration;

/// Subsequent 429 responses that trip the rate-limit breaker.
pub const TOO_MANY_SUBSEQUENT_429: u32 = 50;

/// Subsequent 5xx responses that trip the server-error breaker.
pub const TOO_MANY_SUBSEQUENT_5XX: u32 = 10;

/// How long a tripped breaker refuses requests.
pub const BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

/// Delay before retrying while offline.
pub const OFFLINE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Delay before retrying a timed-out request.
pub const TIMEOUT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Delay before the single retry of an unclassified fetch exception.
pub const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Delay applied to a 429 without a `Retry-After` header.
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(10);

/// Delay before the single retry of a 5xx response.
pub const SERVER_ERROR_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Parse a `Retry-After` header value given in seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_parses_seconds_only() {
        assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("Wed, 21 Oct"), None);
    }
}
