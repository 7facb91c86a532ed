//! Circuit breakers for subsequent-error classes
//!
//! Two process-wide breakers protect the service: one counting subsequent
//! 429 responses, one counting subsequent 5xx responses. Any success resets
//! a breaker's counter. A tripped breaker refuses requests until its
//! cooldown expires.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct BreakerState {
    consecutive: u32,
    open_until: Option<Instant>,
    tripped: bool,
}

/// Sliding counter of subsequent errors with a cooldown.
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Breaker tripping after `threshold` subsequent failures, refusing
    /// requests for `cooldown` afterwards.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            state: Mutex::new(BreakerState {
                consecutive: 0,
                open_until: None,
                tripped: false,
            }),
        }
    }

    /// Whether a request may be dispatched. Returns the remaining cooldown
    /// when the breaker is open. An expired cooldown closes the breaker and
    /// resets its counter.
    pub fn check(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        if let Some(open_until) = state.open_until {
            let now = Instant::now();
            if now < open_until {
                return Err(open_until - now);
            }
            state.open_until = None;
            state.consecutive = 0;
        }
        Ok(())
    }

    /// Count one failure. Returns `true` when this failure tripped the
    /// breaker open.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock();
        state.consecutive += 1;
        if state.consecutive >= self.threshold && state.open_until.is_none() {
            state.open_until = Some(Instant::now() + self.cooldown);
            state.tripped = true;
            true
        } else {
            false
        }
    }

    /// Count one success, clearing the counter. Returns `true` when the
    /// breaker had tripped since the last success.
    pub fn record_success(&self) -> bool {
        let mut state = self.state.lock();
        let had_tripped = state.tripped;
        state.consecutive = 0;
        state.open_until = None;
        state.tripped = false;
        had_tripped
    }

    /// Whether the breaker is currently refusing requests.
    pub fn is_open(&self) -> bool {
        self.check().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn trips_at_threshold_and_cools_down() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(breaker.record_failure());
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!breaker.is_open());
    }

    #[tokio::test]
    async fn success_clears_the_counter() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..10 {
            breaker.record_failure();
            breaker.record_failure();
            assert!(!breaker.record_success());
        }
        assert!(!breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_trip_reports_the_crossover() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        assert!(breaker.record_failure());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(breaker.record_success());
        assert!(!breaker.record_success());
    }
}
