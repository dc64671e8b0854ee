//! Bounded fixed-interval polling for "wait for X" operations.
//!
//! Every wait in this tool is a polling loop with a fixed attempt count
//! and a fixed delay between attempts, so the total wait is always
//! bounded by `max_attempts * interval`. Exhaustion is reported to the
//! caller, which decides whether it is fatal.

use std::thread;
use std::time::Duration;
use thiserror::Error;

/// A polling loop gave up after its attempt budget.
#[derive(Debug, Error)]
#[error("{what} did not happen within {attempts} attempts ({interval:?} apart)")]
pub struct PollExhausted {
    /// Description of the condition that was being waited for
    pub what: String,
    /// Number of attempts made
    pub attempts: u32,
    /// Delay between attempts
    pub interval: Duration,
}

/// Polling budget: attempt count and inter-attempt delay.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollConfig {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

/// Poll `probe` until it yields a value or the budget runs out.
///
/// The probe is invoked once per attempt; `None` means "not yet".
/// Sleeps for `config.interval` between attempts, never after the last
/// one.
pub fn poll_until<T, F>(what: &str, config: PollConfig, mut probe: F) -> Result<T, PollExhausted>
where
    F: FnMut() -> Option<T>,
{
    for attempt in 0..config.max_attempts {
        if let Some(value) = probe() {
            return Ok(value);
        }
        if attempt + 1 < config.max_attempts {
            log::debug!(
                "waiting for {} (attempt {}/{})",
                what,
                attempt + 1,
                config.max_attempts
            );
            thread::sleep(config.interval);
        }
    }
    Err(PollExhausted {
        what: what.to_string(),
        attempts: config.max_attempts,
        interval: config.interval,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(max_attempts: u32) -> PollConfig {
        PollConfig::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_success_first_attempt() {
        let result = poll_until("anything", fast(3), || Some(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_eventual_success() {
        let attempts = Cell::new(0u32);
        let result = poll_until("third time lucky", fast(5), || {
            attempts.set(attempts.get() + 1);
            if attempts.get() >= 3 { Some("ok") } else { None }
        });
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_exhaustion() {
        let attempts = Cell::new(0u32);
        let result: Result<(), _> = poll_until("never", fast(4), || {
            attempts.set(attempts.get() + 1);
            None
        });
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(attempts.get(), 4);
    }

    #[test]
    fn test_probe_not_called_after_success() {
        let attempts = Cell::new(0u32);
        let _ = poll_until("once", fast(10), || {
            attempts.set(attempts.get() + 1);
            Some(())
        });
        assert_eq!(attempts.get(), 1);
    }
}
