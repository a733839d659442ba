//! Bounded exponential backoff for transient I/O failures

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};

/// Longest uninterrupted sleep while backing off.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Exponential backoff multiplier
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        Duration::from_millis(millis.min(self.max_delay.as_millis() as f64) as u64)
    }
}

/// Whether an error is worth another attempt.
pub fn is_transient(error: &Error) -> bool {
    match error {
        Error::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
                | io::ErrorKind::TimedOut
                | io::ErrorKind::ResourceBusy
        ),
        _ => false,
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of
/// attempts. `what` names the operation in log lines.
///
/// Cancelling `cancel` during a backoff returns [`Error::Cancelled`]
/// instead of trying again.
pub fn retry<T, F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", what, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < attempts && is_transient(&e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "{} failed on attempt {}/{}: {}; retrying in {:?}",
                    what, attempt, attempts, e, delay
                );
                pause(delay, cancel)?;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn pause(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    let deadline = Instant::now() + delay;
    loop {
        cancel.check()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
