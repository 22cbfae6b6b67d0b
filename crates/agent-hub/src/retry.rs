//! Optimistic-concurrency retry loop.
//!
//! Conditional creates that lose a race come back as `Conflict`; the caller
//! re-reads state and tries again. This module owns the "try again" part.

use backoff::{backoff::Backoff, ExponentialBackoff};
use hub_types::{HubError, RetrySettings};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounds of one retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Run `op` until it returns something other than `Conflict`, sleeping with
/// randomized exponential backoff in between.
///
/// After `policy.max_attempts` conflicts the last `Conflict` is returned.
/// Every other error is returned immediately.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, HubError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HubError>>,
{
    let mut backoff = policy.backoff();
    let mut attempts = 0;

    loop {
        attempts += 1;
        match op().await {
            Err(e) if e.is_conflict() => {
                if attempts >= policy.max_attempts {
                    warn!(what, attempts, error = %e, "Conflict retries exhausted");
                    return Err(HubError::Conflict(format!(
                        "{}: gave up after {} attempts",
                        what, attempts
                    )));
                }
                let delay = backoff.next_backoff().unwrap_or(policy.max_backoff);
                debug!(
                    what,
                    attempt = attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    "Conditional write lost, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}
