//! Poll-until-condition retry utility
//!
//! Used wherever the client must wait for eventually-consistent remote state
//! (for example a subscription row written by a payment webhook).
//!
//! **Algorithm:**
//! 1. Sleep for the next delay in the schedule
//! 2. Run the check
//! 3. If the check succeeded and the predicate holds, stop with `Satisfied`
//! 4. Otherwise (predicate false or check error) continue with the next delay
//! 5. When the schedule is exhausted, stop with `Exhausted`
//!
//! Check errors are logged and treated like "not yet"; they never abort the
//! sequence early.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Delay schedule for `poll_until`
///
/// One check runs after each delay, so `delays.len()` is the number of checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Explicit schedule (e.g. 2s, 3s, 5s)
    pub fn from_delays(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            delays: delays.into_iter().collect(),
        }
    }

    /// Schedule from millisecond values (as stored in TOML)
    pub fn from_millis(delays_ms: &[u64]) -> Self {
        Self::from_delays(delays_ms.iter().copied().map(Duration::from_millis))
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn max_checks(&self) -> usize {
        self.delays.len()
    }
}

/// Result of `poll_until`
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// Predicate held after `checks` checks
    Satisfied { value: T, checks: usize },
    /// Schedule exhausted; `last` is the final successful check result, if any
    Exhausted { last: Option<T>, checks: usize },
}

/// Run `check` on the policy's schedule until `is_done` holds
///
/// # Arguments
/// * `operation_name` - Name for logging
/// * `policy` - Delay schedule
/// * `check` - Async closure fetching the current remote state
/// * `is_done` - Success predicate on a fetched value
pub async fn poll_until<T, E, F, Fut, P>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut check: F,
    is_done: P,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&T) -> bool,
{
    let mut last = None;
    let mut checks = 0;

    for delay in policy.delays() {
        tokio::time::sleep(*delay).await;
        checks += 1;

        match check().await {
            Ok(value) if is_done(&value) => {
                tracing::debug!(
                    operation = operation_name,
                    checks,
                    "Poll condition satisfied"
                );
                return PollOutcome::Satisfied { value, checks };
            }
            Ok(value) => {
                tracing::debug!(
                    operation = operation_name,
                    checks,
                    remaining = policy.max_checks() - checks,
                    "Poll condition not yet satisfied"
                );
                last = Some(value);
            }
            Err(err) => {
                tracing::warn!(
                    operation = operation_name,
                    checks,
                    error = %err,
                    "Poll check failed, treating as not yet satisfied"
                );
            }
        }
    }

    tracing::warn!(
        operation = operation_name,
        checks,
        "Poll schedule exhausted without satisfying condition"
    );
    PollOutcome::Exhausted { last, checks }
}
