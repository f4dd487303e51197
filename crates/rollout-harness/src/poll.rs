//! Bounded polling shared by every wait in the harness.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::PollPolicy;
use crate::error::HarnessError;

/// Result of a single poll attempt.
#[derive(Debug)]
pub enum Probe<T> {
    /// Condition met; stop polling.
    Ready(T),
    /// Observation succeeded but the condition is not met yet.
    Pending,
    /// The remote call failed; retry on the next tick.
    Transient(HarnessError),
    /// The condition can never be met; stop immediately.
    Fatal(HarnessError),
}

/// The loop ran out of attempts or time.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub elapsed: Duration,
    /// Error from the final attempt, if that attempt's remote call failed.
    pub last_error: Option<HarnessError>,
    /// The final attempt was still in flight when the deadline passed.
    pub stalled: bool,
}

/// Why a poll loop ended without success.
#[derive(Debug)]
pub enum PollError {
    Fatal(HarnessError),
    Exhausted(Exhausted),
}

/// Run `probe` until it reports `Ready` or `Fatal`, or the policy runs out.
///
/// The first attempt runs immediately. At most `policy.max_attempts()` attempts
/// are made, no attempt starts after `policy.timeout` has elapsed, and an
/// attempt still running at the deadline is abandoned.
///
/// # Errors
///
/// Returns [`PollError::Fatal`] as soon as a probe reports a fatal error, and
/// [`PollError::Exhausted`] when the deadline passes.
pub async fn poll_until<T, F, Fut>(
    policy: &PollPolicy,
    what: &str,
    mut probe: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe<T>>,
{
    let start = Instant::now();
    let deadline = start + policy.timeout;
    let max_attempts = policy.max_attempts();
    let mut attempts = 0;

    loop {
        attempts += 1;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let Ok(outcome) = tokio::time::timeout(remaining, probe()).await else {
            let elapsed = start.elapsed();
            warn!(
                what,
                attempts,
                elapsed_secs = elapsed.as_secs(),
                timeout_secs = policy.timeout.as_secs(),
                "Poll attempt still in flight at deadline"
            );
            return Err(PollError::Exhausted(Exhausted {
                attempts,
                elapsed,
                last_error: None,
                stalled: true,
            }));
        };

        let last_error = match outcome {
            Probe::Ready(value) => {
                debug!(what, attempts, elapsed_ms = elapsed_ms(start), "Poll condition met");
                return Ok(value);
            }
            Probe::Fatal(err) => {
                warn!(what, attempts, error = %err, "Poll aborted on fatal condition");
                return Err(PollError::Fatal(err));
            }
            Probe::Pending => {
                debug!(what, attempts, "Poll condition not met yet");
                None
            }
            Probe::Transient(err) => {
                debug!(what, attempts, error = %err, "Poll attempt failed, will retry");
                Some(err)
            }
        };

        if attempts >= max_attempts || Instant::now() + policy.interval > deadline {
            let elapsed = start.elapsed();
            warn!(
                what,
                attempts,
                elapsed_secs = elapsed.as_secs(),
                timeout_secs = policy.timeout.as_secs(),
                "Poll deadline reached"
            );
            return Err(PollError::Exhausted(Exhausted {
                attempts,
                elapsed,
                last_error,
                stalled: false,
            }));
        }

        tokio::time::sleep(policy.interval).await;
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
