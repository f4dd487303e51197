//! Waiting for the workload to log its convergence marker.
//!
//! The match is a plain substring search over the whole log buffer. A marker
//! left over from before a restart also matches if the platform keeps old
//! log lines around; callers accept that imprecision.

use std::time::Duration;

use tracing::info;

use crate::cluster::PodHandle;
use crate::config::PollPolicy;
use crate::error::{HarnessError, Result};
use crate::poll::{poll_until, PollError, Probe};
use crate::pods::PodObservationService;

/// Polls pod logs for a marker substring.
pub struct ConvergenceVerifier {
    pods: PodObservationService,
    settle_delay: Duration,
}

impl ConvergenceVerifier {
    /// `settle_delay` is slept once after the marker is found.
    #[must_use]
    pub fn new(pods: PodObservationService, settle_delay: Duration) -> Self {
        Self { pods, settle_delay }
    }

    /// Poll the pod's logs until `marker` shows up.
    ///
    /// Returns `Ok(true)` once found (after the settle delay) and `Ok(false)`
    /// if every read succeeded but the marker never appeared.
    ///
    /// # Errors
    ///
    /// If the deadline passes and the final read failed, that read's error is
    /// returned.
    pub async fn await_marker(
        &self,
        pod: &PodHandle,
        marker: &str,
        policy: &PollPolicy,
    ) -> Result<bool> {
        let pods = &self.pods;
        let outcome = poll_until(policy, "log marker", move || async move {
            match pods.read_logs(pod).await {
                Ok(logs) if logs.contains(marker) => Probe::Ready(()),
                Ok(_) => Probe::Pending,
                Err(e) => Probe::Transient(e),
            }
        })
        .await;

        match outcome {
            Ok(()) => {
                info!(
                    pod = %pod.name,
                    marker,
                    settle_secs = self.settle_delay.as_secs(),
                    "Marker observed, letting node state settle"
                );
                tokio::time::sleep(self.settle_delay).await;
                Ok(true)
            }
            Err(PollError::Fatal(e)) => Err(e),
            Err(PollError::Exhausted(exhausted)) => match exhausted.last_error {
                Some(e) => Err(e),
                None => Ok(false),
            },
        }
    }

    /// Like [`ConvergenceVerifier::await_marker`], but a missing marker is an error.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ConvergenceNotObserved`] if the marker never
    /// appeared, or the final read error.
    pub async fn require_marker(
        &self,
        pod: &PodHandle,
        marker: &str,
        policy: &PollPolicy,
    ) -> Result<()> {
        if self.await_marker(pod, marker, policy).await? {
            Ok(())
        } else {
            Err(HarnessError::ConvergenceNotObserved {
                pod: pod.name.clone(),
                marker: marker.to_string(),
            })
        }
    }
}
