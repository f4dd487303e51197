//! Forced restart of a workload pod.
//!
//! A rollout walks a fixed sequence of states:
//!
//! ```text
//! Found -> Deleting -> AwaitingAbsence -> AwaitingReplacement -> AwaitingRunning -> Converged
//! ```
//!
//! Any failure moves to `Aborted`. The replacement lookup only runs after the
//! old pod stopped resolving, so the pre-deletion pod can never be mistaken
//! for its replacement.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{info, instrument, warn};

use crate::cluster::{label_selector, PodHandle};
use crate::config::PollPolicy;
use crate::error::{HarnessError, Result};
use crate::poll::{poll_until, PollError, Probe};
use crate::pods::{node_selector, PodObservationService};

/// States of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutState {
    Found,
    Deleting,
    AwaitingAbsence,
    AwaitingReplacement,
    AwaitingRunning,
    Converged,
    Aborted,
}

impl fmt::Display for RolloutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Found => "found",
            Self::Deleting => "deleting",
            Self::AwaitingAbsence => "awaiting absence",
            Self::AwaitingReplacement => "awaiting replacement",
            Self::AwaitingRunning => "awaiting running",
            Self::Converged => "converged",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// A completed rollout.
#[derive(Debug, Clone)]
pub struct RolloutOutcome {
    /// The running replacement pod.
    pub pod: PodHandle,
    /// The pod that was deleted.
    pub previous: PodHandle,
    /// States visited, in order.
    pub states: Vec<RolloutState>,
}

/// Deletes the workload pod and waits for its replacement to run.
pub struct RolloutController {
    pods: PodObservationService,
    deletion: PollPolicy,
    rollout: PollPolicy,
    node: Option<String>,
}

struct Trace {
    states: Vec<RolloutState>,
}

impl Trace {
    fn enter(&mut self, state: RolloutState) {
        info!(from = ?self.states.last(), to = %state, "Rollout transition");
        self.states.push(state);
    }

    fn abort(&mut self, err: HarnessError) -> HarnessError {
        warn!(
            state = ?self.states.last(),
            error = %err,
            "Rollout aborted"
        );
        self.states.push(RolloutState::Aborted);
        err
    }
}

impl RolloutController {
    /// `deletion` bounds the wait for the old pod to disappear; `rollout`
    /// bounds both the replacement lookup and the wait for `Running`.
    #[must_use]
    pub fn new(pods: PodObservationService, deletion: PollPolicy, rollout: PollPolicy) -> Self {
        Self {
            pods,
            deletion,
            rollout,
            node: None,
        }
    }

    /// Only restart the pod scheduled on `node`. Both the initial lookup and
    /// the replacement lookup ignore pods on other nodes, and a replacement
    /// counts only once it is bound to `node`.
    #[must_use]
    pub fn with_node(mut self, node: Option<String>) -> Self {
        self.node = node;
        self
    }

    /// Restart the single pod matching `labels` and wait for its replacement.
    ///
    /// # Errors
    ///
    /// Returns the first error of any step: `NoMatchingPods`/`AmbiguousMatch`
    /// on lookup, the delete error, `PodsDeletionTimeout`,
    /// `UnexpectedTermination`, or `RolloutTimeout`.
    #[instrument(
        skip(self, labels),
        fields(selector = %label_selector(labels), node = ?self.node)
    )]
    pub async fn restart(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<RolloutOutcome> {
        let mut trace = Trace { states: Vec::new() };

        let previous = match self
            .pods
            .find_one_on_node(namespace, labels, self.node.as_deref())
            .await
        {
            Ok(pod) => pod,
            Err(e) => return Err(trace.abort(e)),
        };
        trace.enter(RolloutState::Found);
        info!(pod = %previous.name, phase = %previous.phase, "Found workload pod");

        trace.enter(RolloutState::Deleting);
        match self.pods.delete(&previous).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                info!(pod = %previous.name, "Pod already gone before delete");
            }
            Err(e) => return Err(trace.abort(e)),
        }

        trace.enter(RolloutState::AwaitingAbsence);
        if let Err(e) = self
            .pods
            .await_absence(&previous.name, &previous.namespace, &self.deletion)
            .await
        {
            return Err(trace.abort(e));
        }

        trace.enter(RolloutState::AwaitingReplacement);
        let replacement = match self.await_replacement(namespace, labels).await {
            Ok(pod) => pod,
            Err(e) => return Err(trace.abort(e)),
        };
        info!(
            previous = %previous.name,
            replacement = %replacement.name,
            "Replacement pod scheduled"
        );

        trace.enter(RolloutState::AwaitingRunning);
        let pod = match self
            .pods
            .await_running(&replacement.name, &replacement.namespace, &self.rollout)
            .await
        {
            Ok(pod) => pod,
            Err(e) => return Err(trace.abort(e)),
        };

        trace.enter(RolloutState::Converged);
        Ok(RolloutOutcome {
            pod,
            previous,
            states: trace.states,
        })
    }

    /// Poll the selector until exactly one replacement pod exists.
    async fn await_replacement(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<PodHandle> {
        let pods = &self.pods;
        let node = self.node.as_deref();
        let outcome = poll_until(&self.rollout, "replacement pod", move || async move {
            match pods.find_one_on_node(namespace, labels, node).await {
                Ok(pod) => Probe::Ready(pod),
                Err(e) if e.is_fatal() => Probe::Fatal(e),
                Err(e) => Probe::Transient(e),
            }
        })
        .await;

        match outcome {
            Ok(pod) => Ok(pod),
            Err(PollError::Fatal(e)) => Err(e),
            Err(PollError::Exhausted(exhausted)) => Err(exhausted.last_error.unwrap_or_else(|| {
                HarnessError::NoMatchingPods {
                    namespace: namespace.to_string(),
                    selector: node_selector(labels, node),
                }
            })),
        }
    }
}
