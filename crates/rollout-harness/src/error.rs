//! Error taxonomy for harness operations.

use std::time::Duration;

use thiserror::Error;

use crate::cluster::{ObjectKind, PodPhase};

/// Errors that can occur while driving a rollout against the cluster.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// An object with this name is already present.
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: ObjectKind, name: String },

    /// The object could not be found.
    #[error("{kind} {name} not found")]
    NotFound { kind: ObjectKind, name: String },

    /// Delete was accepted but the object is still visible.
    #[error("{kind} {name} is still present after delete")]
    DeletionPending { kind: ObjectKind, name: String },

    /// The object remained visible for the whole confirmation window.
    #[error("{kind} {name} still present after {}s", timeout.as_secs())]
    DeletionTimeout {
        kind: ObjectKind,
        name: String,
        timeout: Duration,
    },

    /// The label selector matched nothing.
    #[error("no pods in {namespace} match selector {selector}")]
    NoMatchingPods { namespace: String, selector: String },

    /// The label selector matched more than the single expected pod.
    #[error("{count} pods in {namespace} match selector {selector}, expected exactly one")]
    AmbiguousMatch {
        namespace: String,
        selector: String,
        count: usize,
    },

    /// The pod was still present when the absence wait ran out.
    #[error("pod {pod} was not deleted within {}s", timeout.as_secs())]
    PodsDeletionTimeout { pod: String, timeout: Duration },

    /// The replacement pod never reached `Running`.
    #[error("pod {pod} did not reach Running within {}s", timeout.as_secs())]
    RolloutTimeout { pod: String, timeout: Duration },

    /// The pod reached a phase it can never leave.
    #[error("pod {pod} terminated unexpectedly with phase {phase}")]
    UnexpectedTermination { pod: String, phase: PodPhase },

    /// The marker never appeared in the pod's logs.
    #[error("marker {marker:?} not observed in logs of pod {pod}")]
    ConvergenceNotObserved { pod: String, marker: String },

    /// No allocatable resource key contains the requested substring.
    #[error("no resource matching {resource:?} on node {node}")]
    ResourceNotFound { node: String, resource: String },

    /// The advertised quantity is not an integer.
    #[error("quantity {value:?} for resource {resource} is not an integer")]
    ResourceParseError { resource: String, value: String },

    /// The advertised quantity differs from the expectation.
    #[error("resource {resource}: expected {expected}, got {actual}")]
    QuantityMismatch {
        resource: String,
        expected: i64,
        actual: i64,
    },

    /// Fetching pod logs failed.
    #[error("failed to read logs of pod {pod}: {source}")]
    LogStream {
        pod: String,
        #[source]
        source: kube::Error,
    },

    /// The controller template could not be rendered.
    #[error("template error: {0}")]
    Template(String),

    /// Invalid harness configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// Transport or API failure from the cluster client.
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl HarnessError {
    /// Whether this error reports an absent object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether retrying can never turn this error into success.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedTermination { .. }
                | Self::AmbiguousMatch { .. }
                | Self::Template(_)
                | Self::Config(_)
        )
    }
}

/// Result alias used throughout the harness.
pub type Result<T> = std::result::Result<T, HarnessError>;
