//! Pod lookup and lifecycle observation.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cluster::{label_selector, ClusterApi, ObjectKind, PodHandle, PodPhase};
use crate::config::PollPolicy;
use crate::error::{HarnessError, Result};
use crate::poll::{poll_until, PollError, Probe};

/// Finds pods by label and waits on their lifecycle.
#[derive(Clone)]
pub struct PodObservationService {
    cluster: Arc<dyn ClusterApi>,
}

impl PodObservationService {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Pods carrying every given label.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NoMatchingPods`] if the list call succeeds but
    /// is empty, or the transport error.
    pub async fn find_by_selector(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<PodHandle>> {
        let pods = self.cluster.list_pods(namespace, labels).await?;
        if pods.is_empty() {
            return Err(HarnessError::NoMatchingPods {
                namespace: namespace.to_string(),
                selector: label_selector(labels),
            });
        }
        Ok(pods)
    }

    /// The single pod carrying every given label.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NoMatchingPods`] or
    /// [`HarnessError::AmbiguousMatch`] unless exactly one pod matches.
    pub async fn find_one(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<PodHandle> {
        self.find_one_on_node(namespace, labels, None).await
    }

    /// Like [`PodObservationService::find_one`], but when `node` is set only
    /// pods scheduled on that node count. A DaemonSet runs one pod per node,
    /// so this is how a single instance is picked on a multi-node cluster.
    /// Pods not yet bound to a node never match a set `node`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NoMatchingPods`] or
    /// [`HarnessError::AmbiguousMatch`] unless exactly one pod matches.
    pub async fn find_one_on_node(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
        node: Option<&str>,
    ) -> Result<PodHandle> {
        let selector = node_selector(labels, node);

        let mut pods: Vec<PodHandle> = self
            .cluster
            .list_pods(namespace, labels)
            .await?
            .into_iter()
            .filter(|pod| node.is_none() || pod.node_name.as_deref() == node)
            .collect();

        match pods.len() {
            0 => Err(HarnessError::NoMatchingPods {
                namespace: namespace.to_string(),
                selector,
            }),
            1 => Ok(pods.remove(0)),
            count => Err(HarnessError::AmbiguousMatch {
                namespace: namespace.to_string(),
                selector,
                count,
            }),
        }
    }

    /// Issue a delete for the pod.
    ///
    /// # Errors
    ///
    /// Returns the delete error.
    pub async fn delete(&self, pod: &PodHandle) -> Result<()> {
        self.cluster
            .delete(ObjectKind::Pod, &pod.name, &pod.namespace)
            .await
    }

    /// Wait until the named pod can no longer be fetched.
    ///
    /// Only a not-found answer counts as gone; other failures are retried.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::PodsDeletionTimeout`] if the pod is still
    /// present when the policy runs out.
    pub async fn await_absence(&self, name: &str, namespace: &str, policy: &PollPolicy) -> Result<()> {
        let cluster = self.cluster.as_ref();
        let outcome = poll_until(policy, "pod absence", move || async move {
            match cluster.get_pod(name, namespace).await {
                Ok(pod) => {
                    debug!(pod = %name, phase = %pod.phase, "Pod still present");
                    Probe::Pending
                }
                Err(e) if e.is_not_found() => Probe::Ready(()),
                Err(e) => Probe::Transient(e),
            }
        })
        .await;

        match outcome {
            Ok(()) => {
                info!(pod = %name, %namespace, "Pod is gone");
                Ok(())
            }
            Err(PollError::Fatal(e)) => Err(e),
            Err(PollError::Exhausted(_)) => Err(HarnessError::PodsDeletionTimeout {
                pod: name.to_string(),
                timeout: policy.timeout,
            }),
        }
    }

    /// Wait until the named pod reports `Running`.
    ///
    /// `Succeeded` and `Failed` end the wait at once since neither can lead
    /// back to `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnexpectedTermination`] on a terminal phase, or
    /// [`HarnessError::RolloutTimeout`] when the policy runs out.
    pub async fn await_running(
        &self,
        name: &str,
        namespace: &str,
        policy: &PollPolicy,
    ) -> Result<PodHandle> {
        let cluster = self.cluster.as_ref();
        let outcome = poll_until(policy, "pod running", move || async move {
            match cluster.get_pod(name, namespace).await {
                Ok(pod) if pod.phase == PodPhase::Running => Probe::Ready(pod),
                Ok(pod) if pod.phase.is_terminal() => {
                    Probe::Fatal(HarnessError::UnexpectedTermination {
                        pod: pod.name,
                        phase: pod.phase,
                    })
                }
                Ok(pod) => {
                    debug!(pod = %name, phase = %pod.phase, "Pod not running yet");
                    Probe::Pending
                }
                Err(e) => Probe::Transient(e),
            }
        })
        .await;

        match outcome {
            Ok(pod) => {
                info!(pod = %pod.name, %namespace, "Pod is running");
                Ok(pod)
            }
            Err(PollError::Fatal(e)) => Err(e),
            Err(PollError::Exhausted(_)) => Err(HarnessError::RolloutTimeout {
                pod: name.to_string(),
                timeout: policy.timeout,
            }),
        }
    }

    /// Current log buffer of the pod's container.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::LogStream`] on transport failure.
    pub async fn read_logs(&self, pod: &PodHandle) -> Result<String> {
        self.cluster.pod_logs(&pod.name, &pod.namespace).await
    }
}

/// Label selector, plus the node constraint in field-selector form when set.
pub(crate) fn node_selector(labels: &BTreeMap<String, String>, node: Option<&str>) -> String {
    match node {
        Some(node) => format!("{},spec.nodeName={node}", label_selector(labels)),
        None => label_selector(labels),
    }
}
