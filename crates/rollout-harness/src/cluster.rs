//! Cluster capability set consumed by the harness.
//!
//! The harness only needs create/get/delete on a handful of object kinds,
//! pod listing by exact labels, pod logs, and a node's allocatable report.
//! [`ClusterApi`] captures exactly that so the components can run against
//! a live cluster ([`crate::KubeCluster`]) or a test double.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, ServiceAccount};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[cfg(test)]
use mockall::automock;

/// Object kinds the harness touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Identity principal the workload runs as.
    ServiceAccount,
    /// Controller keeping one workload pod per node.
    DaemonSet,
    /// Configuration document read by the workload.
    ConfigMap,
    /// Workload instance. Never created directly.
    Pod,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceAccount => write!(f, "ServiceAccount"),
            Self::DaemonSet => write!(f, "DaemonSet"),
            Self::ConfigMap => write!(f, "ConfigMap"),
            Self::Pod => write!(f, "Pod"),
        }
    }
}

/// An object the harness may submit.
#[derive(Debug, Clone)]
pub enum ClusterObject {
    ServiceAccount(ServiceAccount),
    DaemonSet(Box<DaemonSet>),
    ConfigMap(ConfigMap),
}

impl ClusterObject {
    /// Kind of the wrapped object.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::ServiceAccount(_) => ObjectKind::ServiceAccount,
            Self::DaemonSet(_) => ObjectKind::DaemonSet,
            Self::ConfigMap(_) => ObjectKind::ConfigMap,
        }
    }

    /// `metadata.name`, or an empty string when unset.
    #[must_use]
    pub fn name(&self) -> &str {
        let name = match self {
            Self::ServiceAccount(sa) => sa.metadata.name.as_deref(),
            Self::DaemonSet(ds) => ds.metadata.name.as_deref(),
            Self::ConfigMap(cm) => cm.metadata.name.as_deref(),
        };
        name.unwrap_or_default()
    }
}

/// Pod lifecycle phase as reported in `status.phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse a raw phase string; anything unrecognised is `Unknown`.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// `Succeeded` and `Failed` never transition back to `Running`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a pod. Re-fetched at every observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodHandle {
    pub name: String,
    pub namespace: String,
    pub phase: PodPhase,
    /// Node the pod is scheduled on, once bound.
    pub node_name: Option<String>,
}

impl PodHandle {
    /// Build a handle from an API pod object.
    #[must_use]
    pub fn from_pod(pod: &Pod, namespace: &str) -> Self {
        let phase = PodPhase::parse(pod.status.as_ref().and_then(|s| s.phase.as_deref()));
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| namespace.to_string()),
            phase,
            node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        }
    }
}

/// Render labels as an AND-of-equalities selector (`a=1,b=2`).
#[must_use]
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Remote operations the harness needs from the cluster.
///
/// Not-found conditions are reported as [`crate::HarnessError::NotFound`] and
/// name conflicts as [`crate::HarnessError::AlreadyExists`]; everything else
/// passes the transport error through.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Submit a new object. Fails if one with the same name exists.
    async fn create(&self, namespace: &str, object: ClusterObject) -> Result<()>;

    /// Check that an object exists.
    async fn get(&self, kind: ObjectKind, name: &str, namespace: &str) -> Result<()>;

    /// Issue a single delete. Does not wait for the object to go away.
    async fn delete(&self, kind: ObjectKind, name: &str, namespace: &str) -> Result<()>;

    /// Fetch a pod.
    async fn get_pod(&self, name: &str, namespace: &str) -> Result<PodHandle>;

    /// List pods carrying every given label.
    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<PodHandle>>;

    /// Full current log buffer of the pod's container.
    async fn pod_logs(&self, name: &str, namespace: &str) -> Result<String>;

    /// Allocatable resources of a node, quantities in string form.
    async fn node_allocatable(&self, node: &str) -> Result<BTreeMap<String, String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodSpec, PodStatus};
    use kube::api::ObjectMeta;

    #[test]
    fn test_phase_parsing() {
        assert_eq!(PodPhase::parse(Some("Running")), PodPhase::Running);
        assert_eq!(PodPhase::parse(Some("Failed")), PodPhase::Failed);
        assert_eq!(PodPhase::parse(Some("CrashLoop")), PodPhase::Unknown);
        assert_eq!(PodPhase::parse(None), PodPhase::Unknown);

        assert!(PodPhase::Succeeded.is_terminal());
        assert!(PodPhase::Failed.is_terminal());
        assert!(!PodPhase::Pending.is_terminal());
        assert!(!PodPhase::Unknown.is_terminal());
    }

    #[test]
    fn test_pod_handle_from_pod() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("sriovdp-x7k2p".into()),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                node_name: Some("worker-1".into()),
                ..PodSpec::default()
            }),
            status: Some(PodStatus {
                phase: Some("Pending".into()),
                ..PodStatus::default()
            }),
        };

        let handle = PodHandle::from_pod(&pod, "kube-system");
        assert_eq!(handle.name, "sriovdp-x7k2p");
        assert_eq!(handle.namespace, "kube-system");
        assert_eq!(handle.phase, PodPhase::Pending);
        assert_eq!(handle.node_name.as_deref(), Some("worker-1"));
    }

    #[test]
    fn test_label_selector_is_sorted_and_joined() {
        let mut labels = BTreeMap::new();
        labels.insert("tier".to_string(), "node".to_string());
        labels.insert("app".to_string(), "sriovdp".to_string());
        assert_eq!(label_selector(&labels), "app=sriovdp,tier=node");
    }

    #[test]
    fn test_object_kind_as_map_key() {
        let mut seen = BTreeMap::new();
        seen.insert((ObjectKind::Pod, "dp".to_string()), 1);
        seen.insert((ObjectKind::ConfigMap, "dp".to_string()), 2);
        seen.insert((ObjectKind::ServiceAccount, "dp".to_string()), 3);

        let kinds: Vec<ObjectKind> = seen.keys().map(|(kind, _)| *kind).collect();
        assert_eq!(
            kinds,
            vec![ObjectKind::ServiceAccount, ObjectKind::ConfigMap, ObjectKind::Pod]
        );
        assert_eq!(ObjectKind::DaemonSet.to_string(), "DaemonSet");
    }

    #[test]
    fn test_cluster_object_kind_and_name() {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("sriovdp-config".into()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        };
        let object = ClusterObject::ConfigMap(cm);
        assert_eq!(object.kind(), ObjectKind::ConfigMap);
        assert_eq!(object.name(), "sriovdp-config");
    }
}
