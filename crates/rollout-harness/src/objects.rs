//! Create/delete lifecycle of the objects the harness owns.
//!
//! Deletes are confirmed by a follow-up existence check: a delete only
//! counts as done once the object can no longer be fetched.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use kube::api::ObjectMeta;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterApi, ClusterObject, ObjectKind};
use crate::config::PollPolicy;
use crate::error::{HarnessError, Result};
use crate::poll::{poll_until, PollError, Probe};
use crate::template::ControllerTemplate;

/// Creates and removes the service account, DaemonSet and ConfigMap.
pub struct ObjectLifecycleManager {
    cluster: Arc<dyn ClusterApi>,
    template: ControllerTemplate,
}

impl ObjectLifecycleManager {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>, template: ControllerTemplate) -> Self {
        Self { cluster, template }
    }

    /// Create the service account. Principals are usable immediately, so
    /// there is no readiness wait.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::AlreadyExists`] if it is already present.
    pub async fn create_identity(&self, name: &str, namespace: &str) -> Result<()> {
        let sa = ServiceAccount {
            metadata: object_meta(name, namespace),
            ..ServiceAccount::default()
        };
        self.cluster
            .create(namespace, ClusterObject::ServiceAccount(sa))
            .await
    }

    /// Render the controller template and submit it. Readiness is the
    /// rollout controller's concern.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or submission fails.
    pub async fn create_controller(
        &self,
        name: &str,
        namespace: &str,
        image: &str,
        tag: &str,
    ) -> Result<()> {
        let ds = self.template.render(name, namespace, image, tag)?;
        info!(%name, %namespace, image = %format!("{image}:{tag}"), "Submitting DaemonSet");
        self.cluster
            .create(namespace, ClusterObject::DaemonSet(Box::new(ds)))
            .await
    }

    /// Create the configuration document, then check once that it is visible.
    ///
    /// Returns whether the document was observed after creation.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::AlreadyExists`] if a previous document was not
    /// removed, or the transport error of either call.
    pub async fn create_config(
        &self,
        name: &str,
        namespace: &str,
        content: BTreeMap<String, String>,
    ) -> Result<bool> {
        let cm = ConfigMap {
            metadata: object_meta(name, namespace),
            data: Some(content),
            ..ConfigMap::default()
        };
        self.cluster
            .create(namespace, ClusterObject::ConfigMap(cm))
            .await?;

        match self.cluster.get(ObjectKind::ConfigMap, name, namespace).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => {
                warn!(%name, %namespace, "ConfigMap not visible right after creation");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the service account and confirm it is gone.
    ///
    /// # Errors
    ///
    /// See [`ObjectLifecycleManager::delete`].
    pub async fn delete_identity(&self, name: &str, namespace: &str) -> Result<()> {
        self.delete(ObjectKind::ServiceAccount, name, namespace).await
    }

    /// Delete the DaemonSet and confirm it is gone.
    ///
    /// # Errors
    ///
    /// See [`ObjectLifecycleManager::delete`].
    pub async fn delete_controller(&self, name: &str, namespace: &str) -> Result<()> {
        self.delete(ObjectKind::DaemonSet, name, namespace).await
    }

    /// Delete the ConfigMap and confirm it is gone.
    ///
    /// # Errors
    ///
    /// See [`ObjectLifecycleManager::delete`].
    pub async fn delete_config(&self, name: &str, namespace: &str) -> Result<()> {
        self.delete(ObjectKind::ConfigMap, name, namespace).await
    }

    /// Issue a delete, then a single get. Success means the get reported
    /// not-found.
    ///
    /// # Errors
    ///
    /// Returns the delete error unchanged (including `NotFound` for an object
    /// that never existed), [`HarnessError::DeletionPending`] if the object is
    /// still visible, or the transport error of the check.
    pub async fn delete(&self, kind: ObjectKind, name: &str, namespace: &str) -> Result<()> {
        self.cluster.delete(kind, name, namespace).await?;

        match self.cluster.get(kind, name, namespace).await {
            Ok(()) => {
                debug!(%kind, %name, %namespace, "Object still present after delete");
                Err(HarnessError::DeletionPending {
                    kind,
                    name: name.to_string(),
                })
            }
            Err(e) if e.is_not_found() => {
                info!(%kind, %name, %namespace, "Deleted object");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Issue a delete, then poll until the object stops resolving.
    ///
    /// # Errors
    ///
    /// Returns the delete error unchanged, or [`HarnessError::DeletionTimeout`]
    /// if the object is still visible when the policy runs out.
    pub async fn delete_and_confirm(
        &self,
        kind: ObjectKind,
        name: &str,
        namespace: &str,
        policy: &PollPolicy,
    ) -> Result<()> {
        self.cluster.delete(kind, name, namespace).await?;

        let cluster = self.cluster.as_ref();
        let outcome = poll_until(policy, "object deletion", move || async move {
            match cluster.get(kind, name, namespace).await {
                Ok(()) => Probe::Pending,
                Err(e) if e.is_not_found() => Probe::Ready(()),
                Err(e) => Probe::Transient(e),
            }
        })
        .await;

        match outcome {
            Ok(()) => {
                info!(%kind, %name, %namespace, "Deleted object");
                Ok(())
            }
            Err(PollError::Fatal(e)) => Err(e),
            Err(PollError::Exhausted(_)) => Err(HarnessError::DeletionTimeout {
                kind,
                name: name.to_string(),
                timeout: policy.timeout,
            }),
        }
    }

    /// Delete and confirm, treating an object that does not exist as done.
    /// Other failures are logged and swallowed.
    pub async fn delete_best_effort(
        &self,
        kind: ObjectKind,
        name: &str,
        namespace: &str,
        policy: &PollPolicy,
    ) {
        match self.delete_and_confirm(kind, name, namespace, policy).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(%kind, %name, "Nothing to clean up"),
            Err(e) => warn!(%kind, %name, error = %e, "Best-effort cleanup failed"),
        }
    }
}

fn object_meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..ObjectMeta::default()
    }
}
