//! [`ClusterApi`] backed by a live Kubernetes API server.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod, ServiceAccount};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::cluster::{label_selector, ClusterApi, ClusterObject, ObjectKind, PodHandle};
use crate::error::{HarnessError, Result};

/// Cluster access through `kube::Client`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient configuration (in-cluster or `KUBECONFIG`).
    ///
    /// # Errors
    ///
    /// Returns an error if no usable configuration is found.
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    /// Connect using an explicit kubeconfig file.
    ///
    /// # Errors
    ///
    /// Returns an error if the kubeconfig cannot be read or the client cannot be created.
    pub async fn from_kubeconfig(path: &Path) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
            HarnessError::Config(format!("failed to read kubeconfig {}: {e}", path.display()))
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| HarnessError::Config(format!("invalid kubeconfig: {e}")))?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn create_object<K>(&self, namespace: &str, kind: ObjectKind, object: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let name = object.meta().name.clone().unwrap_or_default();
        self.api::<K>(namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_api_error(e, kind, &name))?;
        info!(%kind, %name, %namespace, "Created object");
        Ok(())
    }

    async fn get_object<K>(&self, namespace: &str, kind: ObjectKind, name: &str) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| map_api_error(e, kind, name))
    }

    async fn delete_object<K>(&self, namespace: &str, kind: ObjectKind, name: &str) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_api_error(e, kind, name))?;
        debug!(%kind, %name, %namespace, "Delete accepted");
        Ok(())
    }
}

/// Translate 404/409 API responses into the harness taxonomy.
fn map_api_error(err: kube::Error, kind: ObjectKind, name: &str) -> HarnessError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => HarnessError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 => HarnessError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        other => HarnessError::Kube(other),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create(&self, namespace: &str, object: ClusterObject) -> Result<()> {
        let kind = object.kind();
        match object {
            ClusterObject::ServiceAccount(sa) => self.create_object(namespace, kind, &sa).await,
            ClusterObject::DaemonSet(ds) => self.create_object(namespace, kind, &*ds).await,
            ClusterObject::ConfigMap(cm) => self.create_object(namespace, kind, &cm).await,
        }
    }

    async fn get(&self, kind: ObjectKind, name: &str, namespace: &str) -> Result<()> {
        match kind {
            ObjectKind::ServiceAccount => {
                self.get_object::<ServiceAccount>(namespace, kind, name).await?;
            }
            ObjectKind::DaemonSet => {
                self.get_object::<DaemonSet>(namespace, kind, name).await?;
            }
            ObjectKind::ConfigMap => {
                self.get_object::<ConfigMap>(namespace, kind, name).await?;
            }
            ObjectKind::Pod => {
                self.get_object::<Pod>(namespace, kind, name).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, kind: ObjectKind, name: &str, namespace: &str) -> Result<()> {
        match kind {
            ObjectKind::ServiceAccount => {
                self.delete_object::<ServiceAccount>(namespace, kind, name).await
            }
            ObjectKind::DaemonSet => self.delete_object::<DaemonSet>(namespace, kind, name).await,
            ObjectKind::ConfigMap => self.delete_object::<ConfigMap>(namespace, kind, name).await,
            ObjectKind::Pod => self.delete_object::<Pod>(namespace, kind, name).await,
        }
    }

    async fn get_pod(&self, name: &str, namespace: &str) -> Result<PodHandle> {
        let pod = self
            .get_object::<Pod>(namespace, ObjectKind::Pod, name)
            .await?;
        Ok(PodHandle::from_pod(&pod, namespace))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<PodHandle>> {
        let selector = label_selector(labels);
        let pods = self
            .api::<Pod>(namespace)
            .list(&ListParams::default().labels(&selector))
            .await?;
        Ok(pods
            .items
            .iter()
            .map(|pod| PodHandle::from_pod(pod, namespace))
            .collect())
    }

    async fn pod_logs(&self, name: &str, namespace: &str) -> Result<String> {
        self.api::<Pod>(namespace)
            .logs(name, &LogParams::default())
            .await
            .map_err(|source| HarnessError::LogStream {
                pod: name.to_string(),
                source,
            })
    }

    async fn node_allocatable(&self, node: &str) -> Result<BTreeMap<String, String>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let node = nodes.get(node).await?;
        Ok(node
            .status
            .and_then(|s| s.allocatable)
            .unwrap_or_default()
            .into_iter()
            .map(|(key, quantity)| (key, quantity.0))
            .collect())
    }
}
