//! Reading node-level resource counters.

use std::sync::Arc;

use tracing::debug;

use crate::cluster::ClusterApi;
use crate::error::{HarnessError, Result};

/// Reads a node's allocatable report.
pub struct ResourceInspector {
    cluster: Arc<dyn ClusterApi>,
}

impl ResourceInspector {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Quantity of the first allocatable resource whose key contains
    /// `resource`.
    ///
    /// Keys are namespaced (`vendor.com/test_pf_netdev`), hence the substring
    /// match. Keys are visited in sorted order, so the result is stable for a
    /// given report, but callers should pick an unambiguous substring.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the node cannot be fetched,
    /// [`HarnessError::ResourceNotFound`] if no key matches, or
    /// [`HarnessError::ResourceParseError`] if the quantity is not an integer.
    pub async fn quantity_of(&self, node: &str, resource: &str) -> Result<i64> {
        let allocatable = self.cluster.node_allocatable(node).await?;

        let (key, value) = allocatable
            .iter()
            .find(|(key, _)| key.contains(resource))
            .ok_or_else(|| HarnessError::ResourceNotFound {
                node: node.to_string(),
                resource: resource.to_string(),
            })?;

        let quantity = value
            .trim()
            .parse::<i64>()
            .map_err(|_| HarnessError::ResourceParseError {
                resource: key.clone(),
                value: value.clone(),
            })?;

        debug!(%node, %key, quantity, "Read allocatable resource");
        Ok(quantity)
    }
}
