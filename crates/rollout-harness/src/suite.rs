//! Scenario driver.
//!
//! A suite owns the service account, the DaemonSet and the ConfigMap for its
//! whole run. Each scenario swaps the ConfigMap, restarts the workload pod,
//! waits for the convergence marker and checks the node's resource counters.
//! Scenarios must run one at a time against the same object names.
//!
//! With `node_name` set, only the workload pod on that node is restarted and
//! its counters are read from that node; pods on other nodes are left alone.
//! Without it, the selector must match exactly one pod cluster-wide.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::cluster::{ClusterApi, ObjectKind, PodHandle};
use crate::config::HarnessConfig;
use crate::convergence::ConvergenceVerifier;
use crate::error::{HarnessError, Result};
use crate::objects::ObjectLifecycleManager;
use crate::pods::PodObservationService;
use crate::resources::ResourceInspector;
use crate::rollout::{RolloutController, RolloutState};
use crate::template::ControllerTemplate;

/// Expected advertised quantity for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceExpectation {
    /// Substring of the allocatable resource key.
    pub resource: String,
    pub quantity: i64,
}

impl ResourceExpectation {
    #[must_use]
    pub fn new(resource: impl Into<String>, quantity: i64) -> Self {
        Self {
            resource: resource.into(),
            quantity,
        }
    }
}

/// One configuration to roll out and verify.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    /// Literal workload configuration, stored under the configured key.
    pub config_text: String,
    pub expectations: Vec<ResourceExpectation>,
}

impl Scenario {
    #[must_use]
    pub fn new(name: impl Into<String>, config_text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_text: config_text.into(),
            expectations: Vec::new(),
        }
    }

    /// Add an expected quantity.
    #[must_use]
    pub fn expect(mut self, resource: impl Into<String>, quantity: i64) -> Self {
        self.expectations.push(ResourceExpectation::new(resource, quantity));
        self
    }
}

/// Outcome of a passing scenario.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub scenario: String,
    /// Running pod that picked up the configuration.
    pub pod: PodHandle,
    /// Node whose counters were checked.
    pub node: String,
    pub rollout_states: Vec<RolloutState>,
    /// Observed quantity per expected resource.
    pub observed: BTreeMap<String, i64>,
}

/// Runs scenarios against one workload.
pub struct SuiteDriver {
    config: HarnessConfig,
    objects: ObjectLifecycleManager,
    rollout: RolloutController,
    convergence: ConvergenceVerifier,
    resources: ResourceInspector,
}

impl SuiteDriver {
    /// Build the driver and all its components from one configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if the configuration is invalid.
    pub fn new(cluster: Arc<dyn ClusterApi>, config: HarnessConfig) -> Result<Self> {
        config.validate()?;

        let pods = PodObservationService::new(Arc::clone(&cluster));
        Ok(Self {
            objects: ObjectLifecycleManager::new(
                Arc::clone(&cluster),
                ControllerTemplate::from_config(&config),
            ),
            rollout: RolloutController::new(pods.clone(), config.deletion, config.rollout)
                .with_node(config.node_name.clone()),
            convergence: ConvergenceVerifier::new(pods, config.settle_delay()),
            resources: ResourceInspector::new(cluster),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    #[must_use]
    pub fn objects(&self) -> &ObjectLifecycleManager {
        &self.objects
    }

    /// Clear leftovers from a previous run, then create the service account
    /// and the DaemonSet.
    ///
    /// # Errors
    ///
    /// Returns the first creation error.
    #[instrument(skip(self), fields(namespace = %self.config.namespace))]
    pub async fn setup(&self) -> Result<()> {
        let c = &self.config;

        self.objects
            .delete_best_effort(ObjectKind::DaemonSet, &c.controller_name, &c.namespace, &c.deletion)
            .await;
        self.objects
            .delete_best_effort(ObjectKind::ServiceAccount, &c.service_account, &c.namespace, &c.deletion)
            .await;

        self.objects
            .create_identity(&c.service_account, &c.namespace)
            .await?;
        self.objects
            .create_controller(&c.controller_name, &c.namespace, &c.image, &c.image_tag)
            .await?;

        info!(controller = %c.controller_name, "Suite objects created");
        Ok(())
    }

    /// Replace the ConfigMap with the scenario's document.
    ///
    /// # Errors
    ///
    /// Returns an error if the old document cannot be removed or the new one
    /// cannot be created.
    pub async fn apply_config(&self, scenario: &Scenario) -> Result<bool> {
        let c = &self.config;

        match self
            .objects
            .delete_and_confirm(ObjectKind::ConfigMap, &c.config_map_name, &c.namespace, &c.deletion)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut content = BTreeMap::new();
        content.insert(c.config_key.clone(), scenario.config_text.clone());
        let observed = self
            .objects
            .create_config(&c.config_map_name, &c.namespace, content)
            .await?;
        info!(scenario = %scenario.name, observed, "Applied configuration");
        Ok(observed)
    }

    /// Apply, restart, wait for the marker, then check every expectation.
    ///
    /// # Errors
    ///
    /// Fails with the first error of any step; a wrong counter value is
    /// [`HarnessError::QuantityMismatch`].
    #[instrument(skip(self, scenario), fields(scenario = %scenario.name))]
    pub async fn run_scenario(&self, scenario: &Scenario) -> Result<ScenarioReport> {
        let c = &self.config;

        self.apply_config(scenario).await?;

        let outcome = self.rollout.restart(&c.namespace, &c.pod_labels).await?;

        self.convergence
            .require_marker(&outcome.pod, &c.marker, &c.convergence)
            .await?;

        let node = c
            .node_name
            .clone()
            .or_else(|| outcome.pod.node_name.clone())
            .ok_or_else(|| {
                HarnessError::Config(format!(
                    "no node to inspect: pod {} is unscheduled and node_name is unset",
                    outcome.pod.name
                ))
            })?;

        let mut observed = BTreeMap::new();
        for expectation in &scenario.expectations {
            let actual = self
                .resources
                .quantity_of(&node, &expectation.resource)
                .await?;
            observed.insert(expectation.resource.clone(), actual);
            if actual != expectation.quantity {
                return Err(HarnessError::QuantityMismatch {
                    resource: expectation.resource.clone(),
                    expected: expectation.quantity,
                    actual,
                });
            }
        }

        info!(pod = %outcome.pod.name, %node, "Scenario passed");
        Ok(ScenarioReport {
            scenario: scenario.name.clone(),
            pod: outcome.pod,
            node,
            rollout_states: outcome.states,
            observed,
        })
    }

    /// Delete everything the suite created. All deletes are attempted; the
    /// first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first deletion error other than not-found.
    #[instrument(skip(self), fields(namespace = %self.config.namespace))]
    pub async fn teardown(&self) -> Result<()> {
        let c = &self.config;
        let targets = [
            (ObjectKind::ConfigMap, &c.config_map_name),
            (ObjectKind::DaemonSet, &c.controller_name),
            (ObjectKind::ServiceAccount, &c.service_account),
        ];

        let mut first_error = None;
        for (kind, name) in targets {
            match self
                .objects
                .delete_and_confirm(kind, name, &c.namespace, &c.deletion)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(%kind, %name, error = %e, "Teardown delete failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_builder() {
        let scenario = Scenario::new("two-classes", "{}")
            .expect("test_pf_netdev", 2)
            .expect("test_pf_vfio", 1);
        assert_eq!(scenario.expectations.len(), 2);
        assert_eq!(
            scenario.expectations[1],
            ResourceExpectation::new("test_pf_vfio", 1)
        );
    }
}
