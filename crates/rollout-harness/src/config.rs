//! Harness configuration.
//!
//! All settings live in one [`HarnessConfig`] value that is handed to each
//! component when it is built. Values come from defaults, an optional YAML
//! file, and `HARNESS_*` environment variables, in that order of precedence.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HarnessError, Result};

/// Environment variable overriding the target namespace.
pub const ENV_NAMESPACE: &str = "HARNESS_NAMESPACE";
/// Environment variable overriding the workload image.
pub const ENV_IMAGE: &str = "HARNESS_IMAGE";
/// Environment variable overriding the workload image tag.
pub const ENV_IMAGE_TAG: &str = "HARNESS_IMAGE_TAG";
/// Environment variable naming the node whose resources are inspected.
pub const ENV_NODE_NAME: &str = "HARNESS_NODE_NAME";

/// Interval and deadline for one bounded wait loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay between two attempts.
    #[serde(rename = "interval_secs", with = "secs")]
    pub interval: Duration,
    /// Overall deadline, measured from the first attempt.
    #[serde(rename = "timeout_secs", with = "secs")]
    pub timeout: Duration,
}

impl PollPolicy {
    /// Build a policy, rejecting a zero interval or a timeout shorter than it.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if the policy cannot bound a loop.
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self> {
        let policy = Self { interval, timeout };
        policy.validate()?;
        Ok(policy)
    }

    /// Convenience constructor taking whole seconds.
    ///
    /// # Errors
    ///
    /// See [`PollPolicy::new`].
    pub fn from_secs(interval: u64, timeout: u64) -> Result<Self> {
        Self::new(Duration::from_secs(interval), Duration::from_secs(timeout))
    }

    /// Upper bound on the number of attempts: `timeout / interval + 1`.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        let interval = self.interval.as_nanos().max(1);
        let steps = self.timeout.as_nanos() / interval;
        u32::try_from(steps.saturating_add(1)).unwrap_or(u32::MAX)
    }

    /// Check the policy invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] on a zero interval or `timeout < interval`.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(HarnessError::Config("poll interval must be non-zero".into()));
        }
        if self.timeout < self.interval {
            return Err(HarnessError::Config(format!(
                "poll timeout {:?} is shorter than interval {:?}",
                self.timeout, self.interval
            )));
        }
        Ok(())
    }
}

/// Full harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    // Placement
    /// Namespace holding every object the harness manages.
    pub namespace: String,
    /// Node whose allocatable resources are inspected. Falls back to the
    /// node the replacement pod was scheduled on.
    pub node_name: Option<String>,

    // Objects
    /// Service account the workload runs as.
    pub service_account: String,
    /// Name of the DaemonSet managing the workload.
    pub controller_name: String,
    /// Name of the ConfigMap carrying the workload configuration.
    pub config_map_name: String,
    /// Key (file name) of the configuration entry inside the ConfigMap.
    pub config_key: String,
    /// Labels stamped on workload pods; also the selector used to find them.
    pub pod_labels: BTreeMap<String, String>,

    // Image
    /// Workload container image, without tag.
    pub image: String,
    /// Workload container image tag.
    pub image_tag: String,

    // Convergence
    /// Log text signalling that the workload re-read its configuration.
    pub marker: String,
    /// Extra delay after the marker is seen, letting node counters catch up.
    pub settle_delay_secs: u64,

    // Wait loops
    /// Waiting for the replacement pod to run.
    pub rollout: PollPolicy,
    /// Waiting for deleted objects and pods to disappear.
    pub deletion: PollPolicy,
    /// Waiting for the log marker.
    pub convergence: PollPolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let mut pod_labels = BTreeMap::new();
        pod_labels.insert("app".to_string(), "sriovdp-e2e".to_string());

        Self {
            namespace: "kube-system".to_string(),
            node_name: None,
            service_account: "sriov-device-plugin-e2e".to_string(),
            controller_name: "sriov-device-plugin-e2e".to_string(),
            config_map_name: "sriovdp-config-e2e".to_string(),
            config_key: "config.json".to_string(),
            pod_labels,
            image: "ghcr.io/k8snetworkplumbingwg/sriov-network-device-plugin".to_string(),
            image_tag: "latest".to_string(),
            marker: "send devices".to_string(),
            settle_delay_secs: 5,
            rollout: PollPolicy {
                interval: Duration::from_secs(2),
                timeout: Duration::from_secs(120),
            },
            deletion: PollPolicy {
                interval: Duration::from_secs(2),
                timeout: Duration::from_secs(60),
            },
            convergence: PollPolicy {
                interval: Duration::from_secs(2),
                timeout: Duration::from_secs(60),
            },
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a YAML file, then apply env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config: Self = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(path = %path.display(), "Loaded harness configuration");
        Ok(config)
    }

    /// Defaults plus env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the overridden configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Overlay any `HARNESS_*` variables present in the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Some(namespace) = env_var(ENV_NAMESPACE) {
            self.namespace = namespace;
        }
        if let Some(image) = env_var(ENV_IMAGE) {
            self.image = image;
        }
        if let Some(tag) = env_var(ENV_IMAGE_TAG) {
            self.image_tag = tag;
        }
        if let Some(node) = env_var(ENV_NODE_NAME) {
            self.node_name = Some(node);
        }
    }

    /// Check names and poll policies.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("namespace", &self.namespace),
            ("service_account", &self.service_account),
            ("controller_name", &self.controller_name),
            ("config_map_name", &self.config_map_name),
            ("config_key", &self.config_key),
            ("image", &self.image),
            ("image_tag", &self.image_tag),
            ("marker", &self.marker),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(HarnessError::Config(format!("{field} must not be empty")));
            }
        }
        if self.pod_labels.is_empty() {
            return Err(HarnessError::Config(
                "pod_labels must contain at least one label".into(),
            ));
        }

        self.rollout.validate()?;
        self.deletion.validate()?;
        self.convergence.validate()?;
        Ok(())
    }

    /// Post-marker settle delay.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Serialize a `Duration` as whole seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
