//! Workload controller template.
//!
//! The DaemonSet topology is fixed: one privileged pod per node with the
//! device-plugin socket directory, the log directory, the device-info
//! directory and the configuration document mounted in. Only the name,
//! namespace, image and tag vary per call.

use std::collections::BTreeMap;

use handlebars::Handlebars;
use k8s_openapi::api::apps::v1::DaemonSet;
use serde_json::json;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};

const DAEMONSET_TEMPLATE: &str = include_str!("../templates/daemonset.yaml.hbs");

/// Container name inside the workload pod.
pub const CONTAINER_NAME: &str = "sriovdp";
/// Host directory holding kubelet device-plugin sockets.
pub const DEVICE_PLUGIN_DIR: &str = "/var/lib/kubelet/device-plugins";
/// Host directory the workload writes logs into.
pub const LOG_DIR: &str = "/var/log";
/// Host directory for per-device information files.
pub const DEVICE_INFO_DIR: &str = "/var/run/k8s.cni.cncf.io/devinfo/dp";
/// Directory the configuration document is projected into.
pub const CONFIG_MOUNT_DIR: &str = "/etc/pcidp";

/// Fixed controller parameters, taken from [`HarnessConfig`].
#[derive(Debug, Clone)]
pub struct ControllerTemplate {
    pub service_account: String,
    pub config_map: String,
    pub config_key: String,
    pub labels: BTreeMap<String, String>,
}

impl ControllerTemplate {
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            service_account: config.service_account.clone(),
            config_map: config.config_map_name.clone(),
            config_key: config.config_key.clone(),
            labels: config.pod_labels.clone(),
        }
    }

    /// Render the DaemonSet manifest as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Template`] if rendering fails.
    pub fn render_yaml(&self, name: &str, namespace: &str, image: &str, tag: &str) -> Result<String> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(true);

        let context = json!({
            "name": name,
            "namespace": namespace,
            "image": image,
            "tag": tag,
            "labels": self.labels,
            "service_account": self.service_account,
            "container_name": CONTAINER_NAME,
            "config_map": self.config_map,
            "config_key": self.config_key,
            "device_plugin_dir": DEVICE_PLUGIN_DIR,
            "log_dir": LOG_DIR,
            "device_info_dir": DEVICE_INFO_DIR,
            "config_mount_dir": CONFIG_MOUNT_DIR,
        });

        handlebars
            .render_template(DAEMONSET_TEMPLATE, &context)
            .map_err(|e| HarnessError::Template(format!("failed to render DaemonSet: {e}")))
    }

    /// Render and parse the DaemonSet.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails or the output is not a valid DaemonSet.
    pub fn render(&self, name: &str, namespace: &str, image: &str, tag: &str) -> Result<DaemonSet> {
        let yaml = self.render_yaml(name, namespace, image, tag)?;
        Ok(serde_yaml::from_str(&yaml)?)
    }
}
