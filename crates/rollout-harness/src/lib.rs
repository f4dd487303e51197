//! Rollout and convergence verification for node-level Kubernetes workloads.
//!
//! The harness provisions a workload's service account and DaemonSet, swaps
//! its ConfigMap, forces the workload pod to restart, and then verifies that
//! the new pod converged: a marker shows up in its logs and the node
//! advertises the expected allocatable resource counts.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rollout_harness::{HarnessConfig, KubeCluster, Scenario, SuiteDriver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cluster = Arc::new(KubeCluster::connect().await?);
//!     let suite = SuiteDriver::new(cluster, HarnessConfig::from_env()?)?;
//!
//!     suite.setup().await?;
//!     let scenario = Scenario::new("netdev", include_str!("netdev.json"))
//!         .expect("test_pf_netdev", 2);
//!     suite.run_scenario(&scenario).await?;
//!     suite.teardown().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cluster;
pub mod config;
pub mod convergence;
pub mod error;
pub mod kube_cluster;
pub mod objects;
pub mod pods;
pub mod poll;
pub mod resources;
pub mod rollout;
pub mod suite;
pub mod template;

pub use cluster::{ClusterApi, ClusterObject, ObjectKind, PodHandle, PodPhase};
pub use config::{HarnessConfig, PollPolicy};
pub use convergence::ConvergenceVerifier;
pub use error::{HarnessError, Result};
pub use kube_cluster::KubeCluster;
pub use objects::ObjectLifecycleManager;
pub use pods::PodObservationService;
pub use resources::ResourceInspector;
pub use rollout::{RolloutController, RolloutOutcome, RolloutState};
pub use suite::{ResourceExpectation, Scenario, ScenarioReport, SuiteDriver};
