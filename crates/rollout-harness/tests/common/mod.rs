//! In-memory cluster used by the integration tests.
//!
//! `FakeCluster` plays both the API server and a tiny device-plugin
//! DaemonSet: creating the DaemonSet schedules one pod, deleting that pod
//! makes it linger for a few reads before a replacement appears, and each
//! pod logs the convergence marker after a number of log reads. When the
//! marker is emitted, the node's allocatable report is rebuilt from the
//! ConfigMap the pod started with (`resourceName` -> number of `pfNames`).

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use rollout_harness::{ClusterApi, ClusterObject, HarnessError, ObjectKind, PodHandle, PodPhase, Result};
use serde_json::Value;

pub const NODE: &str = "worker-0";
pub const RESOURCE_PREFIX: &str = "intel.com/";
pub const MARKER_LINE: &str = "I1018 10:00:02.000000 1 server.go:131] send devices";

/// Tunable timing of the simulated workload, counted in API reads.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// `get_pod` reads that still see a deleted pod.
    pub pod_linger_reads: u32,
    /// `list_pods` calls that return nothing once the old pod is gone.
    pub replacement_delay_lists: u32,
    /// Phases a new pod reports before `final_phase`, one per read.
    pub startup_phases: Vec<PodPhase>,
    pub final_phase: PodPhase,
    /// Log reads before the marker line appears; `None` never logs it.
    pub marker_after_reads: Option<u32>,
    /// `get` reads that still see a deleted object.
    pub object_linger_reads: u32,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            pod_linger_reads: 2,
            replacement_delay_lists: 1,
            startup_phases: vec![PodPhase::Pending, PodPhase::Pending],
            final_phase: PodPhase::Running,
            marker_after_reads: Some(3),
            object_linger_reads: 0,
        }
    }
}

#[derive(Debug)]
struct FakePod {
    handle: PodHandle,
    labels: BTreeMap<String, String>,
    phases: VecDeque<PodPhase>,
    final_phase: PodPhase,
    linger: Option<u32>,
    log_reads: u32,
    config: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<(ObjectKind, String), Option<BTreeMap<String, String>>>,
    lingering: BTreeMap<(ObjectKind, String), u32>,
    pods: BTreeMap<String, FakePod>,
    controller: Option<(String, String, BTreeMap<String, String>)>,
    generation: u32,
    replacement_countdown: Option<u32>,
    allocatable: BTreeMap<String, String>,
    events: Vec<String>,
}

pub struct FakeCluster {
    behavior: Mutex<Behavior>,
    config_key: String,
    config_map: String,
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new(behavior: Behavior) -> Self {
        let mut state = State::default();
        state.allocatable.insert("cpu".into(), "8".into());
        state.allocatable.insert("memory".into(), "32Gi".into());
        Self {
            behavior: Mutex::new(behavior),
            config_key: "config.json".into(),
            config_map: "sriovdp-config-e2e".into(),
            state: Mutex::new(state),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Recorded API events, in call order.
    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().unwrap().events.clear();
    }

    pub fn has_object(&self, kind: ObjectKind, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .objects
            .contains_key(&(kind, name.to_string()))
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.state.lock().unwrap().pods.keys().cloned().collect()
    }

    /// Schedule an extra pod with the given labels, outside any controller.
    pub fn add_stray_pod(&self, name: &str, labels: BTreeMap<String, String>) {
        self.add_stray_pod_on(name, labels, NODE);
    }

    /// Like `add_stray_pod`, on another node.
    pub fn add_stray_pod_on(&self, name: &str, labels: BTreeMap<String, String>, node: &str) {
        let mut state = self.state.lock().unwrap();
        state.pods.insert(
            name.to_string(),
            FakePod {
                handle: PodHandle {
                    name: name.to_string(),
                    namespace: "kube-system".into(),
                    phase: PodPhase::Running,
                    node_name: Some(node.into()),
                },
                labels,
                phases: VecDeque::new(),
                final_phase: PodPhase::Running,
                linger: None,
                log_reads: 0,
                config: None,
            },
        );
    }

    fn spawn_pod(&self, state: &mut State) {
        let Some((name, namespace, labels)) = state.controller.clone() else {
            return;
        };
        let behavior = self.behavior.lock().unwrap().clone();
        let pod_name = format!("{name}-{}", state.generation);
        state.generation += 1;

        let config = state
            .objects
            .get(&(ObjectKind::ConfigMap, self.config_map.clone()))
            .and_then(|data| data.as_ref())
            .and_then(|data| data.get(&self.config_key).cloned());

        state.events.push(format!("spawn {pod_name}"));
        state.pods.insert(
            pod_name.clone(),
            FakePod {
                handle: PodHandle {
                    name: pod_name,
                    namespace,
                    phase: behavior.startup_phases.first().copied().unwrap_or(behavior.final_phase),
                    node_name: Some(NODE.into()),
                },
                labels,
                phases: behavior.startup_phases.iter().copied().collect(),
                final_phase: behavior.final_phase,
                linger: None,
                log_reads: 0,
                config,
            },
        );
    }

    /// Advance a pod's phase by one read and return its handle.
    fn observe(pod: &mut FakePod) -> PodHandle {
        pod.handle.phase = pod.phases.pop_front().unwrap_or(pod.final_phase);
        pod.handle.clone()
    }

    fn publish_resources(state: &mut State, config: Option<&str>) {
        state.allocatable.retain(|k, _| !k.starts_with(RESOURCE_PREFIX));
        let Some(config) = config else { return };
        let Ok(doc) = serde_json::from_str::<Value>(config) else {
            return;
        };
        let resources = doc["resourceList"].as_array().cloned().unwrap_or_default();
        for resource in resources {
            let Some(name) = resource["resourceName"].as_str() else {
                continue;
            };
            let count = resource["selectors"]["pfNames"]
                .as_array()
                .map_or(0, Vec::len);
            state
                .allocatable
                .insert(format!("{RESOURCE_PREFIX}{name}"), count.to_string());
        }
    }

    /// Remove pods whose linger window ran out and queue their replacement.
    fn reap(state: &mut State, replacement_delay: u32) {
        let gone: Vec<String> = state
            .pods
            .iter()
            .filter(|(_, p)| p.linger == Some(0))
            .map(|(n, _)| n.clone())
            .collect();
        for name in gone {
            state.pods.remove(&name);
            state.events.push(format!("gone {name}"));
            if state.controller.is_some() {
                state.replacement_countdown = Some(replacement_delay);
            }
        }
    }
}

fn not_found(kind: ObjectKind, name: &str) -> HarnessError {
    HarnessError::NotFound {
        kind,
        name: name.to_string(),
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn create(&self, namespace: &str, object: ClusterObject) -> Result<()> {
        let kind = object.kind();
        let name = object.name().to_string();
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("create {kind} {name}"));

        let key = (kind, name.clone());
        if state.objects.contains_key(&key) {
            return Err(HarnessError::AlreadyExists { kind, name });
        }

        let data = match &object {
            ClusterObject::ConfigMap(cm) => cm.data.clone(),
            _ => None,
        };
        state.objects.insert(key, data);

        if let ClusterObject::DaemonSet(ds) = &object {
            let labels = ds
                .spec
                .as_ref()
                .and_then(|s| s.selector.match_labels.clone())
                .unwrap_or_default();
            state.controller = Some((name, namespace.to_string(), labels));
            self.spawn_pod(&mut state);
        }
        Ok(())
    }

    async fn get(&self, kind: ObjectKind, name: &str, _namespace: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = (kind, name.to_string());

        if kind == ObjectKind::Pod {
            return if state.pods.contains_key(name) {
                Ok(())
            } else {
                Err(not_found(kind, name))
            };
        }

        if let Some(remaining) = state.lingering.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(());
            }
            state.lingering.remove(&key);
            state.objects.remove(&key);
        }

        if state.objects.contains_key(&key) {
            Ok(())
        } else {
            Err(not_found(kind, name))
        }
    }

    async fn delete(&self, kind: ObjectKind, name: &str, _namespace: &str) -> Result<()> {
        let behavior = self.behavior.lock().unwrap().clone();
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("delete {kind} {name}"));

        if kind == ObjectKind::Pod {
            let Some(pod) = state.pods.get_mut(name) else {
                return Err(not_found(kind, name));
            };
            if pod.linger.is_none() {
                pod.linger = Some(behavior.pod_linger_reads);
            }
            Self::reap(&mut state, behavior.replacement_delay_lists);
            return Ok(());
        }

        let key = (kind, name.to_string());
        if !state.objects.contains_key(&key) || state.lingering.contains_key(&key) {
            return Err(not_found(kind, name));
        }
        if kind == ObjectKind::DaemonSet {
            state.controller = None;
        }
        if behavior.object_linger_reads > 0 {
            state.lingering.insert(key, behavior.object_linger_reads);
        } else {
            state.objects.remove(&key);
        }
        Ok(())
    }

    async fn get_pod(&self, name: &str, _namespace: &str) -> Result<PodHandle> {
        let behavior = self.behavior.lock().unwrap().clone();
        let mut state = self.state.lock().unwrap();

        let handle = match state.pods.get_mut(name) {
            None => None,
            Some(pod) => match pod.linger {
                Some(remaining) => {
                    pod.linger = Some(remaining.saturating_sub(1));
                    Some(pod.handle.clone())
                }
                None => Some(Self::observe(pod)),
            },
        };
        Self::reap(&mut state, behavior.replacement_delay_lists);

        match handle {
            Some(handle) => {
                state.events.push(format!("present {name} {}", handle.phase));
                Ok(handle)
            }
            None => {
                state.events.push(format!("absent {name}"));
                Err(not_found(ObjectKind::Pod, name))
            }
        }
    }

    async fn list_pods(
        &self,
        _namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<PodHandle>> {
        let mut state = self.state.lock().unwrap();
        state.events.push("list".to_string());

        if let Some(remaining) = state.replacement_countdown {
            if remaining == 0 {
                state.replacement_countdown = None;
                self.spawn_pod(&mut state);
            } else {
                state.replacement_countdown = Some(remaining - 1);
            }
        }

        Ok(state
            .pods
            .values()
            .filter(|p| labels.iter().all(|(k, v)| p.labels.get(k) == Some(v)))
            .map(|p| p.handle.clone())
            .collect())
    }

    async fn pod_logs(&self, name: &str, _namespace: &str) -> Result<String> {
        let marker_after = self.behavior.lock().unwrap().marker_after_reads;
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("logs {name}"));

        let Some(pod) = state.pods.get_mut(name) else {
            return Err(not_found(ObjectKind::Pod, name));
        };
        pod.log_reads += 1;

        let mut logs = String::from("I1018 10:00:00.000000 1 main.go:68] resource manager reading configs\n");
        let emitted = marker_after.is_some_and(|after| pod.log_reads >= after);
        if emitted {
            logs.push_str(MARKER_LINE);
            logs.push('\n');
            let config = pod.config.clone();
            Self::publish_resources(&mut state, config.as_deref());
        }
        Ok(logs)
    }

    async fn node_allocatable(&self, node: &str) -> Result<BTreeMap<String, String>> {
        let state = self.state.lock().unwrap();
        if node != NODE {
            return Err(not_found(ObjectKind::Pod, node));
        }
        Ok(state.allocatable.clone())
    }
}

/// Workload configuration selecting PFs for each resource.
pub fn device_config(resources: &[(&str, &[&str])]) -> String {
    let list: Vec<Value> = resources
        .iter()
        .map(|(name, pfs)| {
            serde_json::json!({
                "resourceName": name,
                "selectors": { "pfNames": pfs },
            })
        })
        .collect();
    serde_json::to_string_pretty(&serde_json::json!({ "resourceList": list }))
        .unwrap_or_default()
}
