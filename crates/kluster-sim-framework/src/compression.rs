//! Cluster compression.
//!
//! [`ClusterCompression`] looks for nodes the cluster can do without. It
//! repeatedly takes the schedulable node with the fewest movable pods,
//! cordons it and evicts its pods back to the scheduler. If every evicted
//! pod lands elsewhere the node is recorded for scale-down and the next one
//! is tried; the first pod that cannot move ends the run.
//!
//! DaemonSet pods are pinned to their node. They are deleted with the node
//! rather than rescheduled.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use k8s_openapi::api::core::v1::{Node, Pod};
use kluster_sim_core::{pod_key, ClusterObject, ObjectKey, ObjectKind};
use kluster_sim_scheduler::{SchedulerCache, SchedulerConfig};
use kluster_sim_store::{ObjectTracker, StoreError};
use tracing::{debug, info};

use crate::error::Result;
use crate::estimation::DEFAULT_STEP_TIMEOUT;
use crate::options::SimulatorOptions;
use crate::outcome::{await_pods, watch_outcomes, Settled};
use crate::sanitize::{is_daemonset_pod, reset_pod};
use crate::simulator::{GenericSimulator, InitObject, Simulation, SimulationReport};

const CORDON_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Finds nodes that can be removed without leaving pods unscheduled.
#[derive(Clone)]
pub struct ClusterCompression {
    config: SchedulerConfig,
    options: SimulatorOptions,
    max_limit: usize,
    step_timeout: Duration,
}

impl ClusterCompression {
    /// Compress with `config` and a simulator built from `options`.
    #[must_use]
    pub fn new(config: SchedulerConfig, options: SimulatorOptions) -> Self {
        Self {
            config,
            options,
            max_limit: 0,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Stop after this many removable nodes. Zero means no limit.
    #[must_use]
    pub fn with_max_limit(mut self, limit: usize) -> Self {
        self.max_limit = limit;
        self
    }

    /// How long to wait for one node's pods to be rescheduled.
    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Remove nodes one at a time until a node's pods cannot be moved, the
    /// limit is hit or no candidate is left.
    ///
    /// `world` is passed to [`Simulation::init_the_world`]; leave it empty to
    /// use the cluster snapshot. Removable nodes end up in the status's
    /// `nodes_to_scale_down`, rescheduled pods in its `pods`.
    ///
    /// # Errors
    ///
    /// Returns an error if the simulator cannot be built, initialized or
    /// stopped.
    pub async fn compress(&self, world: Vec<InitObject>) -> Result<SimulationReport> {
        let (options, mut outcomes) = watch_outcomes(self.options.clone());
        let sim = GenericSimulator::new(self.config.clone(), options)?;
        if let Err(e) = sim.init_the_world(world).await {
            sim.abort("failed to initialize the world");
            return Err(e);
        }
        let runner = sim.spawn();

        let mut tried = BTreeSet::new();
        let mut removed = 0;
        let mut rescheduled = Vec::new();
        let reason = loop {
            if self.max_limit > 0 && removed >= self.max_limit {
                break format!("reached the limit of {} nodes", self.max_limit);
            }
            let Some(candidate) = next_candidate(sim.store(), &tried) else {
                break "no more nodes to try".to_string();
            };
            tried.insert(candidate.clone());

            if let Err(e) = cordon(sim.store(), &candidate) {
                break format!("failed to cordon node {candidate}: {e}");
            }
            if !wait_for_cordon(sim.scheduler().cache(), &candidate, self.step_timeout).await {
                break format!("timed out waiting for node {candidate} to be cordoned");
            }
            let evicted = match evict(sim.store(), &candidate) {
                Ok(evicted) => evicted,
                Err(e) => break format!("failed to evict pods from node {candidate}: {e}"),
            };
            debug!(node = %candidate, pods = evicted.len(), "Evicted pods");

            match await_pods(&mut outcomes, evicted, self.step_timeout).await {
                Settled::Bound(pods) => {
                    info!(node = %candidate, pods = pods.len(), "Node can be removed");
                    sim.update_nodes_to_scale_down(&candidate);
                    rescheduled.extend(pods);
                    removed += 1;
                }
                Settled::Failed { pod, message } => {
                    break format!("node {candidate} cannot be removed: {pod}: {message}");
                }
                Settled::TimedOut => {
                    break format!("timed out rescheduling pods from node {candidate}");
                }
                Settled::Closed => break "scheduling outcomes stopped arriving".to_string(),
            }
        };

        info!(removable = removed, reason = %reason, "Cluster compression finished");
        sim.update_scheduled_pods(rescheduled);
        sim.shut_down(runner, &reason).await
    }
}

fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

fn is_unschedulable(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
}

fn assigned_node(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|n| !n.is_empty())
}

/// The schedulable, untried node with the fewest movable pods. Ties go to
/// the lowest name.
fn next_candidate(store: &ObjectTracker, tried: &BTreeSet<String>) -> Option<String> {
    let mut movable: BTreeMap<String, usize> = store
        .list_nodes()
        .iter()
        .filter(|n| !is_unschedulable(n) && !tried.contains(node_name(n)))
        .map(|n| (node_name(n).to_string(), 0))
        .collect();
    for pod in store.list_pods() {
        if is_daemonset_pod(&pod) {
            continue;
        }
        if let Some(count) = assigned_node(&pod).and_then(|n| movable.get_mut(n)) {
            *count += 1;
        }
    }
    movable
        .into_iter()
        .min_by(|(a_name, a), (b_name, b)| a.cmp(b).then_with(|| a_name.cmp(b_name)))
        .map(|(name, _)| name)
}

fn cordon(store: &ObjectTracker, name: &str) -> Result<()> {
    let key = ObjectKey::cluster(ObjectKind::Node, name);
    let ClusterObject::Node(mut node) = store.get(&key)? else {
        return Err(StoreError::NotFound(key).into());
    };
    node.spec.get_or_insert_with(Default::default).unschedulable = Some(true);
    store.update(node.into())?;
    Ok(())
}

/// Wait until the scheduler's cache sees the node as unschedulable, so
/// evicted pods cannot land back on it.
async fn wait_for_cordon(cache: &SchedulerCache, name: &str, timeout: Duration) -> bool {
    let cordoned = || {
        cache
            .snapshot()
            .iter()
            .any(|info| info.name() == name && info.node().is_some_and(is_unschedulable))
    };
    let deadline = tokio::time::Instant::now() + timeout;
    while !cordoned() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(CORDON_POLL_INTERVAL).await;
    }
    true
}

/// Delete every pod on the node and recreate the movable ones as pending.
/// Returns the keys of the recreated pods.
fn evict(store: &ObjectTracker, name: &str) -> Result<BTreeSet<ObjectKey>> {
    let mut evicted = BTreeSet::new();
    for mut pod in store.list_pods() {
        if assigned_node(&pod) != Some(name) {
            continue;
        }
        let key = pod_key(&pod);
        store.delete(&key)?;
        if is_daemonset_pod(&pod) {
            continue;
        }
        reset_pod(&mut pod);
        store.create_pod(pod)?;
        evicted.insert(key);
    }
    Ok(evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn node(name: &str) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node
    }

    fn pod_on(name: &str, node: &str) -> Pod {
        let mut pod = Pod {
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod
    }

    fn daemonset_pod_on(name: &str, node: &str) -> Pod {
        let mut pod = pod_on(name, node);
        pod.metadata.owner_references = Some(vec![OwnerReference {
            kind: "DaemonSet".to_string(),
            name: "log-agent".to_string(),
            ..Default::default()
        }]);
        pod
    }

    fn store_with(nodes: &[&str], pods: Vec<Pod>) -> ObjectTracker {
        let store = ObjectTracker::new();
        for name in nodes {
            store.create(node(name).into()).unwrap();
        }
        for pod in pods {
            store.create_pod(pod).unwrap();
        }
        store
    }

    #[test]
    fn candidate_has_fewest_movable_pods() {
        let store = store_with(
            &["node-a", "node-b", "node-c"],
            vec![
                pod_on("web-0", "node-a"),
                pod_on("web-1", "node-b"),
                pod_on("web-2", "node-b"),
                daemonset_pod_on("agent-a", "node-a"),
                daemonset_pod_on("agent-c", "node-c"),
                daemonset_pod_on("agent-c2", "node-c"),
            ],
        );
        assert_eq!(next_candidate(&store, &BTreeSet::new()).as_deref(), Some("node-c"));

        let tried = BTreeSet::from(["node-c".to_string()]);
        assert_eq!(next_candidate(&store, &tried).as_deref(), Some("node-a"));
    }

    #[test]
    fn cordoned_nodes_are_not_candidates() {
        let store = store_with(&["node-a", "node-b"], Vec::new());
        cordon(&store, "node-a").unwrap();
        assert_eq!(next_candidate(&store, &BTreeSet::new()).as_deref(), Some("node-b"));
        assert!(is_unschedulable(&store.list_nodes()[0]));

        let tried = BTreeSet::from(["node-b".to_string()]);
        assert_eq!(next_candidate(&store, &tried), None);
    }

    #[test]
    fn eviction_requeues_movable_pods_only() {
        let store = store_with(
            &["node-a", "node-b"],
            vec![
                pod_on("web-0", "node-a"),
                pod_on("web-1", "node-b"),
                daemonset_pod_on("agent-a", "node-a"),
            ],
        );

        let evicted = evict(&store, "node-a").unwrap();
        assert_eq!(evicted, BTreeSet::from([pod_key(&pod_on("web-0", "node-a"))]));

        let web_0 = store.get_pod("default", "web-0").unwrap();
        assert!(assigned_node(&web_0).is_none());
        assert_eq!(web_0.status.unwrap().phase.as_deref(), Some("Pending"));
        assert!(store.get_pod("default", "agent-a").is_err());
        assert_eq!(
            assigned_node(&store.get_pod("default", "web-1").unwrap()),
            Some("node-b")
        );
    }
}
