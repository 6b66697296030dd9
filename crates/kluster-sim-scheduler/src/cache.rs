//! Scheduler cache of node assignments.
//!
//! This module tracks, per node, the pods bound or assumed onto it and the
//! resources they request. Pods are *assumed* as soon as a node is chosen so
//! the next scheduling cycle sees the capacity as taken, and *confirmed* when
//! the informer later reports the pod as assigned.

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::api::core::v1::{Node, Pod};
use kluster_sim_core::{pod_key, ObjectKey};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::resource::{node_allocatable, pod_requests, Resource};
use crate::{Result, SchedulerError};

/// A node together with the pods assigned to it.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    node: Option<Node>,
    pods: Vec<Pod>,
    requested: Resource,
    allocatable: Resource,
}

impl NodeInfo {
    /// Create a node info for a node with no pods.
    #[must_use]
    pub fn new(node: Node) -> Self {
        let mut info = Self::default();
        info.set_node(node);
        info
    }

    /// The node, if the cache has seen it.
    #[must_use]
    pub const fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    /// The node name, empty if the node is unknown.
    #[must_use]
    pub fn name(&self) -> &str {
        self.node
            .as_ref()
            .and_then(|n| n.metadata.name.as_deref())
            .unwrap_or_default()
    }

    /// Pods assigned to the node.
    #[must_use]
    pub fn pods(&self) -> &[Pod] {
        &self.pods
    }

    /// Sum of the requests of assigned pods.
    #[must_use]
    pub const fn requested(&self) -> Resource {
        self.requested
    }

    /// Allocatable resources of the node.
    #[must_use]
    pub const fn allocatable(&self) -> Resource {
        self.allocatable
    }

    fn set_node(&mut self, node: Node) {
        self.allocatable = node_allocatable(&node);
        self.node = Some(node);
    }

    /// Account a pod against this node.
    pub fn add_pod(&mut self, pod: Pod) {
        self.requested += pod_requests(&pod);
        self.pods.push(pod);
    }

    /// Release a pod from this node. Returns whether it was present.
    pub fn remove_pod(&mut self, key: &ObjectKey) -> bool {
        let Some(idx) = self.pods.iter().position(|p| pod_key(p) == *key) else {
            return false;
        };
        let pod = self.pods.swap_remove(idx);
        self.requested -= pod_requests(&pod);
        true
    }
}

struct PodState {
    pod: Pod,
    node_name: String,
    assumed: bool,
}

#[derive(Default)]
struct CacheInner {
    nodes: BTreeMap<String, NodeInfo>,
    pods: HashMap<ObjectKey, PodState>,
}

impl CacheInner {
    fn place(&mut self, pod: &Pod, node_name: &str) {
        self.nodes
            .entry(node_name.to_string())
            .or_default()
            .add_pod(pod.clone());
    }

    fn unplace(&mut self, key: &ObjectKey, node_name: &str) {
        let empty = match self.nodes.get_mut(node_name) {
            Some(info) => {
                info.remove_pod(key);
                info.node.is_none() && info.pods.is_empty()
            }
            None => false,
        };
        if empty {
            self.nodes.remove(node_name);
        }
    }
}

fn assigned_node(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|n| !n.is_empty())
}

/// Cache of nodes and the pods assigned or assumed onto them.
#[derive(Default)]
pub struct SchedulerCache {
    inner: RwLock<CacheInner>,
}

impl SchedulerCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Pods
    // =========================================================================

    /// Assume a pod onto the node in its `spec.nodeName`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Cache` if the pod has no node or is already
    /// in the cache.
    pub fn assume_pod(&self, pod: &Pod) -> Result<()> {
        let key = pod_key(pod);
        let node_name = assigned_node(pod)
            .ok_or_else(|| SchedulerError::Cache(format!("{key} has no node assigned")))?
            .to_string();

        let mut inner = self.inner.write();
        if inner.pods.contains_key(&key) {
            return Err(SchedulerError::Cache(format!("{key} is already in the cache")));
        }
        inner.place(pod, &node_name);
        inner.pods.insert(
            key.clone(),
            PodState {
                pod: pod.clone(),
                node_name: node_name.clone(),
                assumed: true,
            },
        );
        trace!(pod = %key, node = %node_name, "assumed pod");
        Ok(())
    }

    /// Drop an assumed pod after a failed bind.
    pub fn forget_pod(&self, pod: &Pod) {
        let key = pod_key(pod);
        let mut inner = self.inner.write();
        if !inner.pods.get(&key).is_some_and(|s| s.assumed) {
            return;
        }
        if let Some(state) = inner.pods.remove(&key) {
            inner.unplace(&key, &state.node_name);
            debug!(pod = %key, node = %state.node_name, "forgot assumed pod");
        }
    }

    /// Add an assigned pod, confirming it if it was assumed.
    pub fn add_pod(&self, pod: &Pod) {
        let Some(node_name) = assigned_node(pod) else {
            return;
        };
        let key = pod_key(pod);
        let mut inner = self.inner.write();
        if let Some(previous) = inner.pods.remove(&key) {
            inner.unplace(&key, &previous.node_name);
        }
        inner.place(pod, node_name);
        inner.pods.insert(
            key,
            PodState {
                pod: pod.clone(),
                node_name: node_name.to_string(),
                assumed: false,
            },
        );
    }

    /// Replace an assigned pod.
    pub fn update_pod(&self, _old: &Pod, new: &Pod) {
        self.add_pod(new);
    }

    /// Remove a pod.
    pub fn remove_pod(&self, pod: &Pod) {
        let key = pod_key(pod);
        let mut inner = self.inner.write();
        if let Some(state) = inner.pods.remove(&key) {
            inner.unplace(&key, &state.node_name);
        }
    }

    /// Whether a pod is assumed and not yet confirmed.
    #[must_use]
    pub fn is_assumed(&self, key: &ObjectKey) -> bool {
        self.inner.read().pods.get(key).is_some_and(|s| s.assumed)
    }

    /// The cached copy of a pod.
    #[must_use]
    pub fn get_pod(&self, key: &ObjectKey) -> Option<Pod> {
        self.inner.read().pods.get(key).map(|s| s.pod.clone())
    }

    /// Number of pods in the cache.
    #[must_use]
    pub fn pod_count(&self) -> usize {
        self.inner.read().pods.len()
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Add or replace a node.
    pub fn add_node(&self, node: Node) {
        let Some(name) = node.metadata.name.clone() else {
            return;
        };
        self.inner.write().nodes.entry(name).or_default().set_node(node);
    }

    /// Replace a node.
    pub fn update_node(&self, node: Node) {
        self.add_node(node);
    }

    /// Remove a node. Pods still assigned to it stay accounted.
    pub fn remove_node(&self, name: &str) {
        let mut inner = self.inner.write();
        let empty = match inner.nodes.get_mut(name) {
            Some(info) => {
                info.node = None;
                info.allocatable = Resource::default();
                info.pods.is_empty()
            }
            None => false,
        };
        if empty {
            inner.nodes.remove(name);
        }
    }

    /// Number of known nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner
            .read()
            .nodes
            .values()
            .filter(|n| n.node.is_some())
            .count()
    }

    /// A point-in-time copy of every known node, ordered by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NodeInfo> {
        self.inner
            .read()
            .nodes
            .values()
            .filter(|n| n.node.is_some())
            .cloned()
            .collect()
    }

    /// Pods per node name, including assumed pods.
    #[must_use]
    pub fn dump(&self) -> BTreeMap<String, Vec<Pod>> {
        self.inner
            .read()
            .nodes
            .iter()
            .map(|(name, info)| (name.clone(), info.pods.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodSpec;

    fn node(name: &str) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node
    }

    fn pod(name: &str, node_name: Option<&str>) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod.spec = Some(PodSpec {
            node_name: node_name.map(str::to_string),
            ..Default::default()
        });
        pod
    }

    #[test]
    fn assume_then_confirm() {
        let cache = SchedulerCache::new();
        cache.add_node(node("node-a"));

        let p = pod("web-0", Some("node-a"));
        cache.assume_pod(&p).unwrap();
        assert!(cache.is_assumed(&pod_key(&p)));
        assert!(cache.assume_pod(&p).is_err());

        cache.add_pod(&p);
        assert!(!cache.is_assumed(&pod_key(&p)));
        assert_eq!(cache.dump()["node-a"].len(), 1);
        assert_eq!(cache.snapshot()[0].requested().pods, 1);
    }

    #[test]
    fn forget_releases_assumed_pod() {
        let cache = SchedulerCache::new();
        cache.add_node(node("node-a"));
        let p = pod("web-0", Some("node-a"));
        cache.assume_pod(&p).unwrap();
        cache.forget_pod(&p);
        assert_eq!(cache.pod_count(), 0);
        assert!(cache.dump()["node-a"].is_empty());
    }

    #[test]
    fn forget_ignores_confirmed_pod() {
        let cache = SchedulerCache::new();
        let p = pod("web-0", Some("node-a"));
        cache.add_pod(&p);
        cache.forget_pod(&p);
        assert_eq!(cache.pod_count(), 1);
    }

    #[test]
    fn assume_requires_node() {
        let cache = SchedulerCache::new();
        assert!(cache.assume_pod(&pod("web-0", None)).is_err());
    }

    #[test]
    fn pod_moves_between_nodes() {
        let cache = SchedulerCache::new();
        cache.add_node(node("node-a"));
        cache.add_node(node("node-b"));
        let old = pod("web-0", Some("node-a"));
        let new = pod("web-0", Some("node-b"));
        cache.add_pod(&old);
        cache.update_pod(&old, &new);

        let dump = cache.dump();
        assert!(dump["node-a"].is_empty());
        assert_eq!(dump["node-b"].len(), 1);
    }

    #[test]
    fn removed_node_with_pods_is_hidden_from_snapshot() {
        let cache = SchedulerCache::new();
        cache.add_node(node("node-a"));
        let p = pod("web-0", Some("node-a"));
        cache.add_pod(&p);
        cache.remove_node("node-a");

        assert_eq!(cache.node_count(), 0);
        assert!(cache.snapshot().is_empty());
        assert_eq!(cache.dump()["node-a"].len(), 1);

        cache.remove_pod(&p);
        assert!(!cache.dump().contains_key("node-a"));
    }
}
