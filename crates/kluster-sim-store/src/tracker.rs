//! In-memory object tracker.
//!
//! [`ObjectTracker`] is the isolated cluster store: a create/get/update/
//! delete/list/watch surface over typed [`ClusterObject`]s that never talks
//! to a real cluster.
//!
//! All writes are serialized behind one lock. Every write stamps a new
//! `metadata.resourceVersion` and fans a [`WatchEvent`] out to the watchers of
//! the object's kind while still holding the lock, so every watcher observes
//! writes in the same order they were applied.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Node, Pod};
use kluster_sim_core::{ClusterObject, ObjectKey, ObjectKind};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Result, StoreError};

/// A change notification delivered to watchers.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// The object was created.
    Added(ClusterObject),
    /// The object was replaced.
    Modified(ClusterObject),
    /// The object was removed.
    Deleted(ClusterObject),
}

impl WatchEvent {
    /// The object carried by this event.
    #[must_use]
    pub const fn object(&self) -> &ClusterObject {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => obj,
        }
    }
}

/// Receiving half of a watch.
pub type WatchReceiver = mpsc::UnboundedReceiver<WatchEvent>;

struct Watcher {
    kind: ObjectKind,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

#[derive(Default)]
struct TrackerInner {
    objects: BTreeMap<ObjectKey, ClusterObject>,
    resource_version: u64,
    watchers: Vec<Watcher>,
}

impl TrackerInner {
    fn stamp(&mut self, obj: &mut ClusterObject) {
        self.resource_version += 1;
        obj.metadata_mut().resource_version = Some(self.resource_version.to_string());
    }

    fn notify(&mut self, event: &WatchEvent) {
        let kind = event.object().kind();
        self.watchers
            .retain(|w| w.kind != kind || w.tx.send(event.clone()).is_ok());
    }
}

/// The isolated, in-memory cluster store.
#[derive(Default)]
pub struct ObjectTracker {
    inner: RwLock<TrackerInner>,
}

impl ObjectTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn checked_key(obj: &ClusterObject) -> Result<ObjectKey> {
        if obj.name().is_empty() {
            return Err(StoreError::MissingName(obj.kind()));
        }
        Ok(obj.key())
    }

    /// Insert a new object.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if an object with the same identity
    /// is present, or `StoreError::MissingName` if the object has no name.
    pub fn create(&self, mut obj: ClusterObject) -> Result<ClusterObject> {
        let key = Self::checked_key(&obj)?;
        let mut inner = self.inner.write();
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        inner.stamp(&mut obj);
        inner.objects.insert(key.clone(), obj.clone());
        inner.notify(&WatchEvent::Added(obj.clone()));
        trace!(key = %key, "created object");
        Ok(obj)
    }

    /// Replace an existing object's full state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no object with the same identity exists.
    pub fn update(&self, mut obj: ClusterObject) -> Result<ClusterObject> {
        let key = Self::checked_key(&obj)?;
        let mut inner = self.inner.write();
        if !inner.objects.contains_key(&key) {
            return Err(StoreError::NotFound(key));
        }
        inner.stamp(&mut obj);
        inner.objects.insert(key.clone(), obj.clone());
        inner.notify(&WatchEvent::Modified(obj.clone()));
        trace!(key = %key, "updated object");
        Ok(obj)
    }

    /// Remove an object.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object does not exist.
    pub fn delete(&self, key: &ObjectKey) -> Result<ClusterObject> {
        let mut inner = self.inner.write();
        let obj = inner
            .objects
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        inner.resource_version += 1;
        inner.notify(&WatchEvent::Deleted(obj.clone()));
        trace!(key = %key, "deleted object");
        Ok(obj)
    }

    /// Fetch an object by identity.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object does not exist.
    pub fn get(&self, key: &ObjectKey) -> Result<ClusterObject> {
        self.inner
            .read()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    /// List every object of a kind, ordered by key.
    #[must_use]
    pub fn list(&self, kind: ObjectKind) -> Vec<ClusterObject> {
        self.inner
            .read()
            .objects
            .values()
            .filter(|obj| obj.kind() == kind)
            .cloned()
            .collect()
    }

    /// List every object of a kind and subscribe to subsequent changes.
    ///
    /// Listing and subscribing happen under one lock, so the receiver sees
    /// exactly the writes applied after the returned list.
    #[must_use]
    pub fn list_and_watch(&self, kind: ObjectKind) -> (Vec<ClusterObject>, WatchReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write();
        let items = inner
            .objects
            .values()
            .filter(|obj| obj.kind() == kind)
            .cloned()
            .collect();
        inner.watchers.push(Watcher { kind, tx });
        (items, rx)
    }

    /// Subscribe to changes of a kind without listing.
    #[must_use]
    pub fn watch(&self, kind: ObjectKind) -> WatchReceiver {
        self.list_and_watch(kind).1
    }

    /// The resource version of the last applied write.
    #[must_use]
    pub fn resource_version(&self) -> u64 {
        self.inner.read().resource_version
    }

    /// Number of objects held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().objects.is_empty()
    }

    // =========================================================================
    // Typed helpers
    // =========================================================================

    /// Create a pod.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the pod already exists.
    pub fn create_pod(&self, pod: Pod) -> Result<Pod> {
        self.create(pod.into()).map(expect_pod)
    }

    /// Fetch a pod by namespace and name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the pod does not exist.
    pub fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.get(&ObjectKey::namespaced(ObjectKind::Pod, namespace, name))
            .map(expect_pod)
    }

    /// Replace a pod.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the pod does not exist.
    pub fn update_pod(&self, pod: Pod) -> Result<Pod> {
        self.update(pod.into()).map(expect_pod)
    }

    /// List all pods.
    #[must_use]
    pub fn list_pods(&self) -> Vec<Pod> {
        self.list(ObjectKind::Pod)
            .into_iter()
            .filter_map(ClusterObject::into_pod)
            .collect()
    }

    /// List all nodes.
    #[must_use]
    pub fn list_nodes(&self) -> Vec<Node> {
        self.list(ObjectKind::Node)
            .into_iter()
            .filter_map(ClusterObject::into_node)
            .collect()
    }
}

// Objects are only ever stored under their own kind's key.
fn expect_pod(obj: ClusterObject) -> Pod {
    match obj {
        ClusterObject::Pod(pod) => pod,
        other => unreachable!("pod key resolved to {}", other.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod
    }

    fn node(name: &str) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node
    }

    #[test]
    fn create_rejects_duplicate_identity() {
        let tracker = ObjectTracker::new();
        tracker.create_pod(pod("web-0")).unwrap();

        let err = tracker.create_pod(pod("web-0")).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn same_name_different_kind_is_distinct() {
        let tracker = ObjectTracker::new();
        tracker.create(node("shared").into()).unwrap();
        let mut p = pod("shared");
        p.metadata.namespace = None;
        tracker.create_pod(p).unwrap();
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn create_requires_name() {
        let tracker = ObjectTracker::new();
        let err = tracker.create(Node::default().into()).unwrap_err();
        assert!(matches!(err, StoreError::MissingName(ObjectKind::Node)));
    }

    #[test]
    fn update_requires_existing_object() {
        let tracker = ObjectTracker::new();
        let err = tracker.update_pod(pod("missing")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn update_replaces_state_and_bumps_resource_version() {
        let tracker = ObjectTracker::new();
        let created = tracker.create_pod(pod("web-0")).unwrap();

        let mut changed = created.clone();
        changed.spec.get_or_insert_with(Default::default).node_name = Some("node-a".to_string());
        let updated = tracker.update_pod(changed).unwrap();

        assert_ne!(
            created.metadata.resource_version,
            updated.metadata.resource_version
        );
        let stored = tracker.get_pod("default", "web-0").unwrap();
        assert_eq!(
            stored.spec.and_then(|s| s.node_name).as_deref(),
            Some("node-a")
        );
    }

    #[test]
    fn delete_removes_object() {
        let tracker = ObjectTracker::new();
        tracker.create(node("node-a").into()).unwrap();
        let key = ObjectKey::cluster(ObjectKind::Node, "node-a");
        tracker.delete(&key).unwrap();
        assert!(tracker.get(&key).unwrap_err().is_not_found());
        assert!(tracker.delete(&key).unwrap_err().is_not_found());
    }

    #[test]
    fn list_filters_by_kind() {
        let tracker = ObjectTracker::new();
        tracker.create(node("node-b").into()).unwrap();
        tracker.create(node("node-a").into()).unwrap();
        tracker.create_pod(pod("web-0")).unwrap();

        let names: Vec<_> = tracker
            .list_nodes()
            .into_iter()
            .filter_map(|n| n.metadata.name)
            .collect();
        assert_eq!(names, vec!["node-a", "node-b"]);
        assert_eq!(tracker.list_pods().len(), 1);
    }

    #[test]
    fn watchers_see_writes_in_order() {
        let tracker = ObjectTracker::new();
        tracker.create_pod(pod("before")).unwrap();

        let (items, mut rx) = tracker.list_and_watch(ObjectKind::Pod);
        assert_eq!(items.len(), 1);

        let created = tracker.create_pod(pod("after")).unwrap();
        tracker.create(node("node-a").into()).unwrap();
        tracker.update_pod(created).unwrap();
        tracker
            .delete(&ObjectKey::namespaced(ObjectKind::Pod, "default", "before"))
            .unwrap();

        assert!(matches!(rx.try_recv().unwrap(), WatchEvent::Added(o) if o.name() == "after"));
        assert!(matches!(rx.try_recv().unwrap(), WatchEvent::Modified(o) if o.name() == "after"));
        assert!(matches!(rx.try_recv().unwrap(), WatchEvent::Deleted(o) if o.name() == "before"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_watchers_are_pruned() {
        let tracker = ObjectTracker::new();
        drop(tracker.watch(ObjectKind::Pod));
        tracker.create_pod(pod("web-0")).unwrap();
        assert!(tracker.inner.read().watchers.is_empty());
    }
}
