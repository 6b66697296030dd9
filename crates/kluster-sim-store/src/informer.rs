//! Informer layer over the object tracker.
//!
//! A [`SharedInformer`] lists and watches one kind through a [`ListWatch`],
//! keeps a local indexer of what it has seen and dispatches changes to the
//! registered [`ResourceEventHandler`]s. An [`InformerFactory`] owns one
//! informer per kind, starts them together and reports when their initial
//! list has been delivered.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kluster_sim_core::{ClusterObject, ObjectKey, ObjectKind, StopSignal};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::tracker::{ObjectTracker, WatchEvent};

/// Predicate applied at the list/watch boundary.
pub type ObjectFilter = Arc<dyn Fn(&ClusterObject) -> bool + Send + Sync>;

/// Callbacks invoked by an informer as its view of the store changes.
///
/// Handlers run on the informer's task and must not block.
pub trait ResourceEventHandler: Send + Sync {
    /// An object became visible.
    fn on_add(&self, obj: &ClusterObject);

    /// A visible object changed.
    fn on_update(&self, old: &ClusterObject, new: &ClusterObject);

    /// An object stopped being visible.
    fn on_delete(&self, obj: &ClusterObject);
}

/// What an informer lists and watches.
#[derive(Clone)]
pub struct ListWatch {
    kind: ObjectKind,
    filter: Option<ObjectFilter>,
}

impl ListWatch {
    /// List and watch every object of a kind.
    #[must_use]
    pub const fn all(kind: ObjectKind) -> Self {
        Self { kind, filter: None }
    }

    /// List and watch the objects of a kind that satisfy `filter`.
    ///
    /// An object that stops matching is reported as deleted.
    #[must_use]
    pub fn filtered(
        kind: ObjectKind,
        filter: impl Fn(&ClusterObject) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            filter: Some(Arc::new(filter)),
        }
    }

    /// Pods whose phase is neither `Succeeded` nor `Failed`.
    #[must_use]
    pub fn pods_excluding_terminal() -> Self {
        Self::filtered(ObjectKind::Pod, |obj| {
            let phase = obj
                .as_pod()
                .and_then(|pod| pod.status.as_ref())
                .and_then(|status| status.phase.as_deref());
            !matches!(phase, Some("Succeeded" | "Failed"))
        })
    }

    /// The kind this list-watch covers.
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Whether an object passes the filter.
    #[must_use]
    pub fn matches(&self, obj: &ClusterObject) -> bool {
        obj.kind() == self.kind && self.filter.as_ref().map_or(true, |f| f(obj))
    }
}

impl fmt::Debug for ListWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListWatch")
            .field("kind", &self.kind)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// An informer for one kind.
pub struct SharedInformer {
    list_watch: ListWatch,
    tracker: Arc<ObjectTracker>,
    indexer: RwLock<BTreeMap<ObjectKey, ClusterObject>>,
    handlers: RwLock<Vec<Arc<dyn ResourceEventHandler>>>,
    synced: watch::Sender<bool>,
    started: AtomicBool,
}

impl SharedInformer {
    /// Create an informer that is not yet running.
    #[must_use]
    pub fn new(tracker: Arc<ObjectTracker>, list_watch: ListWatch) -> Self {
        let (synced, _rx) = watch::channel(false);
        Self {
            list_watch,
            tracker,
            indexer: RwLock::new(BTreeMap::new()),
            handlers: RwLock::new(Vec::new()),
            synced,
            started: AtomicBool::new(false),
        }
    }

    /// The kind this informer covers.
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        self.list_watch.kind
    }

    /// Register a handler.
    ///
    /// A handler added after the initial list receives the current contents
    /// as adds before any further change.
    pub fn add_event_handler(&self, handler: Arc<dyn ResourceEventHandler>) {
        let mut handlers = self.handlers.write();
        if self.has_synced() {
            for obj in self.indexer.read().values() {
                handler.on_add(obj);
            }
        }
        handlers.push(handler);
    }

    /// Whether the initial list has been delivered.
    #[must_use]
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Fetch an object from the local indexer.
    #[must_use]
    pub fn get(&self, key: &ObjectKey) -> Option<ClusterObject> {
        self.indexer.read().get(key).cloned()
    }

    /// List the local indexer.
    #[must_use]
    pub fn list(&self) -> Vec<ClusterObject> {
        self.indexer.read().values().cloned().collect()
    }

    /// Wait for the initial list, or for `stop` to close.
    ///
    /// Returns whether the informer synced.
    pub async fn wait_for_sync(&self, stop: &StopSignal) -> bool {
        let mut rx = self.synced.subscribe();
        tokio::select! {
            res = rx.wait_for(|synced| *synced) => res.is_ok(),
            () = stop.closed() => self.has_synced(),
        }
    }

    /// List, then watch until `stop` closes or the tracker drops the watch.
    pub async fn run(self: Arc<Self>, stop: StopSignal) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.list_and_watch(stop).await;
    }

    async fn list_and_watch(&self, stop: StopSignal) {
        let (items, mut rx) = self.tracker.list_and_watch(self.kind());
        {
            // Hold the handler lock across the initial list so a handler
            // registered concurrently is replayed exactly once.
            let handlers = self.handlers.read();
            let visible: Vec<_> = items
                .into_iter()
                .filter(|o| self.list_watch.matches(o))
                .collect();
            self.indexer
                .write()
                .extend(visible.iter().map(|o| (o.key(), o.clone())));
            for obj in &visible {
                for handler in handlers.iter() {
                    handler.on_add(obj);
                }
            }
            self.synced.send_replace(true);
        }
        info!(kind = %self.kind(), "informer synced");

        loop {
            tokio::select! {
                () = stop.closed() => break,
                event = rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }
        debug!(kind = %self.kind(), "informer stopped");
    }

    fn handle(&self, event: WatchEvent) {
        let handlers = self.handlers.read();
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let key = obj.key();
                if self.list_watch.matches(&obj) {
                    let old = self.indexer.write().insert(key, obj.clone());
                    for handler in handlers.iter() {
                        match &old {
                            Some(old) => handler.on_update(old, &obj),
                            None => handler.on_add(&obj),
                        }
                    }
                } else if let Some(old) = self.indexer.write().remove(&key) {
                    for handler in handlers.iter() {
                        handler.on_delete(&old);
                    }
                }
            }
            WatchEvent::Deleted(obj) => {
                if let Some(old) = self.indexer.write().remove(&obj.key()) {
                    for handler in handlers.iter() {
                        handler.on_delete(&old);
                    }
                }
            }
        }
    }
}

/// Owns one informer per kind and starts them together.
pub struct InformerFactory {
    tracker: Arc<ObjectTracker>,
    informers: Mutex<BTreeMap<ObjectKind, Arc<SharedInformer>>>,
}

impl InformerFactory {
    /// Create a factory over a tracker.
    #[must_use]
    pub fn new(tracker: Arc<ObjectTracker>) -> Self {
        Self {
            tracker,
            informers: Mutex::new(BTreeMap::new()),
        }
    }

    /// The tracker this factory reads from.
    #[must_use]
    pub const fn tracker(&self) -> &Arc<ObjectTracker> {
        &self.tracker
    }

    /// The informer for a kind, created with an unfiltered list-watch if absent.
    pub fn informer_for(&self, kind: ObjectKind) -> Arc<SharedInformer> {
        self.informer_with(ListWatch::all(kind))
    }

    /// The informer for a list-watch's kind.
    ///
    /// The first list-watch registered for a kind wins; later calls return
    /// the existing informer.
    pub fn informer_with(&self, list_watch: ListWatch) -> Arc<SharedInformer> {
        let mut informers = self.informers.lock();
        Arc::clone(informers.entry(list_watch.kind).or_insert_with(|| {
            Arc::new(SharedInformer::new(Arc::clone(&self.tracker), list_watch))
        }))
    }

    /// Spawn every informer that is not yet running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, stop: &StopSignal) {
        for informer in self.informers.lock().values() {
            // Mark started here so a following wait_for_cache_sync sees it.
            if !informer.started.swap(true, Ordering::SeqCst) {
                let informer = Arc::clone(informer);
                let stop = stop.clone();
                tokio::spawn(async move { informer.list_and_watch(stop).await });
            }
        }
    }

    /// Wait until every started informer has synced or `stop` closes.
    pub async fn wait_for_cache_sync(&self, stop: &StopSignal) -> BTreeMap<ObjectKind, bool> {
        let started: Vec<_> = self
            .informers
            .lock()
            .values()
            .filter(|i| i.started.load(Ordering::SeqCst))
            .cloned()
            .collect();

        let mut result = BTreeMap::new();
        for informer in started {
            result.insert(informer.kind(), informer.wait_for_sync(stop).await);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Node, Pod, PodStatus};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ResourceEventHandler for Recorder {
        fn on_add(&self, obj: &ClusterObject) {
            self.events.lock().push(format!("add {}", obj.name()));
        }
        fn on_update(&self, _old: &ClusterObject, new: &ClusterObject) {
            self.events.lock().push(format!("update {}", new.name()));
        }
        fn on_delete(&self, obj: &ClusterObject) {
            self.events.lock().push(format!("delete {}", obj.name()));
        }
    }

    fn pod(name: &str, phase: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod.status = Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        });
        pod
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn terminal_pods_are_hidden() {
        let tracker = Arc::new(ObjectTracker::new());
        tracker.create_pod(pod("done", "Succeeded")).unwrap();
        tracker.create_pod(pod("live", "Running")).unwrap();

        let factory = InformerFactory::new(Arc::clone(&tracker));
        let informer = factory.informer_with(ListWatch::pods_excluding_terminal());
        let recorder = Arc::new(Recorder::default());
        informer.add_event_handler(recorder.clone());

        let stop = StopSignal::new("informer");
        factory.start(&stop);
        let synced = factory.wait_for_cache_sync(&stop).await;
        assert_eq!(synced.get(&ObjectKind::Pod), Some(&true));
        assert_eq!(*recorder.events.lock(), vec!["add live"]);

        // A pod turning terminal leaves the filtered view.
        tracker.update_pod(pod("live", "Failed")).unwrap();
        eventually(|| recorder.events.lock().len() == 2).await;
        assert_eq!(recorder.events.lock()[1], "delete live");
        assert!(informer.list().is_empty());

        stop.close().unwrap();
    }

    #[tokio::test]
    async fn first_list_watch_wins() {
        let tracker = Arc::new(ObjectTracker::new());
        let factory = InformerFactory::new(tracker);
        let filtered = factory.informer_with(ListWatch::pods_excluding_terminal());
        let again = factory.informer_for(ObjectKind::Pod);
        assert!(Arc::ptr_eq(&filtered, &again));
    }

    #[tokio::test]
    async fn dispatches_add_update_delete() {
        let tracker = Arc::new(ObjectTracker::new());
        let factory = InformerFactory::new(Arc::clone(&tracker));
        let informer = factory.informer_for(ObjectKind::Node);
        let recorder = Arc::new(Recorder::default());
        informer.add_event_handler(recorder.clone());

        let stop = StopSignal::new("informer");
        factory.start(&stop);
        factory.wait_for_cache_sync(&stop).await;

        let mut node = Node::default();
        node.metadata.name = Some("node-a".to_string());
        let created = tracker.create(node.into()).unwrap();
        tracker.update(created.clone()).unwrap();
        tracker.delete(&created.key()).unwrap();

        eventually(|| recorder.events.lock().len() == 3).await;
        assert_eq!(
            *recorder.events.lock(),
            vec!["add node-a", "update node-a", "delete node-a"]
        );
        stop.close().unwrap();
    }

    #[tokio::test]
    async fn late_handler_is_replayed() {
        let tracker = Arc::new(ObjectTracker::new());
        tracker.create_pod(pod("web-0", "Pending")).unwrap();
        let factory = InformerFactory::new(Arc::clone(&tracker));
        let informer = factory.informer_for(ObjectKind::Pod);

        let stop = StopSignal::new("informer");
        factory.start(&stop);
        factory.wait_for_cache_sync(&stop).await;

        let recorder = Arc::new(Recorder::default());
        informer.add_event_handler(recorder.clone());
        assert_eq!(*recorder.events.lock(), vec!["add web-0"]);
        stop.close().unwrap();
    }

    #[tokio::test]
    async fn wait_returns_when_stopped_before_start() {
        let tracker = Arc::new(ObjectTracker::new());
        let informer = SharedInformer::new(tracker, ListWatch::all(ObjectKind::Pod));
        let stop = StopSignal::new("informer");
        stop.close().unwrap();
        assert!(!informer.wait_for_sync(&stop).await);
    }
}
