//! The scheduler run loop.
//!
//! [`Scheduler`] wires the cache and queue to the store's informers, then
//! repeatedly pops a pending pod and runs one scheduling cycle for it:
//!
//! 1. find feasible nodes with the profile's filter plugins,
//! 2. narrow them through extenders,
//! 3. score them and pick the best host,
//! 4. assume the pod onto that host and run pre-bind, bind and post-bind.
//!
//! Failures are recorded as `FailedScheduling` events and the pod is requeued
//! with backoff.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kluster_sim_core::{pod_key, ClusterObject, ObjectKind, StopSignal};
use kluster_sim_store::{InformerFactory, ListWatch, ObjectTracker, ResourceEventHandler};
use tracing::{debug, info, warn};

use crate::cache::{NodeInfo, SchedulerCache};
use crate::config::{SchedulerConfig, DEFAULT_SCHEDULER_NAME};
use crate::events::{
    EventRecorder, EventType, RecorderFactory, REASON_FAILED_SCHEDULING, REASON_SCHEDULED,
};
use crate::extender::{Extender, HttpExtender, MAX_EXTENDER_PRIORITY};
use crate::framework::{
    Code, CycleState, Framework, FrameworkHandle, PluginStatus, MAX_NODE_SCORE,
};
use crate::plugins::in_tree_registry;
use crate::queue::SchedulingQueue;
use crate::registry::Registry;
use crate::{Result, SchedulerError};

/// Below this many nodes every node is evaluated.
const MIN_FEASIBLE_NODES_TO_FIND: usize = 100;

/// Floor of the adaptive percentage of nodes to evaluate.
const MIN_FEASIBLE_NODES_PERCENTAGE_TO_FIND: usize = 5;

/// How many feasible nodes to find before scoring, out of `total`.
///
/// With no configured percentage the percentage shrinks as the cluster grows,
/// from 50 percent down to a floor of 5 percent.
fn num_feasible_nodes_to_find(percentage: Option<u32>, total: usize) -> usize {
    let configured = percentage.map_or(0, |p| p as usize);
    if total < MIN_FEASIBLE_NODES_TO_FIND || configured >= 100 {
        return total;
    }
    let percentage = if configured == 0 {
        50_usize
            .saturating_sub(total / 125)
            .max(MIN_FEASIBLE_NODES_PERCENTAGE_TO_FIND)
    } else {
        configured
    };
    (total * percentage / 100).max(MIN_FEASIBLE_NODES_TO_FIND)
}

type ScoreResult = std::result::Result<i64, PluginStatus>;

fn is_assigned(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .is_some_and(|n| !n.is_empty())
}

fn scheduler_name(pod: &Pod) -> &str {
    pod.spec
        .as_ref()
        .and_then(|s| s.scheduler_name.as_deref())
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_SCHEDULER_NAME)
}

// =============================================================================
// Failures
// =============================================================================

/// Why no node was found for a pod.
#[derive(Debug, Clone)]
struct FitError {
    num_nodes: usize,
    reasons: BTreeMap<String, usize>,
}

impl FitError {
    fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            reasons: BTreeMap::new(),
        }
    }

    fn add(&mut self, reason: impl Into<String>) {
        *self.reasons.entry(reason.into()).or_default() += 1;
    }
}

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.num_nodes == 0 {
            return f.write_str("no nodes available to schedule pods");
        }
        write!(f, "0/{} nodes are available", self.num_nodes)?;
        let mut sep = ": ";
        for (reason, count) in &self.reasons {
            write!(f, "{sep}{count} {reason}")?;
            sep = ", ";
        }
        f.write_str(".")
    }
}

enum CycleFailure {
    Unfit(FitError),
    Error(String),
}

impl fmt::Display for CycleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unfit(e) => e.fmt(f),
            Self::Error(message) => f.write_str(message),
        }
    }
}

// =============================================================================
// Event handlers
// =============================================================================

/// Routes pod events: unassigned pods to the queue, assigned pods to the cache.
struct PodEventHandler {
    scheduler_name: String,
    cache: Arc<SchedulerCache>,
    queue: Arc<SchedulingQueue>,
}

impl PodEventHandler {
    fn responsible_for(&self, pod: &Pod) -> bool {
        scheduler_name(pod) == self.scheduler_name
    }
}

impl ResourceEventHandler for PodEventHandler {
    fn on_add(&self, obj: &ClusterObject) {
        let Some(pod) = obj.as_pod() else {
            return;
        };
        if is_assigned(pod) {
            self.cache.add_pod(pod);
        } else if self.responsible_for(pod) {
            self.queue.add(pod.clone());
        }
    }

    fn on_update(&self, old: &ClusterObject, new: &ClusterObject) {
        let (Some(old), Some(new)) = (old.as_pod(), new.as_pod()) else {
            return;
        };
        if is_assigned(new) {
            if !is_assigned(old) {
                self.queue.delete(&pod_key(new));
            }
            self.cache.update_pod(old, new);
        } else if self.responsible_for(new) && !self.cache.is_assumed(&pod_key(new)) {
            self.queue.update(new.clone());
        }
    }

    fn on_delete(&self, obj: &ClusterObject) {
        let Some(pod) = obj.as_pod() else {
            return;
        };
        self.queue.delete(&pod_key(pod));
        self.cache.remove_pod(pod);
    }
}

/// Mirrors nodes into the cache.
struct NodeEventHandler {
    cache: Arc<SchedulerCache>,
}

impl ResourceEventHandler for NodeEventHandler {
    fn on_add(&self, obj: &ClusterObject) {
        if let Some(node) = obj.as_node() {
            self.cache.add_node(node.clone());
        }
    }

    fn on_update(&self, _old: &ClusterObject, new: &ClusterObject) {
        if let Some(node) = new.as_node() {
            self.cache.update_node(node.clone());
        }
    }

    fn on_delete(&self, obj: &ClusterObject) {
        self.cache.remove_node(obj.name());
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Schedules pending pods from an [`ObjectTracker`] onto its nodes.
pub struct Scheduler {
    store: Arc<ObjectTracker>,
    cache: Arc<SchedulerCache>,
    queue: Arc<SchedulingQueue>,
    framework: Framework,
    extenders: Vec<Arc<dyn Extender>>,
    recorder: Arc<dyn EventRecorder>,
    percentage_of_nodes_to_score: Option<u32>,
    parallelism: usize,
    next_start_index: AtomicUsize,
}

impl Scheduler {
    /// Build a scheduler for the first profile of `config`.
    ///
    /// The out-of-tree registry is merged over the in-tree plugins, the
    /// profile's framework is instantiated, and pod and node handlers are
    /// registered on `informers`. Informers are not started here.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, an out-of-tree
    /// plugin name collides with an in-tree one, a plugin cannot be
    /// instantiated, or an extender client cannot be built.
    pub fn new(
        store: Arc<ObjectTracker>,
        informers: &Arc<InformerFactory>,
        recorder_factory: &RecorderFactory,
        mut config: SchedulerConfig,
        out_of_tree: &Registry,
    ) -> Result<Arc<Self>> {
        config.normalize();
        config.validate()?;

        let mut registry = in_tree_registry();
        registry.merge(out_of_tree)?;

        let profile = config
            .profiles
            .first()
            .ok_or_else(|| SchedulerError::Config("no scheduling profile".to_string()))?;
        let recorder = recorder_factory(&profile.scheduler_name);
        let handle = FrameworkHandle {
            store: Arc::clone(&store),
            informers: Arc::clone(informers),
            recorder: Arc::clone(&recorder),
        };
        let framework = Framework::new(&registry, profile, &handle)?;
        debug!(
            profile = %framework.profile_name(),
            plugins = ?framework.list_plugins(),
            "Built scheduling framework"
        );

        let extenders = config
            .extenders
            .iter()
            .cloned()
            .map(|c| HttpExtender::new(c).map(|e| Arc::new(e) as Arc<dyn Extender>))
            .collect::<Result<Vec<_>>>()?;

        let cache = Arc::new(SchedulerCache::new());
        let queue = Arc::new(SchedulingQueue::new(
            Duration::from_secs(config.pod_initial_backoff_seconds),
            Duration::from_secs(config.pod_max_backoff_seconds),
        ));

        informers
            .informer_with(ListWatch::pods_excluding_terminal())
            .add_event_handler(Arc::new(PodEventHandler {
                scheduler_name: framework.profile_name().to_string(),
                cache: Arc::clone(&cache),
                queue: Arc::clone(&queue),
            }));
        informers
            .informer_for(ObjectKind::Node)
            .add_event_handler(Arc::new(NodeEventHandler {
                cache: Arc::clone(&cache),
            }));

        Ok(Arc::new(Self {
            store,
            cache,
            queue,
            framework,
            extenders,
            recorder,
            percentage_of_nodes_to_score: config.percentage_of_nodes_to_score,
            parallelism: config.parallelism,
            next_start_index: AtomicUsize::new(0),
        }))
    }

    /// The scheduler's node and pod cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<SchedulerCache> {
        &self.cache
    }

    /// The pending-pod queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<SchedulingQueue> {
        &self.queue
    }

    /// The instantiated profile.
    #[must_use]
    pub const fn framework(&self) -> &Framework {
        &self.framework
    }

    /// Whether `pod` waits for this scheduler: it has no node and names the
    /// profile's scheduler.
    #[must_use]
    pub fn is_pending_for(&self, pod: &Pod) -> bool {
        !is_assigned(pod) && scheduler_name(pod) == self.framework.profile_name()
    }

    /// Schedule pods until `stop` is closed.
    pub async fn run(self: Arc<Self>, stop: StopSignal) {
        info!(profile = %self.framework.profile_name(), "Starting scheduler");
        loop {
            let pod = tokio::select! {
                () = stop.closed() => break,
                pod = self.queue.pop() => match pod {
                    Some(pod) => pod,
                    None => break,
                },
            };
            self.schedule_one(pod).await;
        }
        self.queue.close();
        info!(profile = %self.framework.profile_name(), "Scheduler stopped");
    }

    /// Run one scheduling cycle for a popped pod.
    async fn schedule_one(&self, popped: Pod) {
        let key = pod_key(&popped);
        let namespace = key.namespace.as_deref().unwrap_or("default");
        let Ok(pod) = self.store.get_pod(namespace, &key.name) else {
            self.queue.done(&key);
            return;
        };
        if pod.metadata.deletion_timestamp.is_some()
            || is_assigned(&pod)
            || self.cache.is_assumed(&key)
        {
            debug!(pod = %key, "Skipping pod");
            self.queue.done(&key);
            return;
        }

        let state = CycleState::new();
        let node_name = match self.schedule_pod(&state, &pod).await {
            Ok(node_name) => node_name,
            Err(failure) => {
                self.handle_failure(&pod, &failure);
                return;
            }
        };

        let mut assumed = pod.clone();
        assumed.spec.get_or_insert_with(Default::default).node_name = Some(node_name.clone());
        if let Err(e) = self.cache.assume_pod(&assumed) {
            self.handle_failure(&pod, &CycleFailure::Error(e.to_string()));
            return;
        }

        if let Err(status) = self.bind(&state, &assumed, &node_name).await {
            self.cache.forget_pod(&assumed);
            self.handle_failure(&pod, &CycleFailure::Error(status.to_string()));
            return;
        }

        self.queue.done(&key);
        info!(pod = %key, node = %node_name, "Scheduled pod");
        self.recorder.event(
            &assumed,
            EventType::Normal,
            REASON_SCHEDULED,
            "Binding",
            &format!("Successfully assigned {namespace}/{} to {node_name}", key.name),
        );
        self.framework
            .run_post_bind_plugins(&state, &assumed, &node_name)
            .await;
    }

    async fn bind(
        &self,
        state: &CycleState,
        pod: &Pod,
        node_name: &str,
    ) -> std::result::Result<(), PluginStatus> {
        let status = self.framework.run_pre_bind_plugins(state, pod, node_name).await;
        if !status.is_success() {
            return Err(status);
        }
        let status = self.framework.run_bind_plugins(state, pod, node_name).await;
        if !status.is_success() {
            return Err(status);
        }
        Ok(())
    }

    /// Pick a node for `pod`.
    async fn schedule_pod(
        &self,
        state: &CycleState,
        pod: &Pod,
    ) -> std::result::Result<String, CycleFailure> {
        let nodes = self.cache.snapshot();
        let (feasible, mut diagnosis) = self.find_nodes_that_fit(state, pod, &nodes).await?;
        let feasible = self.filter_with_extenders(pod, feasible, &mut diagnosis).await?;

        match feasible.len() {
            0 => Err(CycleFailure::Unfit(diagnosis)),
            1 => Ok(feasible[0].name().to_string()),
            _ => {
                let scores = self.prioritize_nodes(state, pod, &feasible).await?;
                Ok(select_host(&scores))
            }
        }
    }

    async fn find_nodes_that_fit(
        &self,
        state: &CycleState,
        pod: &Pod,
        nodes: &[NodeInfo],
    ) -> std::result::Result<(Vec<NodeInfo>, FitError), CycleFailure> {
        let total = nodes.len();
        let mut diagnosis = FitError::new(total);
        if total == 0 {
            return Err(CycleFailure::Unfit(diagnosis));
        }

        let wanted = num_feasible_nodes_to_find(self.percentage_of_nodes_to_score, total);
        let start = self.next_start_index.load(Ordering::Relaxed) % total;
        let framework = &self.framework;
        // Boxed so the cycle future stays Send.
        let checks: Vec<BoxFuture<'_, (&NodeInfo, PluginStatus)>> = nodes
            .iter()
            .cycle()
            .skip(start)
            .take(total)
            .map(|info| {
                async move { (info, framework.run_filter_plugins(state, pod, info).await) }
                    .boxed()
            })
            .collect();
        let mut results = stream::iter(checks).buffered(self.parallelism);

        let mut feasible = Vec::new();
        let mut processed = 0;
        while let Some((info, status)) = results.next().await {
            processed += 1;
            if status.is_success() {
                feasible.push(info.clone());
                if feasible.len() >= wanted {
                    break;
                }
            } else if status.code() == Code::Error {
                return Err(CycleFailure::Error(status.to_string()));
            } else {
                diagnosis.add(status.message());
            }
        }
        self.next_start_index
            .store((start + processed) % total, Ordering::Relaxed);
        Ok((feasible, diagnosis))
    }

    async fn filter_with_extenders(
        &self,
        pod: &Pod,
        mut feasible: Vec<NodeInfo>,
        diagnosis: &mut FitError,
    ) -> std::result::Result<Vec<NodeInfo>, CycleFailure> {
        for extender in self.extenders.iter().filter(|e| e.supports_filter()) {
            if feasible.is_empty() {
                break;
            }
            let names = feasible.iter().map(|n| n.name().to_string()).collect();
            let result = match extender.filter(pod, names).await {
                Ok(result) => result,
                Err(e) if extender.is_ignorable() => {
                    warn!(extender = %extender.name(), error = %e, "Skipping ignorable extender");
                    continue;
                }
                Err(e) => return Err(CycleFailure::Error(e.to_string())),
            };
            for reason in result
                .failed_nodes
                .values()
                .chain(result.failed_and_unresolvable_nodes.values())
            {
                diagnosis.add(reason.clone());
            }
            // No node list means every candidate was kept.
            if let Some(kept) = result.nodenames {
                let kept: BTreeSet<String> = kept.into_iter().collect();
                feasible.retain(|n| kept.contains(n.name()));
            }
        }
        Ok(feasible)
    }

    async fn prioritize_nodes(
        &self,
        state: &CycleState,
        pod: &Pod,
        feasible: &[NodeInfo],
    ) -> std::result::Result<BTreeMap<String, i64>, CycleFailure> {
        let mut scores: BTreeMap<String, i64> = BTreeMap::new();
        if self.framework.has_score_plugins() {
            let framework = &self.framework;
            let runs: Vec<BoxFuture<'_, (&str, ScoreResult)>> = feasible
                .iter()
                .map(|info| {
                    let run = framework.run_score_plugins(state, pod, info);
                    async move { (info.name(), run.await) }.boxed()
                })
                .collect();
            let mut results = stream::iter(runs).buffered(self.parallelism);
            while let Some((name, score)) = results.next().await {
                let score = score.map_err(|s| CycleFailure::Error(s.to_string()))?;
                scores.insert(name.to_string(), score);
            }
        } else {
            scores.extend(feasible.iter().map(|n| (n.name().to_string(), 1)));
        }

        let names: Vec<String> = feasible.iter().map(|n| n.name().to_string()).collect();
        for extender in self.extenders.iter().filter(|e| e.supports_prioritize()) {
            match extender.prioritize(pod, &names).await {
                Ok(priorities) => {
                    for priority in priorities {
                        if let Some(total) = scores.get_mut(&priority.host) {
                            *total += priority.score
                                * extender.weight()
                                * (MAX_NODE_SCORE / MAX_EXTENDER_PRIORITY);
                        }
                    }
                }
                Err(e) => {
                    warn!(extender = %extender.name(), error = %e, "Ignoring prioritize failure");
                }
            }
        }
        Ok(scores)
    }

    fn handle_failure(&self, pod: &Pod, failure: &CycleFailure) {
        let key = pod_key(pod);
        let message = failure.to_string();
        debug!(pod = %key, reason = %message, "Unable to schedule pod");
        self.recorder.event(
            pod,
            EventType::Warning,
            REASON_FAILED_SCHEDULING,
            "Scheduling",
            &message,
        );

        let namespace = key.namespace.as_deref().unwrap_or("default");
        if self.store.get_pod(namespace, &key.name).is_err() {
            self.queue.done(&key);
            return;
        }
        self.queue.requeue_with_backoff(pod.clone());
    }
}

/// The highest-scoring node, ties going to the lowest name.
fn select_host(scores: &BTreeMap<String, i64>) -> String {
    scores
        .iter()
        .max_by(|(a_name, a), (b_name, b)| a.cmp(b).then_with(|| b_name.cmp(a_name)))
        .map(|(name, _)| name.clone())
        .unwrap_or_default()
}
