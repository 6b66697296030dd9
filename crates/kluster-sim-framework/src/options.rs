//! Simulator construction options.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use kluster_sim_core::ObjectKind;
use kluster_sim_scheduler::{PluginSet, RecorderFactory, Registry, TracingRecorder};
use kluster_sim_store::ResourceEventHandler;

use crate::binder::PostBindHook;
use crate::sanitize::SanitizePolicy;
use crate::snapshot::{ClusterAccess, SnapshotCache};

/// Options for [`GenericSimulator::new`](crate::GenericSimulator::new).
///
/// ```
/// use kluster_sim_framework::SimulatorOptions;
///
/// let options = SimulatorOptions::new()
///     .with_exclude_nodes(["node-a".to_string()])
///     .with_scheduled_pods(false)
///     .with_save_to("/tmp/status.json");
/// assert!(!options.policy().with_scheduled_pods);
/// ```
#[derive(Clone)]
pub struct SimulatorOptions {
    pub(crate) policy: SanitizePolicy,
    pub(crate) out_of_tree_registry: Registry,
    pub(crate) custom_pre_bind: Option<PluginSet>,
    pub(crate) custom_bind: Option<PluginSet>,
    pub(crate) custom_post_bind: Option<PluginSet>,
    pub(crate) custom_event_handlers: Vec<(ObjectKind, Arc<dyn ResourceEventHandler>)>,
    pub(crate) post_bind_hook: Option<PostBindHook>,
    pub(crate) save_to: Option<PathBuf>,
    pub(crate) cluster_access: Option<Arc<dyn ClusterAccess>>,
    pub(crate) snapshot_cache: SnapshotCache,
    pub(crate) recorder_factory: RecorderFactory,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            policy: SanitizePolicy::default(),
            out_of_tree_registry: Registry::new(),
            custom_pre_bind: None,
            custom_bind: None,
            custom_post_bind: None,
            custom_event_handlers: Vec::new(),
            post_bind_hook: None,
            save_to: None,
            cluster_access: None,
            snapshot_cache: SnapshotCache::new(),
            recorder_factory: TracingRecorder::factory(),
        }
    }
}

impl SimulatorOptions {
    /// Default options: keep scheduled pods and node images, exclude nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave these nodes, and pods on them, out of the simulation.
    #[must_use]
    pub fn with_exclude_nodes(mut self, nodes: impl IntoIterator<Item = String>) -> Self {
        self.policy.exclude_nodes = nodes.into_iter().collect::<BTreeSet<_>>();
        self
    }

    /// Keep pods' existing node assignments. When false every imported pod is
    /// reset to pending.
    #[must_use]
    pub fn with_scheduled_pods(mut self, enabled: bool) -> Self {
        self.policy.with_scheduled_pods = enabled;
        self
    }

    /// Keep node image inventories.
    #[must_use]
    pub fn with_node_images(mut self, enabled: bool) -> Self {
        self.policy.with_node_images = enabled;
        self
    }

    /// Keep plain pods on excluded nodes and drop DaemonSet pods there.
    #[must_use]
    pub fn with_ignore_pods_on_excluded_nodes(mut self, enabled: bool) -> Self {
        self.policy.ignore_pods_on_excluded_nodes = enabled;
        self
    }

    /// Extra plugin factories made available to the profile.
    #[must_use]
    pub fn with_out_of_tree_registry(mut self, registry: Registry) -> Self {
        self.out_of_tree_registry = registry;
        self
    }

    /// Additional pre-bind plugins, appended after the virtual binder.
    #[must_use]
    pub fn with_custom_pre_bind(mut self, plugins: PluginSet) -> Self {
        self.custom_pre_bind = Some(plugins);
        self
    }

    /// Additional bind plugins, appended after the virtual binder.
    #[must_use]
    pub fn with_custom_bind(mut self, plugins: PluginSet) -> Self {
        self.custom_bind = Some(plugins);
        self
    }

    /// Additional post-bind plugins, appended after the virtual binder.
    #[must_use]
    pub fn with_custom_post_bind(mut self, plugins: PluginSet) -> Self {
        self.custom_post_bind = Some(plugins);
        self
    }

    /// Handlers registered on the informer of each kind.
    #[must_use]
    pub fn with_custom_event_handlers(
        mut self,
        handlers: Vec<(ObjectKind, Arc<dyn ResourceEventHandler>)>,
    ) -> Self {
        self.custom_event_handlers = handlers;
        self
    }

    /// Called with every virtually bound pod.
    #[must_use]
    pub fn with_post_bind_hook(mut self, hook: PostBindHook) -> Self {
        self.post_bind_hook = Some(hook);
        self
    }

    /// Write the final status as JSON to this path on stop.
    #[must_use]
    pub fn with_save_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_to = Some(path.into());
        self
    }

    /// Cluster to snapshot when the world is initialized without objects.
    #[must_use]
    pub fn with_cluster_access(mut self, access: Arc<dyn ClusterAccess>) -> Self {
        self.cluster_access = Some(access);
        self
    }

    /// Share a snapshot between simulators.
    #[must_use]
    pub fn with_snapshot_cache(mut self, cache: SnapshotCache) -> Self {
        self.snapshot_cache = cache;
        self
    }

    /// Where scheduling events go. Defaults to [`TracingRecorder`].
    #[must_use]
    pub fn with_recorder_factory(mut self, factory: RecorderFactory) -> Self {
        self.recorder_factory = factory;
        self
    }

    /// The import policy these options describe.
    #[must_use]
    pub const fn policy(&self) -> &SanitizePolicy {
        &self.policy
    }
}
