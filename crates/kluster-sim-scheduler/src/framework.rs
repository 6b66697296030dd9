//! Plugin framework.
//!
//! A scheduling cycle runs the enabled plugins of a profile at five extension
//! points: filter, score, pre-bind, bind and post-bind. A plugin is one object
//! that advertises which extension points it implements through the
//! `Plugin::as_*` accessors.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kluster_sim_store::{InformerFactory, ObjectTracker};
use parking_lot::RwLock;

use crate::cache::NodeInfo;
use crate::config::{PluginSet, Profile};
use crate::events::EventRecorder;
use crate::registry::Registry;
use crate::{Result, SchedulerError};

/// Highest score a score plugin may return.
pub const MAX_NODE_SCORE: i64 = 100;

// =============================================================================
// Status
// =============================================================================

/// Outcome class of a plugin call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    /// The plugin succeeded.
    Success,
    /// An internal error occurred.
    Error,
    /// The pod does not fit; another attempt may succeed later.
    Unschedulable,
    /// The pod does not fit and retrying on this node cannot help.
    UnschedulableAndUnresolvable,
    /// The plugin chose not to handle the call.
    Skip,
}

/// Result of a plugin call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginStatus {
    code: Code,
    reasons: Vec<String>,
    plugin: Option<String>,
}

impl PluginStatus {
    fn with_code(code: Code, reason: Option<String>) -> Self {
        Self {
            code,
            reasons: reason.into_iter().collect(),
            plugin: None,
        }
    }

    /// A successful status.
    #[must_use]
    pub fn success() -> Self {
        Self::with_code(Code::Success, None)
    }

    /// A skip status.
    #[must_use]
    pub fn skip() -> Self {
        Self::with_code(Code::Skip, None)
    }

    /// An error status.
    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        Self::with_code(Code::Error, Some(reason.into()))
    }

    /// An unschedulable status.
    #[must_use]
    pub fn unschedulable(reason: impl Into<String>) -> Self {
        Self::with_code(Code::Unschedulable, Some(reason.into()))
    }

    /// An unschedulable-and-unresolvable status.
    #[must_use]
    pub fn unresolvable(reason: impl Into<String>) -> Self {
        Self::with_code(Code::UnschedulableAndUnresolvable, Some(reason.into()))
    }

    /// Attach the name of the plugin that produced this status.
    #[must_use]
    pub fn with_plugin(mut self, plugin: &str) -> Self {
        self.plugin = Some(plugin.to_string());
        self
    }

    /// The status code.
    #[must_use]
    pub const fn code(&self) -> Code {
        self.code
    }

    /// Whether the status is a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == Code::Success
    }

    /// Whether the status is a skip.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        self.code == Code::Skip
    }

    /// Whether the pod was rejected rather than failed.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(
            self.code,
            Code::Unschedulable | Code::UnschedulableAndUnresolvable
        )
    }

    /// Reasons joined into one message.
    #[must_use]
    pub fn message(&self) -> String {
        self.reasons.join(", ")
    }

    /// The plugin that produced this status, if known.
    #[must_use]
    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.plugin {
            Some(plugin) => write!(f, "{plugin}: {:?}: {}", self.code, self.message()),
            None => write!(f, "{:?}: {}", self.code, self.message()),
        }
    }
}

// =============================================================================
// Cycle state
// =============================================================================

/// Per-pod scratch space shared by the plugins of one scheduling cycle.
#[derive(Default)]
pub struct CycleState {
    data: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl CycleState {
    /// Create an empty cycle state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `key`.
    pub fn write<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.data.write().insert(key.into(), Arc::new(value));
    }

    /// Read the value stored under `key`, if it has type `T`.
    #[must_use]
    pub fn read<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = Arc::clone(self.data.read().get(key)?);
        value.downcast::<T>().ok()
    }
}

// =============================================================================
// Plugin traits
// =============================================================================

/// A scheduling plugin.
pub trait Plugin: Send + Sync {
    /// The registered name.
    fn name(&self) -> &str;

    /// The filter implementation, if any.
    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        None
    }

    /// The score implementation, if any.
    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        None
    }

    /// The pre-bind implementation, if any.
    fn as_pre_bind(&self) -> Option<&dyn PreBindPlugin> {
        None
    }

    /// The bind implementation, if any.
    fn as_bind(&self) -> Option<&dyn BindPlugin> {
        None
    }

    /// The post-bind implementation, if any.
    fn as_post_bind(&self) -> Option<&dyn PostBindPlugin> {
        None
    }
}

/// Rejects nodes that cannot run a pod.
#[async_trait]
pub trait FilterPlugin: Send + Sync {
    /// Check whether `pod` fits on `node`.
    async fn filter(&self, state: &CycleState, pod: &Pod, node: &NodeInfo) -> PluginStatus;
}

/// Ranks feasible nodes.
#[async_trait]
pub trait ScorePlugin: Send + Sync {
    /// Score `node` for `pod` in `[0, MAX_NODE_SCORE]`.
    ///
    /// # Errors
    ///
    /// Returns a non-success status if the node cannot be scored.
    async fn score(
        &self,
        state: &CycleState,
        pod: &Pod,
        node: &NodeInfo,
    ) -> std::result::Result<i64, PluginStatus>;
}

/// Runs before binding.
#[async_trait]
pub trait PreBindPlugin: Send + Sync {
    /// Prepare `pod` for binding to `node_name`.
    async fn pre_bind(&self, state: &CycleState, pod: &Pod, node_name: &str) -> PluginStatus;
}

/// Binds a pod to a node.
#[async_trait]
pub trait BindPlugin: Send + Sync {
    /// Bind `pod` to `node_name`, or return a skip status to defer to the
    /// next bind plugin.
    async fn bind(&self, state: &CycleState, pod: &Pod, node_name: &str) -> PluginStatus;
}

/// Observes a successful bind.
#[async_trait]
pub trait PostBindPlugin: Send + Sync {
    /// Called once `pod` is bound to `node_name`.
    async fn post_bind(&self, state: &CycleState, pod: &Pod, node_name: &str);
}

// =============================================================================
// Handle
// =============================================================================

/// Shared services available to plugin factories.
#[derive(Clone)]
pub struct FrameworkHandle {
    /// The store the scheduler reads and binds against.
    pub store: Arc<ObjectTracker>,
    /// Informers over the store.
    pub informers: Arc<InformerFactory>,
    /// Event recorder of the profile.
    pub recorder: Arc<dyn EventRecorder>,
}

// =============================================================================
// Framework
// =============================================================================

/// A profile's instantiated plugins, ordered per extension point.
pub struct Framework {
    profile_name: String,
    filter: Vec<Arc<dyn Plugin>>,
    score: Vec<(Arc<dyn Plugin>, i64)>,
    pre_bind: Vec<Arc<dyn Plugin>>,
    bind: Vec<Arc<dyn Plugin>>,
    post_bind: Vec<Arc<dyn Plugin>>,
}

impl Framework {
    /// Instantiate the plugins a profile enables.
    ///
    /// Each plugin is instantiated once, with the arguments the profile
    /// configures for it, and shared by every extension point that enables it.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::PluginNotFound` if an enabled plugin is not
    /// registered, `SchedulerError::MissingExtension` if a plugin is enabled
    /// at an extension point it does not implement, or any error a factory
    /// returns.
    pub fn new(registry: &Registry, profile: &Profile, handle: &FrameworkHandle) -> Result<Self> {
        let plugins = profile.plugins.merge_with_defaults();
        let mut instances: BTreeMap<String, Arc<dyn Plugin>> = BTreeMap::new();
        let mut instance = |name: &str| -> Result<Arc<dyn Plugin>> {
            if let Some(plugin) = instances.get(name) {
                return Ok(Arc::clone(plugin));
            }
            let plugin = registry.instantiate(name, profile.args_for(name), handle)?;
            instances.insert(name.to_string(), Arc::clone(&plugin));
            Ok(plugin)
        };

        let mut point = |set: &PluginSet,
                         extension_point: &'static str,
                         has: fn(&dyn Plugin) -> bool|
         -> Result<Vec<(Arc<dyn Plugin>, i64)>> {
            set.enabled
                .iter()
                .map(|entry| {
                    let plugin = instance(&entry.name)?;
                    if !has(plugin.as_ref()) {
                        return Err(SchedulerError::MissingExtension {
                            plugin: entry.name.clone(),
                            extension_point,
                        });
                    }
                    Ok((plugin, entry.weight.unwrap_or(1)))
                })
                .collect()
        };

        let unweighted = |v: Vec<(Arc<dyn Plugin>, i64)>| -> Vec<Arc<dyn Plugin>> {
            v.into_iter().map(|(p, _)| p).collect()
        };
        Ok(Self {
            profile_name: profile.scheduler_name.clone(),
            filter: unweighted(point(&plugins.filter, "Filter", |p| {
                p.as_filter().is_some()
            })?),
            score: point(&plugins.score, "Score", |p| p.as_score().is_some())?,
            pre_bind: unweighted(point(&plugins.pre_bind, "PreBind", |p| {
                p.as_pre_bind().is_some()
            })?),
            bind: unweighted(point(&plugins.bind, "Bind", |p| p.as_bind().is_some())?),
            post_bind: unweighted(point(&plugins.post_bind, "PostBind", |p| {
                p.as_post_bind().is_some()
            })?),
        })
    }

    /// The profile's scheduler name.
    #[must_use]
    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    /// Names of the plugins at each extension point, for diagnostics.
    #[must_use]
    pub fn list_plugins(&self) -> BTreeMap<&'static str, Vec<String>> {
        let names = |v: &[Arc<dyn Plugin>]| -> Vec<String> {
            v.iter().map(|p| p.name().to_string()).collect()
        };
        BTreeMap::from([
            ("Filter", names(&self.filter)),
            (
                "Score",
                self.score.iter().map(|(p, _)| p.name().to_string()).collect(),
            ),
            ("PreBind", names(&self.pre_bind)),
            ("Bind", names(&self.bind)),
            ("PostBind", names(&self.post_bind)),
        ])
    }

    /// Whether any score plugin is enabled.
    #[must_use]
    pub fn has_score_plugins(&self) -> bool {
        !self.score.is_empty()
    }

    /// Run filter plugins in order, stopping at the first rejection.
    pub async fn run_filter_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        node: &NodeInfo,
    ) -> PluginStatus {
        for plugin in &self.filter {
            let Some(filter) = plugin.as_filter() else {
                continue;
            };
            let status = filter.filter(state, pod, node).await;
            if !status.is_success() {
                return status.with_plugin(plugin.name());
            }
        }
        PluginStatus::success()
    }

    /// Run score plugins and return the weighted sum.
    ///
    /// # Errors
    ///
    /// Returns the first non-success status a plugin reports.
    pub async fn run_score_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        node: &NodeInfo,
    ) -> std::result::Result<i64, PluginStatus> {
        let mut total = 0;
        for (plugin, weight) in &self.score {
            let Some(scorer) = plugin.as_score() else {
                continue;
            };
            let score = scorer
                .score(state, pod, node)
                .await
                .map_err(|s| s.with_plugin(plugin.name()))?;
            total += score.clamp(0, MAX_NODE_SCORE) * weight;
        }
        Ok(total)
    }

    /// Run pre-bind plugins, stopping at the first failure.
    pub async fn run_pre_bind_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        node_name: &str,
    ) -> PluginStatus {
        for plugin in &self.pre_bind {
            let Some(pre_bind) = plugin.as_pre_bind() else {
                continue;
            };
            let status = pre_bind.pre_bind(state, pod, node_name).await;
            if !status.is_success() {
                return status.with_plugin(plugin.name());
            }
        }
        PluginStatus::success()
    }

    /// Run bind plugins until one handles the pod.
    pub async fn run_bind_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        node_name: &str,
    ) -> PluginStatus {
        for plugin in &self.bind {
            let Some(binder) = plugin.as_bind() else {
                continue;
            };
            let status = binder.bind(state, pod, node_name).await;
            if status.is_skip() {
                continue;
            }
            return if status.is_success() {
                status
            } else {
                status.with_plugin(plugin.name())
            };
        }
        PluginStatus::error("no bind plugin handled the pod")
    }

    /// Run every post-bind plugin.
    pub async fn run_post_bind_plugins(&self, state: &CycleState, pod: &Pod, node_name: &str) {
        for plugin in &self.post_bind {
            if let Some(post_bind) = plugin.as_post_bind() {
                post_bind.post_bind(state, pod, node_name).await;
            }
        }
    }
}
