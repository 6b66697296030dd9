//! The virtual binder plugin.
//!
//! [`VirtualBinder`] takes over the pre-bind, bind and post-bind extension
//! points. Binding writes the node assignment and a `Running` phase to the
//! isolated store; nothing outside the store is contacted. After a bind the
//! optional [`PostBindHook`] sees the bound pod.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kluster_sim_core::pod_key;
use kluster_sim_scheduler::{
    BindPlugin, CycleState, FrameworkHandle, Plugin, PluginStatus, PostBindPlugin, PreBindPlugin,
    Registry,
};
use kluster_sim_store::ObjectTracker;
use tracing::{debug, warn};

/// Name the binder is registered and enabled under.
pub const VIRTUAL_BINDER: &str = "VirtualBinder";

const PHASE_RUNNING: &str = "Running";

/// Error returned by a [`PostBindHook`].
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Called with every pod the binder has bound.
pub type PostBindHook = Arc<dyn Fn(&Pod) -> Result<(), HookError> + Send + Sync>;

/// Binds pods inside the isolated store.
pub struct VirtualBinder {
    store: Arc<ObjectTracker>,
    hook: Option<PostBindHook>,
}

impl VirtualBinder {
    /// Create a binder over a store.
    #[must_use]
    pub fn new(store: Arc<ObjectTracker>, hook: Option<PostBindHook>) -> Self {
        Self { store, hook }
    }

    /// Register a factory for the binder in `registry`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::DuplicatePlugin` if the registry already holds
    /// a plugin named [`VIRTUAL_BINDER`].
    pub fn register(
        registry: &mut Registry,
        hook: Option<PostBindHook>,
    ) -> kluster_sim_scheduler::Result<()> {
        registry.register(VIRTUAL_BINDER, move |_args, handle: &FrameworkHandle| {
            let binder = Self::new(Arc::clone(&handle.store), hook.clone());
            Ok(Arc::new(binder) as Arc<dyn Plugin>)
        })
    }
}

impl Plugin for VirtualBinder {
    fn name(&self) -> &str {
        VIRTUAL_BINDER
    }

    fn as_pre_bind(&self) -> Option<&dyn PreBindPlugin> {
        Some(self)
    }

    fn as_bind(&self) -> Option<&dyn BindPlugin> {
        Some(self)
    }

    fn as_post_bind(&self) -> Option<&dyn PostBindPlugin> {
        Some(self)
    }
}

#[async_trait]
impl PreBindPlugin for VirtualBinder {
    async fn pre_bind(&self, _state: &CycleState, _pod: &Pod, _node_name: &str) -> PluginStatus {
        PluginStatus::success()
    }
}

#[async_trait]
impl BindPlugin for VirtualBinder {
    async fn bind(&self, _state: &CycleState, pod: &Pod, node_name: &str) -> PluginStatus {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let name = pod.metadata.name.as_deref().unwrap_or_default();

        let mut bound = match self.store.get_pod(namespace, name) {
            Ok(pod) => pod,
            Err(e) => return PluginStatus::error(format!("Unable to bind: {e}")),
        };
        bound.spec.get_or_insert_with(Default::default).node_name = Some(node_name.to_string());
        bound.status.get_or_insert_with(Default::default).phase = Some(PHASE_RUNNING.to_string());

        match self.store.update_pod(bound) {
            Ok(_) => {
                debug!(pod = %format!("{namespace}/{name}"), node = node_name, "Virtually bound pod");
                PluginStatus::success()
            }
            Err(e) => PluginStatus::error(format!("Unable to update bound pod: {e}")),
        }
    }
}

#[async_trait]
impl PostBindPlugin for VirtualBinder {
    async fn post_bind(&self, _state: &CycleState, pod: &Pod, node_name: &str) {
        let Some(hook) = &self.hook else {
            return;
        };
        let key = pod_key(pod);
        let namespace = key.namespace.as_deref().unwrap_or("default");
        // Prefer the stored copy so the hook sees the bound phase.
        let bound = self
            .store
            .get_pod(namespace, &key.name)
            .unwrap_or_else(|_| pod.clone());
        if let Err(e) = hook(&bound) {
            warn!(pod = %key, node = node_name, error = %e, "Post-bind hook failed");
        }
    }
}
