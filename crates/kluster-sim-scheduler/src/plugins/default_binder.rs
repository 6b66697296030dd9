use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kluster_sim_store::ObjectTracker;
use tracing::debug;

use super::names;
use crate::framework::{BindPlugin, CycleState, Plugin, PluginStatus};

/// Binds a pod by writing `spec.nodeName` to the store.
pub struct DefaultBinder {
    store: Arc<ObjectTracker>,
}

impl DefaultBinder {
    /// Create a binder over a store.
    #[must_use]
    pub const fn new(store: Arc<ObjectTracker>) -> Self {
        Self { store }
    }
}

impl Plugin for DefaultBinder {
    fn name(&self) -> &str {
        names::DEFAULT_BINDER
    }

    fn as_bind(&self) -> Option<&dyn BindPlugin> {
        Some(self)
    }
}

#[async_trait]
impl BindPlugin for DefaultBinder {
    async fn bind(&self, _state: &CycleState, pod: &Pod, node_name: &str) -> PluginStatus {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let mut current = match self.store.get_pod(namespace, name) {
            Ok(pod) => pod,
            Err(e) => return PluginStatus::error(e.to_string()),
        };
        current.spec.get_or_insert_with(Default::default).node_name = Some(node_name.to_string());
        match self.store.update_pod(current) {
            Ok(_) => {
                debug!(pod = %format!("{namespace}/{name}"), node = node_name, "bound pod");
                PluginStatus::success()
            }
            Err(e) => PluginStatus::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_node_name() {
        let store = Arc::new(ObjectTracker::new());
        let mut pod = Pod::default();
        pod.metadata.name = Some("web-0".to_string());
        let pod = store.create_pod(pod).unwrap();

        let binder = DefaultBinder::new(Arc::clone(&store));
        let status = binder.bind(&CycleState::new(), &pod, "node-a").await;
        assert!(status.is_success());

        let stored = store.get_pod("default", "web-0").unwrap();
        assert_eq!(stored.spec.unwrap().node_name.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn missing_pod_is_an_error() {
        let binder = DefaultBinder::new(Arc::new(ObjectTracker::new()));
        let mut pod = Pod::default();
        pod.metadata.name = Some("ghost".to_string());
        let status = binder.bind(&CycleState::new(), &pod, "node-a").await;
        assert_eq!(status.code(), crate::framework::Code::Error);
    }
}
