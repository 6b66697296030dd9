use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Taint};

use super::names;
use super::taint_toleration::pod_tolerates;
use crate::cache::NodeInfo;
use crate::framework::{CycleState, FilterPlugin, Plugin, PluginStatus};

const UNSCHEDULABLE_TAINT: &str = "node.kubernetes.io/unschedulable";

/// Rejects nodes with `spec.unschedulable` set unless the pod tolerates the
/// unschedulable taint.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeUnschedulable;

impl Plugin for NodeUnschedulable {
    fn name(&self) -> &str {
        names::NODE_UNSCHEDULABLE
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

#[async_trait]
impl FilterPlugin for NodeUnschedulable {
    async fn filter(&self, _state: &CycleState, pod: &Pod, node: &NodeInfo) -> PluginStatus {
        let Some(node) = node.node() else {
            return PluginStatus::unresolvable("node not found");
        };
        let unschedulable = node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false);
        if !unschedulable {
            return PluginStatus::success();
        }
        let taint = Taint {
            key: UNSCHEDULABLE_TAINT.to_string(),
            effect: "NoSchedule".to_string(),
            ..Default::default()
        };
        if pod_tolerates(pod, &taint) {
            PluginStatus::success()
        } else {
            PluginStatus::unresolvable("node(s) were unschedulable")
        }
    }
}
