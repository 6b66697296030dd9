use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Taint, Toleration};

use super::names;
use crate::cache::NodeInfo;
use crate::framework::{CycleState, FilterPlugin, Plugin, PluginStatus};

/// Rejects nodes carrying a `NoSchedule` or `NoExecute` taint the pod does
/// not tolerate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaintToleration;

/// Whether `toleration` tolerates `taint`.
#[must_use]
pub fn tolerates(toleration: &Toleration, taint: &Taint) -> bool {
    if let Some(effect) = toleration.effect.as_deref().filter(|e| !e.is_empty()) {
        if effect != taint.effect {
            return false;
        }
    }
    let key = toleration.key.as_deref().unwrap_or_default();
    match toleration.operator.as_deref() {
        Some("Exists") => key.is_empty() || key == taint.key,
        Some("Equal") | None | Some("") => {
            key == taint.key
                && toleration.value.as_deref().unwrap_or_default()
                    == taint.value.as_deref().unwrap_or_default()
        }
        Some(_) => false,
    }
}

pub(crate) fn pod_tolerates(pod: &Pod, taint: &Taint) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.tolerations.as_ref())
        .is_some_and(|tolerations| tolerations.iter().any(|t| tolerates(t, taint)))
}

impl Plugin for TaintToleration {
    fn name(&self) -> &str {
        names::TAINT_TOLERATION
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

#[async_trait]
impl FilterPlugin for TaintToleration {
    async fn filter(&self, _state: &CycleState, pod: &Pod, node: &NodeInfo) -> PluginStatus {
        let taints = node
            .node()
            .and_then(|n| n.spec.as_ref())
            .and_then(|s| s.taints.as_ref());
        let untolerated = taints.into_iter().flatten().find(|taint| {
            matches!(taint.effect.as_str(), "NoSchedule" | "NoExecute") && !pod_tolerates(pod, taint)
        });
        match untolerated {
            Some(taint) => PluginStatus::unresolvable(format!(
                "node(s) had untolerated taint {{{}: {}}}",
                taint.key,
                taint.value.as_deref().unwrap_or_default()
            )),
            None => PluginStatus::success(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Node, NodeSpec, PodSpec};

    fn taint(key: &str, value: &str, effect: &str) -> Taint {
        Taint {
            key: key.to_string(),
            value: Some(value.to_string()),
            effect: effect.to_string(),
            ..Default::default()
        }
    }

    fn node_with(taints: Vec<Taint>) -> NodeInfo {
        NodeInfo::new(Node {
            spec: Some(NodeSpec {
                taints: Some(taints),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn pod_with(tolerations: Vec<Toleration>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                tolerations: Some(tolerations),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn toleration_matching() {
        let t = taint("dedicated", "gpu", "NoSchedule");
        let equal = Toleration {
            key: Some("dedicated".to_string()),
            value: Some("gpu".to_string()),
            ..Default::default()
        };
        let exists_any = Toleration {
            operator: Some("Exists".to_string()),
            ..Default::default()
        };
        let wrong_effect = Toleration {
            operator: Some("Exists".to_string()),
            effect: Some("NoExecute".to_string()),
            ..Default::default()
        };
        assert!(tolerates(&equal, &t));
        assert!(tolerates(&exists_any, &t));
        assert!(!tolerates(&wrong_effect, &t));
    }

    #[tokio::test]
    async fn rejects_untolerated_no_schedule() {
        let node = node_with(vec![taint("dedicated", "gpu", "NoSchedule")]);
        let status = TaintToleration
            .filter(&CycleState::new(), &pod_with(vec![]), &node)
            .await;
        assert!(status.is_rejected());
        assert!(status.message().contains("dedicated"));
    }

    #[tokio::test]
    async fn ignores_prefer_no_schedule() {
        let node = node_with(vec![taint("spot", "true", "PreferNoSchedule")]);
        let status = TaintToleration
            .filter(&CycleState::new(), &pod_with(vec![]), &node)
            .await;
        assert!(status.is_success());
    }
}
