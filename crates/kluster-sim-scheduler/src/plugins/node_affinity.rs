use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, NodeSelectorRequirement, NodeSelectorTerm, Pod};

use super::names;
use crate::cache::NodeInfo;
use crate::framework::{CycleState, FilterPlugin, Plugin, PluginStatus};

const REJECTED: &str = "node(s) didn't match Pod's node affinity/selector";

/// Matches `spec.nodeSelector` and required node affinity against node labels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeAffinity;

fn requirement_matches(req: &NodeSelectorRequirement, value: Option<&str>) -> bool {
    let values = req.values.as_deref().unwrap_or_default();
    match req.operator.as_str() {
        "In" => value.is_some_and(|v| values.iter().any(|x| x == v)),
        "NotIn" => !value.is_some_and(|v| values.iter().any(|x| x == v)),
        "Exists" => value.is_some(),
        "DoesNotExist" => value.is_none(),
        "Gt" | "Lt" => {
            let (Some(actual), [bound]) = (value.and_then(|v| v.parse::<i64>().ok()), values)
            else {
                return false;
            };
            let Ok(bound) = bound.parse::<i64>() else {
                return false;
            };
            if req.operator == "Gt" {
                actual > bound
            } else {
                actual < bound
            }
        }
        _ => false,
    }
}

fn term_matches(term: &NodeSelectorTerm, node: &Node, labels: &BTreeMap<String, String>) -> bool {
    let expressions = term.match_expressions.as_deref().unwrap_or_default();
    let fields = term.match_fields.as_deref().unwrap_or_default();
    if expressions.is_empty() && fields.is_empty() {
        return false;
    }
    let node_name = node.metadata.name.as_deref();
    expressions
        .iter()
        .all(|req| requirement_matches(req, labels.get(&req.key).map(String::as_str)))
        && fields.iter().all(|req| {
            req.key == "metadata.name" && requirement_matches(req, node_name)
        })
}

/// Whether `node` satisfies the pod's node selector and required affinity.
fn matches(pod: &Pod, node: &Node) -> bool {
    let Some(spec) = pod.spec.as_ref() else {
        return true;
    };
    let empty = BTreeMap::new();
    let labels = node.metadata.labels.as_ref().unwrap_or(&empty);

    let selector_ok = spec
        .node_selector
        .iter()
        .flatten()
        .all(|(k, v)| labels.get(k) == Some(v));
    if !selector_ok {
        return false;
    }

    let required = spec
        .affinity
        .as_ref()
        .and_then(|a| a.node_affinity.as_ref())
        .and_then(|na| na.required_during_scheduling_ignored_during_execution.as_ref());
    required.map_or(true, |selector| {
        selector
            .node_selector_terms
            .iter()
            .any(|term| term_matches(term, node, labels))
    })
}

impl Plugin for NodeAffinity {
    fn name(&self) -> &str {
        names::NODE_AFFINITY
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

#[async_trait]
impl FilterPlugin for NodeAffinity {
    async fn filter(&self, _state: &CycleState, pod: &Pod, node: &NodeInfo) -> PluginStatus {
        match node.node() {
            Some(n) if matches(pod, n) => PluginStatus::success(),
            Some(_) => PluginStatus::unresolvable(REJECTED),
            None => PluginStatus::unresolvable("node not found"),
        }
    }
}
