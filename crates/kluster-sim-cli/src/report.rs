//! Simulation report printed by the CLI.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kluster_sim_core::{pod_key, Status};
use serde::Serialize;

/// Summary of a scheduler simulation.
#[derive(Debug, Serialize)]
pub struct Report {
    /// Why the simulation stopped.
    pub stop_reason: String,
    /// Nodes in the isolated store at stop time.
    pub nodes: usize,
    /// Pods scheduled during the run, by node.
    pub scheduled: BTreeMap<String, Vec<String>>,
    /// Number of pods scheduled during the run.
    pub scheduled_count: usize,
    /// Pods still without a node when the simulation stopped.
    pub unscheduled: Vec<String>,
    /// Nodes that can be removed, in removal order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes_to_scale_down: Vec<String>,
    /// Templates whose capacity was estimated.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub estimated: Vec<String>,
}

fn node_name(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|n| !n.is_empty())
}

/// Whether a pod still waits for a node.
pub fn is_pending(pod: &Pod) -> bool {
    node_name(pod).is_none()
}

impl Report {
    /// Summarise a stopped simulation.
    ///
    /// `pods` is the final pod list of the isolated store.
    pub fn new(status: &Status, pods: &[Pod]) -> Self {
        let mut scheduled: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for pod in &status.pods {
            let node = node_name(pod).unwrap_or_default().to_string();
            scheduled.entry(node).or_default().push(pod_key(pod).object_path());
        }
        for pods in scheduled.values_mut() {
            pods.sort();
        }

        let mut unscheduled: Vec<String> = pods
            .iter()
            .filter(|p| is_pending(p))
            .map(|p| pod_key(p).object_path())
            .collect();
        unscheduled.sort();

        Self {
            stop_reason: status.stop_reason.clone(),
            nodes: status.nodes.len(),
            scheduled_count: status.pods.len(),
            scheduled,
            unscheduled,
            nodes_to_scale_down: status.nodes_to_scale_down.clone(),
            estimated: status
                .pods_for_estimation
                .iter()
                .map(|p| pod_key(p).object_path())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Node, PodSpec};

    fn pod(name: &str, node: Option<&str>) -> Pod {
        let mut pod = Pod {
            spec: Some(PodSpec {
                node_name: node.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        };
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod
    }

    #[test]
    fn groups_scheduled_pods_by_node() {
        let mut status = Status::default();
        status.add_scheduled_pods([
            pod("web-1", Some("node-a")),
            pod("web-0", Some("node-a")),
            pod("db-0", Some("node-b")),
        ]);
        let mut node = Node::default();
        node.metadata.name = Some("node-a".to_string());
        status.set_nodes([node]);
        status.stop_reason = "all pods scheduled".to_string();

        let report = Report::new(&status, &[pod("batch-0", None), pod("web-0", Some("node-a"))]);
        assert_eq!(report.scheduled_count, 3);
        assert_eq!(report.nodes, 1);
        assert_eq!(report.scheduled["node-a"], vec!["default/web-0", "default/web-1"]);
        assert_eq!(report.scheduled["node-b"], vec!["default/db-0"]);
        assert_eq!(report.unscheduled, vec!["default/batch-0"]);
        assert_eq!(report.stop_reason, "all pods scheduled");
    }

    #[test]
    fn empty_node_name_is_pending() {
        assert!(is_pending(&pod("web-0", Some(""))));
        assert!(is_pending(&pod("web-0", None)));
        assert!(!is_pending(&pod("web-0", Some("node-a"))));
    }

    #[test]
    fn compression_and_estimation_fields_are_optional() {
        let report = Report::new(&Status::default(), &[]);
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("nodes_to_scale_down").is_none());
        assert!(json.get("estimated").is_none());

        let mut status = Status::default();
        status.add_node_to_scale_down("node-c");
        status.add_node_to_scale_down("node-a");
        status.add_estimation_pods([pod("web", None)]);
        let json = serde_json::to_value(Report::new(&status, &[])).unwrap();
        assert_eq!(json["nodes_to_scale_down"], serde_json::json!(["node-c", "node-a"]));
        assert_eq!(json["estimated"], serde_json::json!(["default/web"]));
    }
}
