//! Simulation status.
//!
//! [`Status`] captures every pod scheduled during a run together with the
//! reason the simulation stopped. It is the document persisted at stop time.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Node, Pod};
use serde::{Deserialize, Serialize};

/// Accumulated outcome of a simulation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Pods scheduled during the run.
    #[serde(default)]
    pub pods: Vec<Pod>,
    /// Node inventory of the isolated store, captured at stop time.
    #[serde(default)]
    pub nodes: BTreeMap<String, Node>,
    /// Pods pending capacity evaluation.
    #[serde(default)]
    pub pods_for_estimation: Vec<Pod>,
    /// Node names recommended for removal.
    #[serde(default)]
    pub nodes_to_scale_down: Vec<String>,
    /// Why the simulation stopped.
    #[serde(default)]
    pub stop_reason: String,
}

impl Status {
    /// Record scheduled pods.
    pub fn add_scheduled_pods(&mut self, pods: impl IntoIterator<Item = Pod>) {
        self.pods.extend(pods);
    }

    /// Record pods pending capacity evaluation.
    pub fn add_estimation_pods(&mut self, pods: impl IntoIterator<Item = Pod>) {
        self.pods_for_estimation.extend(pods);
    }

    /// Record a node recommended for removal.
    pub fn add_node_to_scale_down(&mut self, node_name: impl Into<String>) {
        self.nodes_to_scale_down.push(node_name.into());
    }

    /// Replace the node inventory.
    pub fn set_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) {
        self.nodes = nodes
            .into_iter()
            .map(|node| (node.metadata.name.clone().unwrap_or_default(), node))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node
    }

    #[test]
    fn serializes_with_snake_case_fields() {
        let mut status = Status::default();
        status.set_nodes([node("node-a")]);
        status.add_node_to_scale_down("node-a");
        status.stop_reason = "done".to_string();

        let value = serde_json::to_value(&status).unwrap();
        let obj = value.as_object().unwrap();
        for field in [
            "pods",
            "nodes",
            "pods_for_estimation",
            "nodes_to_scale_down",
            "stop_reason",
        ] {
            assert!(obj.contains_key(field), "missing {field}");
        }
        assert_eq!(value["stop_reason"], "done");
        assert_eq!(value["nodes"]["node-a"]["metadata"]["name"], "node-a");
    }

    #[test]
    fn set_nodes_replaces_inventory() {
        let mut status = Status::default();
        status.set_nodes([node("a"), node("b")]);
        status.set_nodes([node("c")]);
        assert_eq!(status.nodes.keys().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn accumulates_pods() {
        let mut status = Status::default();
        status.add_scheduled_pods([Pod::default(), Pod::default()]);
        status.add_estimation_pods([Pod::default()]);
        assert_eq!(status.pods.len(), 2);
        assert_eq!(status.pods_for_estimation.len(), 1);
    }
}
