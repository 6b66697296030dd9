//! Import policy applied to objects before they enter the isolated store.
//!
//! [`SanitizePolicy::sanitize`] decides whether an object is imported and
//! returns the (possibly modified) copy to insert. It never touches the
//! cluster.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{Node, Pod, PodStatus};
use kluster_sim_core::ClusterObject;

const PHASE_PENDING: &str = "Pending";
const PHASE_SUCCEEDED: &str = "Succeeded";
const PHASE_FAILED: &str = "Failed";

/// Which objects to import and how to rewrite them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizePolicy {
    /// Nodes left out of the simulation. Empty means no exclusion.
    pub exclude_nodes: BTreeSet<String>,
    /// Keep existing pod assignments. When false, pods are reset to pending.
    pub with_scheduled_pods: bool,
    /// Keep node image inventories.
    pub with_node_images: bool,
    /// Drop plain pods on excluded nodes and keep DaemonSet pods there.
    pub ignore_pods_on_excluded_nodes: bool,
}

impl Default for SanitizePolicy {
    fn default() -> Self {
        Self {
            exclude_nodes: BTreeSet::new(),
            with_scheduled_pods: true,
            with_node_images: true,
            ignore_pods_on_excluded_nodes: false,
        }
    }
}

pub(crate) fn is_daemonset_pod(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.kind == "DaemonSet")
}

fn is_terminal(pod: &Pod) -> bool {
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    matches!(phase, Some(PHASE_SUCCEEDED | PHASE_FAILED)) || pod.metadata.deletion_timestamp.is_some()
}

/// Turn `pod` back into a pending pod with no node.
pub(crate) fn reset_pod(pod: &mut Pod) {
    if let Some(spec) = pod.spec.as_mut() {
        spec.node_name = None;
    }
    pod.metadata.resource_version = None;
    pod.status = Some(PodStatus {
        phase: Some(PHASE_PENDING.to_string()),
        ..Default::default()
    });
}

impl SanitizePolicy {
    /// Decide whether to import `obj`.
    ///
    /// Returns `None` if the object is left out, or the copy to insert.
    #[must_use]
    pub fn sanitize(&self, obj: ClusterObject) -> Option<ClusterObject> {
        match obj {
            ClusterObject::Pod(pod) => self.sanitize_pod(pod).map(ClusterObject::Pod),
            ClusterObject::Node(node) => self.sanitize_node(node).map(ClusterObject::Node),
            other => Some(other),
        }
    }

    fn on_excluded_node(&self, pod: &Pod) -> bool {
        pod.spec
            .as_ref()
            .and_then(|s| s.node_name.as_deref())
            .is_some_and(|node| self.exclude_nodes.contains(node))
    }

    fn sanitize_pod(&self, mut pod: Pod) -> Option<Pod> {
        // DaemonSet pods stay on excluded nodes unless the ignore flag is set;
        // plain pods stay only when it is.
        if self.on_excluded_node(&pod)
            && is_daemonset_pod(&pod) == self.ignore_pods_on_excluded_nodes
        {
            return None;
        }
        if is_terminal(&pod) {
            return None;
        }
        if !self.with_scheduled_pods {
            reset_pod(&mut pod);
        }
        Some(pod)
    }

    fn sanitize_node(&self, mut node: Node) -> Option<Node> {
        let name = node.metadata.name.as_deref().unwrap_or_default();
        if self.exclude_nodes.contains(name) {
            return None;
        }
        if !self.with_node_images {
            if let Some(status) = node.status.as_mut() {
                status.images = None;
            }
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerImage, Namespace, NodeStatus, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};

    fn policy(ignore: bool) -> SanitizePolicy {
        SanitizePolicy {
            exclude_nodes: BTreeSet::from(["excluded".to_string()]),
            ignore_pods_on_excluded_nodes: ignore,
            ..Default::default()
        }
    }

    fn pod(node: &str, phase: &str) -> Pod {
        let mut pod = Pod {
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        pod.metadata.name = Some("web-0".to_string());
        pod.metadata.resource_version = Some("42".to_string());
        pod
    }

    fn daemonset_pod(node: &str) -> Pod {
        let mut pod = pod(node, "Running");
        pod.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "DaemonSet".to_string(),
            name: "agent".to_string(),
            uid: "uid-1".to_string(),
            ..Default::default()
        }]);
        pod
    }

    fn node(name: &str) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node.status = Some(NodeStatus {
            images: Some(vec![ContainerImage {
                names: Some(vec!["nginx:1.27".to_string()]),
                size_bytes: Some(1024),
            }]),
            ..Default::default()
        });
        node
    }

    fn kept(policy: &SanitizePolicy, pod: Pod) -> bool {
        policy.sanitize(pod.into()).is_some()
    }

    #[test]
    fn excluded_node_truth_table() {
        assert!(kept(&policy(false), daemonset_pod("excluded")));
        assert!(!kept(&policy(true), daemonset_pod("excluded")));
        assert!(!kept(&policy(false), pod("excluded", "Running")));
        assert!(kept(&policy(true), pod("excluded", "Running")));
    }

    #[test]
    fn pods_on_other_nodes_are_kept() {
        for ignore in [false, true] {
            assert!(kept(&policy(ignore), pod("node-a", "Running")));
            assert!(kept(&policy(ignore), daemonset_pod("node-a")));
        }
    }

    #[test]
    fn terminal_pods_are_dropped() {
        let policy = SanitizePolicy::default();
        assert!(!kept(&policy, pod("node-a", "Succeeded")));
        assert!(!kept(&policy, pod("node-a", "Failed")));

        let mut deleting = pod("node-a", "Running");
        deleting.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(!kept(&policy, deleting));

        // Excluded-node carve-outs do not rescue terminal pods.
        assert!(!kept(&self::policy(true), pod("excluded", "Failed")));
    }

    #[test]
    fn unscheduled_mode_resets_pods() {
        let policy = SanitizePolicy {
            with_scheduled_pods: false,
            ..Default::default()
        };
        let reset = policy
            .sanitize(pod("node-a", "Running").into())
            .and_then(ClusterObject::into_pod)
            .unwrap();
        assert_eq!(reset.spec.unwrap().node_name, None);
        assert_eq!(reset.status.unwrap().phase.as_deref(), Some("Pending"));
        assert_eq!(reset.metadata.resource_version, None);
        assert_eq!(reset.metadata.name.as_deref(), Some("web-0"));
    }

    #[test]
    fn excluded_nodes_are_always_dropped() {
        for ignore in [false, true] {
            let mut policy = policy(ignore);
            for with_images in [false, true] {
                policy.with_node_images = with_images;
                assert!(policy.sanitize(node("excluded").into()).is_none());
            }
        }
    }

    #[test]
    fn node_images_are_cleared_on_request() {
        let policy = SanitizePolicy {
            with_node_images: false,
            ..Default::default()
        };
        let cleared = policy
            .sanitize(node("node-a").into())
            .and_then(ClusterObject::into_node)
            .unwrap();
        assert!(cleared.status.unwrap().images.is_none());

        let kept = SanitizePolicy::default()
            .sanitize(node("node-a").into())
            .and_then(ClusterObject::into_node)
            .unwrap();
        assert_eq!(kept.status.unwrap().images.map(|i| i.len()), Some(1));
    }

    #[test]
    fn other_kinds_pass_through() {
        let mut ns = Namespace::default();
        ns.metadata.name = Some("excluded".to_string());
        let obj = ClusterObject::from(ns);
        assert_eq!(policy(true).sanitize(obj.clone()), Some(obj));
    }
}
