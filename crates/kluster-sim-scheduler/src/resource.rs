//! Resource accounting.
//!
//! Quantities are parsed into integer millicores for CPU and bytes for
//! memory. A pod's request is the larger of the sum of its app containers and
//! the largest init container, plus any pod overhead.

use std::collections::BTreeMap;
use std::ops::{AddAssign, SubAssign};

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// CPU resource name.
pub const CPU: &str = "cpu";
/// Memory resource name.
pub const MEMORY: &str = "memory";
/// Pod count resource name.
pub const PODS: &str = "pods";

/// An amount of schedulable resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resource {
    /// CPU in millicores.
    pub milli_cpu: i64,
    /// Memory in bytes.
    pub memory: i64,
    /// Number of pods.
    pub pods: i64,
}

impl Resource {
    /// Build from a resource list, ignoring names other than cpu, memory and pods.
    #[must_use]
    pub fn from_list(list: &BTreeMap<String, Quantity>) -> Self {
        let mut res = Self::default();
        for (name, qty) in list {
            match name.as_str() {
                CPU => res.milli_cpu = parse_milli(qty).unwrap_or_default(),
                MEMORY => res.memory = parse_value(qty).unwrap_or_default(),
                PODS => res.pods = parse_value(qty).unwrap_or_default(),
                _ => {}
            }
        }
        res
    }

    /// Component-wise maximum.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self {
            milli_cpu: self.milli_cpu.max(other.milli_cpu),
            memory: self.memory.max(other.memory),
            pods: self.pods.max(other.pods),
        }
    }
}

impl AddAssign for Resource {
    fn add_assign(&mut self, rhs: Self) {
        self.milli_cpu += rhs.milli_cpu;
        self.memory += rhs.memory;
        self.pods += rhs.pods;
    }
}

impl SubAssign for Resource {
    fn sub_assign(&mut self, rhs: Self) {
        self.milli_cpu -= rhs.milli_cpu;
        self.memory -= rhs.memory;
        self.pods -= rhs.pods;
    }
}

/// The resources a pod requests, counting itself as one pod.
#[must_use]
pub fn pod_requests(pod: &Pod) -> Resource {
    let Some(spec) = pod.spec.as_ref() else {
        return Resource {
            pods: 1,
            ..Resource::default()
        };
    };

    let mut total = Resource::default();
    for container in &spec.containers {
        if let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
            total += Resource::from_list(requests);
        }
    }
    for container in spec.init_containers.iter().flatten() {
        if let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
            total = total.max(Resource::from_list(requests));
        }
    }
    if let Some(overhead) = spec.overhead.as_ref() {
        total += Resource::from_list(overhead);
    }
    total.pods = 1;
    total
}

/// The allocatable resources of a node, falling back to its capacity.
#[must_use]
pub fn node_allocatable(node: &Node) -> Resource {
    node.status
        .as_ref()
        .and_then(|s| s.allocatable.as_ref().or(s.capacity.as_ref()))
        .map(Resource::from_list)
        .unwrap_or_default()
}

/// Parse a quantity as an integer, rounding up.
#[must_use]
pub fn parse_value(qty: &Quantity) -> Option<i64> {
    parse_f64(&qty.0).map(round_up)
}

/// Parse a quantity in thousandths, rounding up.
#[must_use]
pub fn parse_milli(qty: &Quantity) -> Option<i64> {
    parse_f64(&qty.0).map(|v| round_up(v * 1000.0))
}

#[allow(clippy::cast_possible_truncation)]
fn round_up(v: f64) -> i64 {
    // Absorb float error from decimal suffixes such as "0.1".
    let nearest = v.round();
    if (v - nearest).abs() < 1e-6 {
        nearest as i64
    } else {
        v.ceil() as i64
    }
}

fn parse_f64(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '+' | '-')))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => 1024.0_f64.powi(3),
        "Ti" => 1024.0_f64.powi(4),
        "Pi" => 1024.0_f64.powi(5),
        "Ei" => 1024.0_f64.powi(6),
        exp if exp.starts_with(['e', 'E']) => 10f64.powi(exp[1..].parse().ok()?),
        _ => return None,
    };
    Some(number * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, NodeStatus, PodSpec, ResourceRequirements};

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    fn container(cpu: &str, memory: &str) -> Container {
        Container {
            name: "c".to_string(),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([
                    (CPU.to_string(), q(cpu)),
                    (MEMORY.to_string(), q(memory)),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn parses_cpu() {
        assert_eq!(parse_milli(&q("500m")), Some(500));
        assert_eq!(parse_milli(&q("2")), Some(2000));
        assert_eq!(parse_milli(&q("1.5")), Some(1500));
        assert_eq!(parse_milli(&q("0.1")), Some(100));
        assert_eq!(parse_milli(&q("garbage")), None);
    }

    #[test]
    fn parses_memory() {
        assert_eq!(parse_value(&q("2048Mi")), Some(2048 * 1024 * 1024));
        assert_eq!(parse_value(&q("1Gi")), Some(1 << 30));
        assert_eq!(parse_value(&q("1k")), Some(1000));
        assert_eq!(parse_value(&q("1e3")), Some(1000));
        assert_eq!(parse_value(&q("128974848")), Some(128_974_848));
    }

    #[test]
    fn pod_requests_take_init_container_max() {
        let pod = Pod {
            spec: Some(PodSpec {
                containers: vec![container("250m", "64Mi"), container("250m", "64Mi")],
                init_containers: Some(vec![container("1", "32Mi")]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let req = pod_requests(&pod);
        assert_eq!(req.milli_cpu, 1000);
        assert_eq!(req.memory, 128 * 1024 * 1024);
        assert_eq!(req.pods, 1);
    }

    #[test]
    fn node_allocatable_prefers_allocatable() {
        let node = Node {
            status: Some(NodeStatus {
                capacity: Some(BTreeMap::from([(CPU.to_string(), q("8"))])),
                allocatable: Some(BTreeMap::from([
                    (CPU.to_string(), q("7500m")),
                    (PODS.to_string(), q("110")),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        };
        let res = node_allocatable(&node);
        assert_eq!(res.milli_cpu, 7500);
        assert_eq!(res.pods, 110);
    }
}
