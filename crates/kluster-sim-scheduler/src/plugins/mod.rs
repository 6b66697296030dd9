//! In-tree plugins.

mod default_binder;
mod node_affinity;
mod node_resources_fit;
mod node_unschedulable;
mod taint_toleration;

use std::sync::Arc;

pub use default_binder::DefaultBinder;
pub use node_affinity::NodeAffinity;
pub use node_resources_fit::{
    NodeResourcesFit, NodeResourcesFitArgs, ScoringStrategy, ScoringStrategyType,
};
pub use node_unschedulable::NodeUnschedulable;
pub use taint_toleration::{tolerates, TaintToleration};

use crate::framework::{FrameworkHandle, Plugin};
use crate::registry::Registry;
use crate::Result;

/// Plugin names.
pub mod names {
    /// Rejects nodes marked unschedulable.
    pub const NODE_UNSCHEDULABLE: &str = "NodeUnschedulable";
    /// Matches node selectors and required node affinity.
    pub const NODE_AFFINITY: &str = "NodeAffinity";
    /// Rejects nodes with untolerated taints.
    pub const TAINT_TOLERATION: &str = "TaintToleration";
    /// Checks and scores cpu, memory and pod capacity.
    pub const NODE_RESOURCES_FIT: &str = "NodeResourcesFit";
    /// Writes the node assignment to the store.
    pub const DEFAULT_BINDER: &str = "DefaultBinder";
    /// Volume binding. Not registered in-tree; named so profiles can disable it.
    pub const VOLUME_BINDING: &str = "VolumeBinding";
    /// Preemption. Not registered in-tree; named so profiles can disable it.
    pub const DEFAULT_PREEMPTION: &str = "DefaultPreemption";
}

type FactoryFn = fn(Option<&serde_json::Value>, &FrameworkHandle) -> Result<Arc<dyn Plugin>>;

fn new_node_unschedulable(
    _: Option<&serde_json::Value>,
    _: &FrameworkHandle,
) -> Result<Arc<dyn Plugin>> {
    Ok(Arc::new(NodeUnschedulable))
}

fn new_node_affinity(
    _: Option<&serde_json::Value>,
    _: &FrameworkHandle,
) -> Result<Arc<dyn Plugin>> {
    Ok(Arc::new(NodeAffinity))
}

fn new_taint_toleration(
    _: Option<&serde_json::Value>,
    _: &FrameworkHandle,
) -> Result<Arc<dyn Plugin>> {
    Ok(Arc::new(TaintToleration))
}

fn new_node_resources_fit(
    args: Option<&serde_json::Value>,
    _: &FrameworkHandle,
) -> Result<Arc<dyn Plugin>> {
    Ok(Arc::new(NodeResourcesFit::from_args(args)?))
}

fn new_default_binder(
    _: Option<&serde_json::Value>,
    handle: &FrameworkHandle,
) -> Result<Arc<dyn Plugin>> {
    Ok(Arc::new(DefaultBinder::new(Arc::clone(&handle.store))))
}

/// A registry holding every in-tree plugin.
#[must_use]
pub fn in_tree_registry() -> Registry {
    let entries: [(&str, FactoryFn); 5] = [
        (names::NODE_UNSCHEDULABLE, new_node_unschedulable),
        (names::NODE_AFFINITY, new_node_affinity),
        (names::TAINT_TOLERATION, new_taint_toleration),
        (names::NODE_RESOURCES_FIT, new_node_resources_fit),
        (names::DEFAULT_BINDER, new_default_binder),
    ];
    let mut registry = Registry::new();
    for (name, factory) in entries {
        // Names are distinct constants, so registration cannot conflict.
        let _ = registry.register(name, factory);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_tree_registry_has_defaults() {
        let registry = in_tree_registry();
        for name in crate::config::Plugins::defaults().filter.names() {
            assert!(registry.contains(name), "{name} not registered");
        }
        assert!(registry.contains(names::DEFAULT_BINDER));
        assert!(!registry.contains(names::VOLUME_BINDING));
    }
}
