//! Resource kinds and object identity.
//!
//! Every object held by the isolated store is identified by an [`ObjectKey`]:
//! its [`ObjectKind`], an optional namespace and a name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// The resource kinds a simulation can import into its isolated store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// `v1/Namespace`
    Namespace,
    /// `v1/Node`
    Node,
    /// `v1/PersistentVolume`
    PersistentVolume,
    /// `v1/PersistentVolumeClaim`
    PersistentVolumeClaim,
    /// `storage.k8s.io/v1/StorageClass`
    StorageClass,
    /// `storage.k8s.io/v1/CSINode`
    CsiNode,
    /// `storage.k8s.io/v1/CSIDriver`
    CsiDriver,
    /// `storage.k8s.io/v1/CSIStorageCapacity`
    CsiStorageCapacity,
    /// `v1/Pod`
    Pod,
}

impl ObjectKind {
    /// Every kind, in the order a world snapshot fetches them.
    pub const ALL: [Self; 9] = [
        Self::Namespace,
        Self::Node,
        Self::PersistentVolume,
        Self::PersistentVolumeClaim,
        Self::StorageClass,
        Self::CsiNode,
        Self::CsiDriver,
        Self::CsiStorageCapacity,
        Self::Pod,
    ];

    /// The API group, empty for the core group.
    #[must_use]
    pub const fn group(self) -> &'static str {
        match self {
            Self::Namespace
            | Self::Node
            | Self::PersistentVolume
            | Self::PersistentVolumeClaim
            | Self::Pod => "",
            Self::StorageClass | Self::CsiNode | Self::CsiDriver | Self::CsiStorageCapacity => {
                "storage.k8s.io"
            }
        }
    }

    /// The API version within the group.
    #[must_use]
    pub const fn version(self) -> &'static str {
        "v1"
    }

    /// The kind name as it appears in `kind:` fields.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Node => "Node",
            Self::PersistentVolume => "PersistentVolume",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::StorageClass => "StorageClass",
            Self::CsiNode => "CSINode",
            Self::CsiDriver => "CSIDriver",
            Self::CsiStorageCapacity => "CSIStorageCapacity",
            Self::Pod => "Pod",
        }
    }

    /// The `apiVersion` string (`v1` or `group/v1`).
    #[must_use]
    pub fn api_version(self) -> String {
        if self.group().is_empty() {
            self.version().to_string()
        } else {
            format!("{}/{}", self.group(), self.version())
        }
    }

    /// Whether objects of this kind live in a namespace.
    #[must_use]
    pub const fn is_namespaced(self) -> bool {
        matches!(
            self,
            Self::Pod | Self::PersistentVolumeClaim | Self::CsiStorageCapacity
        )
    }

    /// Look up a kind from its group, version and kind name.
    #[must_use]
    pub fn from_gvk(group: &str, version: &str, kind: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.group() == group && k.version() == version && k.name() == kind)
    }

    /// Look up a kind from an `apiVersion` string and kind name.
    #[must_use]
    pub fn from_api_version(api_version: &str, kind: &str) -> Option<Self> {
        let (group, version) = api_version.rsplit_once('/').unwrap_or(("", api_version));
        Self::from_gvk(group, version, kind)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ObjectKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| CoreError::UnknownKind(s.to_string()))
    }
}

/// Identity of an object in the isolated store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Kind of the object.
    pub kind: ObjectKind,
    /// Namespace, `None` for cluster-scoped kinds.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
}

impl ObjectKey {
    /// Create a key for a cluster-scoped object.
    #[must_use]
    pub fn cluster(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    /// Create a key for a namespaced object.
    #[must_use]
    pub fn namespaced(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// The `namespace/name` form used in logs and events.
    #[must_use]
    pub fn object_path(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.object_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gvk_lookup() {
        assert_eq!(ObjectKind::from_gvk("", "v1", "Pod"), Some(ObjectKind::Pod));
        assert_eq!(
            ObjectKind::from_api_version("storage.k8s.io/v1", "CSIStorageCapacity"),
            Some(ObjectKind::CsiStorageCapacity)
        );
        assert_eq!(ObjectKind::from_api_version("apps/v1", "Deployment"), None);
        assert_eq!(ObjectKind::from_gvk("", "v1beta1", "Pod"), None);
    }

    #[test]
    fn every_kind_round_trips_through_api_version() {
        for kind in ObjectKind::ALL {
            assert_eq!(
                ObjectKind::from_api_version(&kind.api_version(), kind.name()),
                Some(kind)
            );
        }
    }

    #[test]
    fn parse_kind_name() {
        assert_eq!("CSINode".parse::<ObjectKind>().unwrap(), ObjectKind::CsiNode);
        assert!("Deployment".parse::<ObjectKind>().is_err());
    }

    #[test]
    fn key_display() {
        let pod = ObjectKey::namespaced(ObjectKind::Pod, "default", "web-0");
        assert_eq!(pod.to_string(), "Pod/default/web-0");
        assert_eq!(pod.object_path(), "default/web-0");

        let node = ObjectKey::cluster(ObjectKind::Node, "node-a");
        assert_eq!(node.to_string(), "Node/node-a");
    }

    #[test]
    fn namespaced_kinds() {
        assert!(ObjectKind::Pod.is_namespaced());
        assert!(ObjectKind::PersistentVolumeClaim.is_namespaced());
        assert!(!ObjectKind::Node.is_namespaced());
        assert!(!ObjectKind::StorageClass.is_namespaced());
    }
}
