//! Typed cluster objects.
//!
//! [`ClusterObject`] is the closed set of resources the isolated store holds.
//! Objects enter the store already decoded into their concrete types.

use k8s_openapi::api::core::v1::{
    Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod,
};
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode, CSIStorageCapacity, StorageClass};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::kind::{ObjectKey, ObjectKind};

/// A concretely-typed object held by the isolated store.
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum ClusterObject {
    /// A namespace.
    Namespace(Namespace),
    /// A node.
    Node(Node),
    /// A persistent volume.
    PersistentVolume(PersistentVolume),
    /// A persistent volume claim.
    PersistentVolumeClaim(PersistentVolumeClaim),
    /// A storage class.
    StorageClass(StorageClass),
    /// A CSI node descriptor.
    CsiNode(CSINode),
    /// A CSI driver descriptor.
    CsiDriver(CSIDriver),
    /// A CSI storage capacity descriptor.
    CsiStorageCapacity(CSIStorageCapacity),
    /// A pod.
    Pod(Pod),
}

macro_rules! impl_from_typed {
    ($($variant:ident => $ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for ClusterObject {
                fn from(obj: $ty) -> Self {
                    Self::$variant(obj)
                }
            }
        )+
    };
}

impl_from_typed! {
    Namespace => Namespace,
    Node => Node,
    PersistentVolume => PersistentVolume,
    PersistentVolumeClaim => PersistentVolumeClaim,
    StorageClass => StorageClass,
    CsiNode => CSINode,
    CsiDriver => CSIDriver,
    CsiStorageCapacity => CSIStorageCapacity,
    Pod => Pod,
}

impl ClusterObject {
    /// The kind of this object.
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        match self {
            Self::Namespace(_) => ObjectKind::Namespace,
            Self::Node(_) => ObjectKind::Node,
            Self::PersistentVolume(_) => ObjectKind::PersistentVolume,
            Self::PersistentVolumeClaim(_) => ObjectKind::PersistentVolumeClaim,
            Self::StorageClass(_) => ObjectKind::StorageClass,
            Self::CsiNode(_) => ObjectKind::CsiNode,
            Self::CsiDriver(_) => ObjectKind::CsiDriver,
            Self::CsiStorageCapacity(_) => ObjectKind::CsiStorageCapacity,
            Self::Pod(_) => ObjectKind::Pod,
        }
    }

    /// The object's metadata.
    #[must_use]
    pub const fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Namespace(o) => &o.metadata,
            Self::Node(o) => &o.metadata,
            Self::PersistentVolume(o) => &o.metadata,
            Self::PersistentVolumeClaim(o) => &o.metadata,
            Self::StorageClass(o) => &o.metadata,
            Self::CsiNode(o) => &o.metadata,
            Self::CsiDriver(o) => &o.metadata,
            Self::CsiStorageCapacity(o) => &o.metadata,
            Self::Pod(o) => &o.metadata,
        }
    }

    /// Mutable access to the object's metadata.
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Namespace(o) => &mut o.metadata,
            Self::Node(o) => &mut o.metadata,
            Self::PersistentVolume(o) => &mut o.metadata,
            Self::PersistentVolumeClaim(o) => &mut o.metadata,
            Self::StorageClass(o) => &mut o.metadata,
            Self::CsiNode(o) => &mut o.metadata,
            Self::CsiDriver(o) => &mut o.metadata,
            Self::CsiStorageCapacity(o) => &mut o.metadata,
            Self::Pod(o) => &mut o.metadata,
        }
    }

    /// The object's name, empty if unset.
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// The store identity of this object.
    ///
    /// Cluster-scoped kinds never carry a namespace in their key, even if the
    /// metadata sets one.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        let kind = self.kind();
        let namespace = if kind.is_namespaced() {
            Some(
                self.metadata()
                    .namespace
                    .clone()
                    .unwrap_or_else(|| "default".to_string()),
            )
        } else {
            None
        };
        ObjectKey {
            kind,
            namespace,
            name: self.name().to_string(),
        }
    }

    /// Borrow as a pod.
    #[must_use]
    pub const fn as_pod(&self) -> Option<&Pod> {
        match self {
            Self::Pod(pod) => Some(pod),
            _ => None,
        }
    }

    /// Convert into a pod.
    #[must_use]
    pub fn into_pod(self) -> Option<Pod> {
        match self {
            Self::Pod(pod) => Some(pod),
            _ => None,
        }
    }

    /// Borrow as a node.
    #[must_use]
    pub const fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Convert into a node.
    #[must_use]
    pub fn into_node(self) -> Option<Node> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }
}

/// The store key of a pod.
#[must_use]
pub fn pod_key(pod: &Pod) -> ObjectKey {
    ObjectKey::namespaced(
        ObjectKind::Pod,
        pod.metadata.namespace.as_deref().unwrap_or("default"),
        pod.metadata.name.as_deref().unwrap_or_default(),
    )
}
