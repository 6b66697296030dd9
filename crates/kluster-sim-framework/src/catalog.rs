//! Resource kind catalog.
//!
//! The snapshot loader returns untyped [`DynamicObject`]s. The catalog maps
//! every [`ObjectKind`] the loader may fetch to a decoder producing the
//! concrete [`ClusterObject`] variant.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod,
};
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode, CSIStorageCapacity, StorageClass};
use kube::core::DynamicObject;
use kluster_sim_core::{ClusterObject, ObjectKind};
use serde::de::DeserializeOwned;

use crate::error::CatalogError;

type Decoder = fn(serde_json::Value) -> serde_json::Result<ClusterObject>;

fn decode_as<K>(value: serde_json::Value) -> serde_json::Result<ClusterObject>
where
    K: DeserializeOwned + Into<ClusterObject>,
{
    serde_json::from_value::<K>(value).map(Into::into)
}

/// Decoders for every supported kind.
#[derive(Debug, Clone)]
pub struct ResourceCatalog {
    decoders: BTreeMap<ObjectKind, Decoder>,
}

impl Default for ResourceCatalog {
    fn default() -> Self {
        let entries: [(ObjectKind, Decoder); 9] = [
            (ObjectKind::Namespace, decode_as::<Namespace>),
            (ObjectKind::Node, decode_as::<Node>),
            (ObjectKind::PersistentVolume, decode_as::<PersistentVolume>),
            (ObjectKind::PersistentVolumeClaim, decode_as::<PersistentVolumeClaim>),
            (ObjectKind::StorageClass, decode_as::<StorageClass>),
            (ObjectKind::CsiNode, decode_as::<CSINode>),
            (ObjectKind::CsiDriver, decode_as::<CSIDriver>),
            (ObjectKind::CsiStorageCapacity, decode_as::<CSIStorageCapacity>),
            (ObjectKind::Pod, decode_as::<Pod>),
        ];
        Self {
            decoders: entries.into_iter().collect(),
        }
    }
}

impl ResourceCatalog {
    /// The catalog of every kind in [`ObjectKind::ALL`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Kinds with a decoder.
    pub fn kinds(&self) -> impl Iterator<Item = ObjectKind> + '_ {
        self.decoders.keys().copied()
    }

    /// Check that every kind in `kinds` has a decoder.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Unregistered` for the first kind without one.
    pub fn verify(&self, kinds: &[ObjectKind]) -> Result<(), CatalogError> {
        match kinds.iter().find(|k| !self.decoders.contains_key(k)) {
            Some(kind) => Err(CatalogError::Unregistered(*kind)),
            None => Ok(()),
        }
    }

    /// Decode an untyped object into its concrete type.
    ///
    /// # Errors
    ///
    /// Returns an error if the object has no type information, names a kind
    /// outside the catalog, or does not decode as that kind.
    pub fn decode(&self, obj: &DynamicObject) -> Result<ClusterObject, CatalogError> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| CatalogError::MissingTypeMeta(name.clone()))?;
        let kind = ObjectKind::from_api_version(&types.api_version, &types.kind).ok_or_else(
            || CatalogError::UnknownKind {
                api_version: types.api_version.clone(),
                kind: types.kind.clone(),
            },
        )?;
        let decoder = self
            .decoders
            .get(&kind)
            .ok_or(CatalogError::Unregistered(kind))?;

        let value = serde_json::to_value(obj).map_err(|source| CatalogError::Decode {
            kind,
            name: name.clone(),
            source,
        })?;
        decoder(value).map_err(|source| CatalogError::Decode { kind, name, source })
    }
}
