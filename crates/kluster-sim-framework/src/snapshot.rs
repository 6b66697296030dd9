//! World snapshot loading.
//!
//! The loader lists every object of the requested kinds from a real cluster
//! through [`ClusterAccess`]. The result is held by a [`SnapshotCache`] so the
//! cluster is listed at most once, however many simulators are built from it.
//!
//! # Example
//!
//! ```no_run
//! use kluster_sim_core::ObjectKind;
//! use kluster_sim_framework::{KubeClusterAccess, SnapshotCache};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let access = KubeClusterAccess::try_default().await?;
//! let cache = SnapshotCache::new();
//!
//! let first = cache.get_or_load(&access, &ObjectKind::ALL).await?;
//! let second = cache.get_or_load(&access, &ObjectKind::ALL).await?;
//! assert!(std::sync::Arc::ptr_eq(&first, &second));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, ListParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta};
use kube::Client;
use kluster_sim_core::ObjectKind;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{AccessError, SnapshotError};

/// Read access to a real cluster.
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Resolve the resource path serving a kind.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotFound` if the cluster does not serve the kind,
    /// or another error if discovery fails.
    async fn resolve(&self, kind: ObjectKind) -> Result<ApiResource, AccessError>;

    /// List every object of a resource, across all namespaces for namespaced
    /// kinds.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotFound` if the resource is gone, or another
    /// error if the request fails.
    async fn list(&self, resource: &ApiResource) -> Result<Vec<DynamicObject>, AccessError>;
}

/// [`ClusterAccess`] through a Kubernetes client.
#[derive(Clone)]
pub struct KubeClusterAccess {
    client: Client,
}

impl KubeClusterAccess {
    /// Wrap an existing client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the kubeconfig or in-cluster environment.
    ///
    /// # Errors
    ///
    /// Returns an error if no client configuration can be inferred.
    pub async fn try_default() -> Result<Self, AccessError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterAccess for KubeClusterAccess {
    async fn resolve(&self, kind: ObjectKind) -> Result<ApiResource, AccessError> {
        let gvk = GroupVersionKind::gvk(kind.group(), kind.version(), kind.name());
        let (resource, _capabilities) = kube::discovery::pinned_kind(&self.client, &gvk).await?;
        Ok(resource)
    }

    async fn list(&self, resource: &ApiResource) -> Result<Vec<DynamicObject>, AccessError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), resource);
        let list = api.list(&ListParams::default().match_any()).await?;
        Ok(list.items)
    }
}

/// List every object of `kinds` from the cluster.
///
/// Kinds the cluster does not serve are skipped, and a list answered with
/// "not found" counts as empty. Each returned object carries its
/// `apiVersion` and `kind`.
///
/// # Errors
///
/// Returns `SnapshotError::Resolve` if resolving a kind fails for any other
/// reason (see [`SnapshotError::is_fatal`]), or `SnapshotError::List` if a
/// list request fails.
pub async fn load_world(
    access: &dyn ClusterAccess,
    kinds: &[ObjectKind],
) -> Result<Vec<DynamicObject>, SnapshotError> {
    let mut objects = Vec::new();
    for &kind in kinds {
        let resource = match access.resolve(kind).await {
            Ok(resource) => resource,
            Err(e) if e.is_not_found() => {
                info!(kind = %kind, "Resource not served by cluster, skipping");
                continue;
            }
            Err(source) => return Err(SnapshotError::Resolve { kind, source }),
        };

        let items = match access.list(&resource).await {
            Ok(items) => items,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(source) => return Err(SnapshotError::List { kind, source }),
        };
        debug!(kind = %kind, count = items.len(), "Listed objects");

        let types = TypeMeta {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
        };
        objects.extend(items.into_iter().map(|mut obj| {
            obj.types.get_or_insert_with(|| types.clone());
            obj
        }));
    }
    info!(count = objects.len(), "Loaded world snapshot");
    Ok(objects)
}

/// A populate-once holder for the world snapshot.
///
/// Clones share the same snapshot. Create one per process and pass it to
/// every simulator; tests create a fresh one each.
#[derive(Clone, Default)]
pub struct SnapshotCache {
    cell: Arc<OnceCell<Arc<Vec<DynamicObject>>>>,
}

impl SnapshotCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The snapshot, if it has been loaded.
    #[must_use]
    pub fn get(&self) -> Option<Arc<Vec<DynamicObject>>> {
        self.cell.get().map(Arc::clone)
    }

    /// Whether the snapshot has been loaded.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.cell.initialized()
    }

    /// Return the snapshot, loading it on first use.
    ///
    /// Concurrent first callers wait for a single load. A failed load leaves
    /// the cache empty.
    ///
    /// # Errors
    ///
    /// Returns the error of [`load_world`].
    pub async fn get_or_load(
        &self,
        access: &dyn ClusterAccess,
        kinds: &[ObjectKind],
    ) -> Result<Arc<Vec<DynamicObject>>, SnapshotError> {
        self.cell
            .get_or_try_init(|| async { load_world(access, kinds).await.map(Arc::new) })
            .await
            .map(Arc::clone)
    }
}

/// An in-memory cluster for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// A cluster serving a fixed set of objects.
    #[derive(Default)]
    pub struct MockClusterAccess {
        objects: BTreeMap<ObjectKind, Vec<DynamicObject>>,
        unserved: BTreeSet<ObjectKind>,
        broken: BTreeSet<ObjectKind>,
        list_calls: AtomicUsize,
    }

    impl MockClusterAccess {
        /// A cluster serving every kind with no objects.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a typed object.
        ///
        /// # Panics
        ///
        /// Panics if the object does not serialize.
        #[must_use]
        pub fn with_object<K>(mut self, obj: &K) -> Self
        where
            K: kube::Resource<DynamicType = ()> + serde::Serialize,
        {
            let value = serde_json::to_value(obj).expect("serializable object");
            let dynamic: DynamicObject =
                serde_json::from_value(value).expect("object decodes as dynamic");
            let kind = ObjectKind::from_api_version(&K::api_version(&()), &K::kind(&()))
                .expect("supported kind");
            self.objects.entry(kind).or_default().push(dynamic);
            self
        }

        /// Make the cluster report a kind as not served.
        #[must_use]
        pub fn without_kind(mut self, kind: ObjectKind) -> Self {
            self.unserved.insert(kind);
            self
        }

        /// Make resolving a kind fail.
        #[must_use]
        pub fn with_broken_kind(mut self, kind: ObjectKind) -> Self {
            self.broken.insert(kind);
            self
        }

        /// Number of list requests served.
        #[must_use]
        pub fn list_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ClusterAccess for MockClusterAccess {
        async fn resolve(&self, kind: ObjectKind) -> Result<ApiResource, AccessError> {
            if self.unserved.contains(&kind) {
                return Err(AccessError::NotFound(kind.to_string()));
            }
            if self.broken.contains(&kind) {
                return Err(AccessError::Other(format!("discovery failed for {kind}")));
            }
            Ok(ApiResource::from_gvk(&GroupVersionKind::gvk(
                kind.group(),
                kind.version(),
                kind.name(),
            )))
        }

        async fn list(&self, resource: &ApiResource) -> Result<Vec<DynamicObject>, AccessError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let kind = ObjectKind::from_api_version(&resource.api_version, &resource.kind)
                .ok_or_else(|| AccessError::NotFound(resource.kind.clone()))?;
            Ok(self
                .objects
                .get(&kind)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|mut obj| {
                    // List items come back without type information.
                    obj.types = None;
                    obj
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockClusterAccess;
    use super::*;
    use k8s_openapi::api::core::v1::{Node, Pod};

    fn node(name: &str) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node
    }

    fn pod(name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod
    }

    #[tokio::test]
    async fn loads_every_served_kind() {
        let access = MockClusterAccess::new()
            .with_object(&node("node-a"))
            .with_object(&pod("web-0"))
            .without_kind(ObjectKind::CsiStorageCapacity);

        let objects = load_world(&access, &ObjectKind::ALL).await.unwrap();
        assert_eq!(objects.len(), 2);
        assert!(objects.iter().all(|o| o.types.is_some()));
        assert_eq!(access.list_calls(), ObjectKind::ALL.len() - 1);
    }

    #[tokio::test]
    async fn resolution_failure_is_fatal() {
        let access = MockClusterAccess::new().with_broken_kind(ObjectKind::Node);
        let err = load_world(&access, &ObjectKind::ALL).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, SnapshotError::Resolve { kind: ObjectKind::Node, .. }));
    }

    #[tokio::test]
    async fn cache_lists_once() {
        let access = MockClusterAccess::new().with_object(&node("node-a"));
        let cache = SnapshotCache::new();
        assert!(!cache.is_populated());

        let first = cache.get_or_load(&access, &[ObjectKind::Node]).await.unwrap();
        let second = cache.clone().get_or_load(&access, &[ObjectKind::Node]).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(access.list_calls(), 1);
        assert!(cache.is_populated());
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() {
        let broken = MockClusterAccess::new().with_broken_kind(ObjectKind::Node);
        let cache = SnapshotCache::new();
        assert!(cache.get_or_load(&broken, &[ObjectKind::Node]).await.is_err());
        assert!(cache.get().is_none());

        let healthy = MockClusterAccess::new().with_object(&node("node-a"));
        let objects = cache.get_or_load(&healthy, &[ObjectKind::Node]).await.unwrap();
        assert_eq!(objects.len(), 1);
    }
}
