//! Error types for the simulation framework.
//!
//! [`SimulatorError`] is what the orchestrator returns. Snapshot loading,
//! cluster access and object decoding have their own enums so callers can
//! classify failures without matching on strings.

use std::path::PathBuf;

use kluster_sim_core::ObjectKind;
use thiserror::Error;

use crate::lifecycle::SimulatorState;

/// A result type using `SimulatorError`.
pub type Result<T> = std::result::Result<T, SimulatorError>;

/// Errors returned by the simulator.
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// The scheduling engine could not be built.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] kluster_sim_scheduler::SchedulerError),

    /// The isolated store rejected a write.
    #[error("store error: {0}")]
    Store(#[from] kluster_sim_store::StoreError),

    /// The world snapshot could not be loaded.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// A snapshot object could not be decoded.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// An explicit world object was not concretely typed.
    #[error("objects used to init the world must be typed, got untyped {0}")]
    UntypedObject(String),

    /// The world was requested from the cluster but no access was configured.
    #[error("no cluster access configured to snapshot the world")]
    NoClusterAccess,

    /// The requested lifecycle transition is not allowed.
    #[error("cannot transition simulator from {from} to {to}")]
    InvalidTransition {
        /// The current state.
        from: SimulatorState,
        /// The requested state.
        to: SimulatorState,
    },

    /// A pod template has no name to derive replica names from.
    #[error("pod template must have a name")]
    UnnamedTemplate,

    /// The scheduler cache has no entry for a node.
    #[error("cannot get pods on node {0}: no cache snapshot for it")]
    NoCacheSnapshot(String),

    /// The status could not be encoded.
    #[error("failed to encode status: {0}")]
    Encode(#[from] serde_json::Error),

    /// The status could not be written.
    #[error("failed to save status to {path}: {source}")]
    Persist {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors from loading the world snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// A kind's resource path could not be resolved for a reason other than
    /// the resource not existing.
    #[error("unable to resolve resource for {kind}: {source}")]
    Resolve {
        /// Kind being resolved.
        kind: ObjectKind,
        /// Access failure.
        #[source]
        source: AccessError,
    },

    /// Listing a kind failed.
    #[error("unable to list {kind}: {source}")]
    List {
        /// Kind being listed.
        kind: ObjectKind,
        /// Access failure.
        #[source]
        source: AccessError,
    },
}

impl SnapshotError {
    /// Whether the snapshot cannot be trusted at all and the process should
    /// not continue.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Resolve { .. })
    }
}

/// Errors from the real cluster.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The resource or object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A Kubernetes client error.
    #[error("kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl AccessError {
    /// Whether this error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<kube::Error> for AccessError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound(response.message),
            kube::Error::Discovery(e) => Self::NotFound(e.to_string()),
            other => Self::Kube(other),
        }
    }
}

/// Errors from decoding untyped objects.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The object carries no `apiVersion`/`kind`.
    #[error("object {0} has no type information")]
    MissingTypeMeta(String),

    /// The object's group/version/kind is not a known kind.
    #[error("unknown kind {kind} in {api_version}")]
    UnknownKind {
        /// The object's `apiVersion`.
        api_version: String,
        /// The object's `kind`.
        kind: String,
    },

    /// A known kind has no decoder.
    #[error("no decoder registered for {0}")]
    Unregistered(ObjectKind),

    /// Decoding into the typed resource failed.
    #[error("failed to decode {kind} {name}: {source}")]
    Decode {
        /// Target kind.
        kind: ObjectKind,
        /// Object name.
        name: String,
        /// Decode failure.
        #[source]
        source: serde_json::Error,
    },
}
