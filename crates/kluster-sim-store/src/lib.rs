//! Isolated cluster store for kluster-sim.
//!
//! This crate provides the in-memory object store a simulation schedules
//! against, plus the informer layer the scheduler uses to observe it.
//!
//! # Architecture
//!
//! - [`ObjectTracker`]: create/get/update/delete/list/watch over typed
//!   cluster objects, with a monotonically increasing resource version
//! - [`SharedInformer`]: list-then-watch view of one kind with event handlers
//! - [`InformerFactory`]: one informer per kind, started and synced together
//!
//! # Example
//!
//! ```
//! use k8s_openapi::api::core::v1::Pod;
//! use kluster_sim_store::ObjectTracker;
//!
//! let tracker = ObjectTracker::new();
//! let mut pod = Pod::default();
//! pod.metadata.name = Some("web-0".to_string());
//! tracker.create_pod(pod).unwrap();
//!
//! assert!(tracker.get_pod("default", "web-0").is_ok());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod informer;
pub mod tracker;

pub use error::{Result, StoreError};
pub use informer::{InformerFactory, ListWatch, ObjectFilter, ResourceEventHandler, SharedInformer};
pub use tracker::{ObjectTracker, WatchEvent, WatchReceiver};
