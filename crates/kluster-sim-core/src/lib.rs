//! Core types and utilities for kluster-sim.
//!
//! This crate provides the foundational types shared by the isolated store,
//! the scheduling engine and the simulation orchestrator:
//!
//! - **Kinds and identity**: [`ObjectKind`] and [`ObjectKey`] identify every
//!   object held by the isolated store
//! - **Objects**: [`ClusterObject`] is the typed sum over the resources a
//!   simulation imports from a real cluster
//! - **Status**: [`Status`] accumulates the outcome of a simulation run
//! - **Signals**: [`StopSignal`] is a one-shot, closable lifecycle signal
//!
//! # Example
//!
//! ```
//! use k8s_openapi::api::core::v1::Node;
//! use kluster_sim_core::{ClusterObject, ObjectKind};
//!
//! let mut node = Node::default();
//! node.metadata.name = Some("node-a".to_string());
//!
//! let obj = ClusterObject::from(node);
//! assert_eq!(obj.kind(), ObjectKind::Node);
//! assert_eq!(obj.key().to_string(), "Node/node-a");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod kind;
pub mod object;
pub mod signal;
pub mod status;

pub use error::{CoreError, Result};
pub use kind::{ObjectKey, ObjectKind};
pub use object::{pod_key, ClusterObject};
pub use signal::StopSignal;
pub use status::Status;
