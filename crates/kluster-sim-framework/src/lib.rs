//! Scheduling simulation orchestrator for kluster-sim.
//!
//! This crate replays a cluster into an isolated store and drives the
//! scheduler against it. No pod is placed on real infrastructure. It covers:
//!
//! - **Snapshot**: [`load_world`] lists the cluster once per [`SnapshotCache`]
//! - **Catalog**: [`ResourceCatalog`] decodes untyped objects per kind
//! - **Sanitizer**: [`SanitizePolicy`] filters and rewrites imported objects
//! - **Virtual binding**: [`VirtualBinder`] binds pods inside the store
//! - **Orchestration**: [`GenericSimulator`] runs and stops the simulation
//!   and captures its [`Status`](kluster_sim_core::Status)
//! - **Capacity estimation**: [`CapacityEstimation`] counts how many
//!   replicas of a pod still fit
//! - **Cluster compression**: [`ClusterCompression`] finds nodes that can be
//!   removed without stranding pods
//!
//! # Architecture
//!
//! ```text
//!  real cluster ──▶ SnapshotCache ──▶ ResourceCatalog ──▶ SanitizePolicy
//!                                                              │
//!                                                              ▼
//!  ┌──────────────────────────────────────────────────────────────────┐
//!  │                        GenericSimulator                          │
//!  │   ObjectTracker ◀──── informers ────▶ Scheduler                  │
//!  │         ▲                                 │ pre-bind/bind/post-bind
//!  │         └──────────── VirtualBinder ◀─────┘                      │
//!  │                            │ post-bind hook                      │
//!  └────────────────────────────┼─────────────────────────────────────┘
//!                               ▼
//!                       caller (Status, report)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kluster_sim_framework::{
//!     GenericSimulator, KubeClusterAccess, Simulation, SimulatorOptions,
//! };
//! use kluster_sim_scheduler::SchedulerConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let access = Arc::new(KubeClusterAccess::try_default().await?);
//! let sim = GenericSimulator::new(
//!     SchedulerConfig::default(),
//!     SimulatorOptions::new()
//!         .with_cluster_access(access)
//!         .with_scheduled_pods(false),
//! )?;
//!
//! sim.init_the_world(Vec::new()).await?;
//! let runner = {
//!     let sim = Arc::clone(&sim);
//!     tokio::spawn(async move { sim.run().await })
//! };
//! // ... wait for pods to be bound ...
//! sim.stop("done")?;
//! runner.await??;
//! println!("{}", serde_json::to_string_pretty(&sim.status())?);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod binder;
pub mod catalog;
pub mod compression;
pub mod error;
pub mod estimation;
pub mod lifecycle;
pub mod options;
pub mod outcome;
pub mod sanitize;
pub mod simulator;
pub mod snapshot;

pub use binder::{HookError, PostBindHook, VirtualBinder, VIRTUAL_BINDER};
pub use catalog::ResourceCatalog;
pub use compression::ClusterCompression;
pub use error::{AccessError, CatalogError, Result, SimulatorError, SnapshotError};
pub use estimation::{CapacityEstimation, DEFAULT_STEP_TIMEOUT};
pub use lifecycle::{is_valid_transition, validate_transition, SimulatorState};
pub use options::SimulatorOptions;
pub use outcome::{watch_outcomes, Outcome, OutcomeReceiver};
pub use sanitize::SanitizePolicy;
pub use simulator::{GenericSimulator, InitObject, Simulation, SimulationReport};
pub use snapshot::{load_world, ClusterAccess, KubeClusterAccess, SnapshotCache};

#[cfg(any(test, feature = "test-utils"))]
pub use snapshot::mock::MockClusterAccess;
