//! Pluggable pod scheduling engine for kluster-sim.
//!
//! This crate provides the [`Scheduler`] that places pending pods held in a
//! [`kluster_sim_store::ObjectTracker`] onto its nodes. It handles:
//!
//! - Plugin profiles with filter, score, pre-bind, bind and post-bind
//!   extension points, built from a [`Registry`] of named factories
//! - A scheduler cache of node capacity and assigned or assumed pods
//! - A de-duplicated pending queue with exponential per-pod backoff
//! - HTTP extenders consulted after in-tree filtering and scoring
//! - `Scheduled` / `FailedScheduling` events through an [`EventRecorder`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     ObjectTracker + informers                   │
//! └─────────────────────────────────────────────────────────────────┘
//!                   │ pods                      │ nodes
//!                   ▼                           ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Scheduler                              │
//! │  ┌─────────────┐    ┌──────────────────┐    ┌──────────────┐    │
//! │  │ Scheduling  │───▶│    Framework     │───▶│  Extenders   │    │
//! │  │ Queue       │    │ filter / score   │    │  (HTTP)      │    │
//! │  └─────────────┘    └──────────────────┘    └──────────────┘    │
//! │         ▲                    │                                  │
//! │         │ backoff            ▼ assume                           │
//! │         │           ┌──────────────────┐                        │
//! │         └───────────│  SchedulerCache  │                        │
//! │                     └──────────────────┘                        │
//! │                              │ pre-bind / bind / post-bind      │
//! └─────────────────────────────────────────────────────────────────┘
//!                                ▼
//!                       ObjectTracker (spec.nodeName)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kluster_sim_core::StopSignal;
//! use kluster_sim_scheduler::{Registry, Scheduler, SchedulerConfig, TracingRecorder};
//! use kluster_sim_store::{InformerFactory, ObjectTracker};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(ObjectTracker::new());
//! let informers = Arc::new(InformerFactory::new(Arc::clone(&store)));
//! let scheduler = Scheduler::new(
//!     Arc::clone(&store),
//!     &informers,
//!     &TracingRecorder::factory(),
//!     SchedulerConfig::default(),
//!     &Registry::new(),
//! )?;
//!
//! let stop = StopSignal::new("scheduler");
//! informers.start(&stop);
//! informers.wait_for_cache_sync(&stop).await;
//! tokio::spawn(Arc::clone(&scheduler).run(stop.clone()));
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature to record events in memory with
//! [`MemoryRecorder`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod extender;
pub mod framework;
pub mod plugins;
pub mod queue;
pub mod registry;
pub mod resource;
pub mod scheduler;

pub use cache::{NodeInfo, SchedulerCache};
pub use config::{
    ExtenderConfig, PluginConfig, PluginRef, PluginSet, Plugins, Profile, SchedulerConfig,
    ALL_PLUGINS, DEFAULT_SCHEDULER_NAME,
};
pub use error::{Result, SchedulerError};
pub use events::{EventRecorder, EventType, RecorderFactory, TracingRecorder};
pub use extender::{Extender, HttpExtender};
pub use framework::{
    BindPlugin, Code, CycleState, FilterPlugin, Framework, FrameworkHandle, Plugin,
    PluginStatus, PostBindPlugin, PreBindPlugin, ScorePlugin,
};
pub use plugins::names;
pub use registry::{PluginFactory, Registry};
pub use scheduler::Scheduler;

#[cfg(any(test, feature = "test-utils"))]
pub use events::mock::{MemoryRecorder, RecordedEvent};
