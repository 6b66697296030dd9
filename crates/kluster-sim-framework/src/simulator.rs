//! The simulator orchestrator.
//!
//! [`GenericSimulator`] owns an isolated store, its informers and a
//! [`Scheduler`] whose profile binds through the [`VirtualBinder`]. The
//! lifecycle follows [`SimulatorState`]: the world is loaded, [`run`] blocks
//! until [`stop`] releases it, and stop captures the final [`Status`].
//!
//! [`run`]: Simulation::run
//! [`stop`]: Simulation::stop

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::core::DynamicObject;
use kluster_sim_core::{ClusterObject, ObjectKind, Status, StopSignal};
use kluster_sim_scheduler::{names, Scheduler, SchedulerConfig};
use kluster_sim_store::{InformerFactory, ObjectTracker};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::binder::{VirtualBinder, VIRTUAL_BINDER};
use crate::catalog::ResourceCatalog;
use crate::error::{Result, SimulatorError};
use crate::lifecycle::{validate_transition, SimulatorState};
use crate::options::SimulatorOptions;
use crate::sanitize::SanitizePolicy;
use crate::snapshot::{ClusterAccess, SnapshotCache};

// =============================================================================
// Simulation trait
// =============================================================================

/// An object handed to [`Simulation::init_the_world`].
#[derive(Debug, Clone)]
pub enum InitObject {
    /// A concretely typed object.
    Typed(ClusterObject),
    /// An untyped object. Rejected by `init_the_world`.
    Untyped(DynamicObject),
}

impl From<ClusterObject> for InitObject {
    fn from(obj: ClusterObject) -> Self {
        Self::Typed(obj)
    }
}

impl From<DynamicObject> for InitObject {
    fn from(obj: DynamicObject) -> Self {
        Self::Untyped(obj)
    }
}

/// A scheduling simulation.
#[async_trait]
pub trait Simulation: Send + Sync {
    /// Wait for the informers to sync, start the scheduler and block until
    /// the simulation is stopped.
    ///
    /// Returns immediately if the simulation was already stopped.
    ///
    /// # Errors
    ///
    /// Returns `SimulatorError::InvalidTransition` if the simulation is
    /// already running.
    async fn run(&self) -> Result<()>;

    /// Populate the isolated store.
    ///
    /// With objects, each must be typed and is sanitized before insertion.
    /// Without objects, the cluster snapshot is loaded (at most once per
    /// [`SnapshotCache`]), decoded, sanitized and inserted.
    ///
    /// A failed call may leave some objects inserted; discard the simulator.
    ///
    /// # Errors
    ///
    /// Returns an error if an object is untyped, the snapshot cannot be
    /// loaded or decoded, an insertion conflicts, or the simulation is
    /// already running or stopped.
    async fn init_the_world(&self, objects: Vec<InitObject>) -> Result<()>;

    /// Create a pod in the isolated store.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod has no name or already exists.
    fn create_pod(&self, pod: Pod) -> Result<Pod>;

    /// Record pods scheduled during the run.
    fn update_scheduled_pods(&self, pods: Vec<Pod>);

    /// Record pods pending capacity evaluation.
    fn update_estimation_pods(&self, pods: Vec<Pod>);

    /// Record a node recommended for removal.
    fn update_nodes_to_scale_down(&self, node_name: &str);

    /// A copy of the current status.
    fn status(&self) -> Status;

    /// Pods the scheduler cache holds on a node.
    ///
    /// # Errors
    ///
    /// Returns `SimulatorError::NoCacheSnapshot` if the cache has no entry
    /// for the node.
    fn get_pods_by_node(&self, node_name: &str) -> Result<Vec<Pod>>;

    /// Stop the simulation. A second call returns `Ok(())` and does nothing.
    ///
    /// Captures the node inventory and `reason`, saves the status if a path
    /// is configured, and releases every lifecycle signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be saved. Signals are released
    /// regardless.
    fn stop(&self, reason: &str) -> Result<()>;
}

/// Final state of a stopped simulation.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// The captured status.
    pub status: Status,
    /// Every pod left in the isolated store.
    pub pods: Vec<Pod>,
}

// =============================================================================
// GenericSimulator
// =============================================================================

/// A [`Simulation`] over an isolated in-memory store.
pub struct GenericSimulator {
    store: Arc<ObjectTracker>,
    informers: Arc<InformerFactory>,
    scheduler: Arc<Scheduler>,
    catalog: ResourceCatalog,
    policy: SanitizePolicy,
    save_to: Option<PathBuf>,
    cluster_access: Option<Arc<dyn ClusterAccess>>,
    snapshot_cache: SnapshotCache,
    state: Mutex<SimulatorState>,
    status: Mutex<Status>,
    simulator_stop: StopSignal,
    informer_stop: StopSignal,
    scheduler_stop: StopSignal,
}

impl GenericSimulator {
    /// Build a simulator and start its informers.
    ///
    /// The first profile of `config` gets the virtual binder at pre-bind,
    /// bind and post-bind, with the default binder, volume binding and
    /// default preemption disabled. Custom plugin sets from `options` are
    /// appended after that.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler cannot be built or an out-of-tree
    /// plugin is named like the virtual binder.
    pub fn new(mut config: SchedulerConfig, options: SimulatorOptions) -> Result<Arc<Self>> {
        let catalog = ResourceCatalog::new();
        catalog.verify(&ObjectKind::ALL)?;

        let store = Arc::new(ObjectTracker::new());
        let informers = Arc::new(InformerFactory::new(Arc::clone(&store)));

        patch_profile(&mut config, &options);
        let mut registry = options.out_of_tree_registry.clone();
        VirtualBinder::register(&mut registry, options.post_bind_hook.clone())?;

        let scheduler = Scheduler::new(
            Arc::clone(&store),
            &informers,
            &options.recorder_factory,
            config,
            &registry,
        )?;

        for (kind, handler) in options.custom_event_handlers {
            informers.informer_for(kind).add_event_handler(handler);
        }

        let informer_stop = StopSignal::new("informer");
        informers.start(&informer_stop);
        debug!("Started simulator informers");

        Ok(Arc::new(Self {
            store,
            informers,
            scheduler,
            catalog,
            policy: options.policy,
            save_to: options.save_to,
            cluster_access: options.cluster_access,
            snapshot_cache: options.snapshot_cache,
            state: Mutex::new(SimulatorState::Constructed),
            status: Mutex::new(Status::default()),
            simulator_stop: StopSignal::new("simulator"),
            informer_stop,
            scheduler_stop: StopSignal::new("scheduler"),
        }))
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SimulatorState {
        *self.state.lock()
    }

    /// The isolated store.
    #[must_use]
    pub const fn store(&self) -> &Arc<ObjectTracker> {
        &self.store
    }

    /// The scheduler driving the simulation.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Whether every lifecycle signal has been released.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.simulator_stop.is_closed()
            && self.informer_stop.is_closed()
            && self.scheduler_stop.is_closed()
    }

    /// Run the simulation on a background task.
    #[must_use]
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        let sim = Arc::clone(self);
        tokio::spawn(async move { sim.run().await })
    }

    /// Stop without returning a save error. The error is logged.
    pub fn abort(&self, reason: &str) {
        if let Err(e) = self.stop(reason) {
            warn!(reason, error = %e, "Failed to stop simulation cleanly");
        }
    }

    /// Stop, wait for the task from [`spawn`](Self::spawn) and collect the
    /// final status and pods.
    ///
    /// # Errors
    ///
    /// Returns the run error if the task failed, else the save error from
    /// stop.
    pub async fn shut_down(
        &self,
        runner: JoinHandle<Result<()>>,
        reason: &str,
    ) -> Result<SimulationReport> {
        let stopped = self.stop(reason);
        match runner.await {
            Ok(result) => result?,
            Err(e) => warn!(error = %e, "Simulation task did not finish"),
        }
        stopped?;
        Ok(SimulationReport {
            status: self.status(),
            pods: self.store.list_pods(),
        })
    }

    fn add(&self, obj: ClusterObject) -> Result<()> {
        let key = obj.key();
        match self.policy.sanitize(obj) {
            Some(obj) => {
                self.store.create(obj)?;
            }
            None => debug!(object = %key, "Skipping object"),
        }
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<()> {
        let access = self
            .cluster_access
            .as_deref()
            .ok_or(SimulatorError::NoClusterAccess)?;
        let snapshot = self
            .snapshot_cache
            .get_or_load(access, &ObjectKind::ALL)
            .await?;
        for obj in snapshot.iter() {
            self.add(self.catalog.decode(obj)?)?;
        }
        Ok(())
    }
}

fn patch_profile(config: &mut SchedulerConfig, options: &SimulatorOptions) {
    config.normalize();
    let Some(profile) = config.profiles.first_mut() else {
        return;
    };
    let plugins = &mut profile.plugins;

    plugins.pre_bind.enable(VIRTUAL_BINDER);
    plugins.pre_bind.disable(names::VOLUME_BINDING);
    plugins.bind.enable(VIRTUAL_BINDER);
    plugins.bind.disable(names::DEFAULT_BINDER);
    plugins.post_bind.enable(VIRTUAL_BINDER);
    plugins.post_bind.disable(names::DEFAULT_PREEMPTION);

    if let Some(custom) = &options.custom_pre_bind {
        plugins.pre_bind.append(custom);
    }
    if let Some(custom) = &options.custom_bind {
        plugins.bind.append(custom);
    }
    if let Some(custom) = &options.custom_post_bind {
        plugins.post_bind.append(custom);
    }
}

fn persist(path: &Path, status: &Status) -> Result<()> {
    let encoded = serde_json::to_vec_pretty(status)?;
    std::fs::write(path, encoded).map_err(|source| SimulatorError::Persist {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl Simulation for GenericSimulator {
    async fn run(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == SimulatorState::Stopped {
                return Ok(());
            }
            *state = validate_transition(*state, SimulatorState::Running)?;
        }

        let synced = self.informers.wait_for_cache_sync(&self.informer_stop).await;
        for (kind, ok) in &synced {
            if !ok {
                warn!(kind = %kind, "Informer did not sync before stop");
            }
        }

        info!("Starting simulation");
        tokio::spawn(Arc::clone(&self.scheduler).run(self.scheduler_stop.clone()));
        self.simulator_stop.closed().await;
        Ok(())
    }

    async fn init_the_world(&self, objects: Vec<InitObject>) -> Result<()> {
        let from = self.state();
        validate_transition(from, SimulatorState::WorldInitialized)?;

        if objects.is_empty() {
            self.load_snapshot().await?;
        } else {
            let mut typed = Vec::with_capacity(objects.len());
            for obj in objects {
                match obj {
                    InitObject::Typed(obj) => typed.push(obj),
                    InitObject::Untyped(obj) => {
                        let name = obj.metadata.name.unwrap_or_default();
                        return Err(SimulatorError::UntypedObject(name));
                    }
                }
            }
            for obj in typed {
                self.add(obj)?;
            }
        }

        let mut state = self.state.lock();
        *state = validate_transition(*state, SimulatorState::WorldInitialized)?;
        info!(objects = self.store.len(), "Initialized the world");
        Ok(())
    }

    fn create_pod(&self, pod: Pod) -> Result<Pod> {
        Ok(self.store.create_pod(pod)?)
    }

    fn update_scheduled_pods(&self, pods: Vec<Pod>) {
        self.status.lock().add_scheduled_pods(pods);
    }

    fn update_estimation_pods(&self, pods: Vec<Pod>) {
        self.status.lock().add_estimation_pods(pods);
    }

    fn update_nodes_to_scale_down(&self, node_name: &str) {
        self.status.lock().add_node_to_scale_down(node_name);
    }

    fn status(&self) -> Status {
        self.status.lock().clone()
    }

    fn get_pods_by_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        self.scheduler
            .cache()
            .dump()
            .remove(node_name)
            .ok_or_else(|| SimulatorError::NoCacheSnapshot(node_name.to_string()))
    }

    fn stop(&self, reason: &str) -> Result<()> {
        let mut state = self.state.lock();
        if *state == SimulatorState::Stopped {
            debug!(reason, "Simulator already stopped");
            return Ok(());
        }

        let nodes = self.store.list_nodes();
        let saved = {
            let mut status = self.status.lock();
            status.set_nodes(nodes);
            status.stop_reason = reason.to_string();
            self.save_to
                .as_deref()
                .map_or(Ok(()), |path| persist(path, &status))
        };
        if let Err(e) = &saved {
            warn!(error = %e, "Failed to save simulation status");
        }

        *state = SimulatorState::Stopped;
        for signal in [&self.informer_stop, &self.scheduler_stop, &self.simulator_stop] {
            if let Err(e) = signal.close() {
                warn!(signal = signal.name(), error = %e, "Failed to release signal");
            }
        }
        info!(reason, "Simulation stopped");
        saved
    }
}
