//! Capacity estimation.
//!
//! [`CapacityEstimation`] keeps creating replicas of a pod template in an
//! isolated copy of the cluster until one cannot be scheduled, then reports
//! how many fit.

use std::collections::BTreeSet;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kluster_sim_core::pod_key;
use kluster_sim_scheduler::SchedulerConfig;
use tracing::{debug, info};

use crate::error::{Result, SimulatorError};
use crate::options::SimulatorOptions;
use crate::outcome::{await_pods, watch_outcomes, Settled};
use crate::sanitize::reset_pod;
use crate::simulator::{GenericSimulator, InitObject, Simulation, SimulationReport};

/// How long to wait for one pod to be scheduled before giving up.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_NAMESPACE: &str = "default";

/// Estimates how many replicas of a pod the cluster can still take.
#[derive(Clone)]
pub struct CapacityEstimation {
    config: SchedulerConfig,
    options: SimulatorOptions,
    max_limit: usize,
    step_timeout: Duration,
}

impl CapacityEstimation {
    /// Estimate with `config` and simulators built from `options`.
    #[must_use]
    pub fn new(config: SchedulerConfig, options: SimulatorOptions) -> Self {
        Self {
            config,
            options,
            max_limit: 0,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Stop after this many replicas. Zero means no limit.
    #[must_use]
    pub fn with_max_limit(mut self, limit: usize) -> Self {
        self.max_limit = limit;
        self
    }

    /// How long to wait for each replica.
    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Schedule replicas of `template` until one fails, the limit is hit or
    /// a replica times out.
    ///
    /// `world` is passed to [`Simulation::init_the_world`]; leave it empty to
    /// use the cluster snapshot. The template is recorded as the estimation
    /// pod, and the bound replicas as the scheduled pods.
    ///
    /// # Errors
    ///
    /// Returns an error if the template has no name, or the simulator cannot
    /// be built, initialized or stopped.
    pub async fn estimate(
        &self,
        world: Vec<InitObject>,
        template: &Pod,
    ) -> Result<SimulationReport> {
        let name = template
            .metadata
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or(SimulatorError::UnnamedTemplate)?;

        let (options, mut outcomes) = watch_outcomes(self.options.clone());
        let sim = GenericSimulator::new(self.config.clone(), options)?;
        if let Err(e) = sim.init_the_world(world).await {
            sim.abort("failed to initialize the world");
            return Err(e);
        }
        sim.update_estimation_pods(vec![template.clone()]);
        let runner = sim.spawn();

        let mut replicas = Vec::new();
        let reason = loop {
            if self.max_limit > 0 && replicas.len() >= self.max_limit {
                break format!("reached the limit of {} replicas", self.max_limit);
            }
            let replica = replica_of(template, name, replicas.len());
            let key = pod_key(&replica);
            if let Err(e) = sim.create_pod(replica) {
                break format!("failed to create replica {key}: {e}");
            }
            debug!(pod = %key, "Created replica");

            match await_pods(&mut outcomes, BTreeSet::from([key.clone()]), self.step_timeout).await
            {
                Settled::Bound(mut bound) => replicas.append(&mut bound),
                Settled::Failed { pod, message } => {
                    break format!("failed to schedule {pod}: {message}");
                }
                Settled::TimedOut => break format!("timed out waiting for {key} to be scheduled"),
                Settled::Closed => break "scheduling outcomes stopped arriving".to_string(),
            }
        };

        info!(
            template = %name,
            replicas = replicas.len(),
            reason = %reason,
            "Capacity estimation finished"
        );
        sim.update_scheduled_pods(replicas);
        sim.shut_down(runner, &reason).await
    }
}

/// The `index`th pending copy of `template`.
fn replica_of(template: &Pod, name: &str, index: usize) -> Pod {
    let mut pod = template.clone();
    reset_pod(&mut pod);
    let meta = &mut pod.metadata;
    meta.name = Some(format!("{name}-{index}"));
    meta.namespace = Some(
        template
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
    );
    meta.generate_name = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    pod
}
