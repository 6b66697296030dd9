//! kluster-sim - scheduling simulations against a snapshot of a live cluster.
//!
//! This is the entry point for the `kluster-sim` binary.

mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use k8s_openapi::api::core::v1::Pod;
use kluster_sim_framework::{
    CapacityEstimation, ClusterCompression, GenericSimulator, HookError, KubeClusterAccess,
    PostBindHook, Simulation, SimulatorError, SimulatorOptions,
};
use kluster_sim_scheduler::SchedulerConfig;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use report::Report;

/// Scheduling simulations against a snapshot of a live cluster.
#[derive(Parser, Debug)]
#[command(name = "kluster-sim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Schedule the cluster's pending pods in an isolated copy of the cluster.
    Ss(SchedulerSimulationArgs),
    /// Estimate how many more replicas of a pod the cluster can take.
    Ce(CapacityEstimationArgs),
    /// Find nodes that can be removed without leaving pods unscheduled.
    Cc(ClusterCompressionArgs),
}

/// How the cluster is copied into the simulation.
#[derive(Args, Debug)]
struct WorldArgs {
    /// Scheduler configuration file (YAML or JSON).
    #[arg(long, env = "KLUSTER_SIM_SCHEDULER_CONFIG")]
    scheduler_config: Option<PathBuf>,

    /// Nodes to leave out of the simulation.
    #[arg(long, value_delimiter = ',')]
    exclude_nodes: Vec<String>,

    /// Keep the cluster's existing pod assignments.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    with_scheduled_pods: bool,

    /// Keep node image inventories.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    with_node_images: bool,

    /// Keep plain pods on excluded nodes and drop DaemonSet pods there.
    #[arg(long)]
    ignore_pods_on_excluded_nodes: bool,

    /// Save the raw simulation status as JSON to this file.
    #[arg(long, env = "KLUSTER_SIM_SAVE_TO")]
    save_to: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SchedulerSimulationArgs {
    #[command(flatten)]
    world: WorldArgs,

    /// Stop after this many seconds even if pods are still pending.
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

#[derive(Args, Debug)]
struct CapacityEstimationArgs {
    #[command(flatten)]
    world: WorldArgs,

    /// Pod to replicate (YAML or JSON).
    #[arg(long)]
    pod_template: PathBuf,

    /// Stop after this many replicas. Zero means no limit.
    #[arg(long, default_value_t = 0)]
    max_limit: usize,

    /// Seconds to wait for each replica to be scheduled.
    #[arg(long, default_value_t = 10)]
    step_timeout: u64,
}

#[derive(Args, Debug)]
struct ClusterCompressionArgs {
    #[command(flatten)]
    world: WorldArgs,

    /// Stop after this many removable nodes. Zero means no limit.
    #[arg(long, default_value_t = 0)]
    max_limit: usize,

    /// Seconds to wait for one node's pods to be rescheduled.
    #[arg(long, default_value_t = 10)]
    step_timeout: u64,
}

impl WorldArgs {
    fn scheduler_config(&self) -> anyhow::Result<SchedulerConfig> {
        match &self.scheduler_config {
            Some(path) => SchedulerConfig::from_file(path)
                .with_context(|| format!("failed to load scheduler config {}", path.display())),
            None => Ok(SchedulerConfig::default()),
        }
    }

    /// Options for simulators built from the current cluster.
    async fn options(&self) -> anyhow::Result<SimulatorOptions> {
        let access = KubeClusterAccess::try_default()
            .await
            .context("failed to connect to the cluster")?;
        let mut options = SimulatorOptions::new()
            .with_cluster_access(Arc::new(access))
            .with_exclude_nodes(self.exclude_nodes.iter().cloned())
            .with_scheduled_pods(self.with_scheduled_pods)
            .with_node_images(self.with_node_images)
            .with_ignore_pods_on_excluded_nodes(self.ignore_pods_on_excluded_nodes);
        if let Some(path) = &self.save_to {
            options = options.with_save_to(path);
        }
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kluster_sim=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let report = match cli.command {
        Command::Ss(args) => scheduler_simulation(args).await?,
        Command::Ce(args) => capacity_estimation(args).await?,
        Command::Cc(args) => cluster_compression(args).await?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn log_fatal(e: &SimulatorError) {
    if let SimulatorError::Snapshot(snapshot) = e {
        if snapshot.is_fatal() {
            tracing::error!(error = %snapshot, "Cluster snapshot is unusable");
        }
    }
}

fn load_pod_template(path: &Path) -> anyhow::Result<Pod> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read pod template {}", path.display()))?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse pod template {}", path.display()))
}

async fn scheduler_simulation(args: SchedulerSimulationArgs) -> anyhow::Result<Report> {
    let config = args.world.scheduler_config()?;

    let (tx, mut bound) = mpsc::unbounded_channel::<Pod>();
    let hook: PostBindHook = Arc::new(move |pod: &Pod| -> Result<(), HookError> {
        tx.send(pod.clone())?;
        Ok(())
    });
    let options = args.world.options().await?.with_post_bind_hook(hook);

    let sim = GenericSimulator::new(config, options)?;
    if let Err(e) = sim.init_the_world(Vec::new()).await {
        log_fatal(&e);
        sim.abort("failed to initialize the world");
        return Err(e.into());
    }

    let pending = sim
        .store()
        .list_pods()
        .iter()
        .filter(|p| sim.scheduler().is_pending_for(p))
        .count();
    tracing::info!(pending, "Starting scheduler simulation");
    let runner = sim.spawn();

    let deadline = tokio::time::sleep(Duration::from_secs(args.timeout));
    tokio::pin!(deadline);
    let mut scheduled = Vec::new();
    let reason = loop {
        if scheduled.len() >= pending {
            break "all pending pods scheduled".to_string();
        }
        tokio::select! {
            () = &mut deadline => break format!("timed out after {}s", args.timeout),
            _ = tokio::signal::ctrl_c() => break "interrupted".to_string(),
            pod = bound.recv() => match pod {
                Some(pod) => scheduled.push(pod),
                None => break "post-bind hook closed".to_string(),
            },
        }
    };

    sim.update_scheduled_pods(scheduled);
    let finished = sim.shut_down(runner, &reason).await?;
    Ok(Report::new(&finished.status, &finished.pods))
}

async fn capacity_estimation(args: CapacityEstimationArgs) -> anyhow::Result<Report> {
    let config = args.world.scheduler_config()?;
    let template = load_pod_template(&args.pod_template)?;
    let estimation = CapacityEstimation::new(config, args.world.options().await?)
        .with_max_limit(args.max_limit)
        .with_step_timeout(Duration::from_secs(args.step_timeout));

    let finished = estimation
        .estimate(Vec::new(), &template)
        .await
        .inspect_err(log_fatal)?;
    Ok(Report::new(&finished.status, &finished.pods))
}

async fn cluster_compression(args: ClusterCompressionArgs) -> anyhow::Result<Report> {
    let config = args.world.scheduler_config()?;
    let compression = ClusterCompression::new(config, args.world.options().await?)
        .with_max_limit(args.max_limit)
        .with_step_timeout(Duration::from_secs(args.step_timeout));

    let finished = compression
        .compress(Vec::new())
        .await
        .inspect_err(log_fatal)?;
    Ok(Report::new(&finished.status, &finished.pods))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_scheduler_simulation_flags() {
        let cli = Cli::try_parse_from([
            "kluster-sim",
            "ss",
            "--exclude-nodes",
            "node-a,node-b",
            "--with-scheduled-pods",
            "false",
            "--timeout",
            "5",
        ])
        .unwrap();
        let Command::Ss(args) = cli.command else {
            panic!("expected ss");
        };
        assert_eq!(args.world.exclude_nodes, vec!["node-a", "node-b"]);
        assert!(!args.world.with_scheduled_pods);
        assert!(args.world.with_node_images);
        assert!(!args.world.ignore_pods_on_excluded_nodes);
        assert_eq!(args.timeout, 5);
    }

    #[test]
    fn parses_capacity_estimation_flags() {
        let cli = Cli::try_parse_from([
            "kluster-sim",
            "ce",
            "--pod-template",
            "web.yaml",
            "--max-limit",
            "20",
        ])
        .unwrap();
        let Command::Ce(args) = cli.command else {
            panic!("expected ce");
        };
        assert_eq!(args.pod_template, PathBuf::from("web.yaml"));
        assert_eq!(args.max_limit, 20);
        assert_eq!(args.step_timeout, 10);
        assert!(args.world.with_scheduled_pods);
    }

    #[test]
    fn capacity_estimation_needs_a_template() {
        assert!(Cli::try_parse_from(["kluster-sim", "ce"]).is_err());
    }

    #[test]
    fn parses_cluster_compression_flags() {
        let cli = Cli::try_parse_from([
            "kluster-sim",
            "cc",
            "--max-limit",
            "2",
            "--exclude-nodes",
            "master-0",
        ])
        .unwrap();
        let Command::Cc(args) = cli.command else {
            panic!("expected cc");
        };
        assert_eq!(args.max_limit, 2);
        assert_eq!(args.world.exclude_nodes, vec!["master-0"]);
    }

    #[test]
    fn pod_template_loads_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.yaml");
        std::fs::write(
            &path,
            "apiVersion: v1\nkind: Pod\nmetadata:\n  name: web\nspec:\n  containers:\n  - name: app\n    image: nginx\n",
        )
        .unwrap();
        let pod = load_pod_template(&path).unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("web"));
        assert_eq!(pod.spec.unwrap().containers[0].name, "app");
        assert!(load_pod_template(&dir.path().join("missing.yaml")).is_err());
    }
}
