//! The veTES cluster agent binary.
//!
//! Wires the components together and runs the reconcile engine plus the
//! cron jobs until interrupted. The cluster backend is selected here; this
//! build links the in-process backend, production deployments substitute an
//! implementation of [`vetes_agent::cluster::ClusterApi`] for their cluster.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use vetes_agent::accelerate::new_accelerator;
use vetes_agent::capacity::{CapacityReporter, ClusterConfig};
use vetes_agent::cluster::memory::InMemoryCluster;
use vetes_agent::config::AgentConfig;
use vetes_agent::cron::{leader_gate, CronRunner};
use vetes_agent::offload::new_helper;
use vetes_agent::reconciler::runner::TaskRunner;
use vetes_agent::reconciler::ReconcileEngine;
use vetes_agent::store::LocalStore;
use vetes_agent::syncer::Syncer;
use vetes_agent::tes::http::HttpTaskService;
use vetes_core::observability::{init_logging, LogFormat};

const LOG_SWEEP_PERIOD: Duration = Duration::from_secs(3600);

/// veTES cluster agent.
#[derive(Debug, Parser)]
#[command(name = "vetes-agent", version, about)]
struct Cli {
    /// Configuration file (YAML or JSON).
    #[arg(short, long)]
    config: PathBuf,

    /// Override the cluster id from the config file.
    #[arg(long)]
    cluster_id: Option<String>,

    /// Override the namespace from the config file.
    #[arg(long)]
    namespace: Option<String>,

    /// Override the log format (`pretty` or `json`).
    #[arg(long)]
    log_format: Option<String>,

    /// Override the default log filter directive.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AgentConfig::load(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    if let Some(cluster_id) = cli.cluster_id {
        config.cluster.id = cluster_id;
    }
    if let Some(namespace) = cli.namespace {
        config.namespace = namespace;
    }
    if let Some(format) = cli.log_format {
        config.log.format = format;
    }
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }

    config.validate().context("invalid configuration")?;

    let format: LogFormat = config
        .log
        .format
        .parse()
        .map_err(|err: String| anyhow::anyhow!(err))?;
    init_logging(format, &config.log.level);
    tracing::info!(cluster = %config.cluster.id, namespace = %config.namespace, "run vetes agent");

    run(config).await
}

async fn run(config: AgentConfig) -> anyhow::Result<()> {
    let cluster = Arc::new(InMemoryCluster::new());
    let service = Arc::new(HttpTaskService::new(&config.tes)?);
    let store = LocalStore::new(cluster.clone());
    let offload = new_helper(&config.offload)?;
    let accelerator = new_accelerator(cluster.clone(), &config.namespace, &config.accelerate)?;

    let runner = Arc::new(TaskRunner::new(
        service.clone(),
        store.clone(),
        offload.clone(),
        accelerator.clone(),
        cluster.clone(),
        &config.cluster.id,
        config.runner.clone(),
    ));
    let syncer = Arc::new(Syncer::new(
        service.clone(),
        store,
        offload,
        accelerator.clone(),
        &config.cluster.id,
        config.syncer.concurrency,
    ));

    let cluster_config = ClusterConfig::load(std::path::Path::new(&config.cluster.config_path))?;
    let reporter = Arc::new(CapacityReporter::new(
        service,
        &config.cluster.id,
        cluster_config,
    ));

    // leader election is delegated to the deployment (at most one replica is
    // handed work); without it the single instance always leads
    if config.leader_election.enable {
        tracing::warn!("leader election is delegated to the deployment; running as leader");
    }
    let (_leader_tx, leader_rx) = leader_gate(true);

    let mut cron = CronRunner::new(leader_rx);
    {
        let reporter = reporter.clone();
        cron.register("cluster-heartbeat", config.cluster.report_period, move || {
            let reporter = reporter.clone();
            async move { reporter.report().await }
        });
    }
    {
        let syncer = syncer.clone();
        cron.register("syncer", config.syncer.period, move || {
            let syncer = syncer.clone();
            async move {
                if let Err(err) = syncer.sync_tasks().await {
                    tracing::error!(%err, "sync tasks failed");
                }
            }
        });
    }
    {
        let runner = runner.clone();
        cron.register("task-log-sweep", LOG_SWEEP_PERIOD, move || {
            let runner = runner.clone();
            async move { runner.clean_task_log_files().await }
        });
    }
    if let Some(interval) = accelerator.clean_interval() {
        let accelerator = accelerator.clone();
        cron.register("accelerate-sweep", interval, move || {
            let accelerator = accelerator.clone();
            async move { accelerator.clean().await }
        });
    }

    let engine = ReconcileEngine::new(runner, cluster, config.reconciler.concurrency);

    let cron_handle = tokio::spawn(cron.run());
    let engine_handle = tokio::spawn(engine.run());

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown")?;
    tracing::info!("shutdown signal received");
    cron_handle.abort();
    engine_handle.abort();
    Ok(())
}
