use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

use adapters::input::traffic as input;
use adapters::provider::db::DbPolicyProvider;
use adapters::provider::fortigate::FortiGateProvider;
use adapters::sink::csv_file::CsvFileSink;
use anyhow::{Context, bail};
use application::estimator::estimate_total_tasks;
use application::pipeline::{self, PipelineConfig};
use application::progress::ProgressReporter;
use domain::policy::engine::PolicyEngine;
use domain::policy::entity::Policy;
use infrastructure::config::{RunConfig, default_workers};
use infrastructure::logging::init_logging;
use ports::secondary::policy_provider::PolicyProvider;
use tracing::{info, warn};

use crate::cli::{Cli, ProviderKind};
use crate::shutdown;

/// Run one analysis end to end and block until the pipeline drains.
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    // ── 1. Logging ──────────────────────────────────────────────────
    init_logging(cli.log_level, cli.log_format, cli.log_file.as_deref())
        .context("opening log destination")?;

    let _root_span = tracing::span!(
        tracing::Level::INFO,
        "service",
        service.name = "flowaudit",
        service.version = env!("CARGO_PKG_VERSION"),
    )
    .entered();

    let config = RunConfig {
        mode: cli.mode.to_match_mode(),
        workers: cli.workers.unwrap_or_else(default_workers),
        max_hosts: cli.max_hosts,
        max_tasks: cli.max_tasks,
    };
    config.validate()?;

    let started = Instant::now();
    info!(
        mode = config.mode.as_str(),
        workers = config.workers,
        "starting analyzer"
    );

    // ── 2. Load policies ────────────────────────────────────────────
    let policies = load_policies(cli)?;
    info!(count = policies.len(), "policies loaded");

    // ── 3. Build the engine ─────────────────────────────────────────
    let engine = Arc::new(PolicyEngine::new(policies));

    // ── 4. Parse input traffic ──────────────────────────────────────
    let traffic = input::load(&cli.src, &cli.dst, &cli.ports)?;
    info!(
        source_networks = traffic.sources.len(),
        destination_networks = traffic.destinations.len(),
        ports = traffic.ports.len(),
        "input traffic parsed"
    );
    if traffic.is_empty() {
        warn!("input traffic is empty, nothing to evaluate");
    }

    // ── 5. Estimate the workload ────────────────────────────────────
    let estimate = estimate_total_tasks(&traffic, config.mode, config.max_hosts);
    info!(total_tasks = estimate, "task count estimated");
    if config.max_tasks > 0 && estimate > config.max_tasks {
        warn!(
            total_tasks = estimate,
            max_tasks = config.max_tasks,
            "estimated task count exceeds limit"
        );
    }

    // ── 6. Pre-flight the output sinks ──────────────────────────────
    let total_sink = CsvFileSink::create(&cli.out)
        .with_context(|| format!("creating {}", cli.out.display()))?;
    let accepted_sink = CsvFileSink::create(&cli.accepted)
        .with_context(|| format!("creating {}", cli.accepted.display()))?;
    info!(
        out = %cli.out.display(),
        accepted = %cli.accepted.display(),
        "output sinks ready"
    );

    // ── 7. Run the pipeline ─────────────────────────────────────────
    let cancel = shutdown::create_shutdown_token();
    let completed = Arc::new(AtomicU64::new(0));
    let progress = tokio::spawn(
        ProgressReporter::new(Arc::clone(&completed), estimate).run(cancel.clone()),
    );

    let report = pipeline::run(
        engine,
        traffic,
        PipelineConfig {
            mode: config.mode,
            max_hosts: config.max_hosts,
            workers: config.workers,
        },
        Box::new(total_sink),
        Box::new(accepted_sink),
        completed,
        cancel.clone(),
    )
    .await;

    // Release the progress loop if it is still ticking.
    cancel.cancel();
    let _ = progress.await;

    if report.written != report.produced {
        warn!(
            produced = report.produced,
            written = report.written,
            "run ended early, results are incomplete"
        );
    }
    info!(
        produced = report.produced,
        written = report.written,
        duration_ms = started.elapsed().as_millis() as u64,
        "analysis complete"
    );
    Ok(())
}

fn load_policies(cli: &Cli) -> anyhow::Result<Vec<Policy>> {
    match cli.provider {
        ProviderKind::Fortigate => {
            let Some(rules) = &cli.rules else {
                bail!("--rules is required for the fortigate provider");
            };
            let mut provider = FortiGateProvider::new(rules.clone());
            Ok(provider.provide()?)
        }
        ProviderKind::Db => {
            let Some(db) = &cli.db else {
                bail!("--db is required for the db provider");
            };
            let mut provider = DbPolicyProvider::open(db)?;
            Ok(provider.provide()?)
        }
    }
}
