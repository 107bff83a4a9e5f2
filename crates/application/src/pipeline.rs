//! The producer → worker pool → writer pipeline.
//!
//! One producer walks the src × dst × port cross product and feeds a
//! bounded task channel; `workers` consumers evaluate against the
//! shared read-only engine and feed a bounded result channel; a single
//! writer drains results into the two sinks and owns the progress
//! counter. A sink failure cancels the shared token and the stages
//! unwind through their closed channels.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use domain::common::entity::Decision;
use domain::policy::engine::PolicyEngine;
use domain::traffic::entity::{Destination, FlowResult, InputTraffic, MatchMode, Task};
use ports::secondary::result_sink::ResultSink;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::estimator::expand_eligible;

/// Channel slack per worker: enough to absorb jitter without unbounded
/// buffering.
const CHANNEL_SCALE: usize = 100;

/// The writer publishes its running count every this many records.
const PROGRESS_BATCH: u64 = 1024;

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub mode: MatchMode,
    pub max_hosts: u64,
    pub workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub produced: u64,
    pub written: u64,
}

/// Run the full pipeline to completion (or cancellation) and report
/// how many tasks were produced and how many results written. Exactly
/// one result is written per produced task unless the run is cancelled.
pub async fn run(
    engine: Arc<PolicyEngine>,
    traffic: InputTraffic,
    config: PipelineConfig,
    total_sink: Box<dyn ResultSink>,
    accepted_sink: Box<dyn ResultSink>,
    completed: Arc<AtomicU64>,
    cancel: CancellationToken,
) -> PipelineReport {
    let workers = config.workers.max(1);
    let capacity = workers * CHANNEL_SCALE;
    let (task_tx, task_rx) = mpsc::channel::<Task>(capacity);
    let (result_tx, result_rx) = mpsc::channel::<FlowResult>(capacity);
    let task_rx = Arc::new(Mutex::new(task_rx));

    let producer = tokio::spawn(produce(traffic, config, task_tx, cancel.clone()));

    info!(count = workers, "starting evaluator workers");
    let mut worker_handles = Vec::with_capacity(workers);
    for id in 1..=workers {
        worker_handles.push(tokio::spawn(evaluate_tasks(
            id,
            Arc::clone(&engine),
            Arc::clone(&task_rx),
            result_tx.clone(),
        )));
    }
    // The writer must see the channel close once all workers are done.
    drop(result_tx);

    let writer = tokio::spawn(write_results(
        result_rx,
        total_sink,
        accepted_sink,
        completed,
        cancel,
    ));

    let produced = producer.await.unwrap_or(0);
    for handle in worker_handles {
        let _ = handle.await;
    }
    let written = writer.await.unwrap_or(0);
    PipelineReport { produced, written }
}

/// Emit one task per (src host, dst host, port) in nested order:
/// src outer, dst inner, port innermost. A network walks host by host
/// only when `expand_eligible` says so; otherwise its first (network)
/// address stands in for the whole block.
async fn produce(
    traffic: InputTraffic,
    config: PipelineConfig,
    tasks: mpsc::Sender<Task>,
    cancel: CancellationToken,
) -> u64 {
    info!(mode = config.mode.as_str(), "starting task producer");

    let src_plans: Vec<(String, domain::net::ip::Cidr, bool)> = traffic
        .sources
        .iter()
        .map(|net| {
            (
                net.to_string(),
                *net,
                expand_eligible(net, config.mode, config.max_hosts),
            )
        })
        .collect();
    let dst_plans: Vec<(String, Destination, bool)> = traffic
        .destinations
        .iter()
        .map(|dst| {
            (
                dst.network.to_string(),
                dst.clone(),
                expand_eligible(&dst.network, config.mode, config.max_hosts),
            )
        })
        .collect();

    let mut produced: u64 = 0;
    'outer: for (src_label, src_net, src_expand) in &src_plans {
        let mut src_hosts = src_net.hosts();
        while let Some(src_ip) = src_hosts.next() {
            for (dst_label, destination, dst_expand) in &dst_plans {
                let mut dst_hosts = destination.network.hosts();
                while let Some(dst_ip) = dst_hosts.next() {
                    for port in &traffic.ports {
                        let task = Task {
                            src_ip,
                            src_network: src_label.clone(),
                            dst_ip,
                            dst_network: dst_label.clone(),
                            dst_meta: Arc::clone(&destination.metadata),
                            port: port.port,
                            protocol: port.protocol,
                            service_label: port.label.clone(),
                        };
                        tokio::select! {
                            () = cancel.cancelled() => {
                                debug!("producer cancelled");
                                break 'outer;
                            }
                            sent = tasks.send(task) => {
                                if sent.is_err() {
                                    debug!("task channel closed, stopping producer");
                                    break 'outer;
                                }
                                produced += 1;
                            }
                        }
                    }
                    if !dst_expand {
                        break;
                    }
                }
            }
            if !src_expand {
                break;
            }
        }
    }

    info!(total_tasks = produced, "task producer finished");
    produced
}

async fn evaluate_tasks(
    id: usize,
    engine: Arc<PolicyEngine>,
    tasks: Arc<Mutex<mpsc::Receiver<Task>>>,
    results: mpsc::Sender<FlowResult>,
) {
    debug!(worker = id, "worker started");
    loop {
        // Hold the lock only while waiting for the next task.
        let task = { tasks.lock().await.recv().await };
        let Some(task) = task else {
            break;
        };
        let verdict = engine.evaluate(&task);
        let result = FlowResult::from_verdict(&task, &verdict);
        if results.send(result).await.is_err() {
            break;
        }
    }
    debug!(worker = id, "worker finished");
}

async fn write_results(
    mut results: mpsc::Receiver<FlowResult>,
    mut total_sink: Box<dyn ResultSink>,
    mut accepted_sink: Box<dyn ResultSink>,
    completed: Arc<AtomicU64>,
    cancel: CancellationToken,
) -> u64 {
    let mut written: u64 = 0;
    while let Some(result) = results.recv().await {
        if let Err(error) = write_one(&mut *total_sink, &mut *accepted_sink, &result) {
            error!(%error, "failed to write result, cancelling run");
            cancel.cancel();
            break;
        }
        written += 1;
        if written % PROGRESS_BATCH == 0 {
            completed.store(written, Ordering::Relaxed);
        }
    }
    if let Err(error) = total_sink.flush() {
        error!(%error, "failed to flush results sink");
    }
    if let Err(error) = accepted_sink.flush() {
        error!(%error, "failed to flush accepted sink");
    }
    completed.store(written, Ordering::Relaxed);
    info!(written, "result writer finished");
    written
}

fn write_one(
    total: &mut dyn ResultSink,
    accepted: &mut dyn ResultSink,
    result: &FlowResult,
) -> std::io::Result<()> {
    total.write(result)?;
    if result.decision == Decision::Allow {
        accepted.write(result)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::estimate_total_tasks;
    use domain::common::entity::{Action, PolicyId, Protocol};
    use domain::policy::entity::{AddressObject, Policy, ServiceObject};
    use domain::traffic::entity::PortEntry;
    use std::collections::HashMap;
    use std::io;
    use std::sync::Mutex as StdMutex;

    // ── Test doubles ──────────────────────────────────────────────

    #[derive(Clone, Default)]
    struct MemorySink {
        records: Arc<StdMutex<Vec<FlowResult>>>,
        fail_after: Option<usize>,
    }

    impl MemorySink {
        fn failing_after(n: usize) -> Self {
            Self {
                records: Arc::default(),
                fail_after: Some(n),
            }
        }

        fn records(&self) -> Vec<FlowResult> {
            self.records.lock().unwrap().clone()
        }
    }

    impl ResultSink for MemorySink {
        fn write(&mut self, result: &FlowResult) -> io::Result<()> {
            let mut records = self.records.lock().unwrap();
            if let Some(limit) = self.fail_after
                && records.len() >= limit
            {
                return Err(io::Error::other("sink full"));
            }
            records.push(result.clone());
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn allow_all_engine() -> Arc<PolicyEngine> {
        Arc::new(PolicyEngine::new(vec![Policy {
            id: PolicyId("1".to_string()),
            priority: 1,
            name: "allow-all".to_string(),
            action: Action::Accept,
            enabled: true,
            src_addrs: vec![Arc::new(AddressObject::any())],
            dst_addrs: vec![Arc::new(AddressObject::any())],
            services: vec![Arc::new(ServiceObject::any())],
        }]))
    }

    fn deny_port_engine(port: u16) -> Arc<PolicyEngine> {
        Arc::new(PolicyEngine::new(vec![
            Policy {
                id: PolicyId("10".to_string()),
                priority: 10,
                name: "deny-port".to_string(),
                action: Action::Deny,
                enabled: true,
                src_addrs: vec![Arc::new(AddressObject::any())],
                dst_addrs: vec![Arc::new(AddressObject::any())],
                services: vec![Arc::new(ServiceObject::port_range(
                    "blocked",
                    Protocol::Tcp,
                    port,
                    port,
                ))],
            },
            Policy {
                id: PolicyId("20".to_string()),
                priority: 20,
                name: "allow-rest".to_string(),
                action: Action::Accept,
                enabled: true,
                src_addrs: vec![Arc::new(AddressObject::any())],
                dst_addrs: vec![Arc::new(AddressObject::any())],
                services: vec![Arc::new(ServiceObject::any())],
            },
        ]))
    }

    fn traffic(sources: &[&str], destinations: &[&str], ports: &[(u16, Protocol)]) -> InputTraffic {
        let mut metadata = HashMap::new();
        metadata.insert("dst_gn".to_string(), "corp".to_string());
        metadata.insert("dst_site".to_string(), "hq".to_string());
        let metadata = Arc::new(metadata);
        InputTraffic {
            sources: sources.iter().map(|s| s.parse().unwrap()).collect(),
            destinations: destinations
                .iter()
                .map(|d| Destination {
                    network: d.parse().unwrap(),
                    metadata: Arc::clone(&metadata),
                })
                .collect(),
            ports: ports
                .iter()
                .map(|(port, protocol)| PortEntry {
                    label: format!("svc-{port}"),
                    port: *port,
                    protocol: *protocol,
                })
                .collect(),
        }
    }

    async fn run_pipeline(
        engine: Arc<PolicyEngine>,
        traffic: InputTraffic,
        config: PipelineConfig,
        total: MemorySink,
        accepted: MemorySink,
        cancel: CancellationToken,
    ) -> (PipelineReport, Arc<AtomicU64>) {
        let completed = Arc::new(AtomicU64::new(0));
        let report = run(
            engine,
            traffic,
            config,
            Box::new(total),
            Box::new(accepted),
            Arc::clone(&completed),
            cancel,
        )
        .await;
        (report, completed)
    }

    // ── Conservation and modes ────────────────────────────────────

    #[tokio::test]
    async fn sample_mode_emits_one_task_per_triple() {
        let total = MemorySink::default();
        let accepted = MemorySink::default();
        let t = traffic(
            &["10.0.0.0/24", "172.16.0.0/12"],
            &["192.168.0.0/16"],
            &[(80, Protocol::Tcp), (443, Protocol::Tcp), (53, Protocol::Udp)],
        );
        let config = PipelineConfig {
            mode: MatchMode::Sample,
            max_hosts: 65_536,
            workers: 4,
        };
        let (report, _) = run_pipeline(
            allow_all_engine(),
            t,
            config,
            total.clone(),
            accepted.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(report.produced, 6);
        assert_eq!(report.written, 6);
        assert_eq!(total.records().len(), 6);
        // Sampled networks contribute their network address.
        assert!(
            total
                .records()
                .iter()
                .all(|r| r.src_network_segment == "10.0.0.0/24"
                    || r.src_network_segment == "172.16.0.0/12")
        );
    }

    #[tokio::test]
    async fn expand_mode_matches_the_estimator() {
        let total = MemorySink::default();
        let accepted = MemorySink::default();
        // /30 x /31 expanded, /8 sampled: (4 * (2 + 1)) * 2 ports.
        let t = traffic(
            &["10.0.0.0/30"],
            &["192.168.0.0/31", "172.16.0.0/12"],
            &[(80, Protocol::Tcp), (22, Protocol::Tcp)],
        );
        let config = PipelineConfig {
            mode: MatchMode::Expand,
            max_hosts: 1024,
            workers: 2,
        };
        let estimate = estimate_total_tasks(&t, config.mode, config.max_hosts);
        let (report, completed) = run_pipeline(
            allow_all_engine(),
            t,
            config,
            total.clone(),
            accepted.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(estimate, 24);
        assert_eq!(report.produced, estimate);
        assert_eq!(report.written, estimate);
        assert_eq!(completed.load(Ordering::Relaxed), estimate);
    }

    #[tokio::test]
    async fn accepted_sink_receives_only_allows() {
        let total = MemorySink::default();
        let accepted = MemorySink::default();
        let t = traffic(
            &["10.0.0.0/24"],
            &["192.168.0.0/24"],
            &[(22, Protocol::Tcp), (80, Protocol::Tcp)],
        );
        let config = PipelineConfig {
            mode: MatchMode::Sample,
            max_hosts: 65_536,
            workers: 3,
        };
        let (report, _) = run_pipeline(
            deny_port_engine(22),
            t,
            config,
            total.clone(),
            accepted.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(report.written, 2);
        assert_eq!(total.records().len(), 2);
        let accepted_records = accepted.records();
        assert_eq!(accepted_records.len(), 1);
        assert_eq!(accepted_records[0].port, 80);
        assert_eq!(accepted_records[0].decision, Decision::Allow);
    }

    #[tokio::test]
    async fn results_carry_destination_metadata() {
        let total = MemorySink::default();
        let accepted = MemorySink::default();
        let t = traffic(&["10.0.0.0/24"], &["192.168.0.0/24"], &[(80, Protocol::Tcp)]);
        let config = PipelineConfig {
            mode: MatchMode::Sample,
            max_hosts: 65_536,
            workers: 1,
        };
        let (_, _) = run_pipeline(
            allow_all_engine(),
            t,
            config,
            total.clone(),
            accepted.clone(),
            CancellationToken::new(),
        )
        .await;

        let records = total.records();
        assert_eq!(records[0].dst_gn, "corp");
        assert_eq!(records[0].dst_site, "hq");
        assert_eq!(records[0].dst_location, "");
        assert_eq!(records[0].service_label, "svc-80");
    }

    // ── Failure and cancellation paths ────────────────────────────

    #[tokio::test]
    async fn sink_failure_cancels_the_run() {
        let total = MemorySink::failing_after(8);
        let accepted = MemorySink::default();
        // Large expansion that could never finish within the channel
        // bounds if cancellation did not propagate.
        let t = traffic(&["10.0.0.0/16"], &["192.168.0.0/24"], &[(80, Protocol::Tcp)]);
        let config = PipelineConfig {
            mode: MatchMode::Expand,
            max_hosts: 65_536,
            workers: 2,
        };
        let cancel = CancellationToken::new();
        let (report, _) = run_pipeline(
            allow_all_engine(),
            t,
            config,
            total.clone(),
            accepted.clone(),
            cancel.clone(),
        )
        .await;

        assert!(cancel.is_cancelled());
        assert_eq!(report.written, 8);
        assert!(report.produced < 256 * 256);
    }

    #[tokio::test]
    async fn pre_cancelled_token_stops_immediately() {
        let total = MemorySink::default();
        let accepted = MemorySink::default();
        let t = traffic(&["10.0.0.0/16"], &["192.168.0.0/16"], &[(80, Protocol::Tcp)]);
        let config = PipelineConfig {
            mode: MatchMode::Expand,
            max_hosts: 65_536,
            workers: 2,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (report, _) = run_pipeline(
            allow_all_engine(),
            t,
            config,
            total.clone(),
            accepted.clone(),
            cancel,
        )
        .await;

        // The producer may race a handful of sends before observing the
        // token, but the run terminates far short of the cross product.
        assert!(report.produced < 1000);
    }

    #[tokio::test]
    async fn zero_workers_still_completes() {
        let total = MemorySink::default();
        let accepted = MemorySink::default();
        let t = traffic(&["10.0.0.0/24"], &["192.168.0.0/24"], &[(80, Protocol::Tcp)]);
        let config = PipelineConfig {
            mode: MatchMode::Sample,
            max_hosts: 65_536,
            workers: 0,
        };
        let (report, _) = run_pipeline(
            allow_all_engine(),
            t,
            config,
            total.clone(),
            accepted.clone(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(report.written, 1);
    }
}
