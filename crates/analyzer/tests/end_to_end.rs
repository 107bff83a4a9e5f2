//! Full-stack run: FortiGate config and input CSVs on disk, through the
//! provider, engine, and pipeline, into the two CSV sinks.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use adapters::input::traffic as input;
use adapters::provider::fortigate::FortiGateProvider;
use adapters::sink::csv_file::CsvFileSink;
use application::estimator::estimate_total_tasks;
use application::pipeline::{self, PipelineConfig};
use domain::policy::engine::PolicyEngine;
use domain::traffic::entity::MatchMode;
use ports::secondary::policy_provider::PolicyProvider;
use tokio_util::sync::CancellationToken;

const RULES: &str = r#"
config firewall address
    edit "lan-net"
        set subnet 10.0.0.0 255.255.255.252
    next
end
config firewall policy
    edit 100
        set name "allow web out"
        set srcaddr "lan-net"
        set service "HTTPS"
        set action accept
        set status enable
    next
    edit 200
        set name "catch-all deny"
        set action deny
        set status enable
    next
end
"#;

const SOURCES: &str = "Network Segment\n10.0.0.0/30\n172.16.0.0/30\n";

const DESTINATIONS: &str =
    "Network Segment,GN,Site,Location\n203.0.113.0/28,corp,hq,dc-1\n";

const PORTS: &str = "https,443/tcp\nssh,22/tcp\n";

#[tokio::test]
async fn fortigate_run_produces_both_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let write = |name: &str, content: &str| {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    };

    let rules = write("rules.conf", RULES);
    let src = write("src.csv", SOURCES);
    let dst = write("dst.csv", DESTINATIONS);
    let ports = write("ports.txt", PORTS);
    let out = dir.path().join("results.csv");
    let accepted = dir.path().join("accepted.csv");

    let policies = FortiGateProvider::new(rules).provide().unwrap();
    let engine = Arc::new(PolicyEngine::new(policies));
    let traffic = input::load(&src, &dst, &ports).unwrap();

    let config = PipelineConfig {
        mode: MatchMode::Expand,
        max_hosts: 1024,
        workers: 4,
    };
    let estimate = estimate_total_tasks(&traffic, config.mode, config.max_hosts);
    // (4 + 4 src hosts) x 16 dst hosts x 2 ports
    assert_eq!(estimate, 256);

    let completed = Arc::new(AtomicU64::new(0));
    let report = pipeline::run(
        Arc::clone(&engine),
        traffic,
        config,
        Box::new(CsvFileSink::create(&out).unwrap()),
        Box::new(CsvFileSink::create(&accepted).unwrap()),
        completed,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(report.produced, estimate);
    assert_eq!(report.written, estimate);

    let total = std::fs::read_to_string(&out).unwrap();
    let total_lines: Vec<&str> = total.lines().collect();
    assert_eq!(total_lines.len() as u64, 1 + estimate);
    assert_eq!(
        total_lines[0],
        "src_network_segment,dst_network_segment,dst_gn,dst_site,dst_location,\
         service_label,protocol,port,decision,matched_policy_id,matched_policy_action,reason"
    );

    // Only 10.0.0.0/30 sources reach HTTPS: 4 hosts x 16 dst hosts.
    let accepted = std::fs::read_to_string(&accepted).unwrap();
    let allow_rows: Vec<&str> = accepted.lines().skip(1).collect();
    assert_eq!(allow_rows.len(), 64);
    for row in &allow_rows {
        assert!(row.starts_with("10.0.0.0/30,203.0.113.0/28,corp,hq,dc-1,https,tcp,443,ALLOW,100,accept,MATCH_POLICY_ACCEPT"));
    }

    // Every denied row names either the catch-all or the implicit deny.
    let denied = total
        .lines()
        .skip(1)
        .filter(|row| row.contains(",DENY,"))
        .count();
    assert_eq!(denied as u64, estimate - 64);
    assert!(total.contains("MATCH_POLICY_DENY"));
}

#[tokio::test]
async fn sample_mode_run_is_small() {
    let dir = tempfile::tempdir().unwrap();
    let write = |name: &str, content: &str| {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    };

    let rules = write("rules.conf", RULES);
    let src = write("src.csv", SOURCES);
    let dst = write("dst.csv", DESTINATIONS);
    let ports = write("ports.txt", PORTS);
    let out = dir.path().join("results.csv");
    let accepted = dir.path().join("accepted.csv");

    let policies = FortiGateProvider::new(rules).provide().unwrap();
    let engine = Arc::new(PolicyEngine::new(policies));
    let traffic = input::load(&src, &dst, &ports).unwrap();

    let report = pipeline::run(
        engine,
        traffic,
        PipelineConfig {
            mode: MatchMode::Sample,
            max_hosts: 1024,
            workers: 2,
        },
        Box::new(CsvFileSink::create(&out).unwrap()),
        Box::new(CsvFileSink::create(&accepted).unwrap()),
        Arc::new(AtomicU64::new(0)),
        CancellationToken::new(),
    )
    .await;

    // 2 sources x 1 destination x 2 ports.
    assert_eq!(report.produced, 4);
    assert_eq!(report.written, 4);

    // The sampled source address 10.0.0.0 is inside lan-net (/30), so
    // its HTTPS probe is allowed.
    let accepted = std::fs::read_to_string(&accepted).unwrap();
    assert_eq!(accepted.lines().count(), 2);
}
