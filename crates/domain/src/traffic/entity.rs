use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::entity::{Decision, MatchReason, Protocol};
use crate::net::ip::Cidr;
use crate::policy::engine::Verdict;

/// How the producer walks each CIDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// One task per (src, dst, port) triple, using the network address.
    Sample,
    /// Enumerate every host of CIDRs no larger than the threshold.
    Expand,
}

impl MatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sample => "sample",
            Self::Expand => "expand",
        }
    }
}

/// A destination network with the pass-through metadata its CSV row
/// carried (keys are `dst_<lowercased column>`).
#[derive(Debug, Clone)]
pub struct Destination {
    pub network: Cidr,
    pub metadata: Arc<HashMap<String, String>>,
}

/// One `(label, port, protocol)` row from the ports file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    pub label: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// Everything the input parsers produce for one run.
#[derive(Debug, Clone, Default)]
pub struct InputTraffic {
    pub sources: Vec<Cidr>,
    pub destinations: Vec<Destination>,
    pub ports: Vec<PortEntry>,
}

impl InputTraffic {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() || self.destinations.is_empty() || self.ports.is_empty()
    }
}

/// One evaluation request. The label fields are opaque to the engine
/// and pass straight through into the result.
#[derive(Debug, Clone)]
pub struct Task {
    pub src_ip: IpAddr,
    pub src_network: String,
    pub dst_ip: IpAddr,
    pub dst_network: String,
    pub dst_meta: Arc<HashMap<String, String>>,
    pub port: u16,
    pub protocol: Protocol,
    pub service_label: String,
}

/// One output record: the task's labels plus the engine's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowResult {
    pub src_network_segment: String,
    pub dst_network_segment: String,
    pub dst_gn: String,
    pub dst_site: String,
    pub dst_location: String,
    pub service_label: String,
    pub protocol: Protocol,
    pub port: u16,
    pub decision: Decision,
    pub matched_policy_id: String,
    pub matched_policy_action: String,
    pub reason: MatchReason,
}

impl FlowResult {
    /// Fixed header shared by both output sinks, in column order.
    pub const HEADER: [&'static str; 12] = [
        "src_network_segment",
        "dst_network_segment",
        "dst_gn",
        "dst_site",
        "dst_location",
        "service_label",
        "protocol",
        "port",
        "decision",
        "matched_policy_id",
        "matched_policy_action",
        "reason",
    ];

    /// Decorate a verdict with the task's pass-through labels. The
    /// destination metadata is projected through the three fixed keys.
    pub fn from_verdict(task: &Task, verdict: &Verdict) -> Self {
        let meta = |key: &str| task.dst_meta.get(key).cloned().unwrap_or_default();
        let (matched_policy_id, matched_policy_action) = match &verdict.matched {
            Some(matched) => (matched.id.0.clone(), matched.action.as_str().to_string()),
            None => (String::new(), String::new()),
        };
        Self {
            src_network_segment: task.src_network.clone(),
            dst_network_segment: task.dst_network.clone(),
            dst_gn: meta("dst_gn"),
            dst_site: meta("dst_site"),
            dst_location: meta("dst_location"),
            service_label: task.service_label.clone(),
            protocol: task.protocol,
            port: task.port,
            decision: verdict.decision,
            matched_policy_id,
            matched_policy_action,
            reason: verdict.reason,
        }
    }

    /// The record's fields in header order.
    pub fn record(&self) -> [String; 12] {
        [
            self.src_network_segment.clone(),
            self.dst_network_segment.clone(),
            self.dst_gn.clone(),
            self.dst_site.clone(),
            self.dst_location.clone(),
            self.service_label.clone(),
            self.protocol.as_str().to_string(),
            self.port.to_string(),
            self.decision.as_str().to_string(),
            self.matched_policy_id.clone(),
            self.matched_policy_action.clone(),
            self.reason.as_str().to_string(),
        ]
    }
}
