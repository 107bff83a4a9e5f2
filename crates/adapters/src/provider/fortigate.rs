//! Policy provider for FortiGate configuration dumps.
//!
//! Walks the `config firewall address / addrgrp / service custom /
//! service group / policy` sections (`edit` / `set` / `next` / `end`),
//! builds the object catalog and policy drafts, then flattens group
//! references. Unknown sections and keys are ignored; malformed objects
//! are skipped with a warning rather than aborting the load.

use std::net::IpAddr;
use std::path::PathBuf;

use domain::common::entity::{Action, PolicyId, Protocol};
use domain::net::ip::{self, Cidr};
use domain::policy::entity::{AddressKind, AddressObject, Policy, PolicyDraft, ServiceObject};
use domain::policy::error::PolicyLoadError;
use domain::policy::flatten::ObjectCatalog;
use ports::secondary::policy_provider::PolicyProvider;
use tracing::warn;

pub struct FortiGateProvider {
    path: PathBuf,
}

impl FortiGateProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PolicyProvider for FortiGateProvider {
    fn provide(&mut self) -> Result<Vec<Policy>, PolicyLoadError> {
        let text = std::fs::read_to_string(&self.path)?;
        let (catalog, drafts) = parse_config(&text);
        let outcome = catalog.flatten(drafts)?;
        for dropped in &outcome.dropped {
            warn!(
                policy_id = %dropped.policy_id,
                axis = dropped.axis.as_str(),
                name = %dropped.name,
                "unresolved object reference dropped"
            );
        }
        Ok(outcome.policies)
    }
}

/// Parse the config text into the raw catalog and policy drafts.
pub(crate) fn parse_config(text: &str) -> (ObjectCatalog, Vec<PolicyDraft>) {
    let mut parser = ConfigParser {
        catalog: ObjectCatalog::new(),
        drafts: Vec::new(),
    };
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        match line.trim() {
            "config firewall address" => parser.parse_address_section(&mut lines),
            "config firewall addrgrp" => parser.parse_group_section(&mut lines, GroupKind::Address),
            "config firewall service custom" => parser.parse_service_section(&mut lines),
            "config firewall service group" => {
                parser.parse_group_section(&mut lines, GroupKind::Service);
            }
            "config firewall policy" => parser.parse_policy_section(&mut lines),
            _ => {}
        }
    }
    (parser.catalog, parser.drafts)
}

enum GroupKind {
    Address,
    Service,
}

#[derive(Default)]
struct AddressBuilder {
    name: String,
    type_hint: Option<String>,
    subnet: Option<Cidr>,
    start_ip: Option<IpAddr>,
    end_ip: Option<IpAddr>,
    fqdn: Option<String>,
}

#[derive(Default)]
struct ServiceBuilder {
    name: String,
    protocol: Option<Protocol>,
    start_port: Option<u16>,
    end_port: Option<u16>,
}

struct ConfigParser {
    catalog: ObjectCatalog,
    drafts: Vec<PolicyDraft>,
}

impl ConfigParser {
    // ── Addresses ───────────────────────────────────────────────────

    fn parse_address_section(&mut self, lines: &mut std::str::Lines<'_>) {
        let mut current: Option<AddressBuilder> = None;
        for line in lines.by_ref() {
            let line = line.trim();
            if line == "end" {
                break;
            }
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("edit") => {
                    if let Some(builder) = current.take() {
                        self.finish_address(builder);
                    }
                    current = Some(AddressBuilder {
                        name: unquote(&remainder(line, 1)),
                        ..AddressBuilder::default()
                    });
                }
                Some("set") => {
                    let Some(builder) = current.as_mut() else {
                        continue;
                    };
                    match parts.next() {
                        Some("type") => builder.type_hint = parts.next().map(str::to_string),
                        Some("subnet") => {
                            let args: Vec<&str> = parts.collect();
                            builder.subnet = parse_subnet(&builder.name, &args);
                        }
                        Some("start-ip") => {
                            builder.start_ip = parts.next().and_then(|s| s.parse().ok());
                        }
                        Some("end-ip") => {
                            builder.end_ip = parts.next().and_then(|s| s.parse().ok());
                        }
                        Some("fqdn") => builder.fqdn = Some(unquote(&remainder(line, 2))),
                        _ => {}
                    }
                }
                Some("next") => {
                    if let Some(builder) = current.take() {
                        self.finish_address(builder);
                    }
                }
                _ => {}
            }
        }
        if let Some(builder) = current.take() {
            self.finish_address(builder);
        }
    }

    fn finish_address(&mut self, builder: AddressBuilder) {
        let kind = match builder.type_hint.as_deref() {
            Some("ipmask") => builder.subnet.map(AddressKind::Subnet),
            Some("iprange") => range_kind(&builder),
            Some("fqdn") => Some(AddressKind::Fqdn(builder.fqdn.clone().unwrap_or_default())),
            Some(_) => None,
            // No explicit type: infer from whichever fields were set.
            None => {
                if let Some(fqdn) = &builder.fqdn {
                    Some(AddressKind::Fqdn(fqdn.clone()))
                } else if builder.start_ip.is_some() || builder.end_ip.is_some() {
                    range_kind(&builder)
                } else {
                    builder.subnet.map(AddressKind::Subnet)
                }
            }
        };
        match kind {
            Some(kind) => self.catalog.add_address(AddressObject {
                name: builder.name,
                kind,
            }),
            None => warn!(object = %builder.name, "address object has no usable definition, skipping"),
        }
    }

    // ── Services ────────────────────────────────────────────────────

    fn parse_service_section(&mut self, lines: &mut std::str::Lines<'_>) {
        let mut current: Option<ServiceBuilder> = None;
        for line in lines.by_ref() {
            let line = line.trim();
            if line == "end" {
                break;
            }
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("edit") => {
                    if let Some(builder) = current.take() {
                        self.finish_service(builder);
                    }
                    current = Some(ServiceBuilder {
                        name: unquote(&remainder(line, 1)),
                        ..ServiceBuilder::default()
                    });
                }
                Some("set") if line.contains("portrange") => {
                    let Some(builder) = current.as_mut() else {
                        continue;
                    };
                    // Both `set tcp-portrange 80-443` and
                    // `set tcp-portrange=80-443` occur in the wild.
                    let normalized = line.replace('=', " ");
                    let tokens: Vec<&str> = normalized.split_whitespace().collect();
                    let (Some(key), Some(range)) = (tokens.get(1), tokens.get(2)) else {
                        continue;
                    };
                    builder.protocol = if key.starts_with("tcp") {
                        Some(Protocol::Tcp)
                    } else if key.starts_with("udp") {
                        Some(Protocol::Udp)
                    } else {
                        None
                    };
                    let (start_str, end_str) = match range.split_once('-') {
                        Some((start, end)) => (start, end),
                        None => (*range, *range),
                    };
                    builder.start_port = start_str.parse().ok();
                    builder.end_port = end_str.parse().ok();
                }
                Some("next") => {
                    if let Some(builder) = current.take() {
                        self.finish_service(builder);
                    }
                }
                _ => {}
            }
        }
        if let Some(builder) = current.take() {
            self.finish_service(builder);
        }
    }

    fn finish_service(&mut self, builder: ServiceBuilder) {
        let (Some(protocol), Some(start)) = (builder.protocol, builder.start_port) else {
            warn!(service = %builder.name, "service object has no usable port range, skipping");
            return;
        };
        let end = builder.end_port.unwrap_or(start);
        if start == 0 || end < start {
            warn!(service = %builder.name, start, end, "invalid port range, skipping");
            return;
        }
        self.catalog
            .add_service(ServiceObject::port_range(&builder.name, protocol, start, end));
    }

    // ── Groups ──────────────────────────────────────────────────────

    fn parse_group_section(&mut self, lines: &mut std::str::Lines<'_>, kind: GroupKind) {
        let mut current: Option<String> = None;
        for line in lines.by_ref() {
            let line = line.trim();
            if line == "end" {
                break;
            }
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("edit") => current = Some(unquote(&remainder(line, 1))),
                Some("set") => {
                    if parts.next() != Some("member") {
                        continue;
                    }
                    let Some(group) = current.as_ref() else {
                        continue;
                    };
                    let members = split_quoted(&remainder(line, 2));
                    match kind {
                        GroupKind::Address => {
                            self.catalog.add_address_group(group.clone(), members);
                        }
                        GroupKind::Service => {
                            self.catalog.add_service_group(group.clone(), members);
                        }
                    }
                }
                Some("next") => current = None,
                _ => {}
            }
        }
    }

    // ── Policies ────────────────────────────────────────────────────

    fn parse_policy_section(&mut self, lines: &mut std::str::Lines<'_>) {
        let mut current: Option<PolicyDraft> = None;
        for line in lines.by_ref() {
            let line = line.trim();
            if line == "end" {
                break;
            }
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("edit") => {
                    if let Some(draft) = current.take() {
                        self.drafts.push(draft);
                    }
                    let id = parts.next().unwrap_or_default().to_string();
                    // The edit id doubles as the evaluation priority.
                    let priority = id.parse().unwrap_or(0);
                    current = Some(PolicyDraft {
                        id: PolicyId(id),
                        priority,
                        name: String::new(),
                        action: Action::Deny,
                        enabled: true,
                        src_addr_names: None,
                        dst_addr_names: None,
                        service_names: None,
                    });
                }
                Some("set") => {
                    let Some(draft) = current.as_mut() else {
                        continue;
                    };
                    match parts.next() {
                        Some("name") => draft.name = unquote(&remainder(line, 2)),
                        Some("srcaddr") => {
                            draft
                                .src_addr_names
                                .get_or_insert_with(Vec::new)
                                .extend(split_quoted(&remainder(line, 2)));
                        }
                        Some("dstaddr") => {
                            draft
                                .dst_addr_names
                                .get_or_insert_with(Vec::new)
                                .extend(split_quoted(&remainder(line, 2)));
                        }
                        Some("service") => {
                            draft
                                .service_names
                                .get_or_insert_with(Vec::new)
                                .extend(split_quoted(&remainder(line, 2)));
                        }
                        Some("action") => {
                            if parts.next() == Some("accept") {
                                draft.action = Action::Accept;
                            }
                        }
                        Some("status") => draft.enabled = parts.next() == Some("enable"),
                        _ => {}
                    }
                }
                Some("next") => {
                    if let Some(draft) = current.take() {
                        self.drafts.push(draft);
                    }
                }
                _ => {}
            }
        }
        if let Some(draft) = current.take() {
            self.drafts.push(draft);
        }
    }
}

fn range_kind(builder: &AddressBuilder) -> Option<AddressKind> {
    let (Some(start), Some(end)) = (builder.start_ip, builder.end_ip) else {
        return None;
    };
    if ip::byte_compare(start, end) == std::cmp::Ordering::Greater {
        warn!(object = %builder.name, %start, %end, "inverted IP range, skipping");
        return None;
    }
    Some(AddressKind::Range { start, end })
}

/// Parse `set subnet` arguments: either `<ip> <netmask>` or a single
/// `<ip>[/<len>]`. A non-contiguous netmask invalidates the object.
fn parse_subnet(object: &str, args: &[&str]) -> Option<Cidr> {
    match args {
        [addr, mask] => {
            let addr: std::net::Ipv4Addr = addr.parse().ok()?;
            let mask: std::net::Ipv4Addr = mask.parse().ok()?;
            let Some(prefix_len) = ip::mask_to_prefix(mask) else {
                warn!(object, %mask, "non-contiguous netmask, skipping subnet");
                return None;
            };
            Cidr::v4(addr, prefix_len).ok()
        }
        [cidr] => cidr.parse().ok(),
        _ => None,
    }
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').to_string()
}

/// The rest of the line after the first `keywords` whitespace-separated
/// tokens.
fn remainder(line: &str, keywords: usize) -> String {
    line.split_whitespace()
        .skip(keywords)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a member list where quoted names may contain spaces:
/// `"net a" "net b" plain` → `["net a", "net b", "plain"]`.
fn split_quoted(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_token = false;
    for c in s.chars() {
        if in_quotes {
            if c == '"' {
                in_quotes = false;
            } else {
                current.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
            in_token = true;
        } else if c.is_whitespace() {
            if in_token {
                tokens.push(std::mem::take(&mut current));
                in_token = false;
            }
        } else {
            current.push(c);
            in_token = true;
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}
