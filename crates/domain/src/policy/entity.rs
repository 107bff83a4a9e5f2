use std::cmp::Ordering;
use std::net::IpAddr;
use std::sync::Arc;

use crate::common::entity::{Action, PolicyId, Protocol};
use crate::net::ip::{self, Cidr};

// ── Address objects ─────────────────────────────────────────────────

/// A named L3 object referenced by policy axis lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressObject {
    pub name: String,
    pub kind: AddressKind,
}

/// The universal sentinel is a distinguished variant, not a magic name:
/// objects that happen to be called "all" in a config do not absorb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressKind {
    /// Matches every address.
    Any,
    /// CIDR membership.
    Subnet(Cidr),
    /// Inclusive address range, `start <= end` byte-wise.
    Range { start: IpAddr, end: IpAddr },
    /// Retained for parsing fidelity; never matches in static analysis.
    Fqdn(String),
}

impl AddressObject {
    /// The universal address sentinel.
    pub fn any() -> Self {
        Self {
            name: "all".to_string(),
            kind: AddressKind::Any,
        }
    }

    /// Whether this object covers the given address.
    pub fn covers(&self, addr: IpAddr) -> bool {
        match &self.kind {
            AddressKind::Any => true,
            AddressKind::Subnet(net) => net.contains(addr),
            AddressKind::Range { start, end } => {
                ip::byte_compare(addr, *start) != Ordering::Less
                    && ip::byte_compare(addr, *end) != Ordering::Greater
            }
            AddressKind::Fqdn(_) => false,
        }
    }

    /// Inclusive canonical `[first, last]` of this object, where one
    /// exists. `Any` has no finite range and `Fqdn` no range at all.
    pub fn range(&self) -> Option<([u8; 16], [u8; 16])> {
        match &self.kind {
            AddressKind::Subnet(net) => Some(net.range()),
            AddressKind::Range { start, end } => {
                Some((ip::canonical_bytes(*start), ip::canonical_bytes(*end)))
            }
            AddressKind::Any | AddressKind::Fqdn(_) => None,
        }
    }

    /// Address family, for objects that have one.
    pub fn is_v4(&self) -> Option<bool> {
        match &self.kind {
            AddressKind::Subnet(net) => Some(net.is_v4()),
            AddressKind::Range { start, .. } => Some(start.is_ipv4()),
            AddressKind::Any | AddressKind::Fqdn(_) => None,
        }
    }
}

// ── Service objects ─────────────────────────────────────────────────

/// A named L4 object: a protocol-scoped inclusive port range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceObject {
    pub name: String,
    pub kind: ServiceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceKind {
    /// Matches every `(protocol, port)`.
    Any,
    PortRange {
        protocol: Protocol,
        start: u16,
        end: u16,
    },
}

impl ServiceObject {
    /// The universal service sentinel.
    pub fn any() -> Self {
        Self {
            name: "all".to_string(),
            kind: ServiceKind::Any,
        }
    }

    pub fn port_range(name: &str, protocol: Protocol, start: u16, end: u16) -> Self {
        Self {
            name: name.to_string(),
            kind: ServiceKind::PortRange {
                protocol,
                start,
                end,
            },
        }
    }

    /// Whether this object covers the given `(protocol, port)`.
    /// Port comparisons are inclusive at both ends.
    pub fn covers(&self, protocol: Protocol, port: u16) -> bool {
        match self.kind {
            ServiceKind::Any => true,
            ServiceKind::PortRange {
                protocol: p,
                start,
                end,
            } => p == protocol && port >= start && port <= end,
        }
    }
}

// ── Policies ────────────────────────────────────────────────────────

/// A policy after flattening: three axis lists of shared leaf objects.
/// Smaller priority evaluates first.
#[derive(Debug, Clone)]
pub struct Policy {
    pub id: PolicyId,
    pub priority: i64,
    pub name: String,
    pub action: Action,
    pub enabled: bool,
    pub src_addrs: Vec<Arc<AddressObject>>,
    pub dst_addrs: Vec<Arc<AddressObject>>,
    pub services: Vec<Arc<ServiceObject>>,
}

/// A policy as parsed, before group flattening. Axis lists hold raw
/// member names; `None` means the source omitted the field entirely
/// (defaults to the universal sentinel), while `Some(vec![])` means an
/// explicitly empty list, which never matches.
#[derive(Debug, Clone)]
pub struct PolicyDraft {
    pub id: PolicyId,
    pub priority: i64,
    pub name: String,
    pub action: Action,
    pub enabled: bool,
    pub src_addr_names: Option<Vec<String>>,
    pub dst_addr_names: Option<Vec<String>>,
    pub service_names: Option<Vec<String>>,
}
