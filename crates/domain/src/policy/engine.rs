//! First-match-wins policy evaluation over an immutable, priority-sorted
//! table, plus a CIDR-granularity precheck that classifies a whole
//! source × destination pair without enumerating hosts.

use std::net::IpAddr;
use std::sync::Arc;

use crate::common::entity::{Action, Decision, MatchReason, PolicyId, Protocol};
use crate::net::ip::Cidr;
use crate::policy::entity::{AddressObject, Policy, ServiceObject};
use crate::traffic::entity::Task;

/// The policy a verdict landed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPolicy {
    pub id: PolicyId,
    pub action: Action,
}

/// Outcome of evaluating one task. `matched` is `None` exactly when the
/// decision is the implicit deny.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub matched: Option<MatchedPolicy>,
    pub reason: MatchReason,
}

/// Classification of a CIDR pair by the precheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecheckStatus {
    /// Every host pair is denied (full deny, or nothing matches).
    Skip,
    /// Every host pair is allowed by the named policy.
    AllowAll,
    /// The decision boundary lies inside the pair; enumerate hosts.
    Expand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precheck {
    pub status: PrecheckStatus,
    pub policy: Option<MatchedPolicy>,
    pub reason: &'static str,
}

/// How a policy's address list relates to a queried CIDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coverage {
    None,
    Partial,
    Full,
}

/// Immutable, priority-ordered policy table. Built once, then shared
/// read-only across workers; nothing here is ever mutated after
/// construction.
#[derive(Debug)]
pub struct PolicyEngine {
    policies: Vec<Policy>,
}

impl PolicyEngine {
    /// Sort policies by ascending priority (stable: equal priorities
    /// keep source order) and freeze the table.
    pub fn new(mut policies: Vec<Policy>) -> Self {
        policies.sort_by_key(|p| p.priority);
        Self { policies }
    }

    /// The sorted table, mostly for inspection and tests.
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Decide one flow. Pure: a given engine and task always produce
    /// the same verdict.
    pub fn evaluate(&self, task: &Task) -> Verdict {
        for policy in self.policies.iter().filter(|p| p.enabled) {
            if Self::matches(policy, task) {
                let (decision, reason) = match policy.action {
                    Action::Accept => (Decision::Allow, MatchReason::PolicyAccept),
                    Action::Deny => (Decision::Deny, MatchReason::PolicyDeny),
                };
                return Verdict {
                    decision,
                    matched: Some(MatchedPolicy {
                        id: policy.id.clone(),
                        action: policy.action,
                    }),
                    reason,
                };
            }
        }
        Verdict {
            decision: Decision::Deny,
            matched: None,
            reason: MatchReason::ImplicitDeny,
        }
    }

    /// Classify a whole (src CIDR, dst CIDR) pair at one (port, proto)
    /// without enumerating hosts.
    ///
    /// The first enabled policy that matches the service and overlaps
    /// both address axes settles it: if it spans both CIDRs completely
    /// the first-match outcome is uniform across every host pair;
    /// a partial overlap means the boundary is inside and the caller
    /// must expand.
    pub fn precheck(&self, src: &Cidr, dst: &Cidr, port: u16, protocol: Protocol) -> Precheck {
        for policy in self.policies.iter().filter(|p| p.enabled) {
            if !Self::service_matches(&policy.services, protocol, port) {
                continue;
            }
            let src_rel = address_relation(&policy.src_addrs, src);
            if src_rel == Coverage::None {
                continue;
            }
            let dst_rel = address_relation(&policy.dst_addrs, dst);
            if dst_rel == Coverage::None {
                continue;
            }

            let matched = Some(MatchedPolicy {
                id: policy.id.clone(),
                action: policy.action,
            });
            if src_rel != Coverage::Full || dst_rel != Coverage::Full {
                return Precheck {
                    status: PrecheckStatus::Expand,
                    policy: matched,
                    reason: "PRECHECK_PARTIAL",
                };
            }
            return match policy.action {
                Action::Accept => Precheck {
                    status: PrecheckStatus::AllowAll,
                    policy: matched,
                    reason: "PRECHECK_ALLOW_ALL",
                },
                Action::Deny => Precheck {
                    status: PrecheckStatus::Skip,
                    policy: matched,
                    reason: "PRECHECK_DENY",
                },
            };
        }
        Precheck {
            status: PrecheckStatus::Skip,
            policy: None,
            reason: "PRECHECK_IMPLICIT_DENY",
        }
    }

    fn matches(policy: &Policy, task: &Task) -> bool {
        Self::address_matches(&policy.src_addrs, task.src_ip)
            && Self::address_matches(&policy.dst_addrs, task.dst_ip)
            && Self::service_matches(&policy.services, task.protocol, task.port)
    }

    /// An axis matches iff its list is non-empty and some element
    /// covers the address. An explicitly empty axis is vacuously false.
    fn address_matches(addrs: &[Arc<AddressObject>], ip: IpAddr) -> bool {
        addrs.iter().any(|addr| addr.covers(ip))
    }

    fn service_matches(services: &[Arc<ServiceObject>], protocol: Protocol, port: u16) -> bool {
        services.iter().any(|svc| svc.covers(protocol, port))
    }
}

/// Relation of an address list to a CIDR: `Full` if any element (or a
/// universal sentinel) spans it, `None` if nothing overlaps, `Partial`
/// otherwise. Ranges in different address families never overlap.
fn address_relation(addrs: &[Arc<AddressObject>], cidr: &Cidr) -> Coverage {
    let (cidr_first, cidr_last) = cidr.range();
    let mut partial = false;

    for addr in addrs {
        if matches!(addr.kind, crate::policy::entity::AddressKind::Any) {
            return Coverage::Full;
        }
        let Some((first, last)) = addr.range() else {
            continue;
        };
        if addr.is_v4() != Some(cidr.is_v4()) {
            continue;
        }
        match range_relation(first, last, cidr_first, cidr_last) {
            Coverage::Full => return Coverage::Full,
            Coverage::Partial => partial = true,
            Coverage::None => {}
        }
    }

    if partial { Coverage::Partial } else { Coverage::None }
}

fn range_relation(
    range_first: [u8; 16],
    range_last: [u8; 16],
    cidr_first: [u8; 16],
    cidr_last: [u8; 16],
) -> Coverage {
    if range_last < cidr_first || range_first > cidr_last {
        return Coverage::None;
    }
    if range_first <= cidr_first && range_last >= cidr_last {
        return Coverage::Full;
    }
    Coverage::Partial
}
