//! Depth-first expansion of address/service groups into flat axis lists.
//!
//! The visit set is per top-level name and restored on return, so the
//! same group may appear under any number of policies; only a reference
//! cycle is an error. Names that resolve to nothing are dropped and
//! reported to the caller, never silently invented.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::common::entity::Protocol;
use crate::policy::entity::{AddressObject, Policy, PolicyDraft, ServiceObject};
use crate::policy::error::FlattenError;
use crate::services::wellknown;

/// Which axis of a policy a raw name was referenced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Source,
    Destination,
    Service,
}

impl Axis {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "srcaddr",
            Self::Destination => "dstaddr",
            Self::Service => "service",
        }
    }
}

/// A raw member name that resolved to nothing and was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRef {
    pub policy_id: crate::common::entity::PolicyId,
    pub axis: Axis,
    pub name: String,
}

/// Result of flattening a policy set.
#[derive(Debug)]
pub struct FlattenOutcome {
    pub policies: Vec<Policy>,
    pub dropped: Vec<DroppedRef>,
}

/// All named objects and groups a policy source produced, keyed
/// case-sensitively. Only the reserved name `all` is case-insensitive.
#[derive(Debug, Default)]
pub struct ObjectCatalog {
    addresses: HashMap<String, Arc<AddressObject>>,
    address_groups: HashMap<String, Vec<String>>,
    services: HashMap<String, Arc<ServiceObject>>,
    service_groups: HashMap<String, Vec<String>>,
}

impl ObjectCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_address(&mut self, object: AddressObject) {
        self.addresses.insert(object.name.clone(), Arc::new(object));
    }

    pub fn add_address_group(&mut self, name: impl Into<String>, members: Vec<String>) {
        self.address_groups.insert(name.into(), members);
    }

    pub fn add_service(&mut self, object: ServiceObject) {
        self.services.insert(object.name.clone(), Arc::new(object));
    }

    pub fn add_service_group(&mut self, name: impl Into<String>, members: Vec<String>) {
        self.service_groups.insert(name.into(), members);
    }

    pub fn address_count(&self) -> usize {
        self.addresses.len()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Expand every draft's raw name lists into flat axis lists.
    ///
    /// An omitted list (`None`) becomes the universal sentinel; an
    /// explicitly empty list stays empty and its axis never matches.
    pub fn flatten(&self, drafts: Vec<PolicyDraft>) -> Result<FlattenOutcome, FlattenError> {
        let any_addr = Arc::new(AddressObject::any());
        let any_svc = Arc::new(ServiceObject::any());

        let mut policies = Vec::with_capacity(drafts.len());
        let mut dropped = Vec::new();

        for draft in drafts {
            let src_addrs = self.address_axis(
                &draft,
                Axis::Source,
                draft.src_addr_names.as_deref(),
                &any_addr,
                &mut dropped,
            )?;
            let dst_addrs = self.address_axis(
                &draft,
                Axis::Destination,
                draft.dst_addr_names.as_deref(),
                &any_addr,
                &mut dropped,
            )?;
            let services = self.service_axis(
                &draft,
                draft.service_names.as_deref(),
                &any_svc,
                &mut dropped,
            )?;

            policies.push(Policy {
                id: draft.id,
                priority: draft.priority,
                name: draft.name,
                action: draft.action,
                enabled: draft.enabled,
                src_addrs,
                dst_addrs,
                services,
            });
        }

        Ok(FlattenOutcome { policies, dropped })
    }

    fn address_axis(
        &self,
        draft: &PolicyDraft,
        axis: Axis,
        names: Option<&[String]>,
        any: &Arc<AddressObject>,
        dropped: &mut Vec<DroppedRef>,
    ) -> Result<Vec<Arc<AddressObject>>, FlattenError> {
        let Some(names) = names else {
            return Ok(vec![any.clone()]);
        };
        let mut out = Vec::new();
        for name in names {
            let before = out.len();
            let mut visiting = HashSet::new();
            self.expand_address(name, &mut visiting, any, &mut out)
                .map_err(|cycle| FlattenError::CycleDetected {
                    policy_id: draft.id.clone(),
                    name: cycle,
                })?;
            if out.len() == before {
                dropped.push(DroppedRef {
                    policy_id: draft.id.clone(),
                    axis,
                    name: name.clone(),
                });
            }
        }
        Ok(out)
    }

    fn service_axis(
        &self,
        draft: &PolicyDraft,
        names: Option<&[String]>,
        any: &Arc<ServiceObject>,
        dropped: &mut Vec<DroppedRef>,
    ) -> Result<Vec<Arc<ServiceObject>>, FlattenError> {
        let Some(names) = names else {
            return Ok(vec![any.clone()]);
        };
        let mut out = Vec::new();
        for name in names {
            let before = out.len();
            let mut visiting = HashSet::new();
            self.expand_service(name, &mut visiting, any, &mut out)
                .map_err(|cycle| FlattenError::CycleDetected {
                    policy_id: draft.id.clone(),
                    name: cycle,
                })?;
            if out.len() == before {
                dropped.push(DroppedRef {
                    policy_id: draft.id.clone(),
                    axis: Axis::Service,
                    name: name.clone(),
                });
            }
        }
        Ok(out)
    }

    fn expand_address(
        &self,
        name: &str,
        visiting: &mut HashSet<String>,
        any: &Arc<AddressObject>,
        out: &mut Vec<Arc<AddressObject>>,
    ) -> Result<(), String> {
        if name.eq_ignore_ascii_case("all") {
            out.push(any.clone());
            return Ok(());
        }
        if !visiting.insert(name.to_string()) {
            return Err(name.to_string());
        }

        // A name may be both an object and a group; both contribute,
        // object first.
        if let Some(object) = self.addresses.get(name) {
            out.push(object.clone());
        }
        if let Some(members) = self.address_groups.get(name) {
            for member in members {
                self.expand_address(member, visiting, any, out)?;
            }
        }

        visiting.remove(name);
        Ok(())
    }

    fn expand_service(
        &self,
        name: &str,
        visiting: &mut HashSet<String>,
        any: &Arc<ServiceObject>,
        out: &mut Vec<Arc<ServiceObject>>,
    ) -> Result<(), String> {
        if name.eq_ignore_ascii_case("all") {
            out.push(any.clone());
            return Ok(());
        }
        if !visiting.insert(name.to_string()) {
            return Err(name.to_string());
        }

        let mut found = false;
        if let Some(object) = self.services.get(name) {
            out.push(object.clone());
            found = true;
        }
        if let Some(members) = self.service_groups.get(name) {
            for member in members {
                self.expand_service(member, visiting, any, out)?;
            }
            found = true;
        }

        // Names unknown to the source may still be well-known services
        // or the ad-hoc proto_port[-port] shorthand.
        if !found {
            if let Some(entries) = wellknown::lookup(name) {
                for entry in entries {
                    out.push(Arc::new(ServiceObject::port_range(
                        name,
                        entry.protocol,
                        entry.port,
                        entry.port,
                    )));
                }
            } else if let Some(service) = parse_adhoc_service(name) {
                out.push(Arc::new(service));
            }
        }

        visiting.remove(name);
        Ok(())
    }
}

/// Parse the ad-hoc `tcp_<port>` / `udp_<start>-<end>` service syntax.
fn parse_adhoc_service(name: &str) -> Option<ServiceObject> {
    let (proto_str, ports_str) = name.split_once('_')?;
    let protocol = Protocol::parse(proto_str)?;
    let (start_str, end_str) = match ports_str.split_once('-') {
        Some((start, end)) => (start, Some(end)),
        None => (ports_str, None),
    };
    let start: u16 = start_str.parse().ok()?;
    let end: u16 = match end_str {
        Some(e) => e.parse().ok()?,
        None => start,
    };
    if start == 0 || end < start {
        return None;
    }
    Some(ServiceObject::port_range(name, protocol, start, end))
}
