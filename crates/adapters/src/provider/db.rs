//! Policy provider backed by a policy database (SQLite).
//!
//! Schema, one row per object:
//!   cfg_address(object_name, address_type, subnet, start_ip, end_ip)
//!   cfg_address_group(group_name, members)   -- members: JSON array
//!   cfg_service_group(group_name, members)   -- members: JSON array
//!   cfg_policy(priority, policy_id, src_objects, dst_objects,
//!              service_objects, action, is_enabled)
//!
//! A NULL member list means the axis was omitted (defaults to `all`);
//! an empty JSON array `[]` is an explicitly empty axis that never
//! matches.

use std::path::Path;

use domain::common::entity::{Action, PolicyId};
use domain::policy::entity::{AddressKind, AddressObject, Policy, PolicyDraft};
use domain::policy::error::PolicyLoadError;
use domain::policy::flatten::ObjectCatalog;
use ports::secondary::policy_provider::PolicyProvider;
use rusqlite::Connection;
use tracing::warn;

pub struct DbPolicyProvider {
    conn: Connection,
}

impl DbPolicyProvider {
    pub fn open(path: &Path) -> Result<Self, PolicyLoadError> {
        let conn = Connection::open(path).map_err(backend)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }
}

impl PolicyProvider for DbPolicyProvider {
    fn provide(&mut self) -> Result<Vec<Policy>, PolicyLoadError> {
        let mut catalog = ObjectCatalog::new();
        load_addresses(&self.conn, &mut catalog)?;
        load_groups(&self.conn, &mut catalog, "cfg_address_group", GroupTable::Address)?;
        load_groups(&self.conn, &mut catalog, "cfg_service_group", GroupTable::Service)?;
        let drafts = load_policies(&self.conn)?;

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

enum GroupTable {
    Address,
    Service,
}

fn load_addresses(conn: &Connection, catalog: &mut ObjectCatalog) -> Result<(), PolicyLoadError> {
    let mut stmt = conn
        .prepare("SELECT object_name, address_type, subnet, start_ip, end_ip FROM cfg_address")
        .map_err(backend)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })
        .map_err(backend)?;

    for row in rows {
        let (name, address_type, subnet, start_ip, end_ip) = row.map_err(backend)?;
        let kind = match address_type.as_str() {
            "ipmask" => subnet.as_deref().and_then(|s| s.parse().ok().map(AddressKind::Subnet)),
            "iprange" => match (
                start_ip.as_deref().and_then(|s| s.parse().ok()),
                end_ip.as_deref().and_then(|s| s.parse().ok()),
            ) {
                (Some(start), Some(end))
                    if domain::net::ip::byte_compare(start, end) != std::cmp::Ordering::Greater =>
                {
                    Some(AddressKind::Range { start, end })
                }
                _ => None,
            },
            "fqdn" => Some(AddressKind::Fqdn(String::new())),
            _ => None,
        };
        match kind {
            Some(kind) => catalog.add_address(AddressObject { name, kind }),
            None => {
                warn!(object = %name, kind = %address_type, "unusable address row, skipping");
            }
        }
    }
    Ok(())
}

fn load_groups(
    conn: &Connection,
    catalog: &mut ObjectCatalog,
    table: &str,
    which: GroupTable,
) -> Result<(), PolicyLoadError> {
    let mut stmt = conn
        .prepare(&format!("SELECT group_name, members FROM {table}"))
        .map_err(backend)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(backend)?;

    for row in rows {
        let (name, members_json) = row.map_err(backend)?;
        let members: Vec<String> = match serde_json::from_str(&members_json) {
            Ok(members) => members,
            Err(error) => {
                warn!(group = %name, %error, "invalid member list JSON, skipping group");
                continue;
            }
        };
        match which {
            GroupTable::Address => catalog.add_address_group(name, members),
            GroupTable::Service => catalog.add_service_group(name, members),
        }
    }
    Ok(())
}

fn load_policies(conn: &Connection) -> Result<Vec<PolicyDraft>, PolicyLoadError> {
    let mut stmt = conn
        .prepare(
            "SELECT priority, policy_id, src_objects, dst_objects, service_objects, \
             action, is_enabled FROM cfg_policy ORDER BY priority ASC",
        )
        .map_err(backend)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })
        .map_err(backend)?;

    let mut drafts = Vec::new();
    for row in rows {
        let (priority, policy_id, src, dst, services, action, is_enabled) =
            row.map_err(backend)?;
        let id = PolicyId(policy_id.to_string());
        drafts.push(PolicyDraft {
            priority,
            action: if action == "accept" {
                Action::Accept
            } else {
                Action::Deny
            },
            enabled: is_enabled == "enable",
            name: String::new(),
            src_addr_names: member_names(&id, "src_objects", src),
            dst_addr_names: member_names(&id, "dst_objects", dst),
            service_names: member_names(&id, "service_objects", services),
            id,
        });
    }
    Ok(drafts)
}

/// NULL stays `None` (omitted axis); a JSON array parses verbatim, so
/// `[]` survives as an explicitly empty list.
fn member_names(id: &PolicyId, column: &str, raw: Option<String>) -> Option<Vec<String>> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(names) => Some(names),
        Err(error) => {
            warn!(policy_id = %id, column, %error, "invalid member list JSON, treating as omitted");
            None
        }
    }
}

fn backend(error: rusqlite::Error) -> PolicyLoadError {
    PolicyLoadError::Backend(error.to_string())
}
