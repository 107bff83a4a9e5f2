//! Process-wide registry of well-known service names.
//!
//! Built exactly once from the embedded port table, before any policy is
//! flattened. Lookups are case-insensitive. A name may map to several
//! entries (e.g. `domain` registers both TCP/53 and UDP/53).

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::common::entity::Protocol;

/// One `(protocol, port)` a well-known name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceEntry {
    pub protocol: Protocol,
    pub port: u16,
}

/// Stub key for configurations that whitelist ICMP. Resolves to an
/// intentionally unreachable TCP/65535 entry so such policies load and
/// evaluate without ever matching real traffic.
pub const ALL_ICMP: &str = "ALL_ICMP";

const EMBEDDED_TABLE: &str = include_str!("well_known_ports.csv");

static REGISTRY: LazyLock<HashMap<String, Vec<ServiceEntry>>> = LazyLock::new(build_registry);

fn build_registry() -> HashMap<String, Vec<ServiceEntry>> {
    let mut registry: HashMap<String, Vec<ServiceEntry>> = HashMap::new();

    for line in EMBEDDED_TABLE.lines().skip(1) {
        let mut columns = line.split(',');
        let (Some(port_str), Some(tcp_name), Some(udp_name)) =
            (columns.next(), columns.next(), columns.next())
        else {
            continue;
        };
        let Ok(port) = port_str.trim().parse::<u16>() else {
            continue;
        };

        register(&mut registry, tcp_name, Protocol::Tcp, port);
        register(&mut registry, udp_name, Protocol::Udp, port);
    }

    registry.entry(ALL_ICMP.to_string()).or_default().push(ServiceEntry {
        protocol: Protocol::Tcp,
        port: 65535,
    });

    registry
}

fn register(
    registry: &mut HashMap<String, Vec<ServiceEntry>>,
    name: &str,
    protocol: Protocol,
    port: u16,
) {
    let name = name.trim();
    if name.is_empty() || name == "N/A" {
        return;
    }
    let entry = ServiceEntry { protocol, port };
    registry
        .entry(name.to_uppercase())
        .or_default()
        .push(entry);
    if name == "domain" {
        registry.entry("DNS".to_string()).or_default().push(entry);
    }
}

/// Resolve a service name to its registered entries, case-insensitively.
pub fn lookup(name: &str) -> Option<&'static [ServiceEntry]> {
    REGISTRY
        .get(&name.to_uppercase())
        .map(|entries| entries.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let lower = lookup("http").unwrap();
        let upper = lookup("HTTP").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(
            lower,
            &[ServiceEntry {
                protocol: Protocol::Tcp,
                port: 80
            }]
        );
    }

    #[test]
    fn domain_registers_both_protocols() {
        let entries = lookup("domain").unwrap();
        assert!(entries.contains(&ServiceEntry {
            protocol: Protocol::Tcp,
            port: 53
        }));
        assert!(entries.contains(&ServiceEntry {
            protocol: Protocol::Udp,
            port: 53
        }));
    }

    #[test]
    fn dns_alias_mirrors_domain() {
        assert_eq!(lookup("dns"), lookup("domain"));
    }

    #[test]
    fn udp_only_services_have_no_tcp_entry() {
        let entries = lookup("ntp").unwrap();
        assert_eq!(
            entries,
            &[ServiceEntry {
                protocol: Protocol::Udp,
                port: 123
            }]
        );
    }

    #[test]
    fn syslog_is_udp_514() {
        assert_eq!(
            lookup("syslog").unwrap(),
            &[ServiceEntry {
                protocol: Protocol::Udp,
                port: 514
            }]
        );
    }

    #[test]
    fn icmp_stub_is_unreachable_tcp_65535() {
        let entries = lookup("all_icmp").unwrap();
        assert_eq!(
            entries,
            &[ServiceEntry {
                protocol: Protocol::Tcp,
                port: 65535
            }]
        );
    }

    #[test]
    fn unknown_name_misses() {
        assert!(lookup("no-such-service").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn na_placeholder_is_not_a_name() {
        assert!(lookup("N/A").is_none());
    }
}
