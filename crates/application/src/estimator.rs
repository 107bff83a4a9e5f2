//! Pre-computes the expected task count. The arithmetic here must
//! mirror the producer exactly, or progress percentages drift; the
//! producer uses `expand_eligible` from this module for that reason.

use domain::net::ip::Cidr;
use domain::traffic::entity::{InputTraffic, MatchMode};

/// Whether the producer will walk this network host by host: expand
/// mode only, and only for blocks with more than one address up to the
/// threshold.
pub fn expand_eligible(network: &Cidr, mode: MatchMode, max_hosts: u64) -> bool {
    if mode != MatchMode::Expand {
        return false;
    }
    let size = network.size();
    size > 1 && size <= u128::from(max_hosts)
}

fn host_count(network: &Cidr, mode: MatchMode, max_hosts: u64) -> u64 {
    if expand_eligible(network, mode, max_hosts) {
        // Eligibility bounds the size by max_hosts, so this fits.
        network.size() as u64
    } else {
        1
    }
}

/// Expected number of tasks the producer will emit.
pub fn estimate_total_tasks(traffic: &InputTraffic, mode: MatchMode, max_hosts: u64) -> u64 {
    let ports = traffic.ports.len() as u64;
    let mut total: u64 = 0;
    for source in &traffic.sources {
        let src_count = host_count(source, mode, max_hosts);
        for destination in &traffic.destinations {
            let dst_count = host_count(&destination.network, mode, max_hosts);
            total = total.saturating_add(src_count.saturating_mul(dst_count).saturating_mul(ports));
        }
    }
    total
}
