//! Parsers for the three input-traffic files: source networks CSV,
//! destination records CSV, and the ports list.
//!
//! A malformed row is skipped with a warning; a missing `Network
//! Segment` header or an unreadable file is fatal.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use domain::common::entity::Protocol;
use domain::net::ip::Cidr;
use domain::traffic::entity::{Destination, InputTraffic, PortEntry};
use thiserror::Error;
use tracing::warn;

use crate::csvutil;

const NETWORK_SEGMENT_COLUMN: &str = "network segment";

#[derive(Debug, Error)]
pub enum TrafficParseError {
    #[error("cannot read {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}: missing 'Network Segment' column")]
    MissingNetworkColumn { file: String },

    #[error("{file}: no header row")]
    Empty { file: String },
}

/// Parse all three input files into one `InputTraffic`.
pub fn load(
    src_path: &Path,
    dst_path: &Path,
    ports_path: &Path,
) -> Result<InputTraffic, TrafficParseError> {
    let sources = parse_sources(open(src_path)?, &src_path.display().to_string())?;
    let destinations = parse_destinations(open(dst_path)?, &dst_path.display().to_string())?;
    let ports = parse_ports(open(ports_path)?, &ports_path.display().to_string())?;
    Ok(InputTraffic {
        sources,
        destinations,
        ports,
    })
}

fn open(path: &Path) -> Result<BufReader<File>, TrafficParseError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TrafficParseError::Io {
            file: path.display().to_string(),
            source,
        })
}

/// Parse the source networks CSV. Only the `Network Segment` column is
/// read; a bare IP becomes a host route.
pub fn parse_sources<R: BufRead>(
    reader: R,
    file: &str,
) -> Result<Vec<Cidr>, TrafficParseError> {
    let mut lines = read_lines(reader, file)?.into_iter();
    let header = lines.next().ok_or_else(|| TrafficParseError::Empty {
        file: file.to_string(),
    })?;
    let column = find_network_column(&header).ok_or_else(|| {
        TrafficParseError::MissingNetworkColumn {
            file: file.to_string(),
        }
    })?;

    let mut networks = Vec::new();
    for (row, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = csvutil::split_record(&line);
        let Some(cell) = record.get(column) else {
            warn!(file, row = row + 2, "row has too few columns, skipping");
            continue;
        };
        match cell.trim().parse::<Cidr>() {
            Ok(network) => networks.push(network),
            Err(_) => {
                warn!(file, row = row + 2, value = %cell.trim(), "invalid network, skipping row");
            }
        }
    }
    Ok(networks)
}

/// Parse the destination CSV. Every column is preserved as metadata
/// under `dst_<lowercased column>`; only the network column is parsed.
pub fn parse_destinations<R: BufRead>(
    reader: R,
    file: &str,
) -> Result<Vec<Destination>, TrafficParseError> {
    let mut lines = read_lines(reader, file)?.into_iter();
    let header = lines.next().ok_or_else(|| TrafficParseError::Empty {
        file: file.to_string(),
    })?;
    let columns: Vec<String> = csvutil::split_record(&header)
        .iter()
        .map(|c| c.trim().to_lowercase())
        .collect();
    let network_column = columns
        .iter()
        .position(|c| c == NETWORK_SEGMENT_COLUMN)
        .ok_or_else(|| TrafficParseError::MissingNetworkColumn {
            file: file.to_string(),
        })?;

    let mut destinations = Vec::new();
    for (row, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = csvutil::split_record(&line);
        let Some(cell) = record.get(network_column) else {
            warn!(file, row = row + 2, "row has too few columns, skipping");
            continue;
        };
        let network = match cell.trim().parse::<Cidr>() {
            Ok(network) => network,
            Err(_) => {
                warn!(file, row = row + 2, value = %cell.trim(), "invalid network, skipping row");
                continue;
            }
        };

        let mut metadata = HashMap::new();
        for (index, column) in columns.iter().enumerate() {
            if let Some(value) = record.get(index) {
                metadata.insert(format!("dst_{column}"), value.clone());
            }
        }
        destinations.push(Destination {
            network,
            metadata: Arc::new(metadata),
        });
    }
    Ok(destinations)
}

/// Parse the ports list. Each line is `label,port/proto` or bare
/// `port/proto` (the label then defaults to the whole line).
pub fn parse_ports<R: BufRead>(
    reader: R,
    file: &str,
) -> Result<Vec<PortEntry>, TrafficParseError> {
    let mut ports = Vec::new();
    for (row, line) in read_lines(reader, file)?.into_iter().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (label, port_proto) = match line.split_once(',') {
            Some((label, rest)) => (label.trim(), rest.trim()),
            None => (line, line),
        };
        let Some((port_str, proto_str)) = port_proto.split_once('/') else {
            warn!(file, row = row + 1, line, "expected port/proto, skipping line");
            continue;
        };
        let Ok(port) = port_str.trim().parse::<u16>() else {
            warn!(file, row = row + 1, value = port_str, "invalid port, skipping line");
            continue;
        };
        if port == 0 {
            warn!(file, row = row + 1, "port 0 out of range, skipping line");
            continue;
        }
        let Some(protocol) = Protocol::parse(proto_str.trim()) else {
            warn!(file, row = row + 1, value = proto_str, "unsupported protocol, skipping line");
            continue;
        };

        ports.push(PortEntry {
            label: label.to_string(),
            port,
            protocol,
        });
    }
    Ok(ports)
}

fn read_lines<R: BufRead>(reader: R, file: &str) -> Result<Vec<String>, TrafficParseError> {
    reader
        .lines()
        .map(|line| {
            line.map(|l| l.trim_end_matches('\r').to_string())
                .map_err(|source| TrafficParseError::Io {
                    file: file.to_string(),
                    source,
                })
        })
        .collect()
}

fn find_network_column(header: &str) -> Option<usize> {
    csvutil::split_record(header)
        .iter()
        .position(|column| column.trim().eq_ignore_ascii_case("Network Segment"))
}
