use std::collections::HashSet;

use crate::tool::RawPort;
use crate::types::PortResult;

/// Normalize a host's raw port entries for the job result.
///
/// - protocols keep the order in which the scan tool first reported them
/// - within a protocol, ports are sorted ascending
/// - a repeated `(protocol, port)` pair keeps its first entry
/// - missing state becomes `"unknown"`, missing service becomes `""`
pub fn normalize_ports(raw: Vec<RawPort>) -> Vec<PortResult> {
    let mut protocols: Vec<String> = Vec::new();
    for p in &raw {
        if !protocols.contains(&p.protocol) {
            protocols.push(p.protocol.clone());
        }
    }

    let mut seen = HashSet::new();
    let mut deduped: Vec<RawPort> = Vec::with_capacity(raw.len());
    for p in raw {
        if seen.insert((p.protocol.clone(), p.port)) {
            deduped.push(p);
        }
    }

    // Stable sort: group rank first, then port number.
    deduped.sort_by_key(|p| {
        let rank = protocols
            .iter()
            .position(|proto| *proto == p.protocol)
            .unwrap_or(usize::MAX);
        (rank, p.port)
    });

    deduped
        .into_iter()
        .map(|p| PortResult {
            port: p.port,
            protocol: p.protocol,
            state: p.state.unwrap_or_else(crate::types::unknown_state),
            service: p.service.unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(port: u16, protocol: &str) -> RawPort {
        RawPort {
            port,
            protocol: protocol.into(),
            state: Some("open".into()),
            service: None,
        }
    }

    #[test]
    fn sorts_within_protocol() {
        let out = normalize_ports(vec![raw(443, "tcp"), raw(22, "tcp"), raw(80, "tcp")]);
        let ports: Vec<u16> = out.iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![22, 80, 443]);
    }

    #[test]
    fn keeps_reported_protocol_order() {
        let out = normalize_ports(vec![
            raw(161, "udp"),
            raw(80, "tcp"),
            raw(53, "udp"),
            raw(22, "tcp"),
        ]);
        let got: Vec<(&str, u16)> = out.iter().map(|p| (p.protocol.as_str(), p.port)).collect();
        assert_eq!(got, vec![("udp", 53), ("udp", 161), ("tcp", 22), ("tcp", 80)]);
    }

    #[test]
    fn fills_defaults_and_drops_duplicates() {
        let out = normalize_ports(vec![
            RawPort {
                port: 8080,
                protocol: "tcp".into(),
                state: None,
                service: None,
            },
            raw(8080, "tcp"),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].state, "unknown");
        assert_eq!(out[0].service, "");
    }

    #[test]
    fn empty_input() {
        assert!(normalize_ports(Vec::new()).is_empty());
    }
}
