// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reverse-zone geometry.
//!
//! BIND9 reverse zones follow label boundaries: whole octets for IPv4
//! (`1.2.10.in-addr.arpa`) and whole nibbles for IPv6. This module splits
//! subnets into zone-sized chunks, names those zones, names the reverse owner
//! of each address, and computes the RFC 2317 glue that delegates blocks
//! smaller than one label (an IPv4 /24 or an IPv6 /124) out of their
//! enclosing zone.
//!
//! The zone names produced here are written byte-for-byte into `named.conf`
//! and into nsupdate transactions, so every caller must go through these
//! functions rather than format reverse names itself.

use crate::model::{RdnsMode, Subnet};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Longest IPv4 prefix served from an octet-aligned zone.
pub const IPV4_OCTET_ZONE_PREFIX: u8 = 24;

/// Longest IPv6 prefix served from a nibble-aligned zone.
pub const IPV6_NIBBLE_ZONE_PREFIX: u8 = 124;

/// Suffix of IPv4 reverse zones
pub const IPV4_REVERSE_SUFFIX: &str = "in-addr.arpa";

/// Suffix of IPv6 reverse zones
pub const IPV6_REVERSE_SUFFIX: &str = "ip6.arpa";

/// Glue sub-blocks keyed by the base address of their enclosing zone.
pub type GlueMap = BTreeMap<IpAddr, BTreeSet<IpNet>>;

/// True for networks smaller than one reverse label: IPv4 longer than /24,
/// IPv6 longer than /124. They get an RFC 2317 style zone of their own.
#[must_use]
pub fn is_rfc2317_sized(network: &IpNet) -> bool {
    match network {
        IpNet::V4(net) => net.prefix_len() > IPV4_OCTET_ZONE_PREFIX,
        IpNet::V6(net) => net.prefix_len() > IPV6_NIBBLE_ZONE_PREFIX,
    }
}

/// The label-aligned zone (/24 or /124) enclosing an RFC 2317 sized network.
#[must_use]
pub fn rfc2317_parent(network: &IpNet) -> Option<IpNet> {
    if !is_rfc2317_sized(network) {
        return None;
    }
    let parent = match network {
        IpNet::V4(net) => IpNet::V4(Ipv4Net::new(net.network(), IPV4_OCTET_ZONE_PREFIX).ok()?),
        IpNet::V6(net) => IpNet::V6(Ipv6Net::new(net.network(), IPV6_NIBBLE_ZONE_PREFIX).ok()?),
    };
    Some(parent.trunc())
}

/// Prefix length of the zone-sized chunks `network` is split into.
///
/// Prefixes round up to the next octet (IPv4) or nibble (IPv6) boundary.
/// RFC 2317 sized networks are kept whole.
fn zone_prefix_len(network: &IpNet) -> u8 {
    let prefix = network.prefix_len();
    if is_rfc2317_sized(network) {
        return prefix;
    }
    match network {
        IpNet::V4(_) => prefix.div_ceil(8).max(1) * 8,
        IpNet::V6(_) => prefix.div_ceil(4).max(1) * 4,
    }
}

/// Split a subnet into blocks no larger than one reverse zone.
///
/// A /22 becomes four /24s. Subnets that already fit a single zone come back
/// as a single element.
#[must_use]
pub fn split_large_subnet(network: IpNet) -> Vec<IpNet> {
    let network = network.trunc();
    let target = zone_prefix_len(&network);
    if network.prefix_len() >= target {
        return vec![network];
    }
    match network.subnets(target) {
        Ok(chunks) => chunks.collect(),
        Err(_) => vec![network],
    }
}

/// The zone-sized chunk of `subnet` that contains `ip`.
#[must_use]
pub fn zone_chunk_for(ip: &IpAddr, subnet: &IpNet) -> Option<IpNet> {
    if !subnet.contains(ip) {
        return None;
    }
    split_large_subnet(*subnet)
        .into_iter()
        .find(|chunk| chunk.contains(ip))
}

/// Name of the reverse zone serving `network`.
///
/// Octet-aligned IPv4 networks give `"{c}.{b}.{a}.in-addr.arpa"`; IPv4
/// networks longer than /24 give `"{start}-{prefixlen}.{c}.{b}.{a}.in-addr.arpa"`.
/// IPv6 networks give the reversed nibbles of their prefix under `ip6.arpa`;
/// longer than /124 the last nibble becomes `"{start}-{prefixlen}"`.
#[must_use]
pub fn rev_zone_name(network: &IpNet) -> String {
    match network.trunc() {
        IpNet::V4(net) => {
            let octets = net.network().octets();
            let prefix = net.prefix_len();
            if prefix > IPV4_OCTET_ZONE_PREFIX {
                format!(
                    "{}-{}.{}.{}.{}.{IPV4_REVERSE_SUFFIX}",
                    octets[3], prefix, octets[2], octets[1], octets[0]
                )
            } else {
                let count = usize::from(prefix / 8);
                join_reversed(octets[..count].iter().map(u8::to_string), IPV4_REVERSE_SUFFIX)
            }
        }
        IpNet::V6(net) => {
            let prefix = net.prefix_len();
            let nibbles = ipv6_nibbles(&net.network());
            if prefix > IPV6_NIBBLE_ZONE_PREFIX {
                let upper = join_reversed(
                    nibbles[..31].iter().map(|n| format!("{n:x}")),
                    IPV6_REVERSE_SUFFIX,
                );
                format!("{:x}-{prefix}.{upper}", nibbles[31])
            } else {
                let count = usize::from(prefix / 4);
                join_reversed(
                    nibbles[..count].iter().map(|n| format!("{n:x}")),
                    IPV6_REVERSE_SUFFIX,
                )
            }
        }
    }
}

fn join_reversed<I>(labels: I, suffix: &str) -> String
where
    I: DoubleEndedIterator<Item = String>,
{
    let mut parts: Vec<String> = labels.rev().collect();
    parts.push(suffix.to_string());
    parts.join(".")
}

fn ipv6_nibbles(addr: &Ipv6Addr) -> Vec<u8> {
    addr.octets()
        .iter()
        .flat_map(|byte| [byte >> 4, byte & 0x0f])
        .collect()
}

/// Absolute reverse owner name of `ip` inside the zone serving `chunk`.
///
/// Inside an RFC 2317 zone the host label sits below the zone's own
/// `start-prefixlen` label, e.g. `5.0-28.1.2.10.in-addr.arpa.`.
#[must_use]
pub fn reverse_name(ip: &IpAddr, chunk: &IpNet) -> String {
    if !(is_rfc2317_sized(chunk) && chunk.contains(ip)) {
        return full_reverse_name(ip);
    }
    match ip {
        IpAddr::V4(v4) => format!("{}.{}.", v4.octets()[3], rev_zone_name(chunk)),
        IpAddr::V6(v6) => format!("{:x}.{}.", ipv6_nibbles(v6)[31], rev_zone_name(chunk)),
    }
}

/// Absolute label-per-octet (IPv4) or label-per-nibble (IPv6) reverse name.
fn full_reverse_name(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => octet_reverse_name(v4),
        IpAddr::V6(v6) => {
            let nibbles = ipv6_nibbles(v6);
            let name = join_reversed(nibbles.iter().map(|n| format!("{n:x}")), IPV6_REVERSE_SUFFIX);
            format!("{name}.")
        }
    }
}

fn octet_reverse_name(ip: &Ipv4Addr) -> String {
    let octets = ip.octets();
    format!(
        "{}.{}.{}.{}.{IPV4_REVERSE_SUFFIX}.",
        octets[3], octets[2], octets[1], octets[0]
    )
}

/// Group RFC 2317 subnets by the zone that has to carry their glue.
///
/// Only allow-DNS subnets in RFC 2317 mode that are smaller than one label
/// need glue; it lives in the enclosing /24 (IPv4) or /124 (IPv6).
#[must_use]
pub fn generate_glue_networks(subnets: &[Subnet]) -> GlueMap {
    let mut glue = GlueMap::new();
    for subnet in subnets {
        if subnet.rdns_mode != RdnsMode::Rfc2317 || !subnet.allow_dns {
            continue;
        }
        let net = subnet.cidr.trunc();
        let Some(parent) = rfc2317_parent(&net) else {
            continue;
        };
        glue.entry(parent.network()).or_default().insert(net);
    }
    glue
}

/// The glue sub-blocks that fall inside `network`.
///
/// Blocks nested inside another selected block are dropped, so the result is
/// the minimal set of delegations the zone for `network` has to carry.
#[must_use]
pub fn find_glue_network(network: &IpNet, glue: &GlueMap) -> BTreeSet<IpNet> {
    let candidates: BTreeSet<IpNet> = glue
        .iter()
        .filter(|(base, _)| network.contains(*base))
        .flat_map(|(_, nets)| nets.iter().copied())
        .filter(|net| net != network && network.contains(net))
        .collect();

    candidates
        .iter()
        .filter(|net| {
            !candidates
                .iter()
                .any(|other| other != *net && other.contains(*net))
        })
        .copied()
        .collect()
}

/// RFC 2317 CNAME glue for one delegated block.
///
/// Returns `(owner, target)` pairs: every address of `glue_net` named in the
/// enclosing zone, pointing at its name inside the delegated zone.
#[must_use]
pub fn glue_records(glue_net: &IpNet) -> Vec<(String, String)> {
    let glue_net = glue_net.trunc();
    if !is_rfc2317_sized(&glue_net) {
        return Vec::new();
    }
    let Ok(hosts) = glue_net.subnets(glue_net.max_prefix_len()) else {
        return Vec::new();
    };
    hosts
        .map(|host| {
            let ip = host.addr();
            (full_reverse_name(&ip), reverse_name(&ip, &glue_net))
        })
        .collect()
}

#[cfg(test)]
#[path = "network_tests.rs"]
mod network_tests;
