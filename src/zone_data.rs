// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Full forward and reverse record sets for a full reload.
//!
//! [`ZoneDataBuilder::build`] is a pure function of the network model: it
//! never touches the disk or the nameserver. Maps are ordered so that the
//! rendered zone files are byte-for-byte reproducible.

use crate::changelog::DnsRepository;
use crate::dns_errors::RepositoryError;
use crate::model::{
    address_record_type, is_address_type, resolve_ttl, DnsData, DnsResource, Domain, RdnsMode,
    RegionController, Subnet,
};
use crate::network::{
    find_glue_network, generate_glue_networks, glue_records, rev_zone_name, reverse_name,
    rfc2317_parent, split_large_subnet, IPV4_OCTET_ZONE_PREFIX, IPV6_NIBBLE_ZONE_PREFIX,
};
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::debug;

/// `(owner name, record type)`
pub type RecordKey = (String, String);

/// `(rdata, ttl)` values in insertion order
pub type RecordValues = Vec<(String, u32)>;

/// Records of one zone.
pub type RecordSet = BTreeMap<RecordKey, RecordValues>;

/// Record sets keyed by zone name.
pub type ZoneRecords = BTreeMap<String, RecordSet>;

/// Owner name of the zone apex
pub const APEX: &str = "@";

/// A non-authoritative domain resolved through upstream servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedZone {
    pub name: String,
    pub forwarders: Vec<IpAddr>,
}

/// Everything a full reload writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneData {
    pub forward: ZoneRecords,
    pub reverse: ZoneRecords,
    /// `$TTL` of every forward and reverse zone
    pub zone_ttls: BTreeMap<String, u32>,
    pub forwarded: Vec<ForwardedZone>,
    /// Allow-DNS subnets, published in the `trusted` ACL
    pub trusted_networks: Vec<IpNet>,
}

impl ZoneData {
    /// Forward zones followed by reverse zones.
    pub fn zones(&self) -> impl Iterator<Item = (&String, &RecordSet)> {
        self.forward.iter().chain(self.reverse.iter())
    }

    /// TTL of `zone`, `default_ttl` if unknown.
    #[must_use]
    pub fn zone_ttl(&self, zone: &str, default_ttl: u32) -> u32 {
        self.zone_ttls.get(zone).copied().unwrap_or(default_ttl)
    }
}

/// The model rows a full reload is built from.
#[derive(Debug, Clone, Default)]
pub struct ZoneInputs {
    pub domains: Vec<Domain>,
    pub subnets: Vec<Subnet>,
    pub region_controllers: Vec<RegionController>,
    /// Resources keyed by domain id
    pub resources: BTreeMap<u64, Vec<DnsResource>>,
    /// Non-address records keyed by domain id
    pub data: BTreeMap<u64, Vec<DnsData>>,
}

impl ZoneInputs {
    /// Query everything a full reload needs.
    ///
    /// # Errors
    ///
    /// Returns the first [`RepositoryError`] encountered.
    pub async fn fetch(repository: &dyn DnsRepository) -> Result<Self, RepositoryError> {
        let domains = repository.domains().await?;
        let mut resources = BTreeMap::new();
        let mut data = BTreeMap::new();
        for domain in domains.iter().filter(|d| d.authoritative) {
            resources.insert(domain.id, repository.dns_resources(domain.id).await?);
            data.insert(domain.id, repository.dns_data(domain.id).await?);
        }
        Ok(Self {
            subnets: repository.subnets().await?,
            region_controllers: repository.region_controllers().await?,
            domains,
            resources,
            data,
        })
    }
}

fn push_unique(records: &mut RecordSet, key: RecordKey, value: (String, u32)) {
    let values = records.entry(key).or_default();
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Absolute name of `name` inside `zone`.
#[must_use]
pub fn fqdn(name: &str, zone: &str) -> String {
    if name == APEX || name.is_empty() {
        format!("{zone}.")
    } else {
        format!("{name}.{zone}.")
    }
}

/// Builds [`ZoneData`] from [`ZoneInputs`].
#[derive(Debug, Clone, Copy)]
pub struct ZoneDataBuilder {
    default_ttl: u32,
}

impl ZoneDataBuilder {
    #[must_use]
    pub fn new(default_ttl: u32) -> Self {
        Self { default_ttl }
    }

    /// Compute every forward and reverse zone.
    #[must_use]
    pub fn build(&self, inputs: &ZoneInputs) -> ZoneData {
        let mut zone_data = ZoneData::default();

        for domain in &inputs.domains {
            if domain.authoritative {
                let records = self.forward_records(domain, inputs);
                zone_data
                    .zone_ttls
                    .insert(domain.name.clone(), domain.ttl.unwrap_or(self.default_ttl));
                zone_data.forward.insert(domain.name.clone(), records);
            } else if !domain.forward_dns_servers.is_empty() {
                zone_data.forwarded.push(ForwardedZone {
                    name: domain.name.clone(),
                    forwarders: domain.forward_dns_servers.clone(),
                });
            }
        }

        zone_data.reverse = self.reverse_records(&zone_data.forward, &inputs.subnets);
        for zone in zone_data.reverse.keys() {
            zone_data.zone_ttls.insert(zone.clone(), self.default_ttl);
        }

        zone_data.trusted_networks = inputs
            .subnets
            .iter()
            .filter(|subnet| subnet.allow_dns)
            .map(|subnet| subnet.cidr.trunc())
            .collect();

        debug!(
            forward_zones = zone_data.forward.len(),
            reverse_zones = zone_data.reverse.len(),
            forwarded_zones = zone_data.forwarded.len(),
            "Built zone data"
        );
        zone_data
    }

    fn forward_records(&self, domain: &Domain, inputs: &ZoneInputs) -> RecordSet {
        let mut records = RecordSet::new();
        let apex_ttl = domain.ttl.unwrap_or(self.default_ttl);

        for controller in &inputs.region_controllers {
            for ip in &controller.ip_addresses {
                push_unique(
                    &mut records,
                    (APEX.to_string(), address_record_type(ip).to_string()),
                    (ip.to_string(), apex_ttl),
                );
            }
        }

        let resources = inputs.resources.get(&domain.id).map_or(&[][..], Vec::as_slice);
        for resource in resources {
            let ttl = resolve_ttl(self.default_ttl, domain, Some(resource), None);
            for ip in &resource.ip_addresses {
                push_unique(
                    &mut records,
                    (resource.name.clone(), address_record_type(ip).to_string()),
                    (ip.to_string(), ttl),
                );
            }
        }

        let data = inputs.data.get(&domain.id).map_or(&[][..], Vec::as_slice);
        for row in data {
            let resource = resources.iter().find(|r| r.id == row.dnsresource_id);
            let Some(resource) = resource else {
                continue;
            };
            let ttl = resolve_ttl(self.default_ttl, domain, Some(resource), Some(row));
            push_unique(
                &mut records,
                (resource.name.clone(), row.rrtype.clone()),
                (row.rrdata.clone(), ttl),
            );
        }

        records
    }

    fn reverse_records(&self, forward: &ZoneRecords, subnets: &[Subnet]) -> ZoneRecords {
        let mut reverse = ZoneRecords::new();

        let mut chunks: Vec<IpNet> = Vec::new();
        for subnet in subnets.iter().filter(|subnet| subnet.serves_reverse()) {
            chunks.extend(split_large_subnet(subnet.cidr));
            // The enclosing zone answers for the block through its glue
            if subnet.rdns_mode == RdnsMode::Rfc2317 {
                chunks.extend(rfc2317_parent(&subnet.cidr.trunc()));
            }
        }
        chunks.sort();
        chunks.dedup();
        for chunk in &chunks {
            reverse.entry(rev_zone_name(chunk)).or_default();
        }

        for (zone, records) in forward {
            for ((name, rectype), values) in records {
                if !is_address_type(rectype) {
                    continue;
                }
                for (rdata, ttl) in values {
                    let Ok(ip) = rdata.parse::<IpAddr>() else {
                        continue;
                    };
                    // Most specific served chunk wins
                    let Some(chunk) = chunks
                        .iter()
                        .filter(|chunk| chunk.contains(&ip))
                        .max_by_key(|chunk| chunk.prefix_len())
                    else {
                        continue;
                    };
                    if let Some(zone_records) = reverse.get_mut(&rev_zone_name(chunk)) {
                        push_unique(
                            zone_records,
                            (reverse_name(&ip, chunk), "PTR".to_string()),
                            (fqdn(name, zone), *ttl),
                        );
                    }
                }
            }
        }

        let glue = generate_glue_networks(subnets);
        for chunk in chunks.iter().filter(|chunk| carries_glue(chunk)) {
            let Some(zone_records) = reverse.get_mut(&rev_zone_name(chunk)) else {
                continue;
            };
            for glue_net in find_glue_network(chunk, &glue) {
                for (owner, target) in glue_records(&glue_net) {
                    push_unique(
                        zone_records,
                        (owner, "CNAME".to_string()),
                        (target, self.default_ttl),
                    );
                }
            }
        }

        reverse
    }
}

/// Only /24 (IPv4) and /124 (IPv6) zones hold RFC 2317 glue.
fn carries_glue(chunk: &IpNet) -> bool {
    match chunk {
        IpNet::V4(net) => net.prefix_len() == IPV4_OCTET_ZONE_PREFIX,
        IpNet::V6(net) => net.prefix_len() == IPV6_NIBBLE_ZONE_PREFIX,
    }
}

#[cfg(test)]
#[path = "zone_data_tests.rs"]
mod zone_data_tests;
