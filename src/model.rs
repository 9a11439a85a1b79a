// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Data model consumed by the reconciliation engine.
//!
//! These types mirror the relational rows the engine reads through the
//! [`DnsRepository`](crate::changelog::DnsRepository) query interface. They are
//! plain values: nothing here holds a reference into another row, lookups go
//! through ids.

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// One entry of the append-only publication ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Strictly increasing, never reused
    pub serial: u64,
    /// Directive text, see [`Directive`](crate::translator::Directive)
    pub update: String,
    /// Commit time
    pub created_at: DateTime<Utc>,
}

/// The action of a [`DynamicUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateOperation {
    /// Abandon the incremental path and rebuild every zone
    Reload,
    /// Add a record
    Insert,
    /// Replace every record of a name/type with a new one
    Update,
    /// Remove a record (instance-level when an answer is present, type-level otherwise)
    Delete,
}

impl UpdateOperation {
    /// Uppercase name as used in the ledger grammar.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reload => "RELOAD",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for UpdateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured change derived from a [`ChangeRecord`].
///
/// `ip`, `subnet` and `rev_zone` are only populated for address records; they
/// route the matching PTR change into the right reverse zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicUpdate {
    pub operation: UpdateOperation,
    pub zone: String,
    /// Owner name relative to `zone`, `@` for the apex
    pub name: String,
    pub rectype: String,
    pub ttl: Option<u32>,
    pub answer: Option<String>,
    pub ip: Option<IpAddr>,
    pub subnet: Option<IpNet>,
    pub rev_zone: Option<String>,
}

impl DynamicUpdate {
    /// The update that forces a full reload.
    #[must_use]
    pub fn reload() -> Self {
        Self::new(UpdateOperation::Reload, "", "", "")
    }

    /// A bare update with no TTL, answer or reverse routing.
    #[must_use]
    pub fn new(operation: UpdateOperation, zone: &str, name: &str, rectype: &str) -> Self {
        Self {
            operation,
            zone: zone.to_string(),
            name: name.to_string(),
            rectype: rectype.to_string(),
            ttl: None,
            answer: None,
            ip: None,
            subnet: None,
            rev_zone: None,
        }
    }

    /// True for A and AAAA updates.
    #[must_use]
    pub fn is_address(&self) -> bool {
        is_address_type(&self.rectype)
    }
}

/// True for the record types that carry an address.
#[must_use]
pub fn is_address_type(rectype: &str) -> bool {
    crate::constants::ADDRESS_RECORD_TYPES.contains(&rectype)
}

/// The record type an address is published under.
#[must_use]
pub fn address_record_type(ip: &IpAddr) -> &'static str {
    match ip {
        IpAddr::V4(_) => "A",
        IpAddr::V6(_) => "AAAA",
    }
}

/// A DNS domain. Authoritative domains become master zones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: u64,
    pub name: String,
    /// Default TTL for records in this zone
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default = "default_true")]
    pub authoritative: bool,
    /// Upstream servers for a non-authoritative (forwarded) domain
    #[serde(default)]
    pub forward_dns_servers: Vec<IpAddr>,
}

/// A named owner within a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsResource {
    pub id: u64,
    /// Name relative to the domain, `@` for the apex
    pub name: String,
    pub domain_id: u64,
    #[serde(default)]
    pub address_ttl: Option<u32>,
    /// Addresses published as A/AAAA records
    #[serde(default)]
    pub ip_addresses: Vec<IpAddr>,
}

/// A non-address record attached to a [`DnsResource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsData {
    pub id: u64,
    pub dnsresource_id: u64,
    pub rrtype: String,
    pub rrdata: String,
    #[serde(default)]
    pub ttl: Option<u32>,
}

/// Reverse DNS generation mode of a subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RdnsMode {
    /// No reverse zone
    Disabled,
    /// Reverse zone for the subnet
    Enabled,
    /// Reverse zone plus RFC 2317 glue in the enclosing /24
    #[default]
    Rfc2317,
}

/// An IP subnet known to the network model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: u64,
    pub cidr: IpNet,
    #[serde(default)]
    pub rdns_mode: RdnsMode,
    #[serde(default = "default_true")]
    pub allow_dns: bool,
}

impl Subnet {
    /// True when the subnet contributes a reverse zone.
    #[must_use]
    pub fn serves_reverse(&self) -> bool {
        self.allow_dns && self.rdns_mode != RdnsMode::Disabled
    }
}

/// A region controller whose nameserver must converge on every serial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionController {
    pub system_id: String,
    #[serde(default)]
    pub ip_addresses: Vec<IpAddr>,
}

fn default_true() -> bool {
    true
}

/// Resolve the effective TTL of a record.
///
/// The first present value wins: the record's own TTL, the resource's
/// address TTL (address records only), the domain TTL, then the global default.
#[must_use]
pub fn resolve_ttl(
    default_ttl: u32,
    domain: &Domain,
    resource: Option<&DnsResource>,
    data: Option<&DnsData>,
) -> u32 {
    if let Some(ttl) = data.and_then(|d| d.ttl) {
        return ttl;
    }
    if data.is_none() {
        if let Some(ttl) = resource.and_then(|r| r.address_ttl) {
            return ttl;
        }
    }
    domain.ttl.unwrap_or(default_ttl)
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod model_tests;
