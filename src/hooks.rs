// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Change hooks: turn a model mutation into change-log directives.
//!
//! Each hook receives the value before and after the mutation (`None` for an
//! insert or a delete) and decides what, if anything, has to be published.
//! Structural changes (zones appearing, subnets moving) publish `RELOAD`;
//! record-level changes publish incremental directives.

use crate::changelog::DnsRepository;
use crate::dns_errors::RepositoryError;
use crate::model::{address_record_type, ChangeRecord, DnsData, DnsResource, Domain, Subnet};
use crate::translator::{Directive, RecordOwner};
use std::net::IpAddr;
use tracing::debug;

/// Directives for a domain insert, update or delete.
///
/// Only authoritative domains are served, so only their appearance,
/// disappearance, rename or TTL change matters.
#[must_use]
pub fn domain_changed(old: Option<&Domain>, new: Option<&Domain>) -> Vec<Directive> {
    let reload = match (old, new) {
        (None, Some(domain)) | (Some(domain), None) => domain.authoritative,
        (Some(old), Some(new)) => {
            old.authoritative != new.authoritative
                || (new.authoritative && (old.name != new.name || old.ttl != new.ttl))
        }
        (None, None) => false,
    };
    reload_if(reload)
}

/// Directives for a subnet insert, update or delete.
#[must_use]
pub fn subnet_changed(old: Option<&Subnet>, new: Option<&Subnet>) -> Vec<Directive> {
    let reload = match (old, new) {
        (None, Some(subnet)) | (Some(subnet), None) => subnet.serves_reverse(),
        (Some(old), Some(new)) => {
            old.cidr != new.cidr
                || old.rdns_mode != new.rdns_mode
                || old.allow_dns != new.allow_dns
        }
        (None, None) => false,
    };
    reload_if(reload)
}

fn reload_if(reload: bool) -> Vec<Directive> {
    if reload {
        vec![Directive::Reload]
    } else {
        Vec::new()
    }
}

/// Directives for an address being linked to, unlinked from, or changed on a
/// resource.
///
/// `resource` holds the addresses still linked to it. `DELETE-IP` clears both
/// address types at the name, so every surviving address is inserted again
/// after it.
#[must_use]
pub fn address_changed(
    domain: &Domain,
    resource: &DnsResource,
    old: Option<IpAddr>,
    new: Option<IpAddr>,
) -> Vec<Directive> {
    if !domain.authoritative {
        return Vec::new();
    }
    match (old, new) {
        (None, Some(ip)) => vec![address_insert(domain, resource, ip)],
        (Some(ip), None) => unlink(domain, resource, ip, None),
        (Some(before), Some(after)) if before != after => {
            unlink(domain, resource, before, Some(after))
        }
        _ => Vec::new(),
    }
}

fn address_insert(domain: &Domain, resource: &DnsResource, ip: IpAddr) -> Directive {
    Directive::Insert {
        owner: RecordOwner::new(&domain.name, &resource.name, address_record_type(&ip)),
        // 0 is rendered as the default TTL by the translator
        ttl: resource.address_ttl.unwrap_or(0),
        answer: ip.to_string(),
    }
}

fn unlink(
    domain: &Domain,
    resource: &DnsResource,
    removed: IpAddr,
    replacement: Option<IpAddr>,
) -> Vec<Directive> {
    let mut directives = vec![Directive::DeleteIp {
        owner: RecordOwner::new(&domain.name, &resource.name, address_record_type(&removed)),
        ip: removed,
    }];
    directives.extend(
        resource
            .ip_addresses
            .iter()
            .filter(|ip| **ip != removed && Some(**ip) != replacement)
            .map(|ip| address_insert(domain, resource, *ip)),
    );
    directives.extend(replacement.map(|ip| address_insert(domain, resource, ip)));
    directives
}

/// Directives for a resource insert, update or delete.
///
/// A rename moves every record of the resource, which the incremental path
/// cannot express, so it publishes `RELOAD`. Deleting a resource drops its
/// addresses. A new address TTL clears each address type once and inserts
/// every address again.
#[must_use]
pub fn resource_changed(
    domain: &Domain,
    old: Option<&DnsResource>,
    new: Option<&DnsResource>,
) -> Vec<Directive> {
    if !domain.authoritative {
        return Vec::new();
    }
    match (old, new) {
        (Some(old), None) => old
            .ip_addresses
            .iter()
            .map(|ip| Directive::DeleteIp {
                owner: RecordOwner::new(&domain.name, &old.name, address_record_type(ip)),
                ip: *ip,
            })
            .collect(),
        (Some(old), Some(new)) if old.name != new.name || old.domain_id != new.domain_id => {
            vec![Directive::Reload]
        }
        (Some(old), Some(new)) if old.address_ttl != new.address_ttl => {
            let mut families: Vec<&str> = new.ip_addresses.iter().map(address_record_type).collect();
            families.sort_unstable();
            families.dedup();

            let mut directives: Vec<Directive> = families
                .into_iter()
                .map(|rectype| Directive::Delete {
                    owner: RecordOwner::new(&domain.name, &new.name, rectype),
                    value: None,
                })
                .collect();
            directives.extend(new.ip_addresses.iter().map(|ip| address_insert(domain, new, *ip)));
            directives
        }
        // Addresses of a new resource arrive through `address_changed`
        _ => Vec::new(),
    }
}

/// Directives for a non-address record insert, update or delete.
///
/// An update deletes the exact old value before inserting the new one so
/// sibling records of the same type survive.
#[must_use]
pub fn dns_data_changed(
    domain: &Domain,
    resource: &DnsResource,
    old: Option<&DnsData>,
    new: Option<&DnsData>,
) -> Vec<Directive> {
    if !domain.authoritative {
        return Vec::new();
    }
    let owner = |data: &DnsData| RecordOwner::new(&domain.name, &resource.name, &data.rrtype);
    let delete = |data: &DnsData| Directive::Delete {
        owner: owner(data),
        value: Some((data.ttl.unwrap_or(0), data.rrdata.clone())),
    };
    let insert = |data: &DnsData| Directive::Insert {
        owner: owner(data),
        ttl: data.ttl.unwrap_or(0),
        answer: data.rrdata.clone(),
    };

    match (old, new) {
        (None, Some(data)) => vec![insert(data)],
        (Some(data), None) => vec![delete(data)],
        (Some(before), Some(after)) if before != after => vec![delete(before), insert(after)],
        _ => Vec::new(),
    }
}

/// Append `directives` to the change log in order.
///
/// # Errors
///
/// Returns the first [`RepositoryError`]; directives after it are not
/// appended.
pub async fn publish(
    repository: &dyn DnsRepository,
    directives: &[Directive],
) -> Result<Vec<ChangeRecord>, RepositoryError> {
    let mut records = Vec::with_capacity(directives.len());
    for directive in directives {
        let record = repository.append_change(&directive.to_string()).await?;
        debug!(serial = record.serial, directive = %directive, "Published DNS change");
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod hooks_tests;
