// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Zone master file and named.conf fragment rendering.
//!
//! Rendering is pure: the same inputs always produce the same bytes.

use crate::constants::{
    NSUPDATE_KEY_NAME, SOA_ADMIN_MAILBOX, SOA_EXPIRE_SECS, SOA_NEGATIVE_TTL_SECS,
    SOA_REFRESH_SECS, SOA_RETRY_SECS,
};
use crate::zone_data::{ForwardedZone, RecordSet};
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Absolute form of the apex NS host; empty means the root.
#[must_use]
pub fn nameserver_target(nameserver: &str) -> String {
    if nameserver.is_empty() || nameserver == "." {
        ".".to_string()
    } else if nameserver.ends_with('.') {
        nameserver.to_string()
    } else {
        format!("{nameserver}.")
    }
}

/// Render the master file of one zone.
///
/// # Arguments
///
/// * `zone` - Zone name, without trailing dot
/// * `records` - The zone's records, already ordered by name then type
/// * `serial` - SOA serial
/// * `ttl` - `$TTL` and apex NS TTL
/// * `nameserver` - Apex NS host
/// * `modified` - Timestamp recorded in the header comment
#[must_use]
pub fn render_zone_file(
    zone: &str,
    records: &RecordSet,
    serial: u32,
    ttl: u32,
    nameserver: &str,
    modified: &DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "; Zone file modified: {modified}.");
    let _ = writeln!(out, "$TTL {ttl}");
    let _ = writeln!(out, "@   IN    SOA {zone}. {SOA_ADMIN_MAILBOX} (");
    let _ = writeln!(out, "              {serial} ; serial");
    let _ = writeln!(out, "              {SOA_REFRESH_SECS} ; Refresh");
    let _ = writeln!(out, "              {SOA_RETRY_SECS} ; Retry");
    let _ = writeln!(out, "              {SOA_EXPIRE_SECS} ; Expire");
    let _ = writeln!(out, "              {SOA_NEGATIVE_TTL_SECS} ; NXTTL");
    let _ = writeln!(out, "              )");
    out.push('\n');
    let _ = writeln!(out, "@   {ttl} IN NS {}", nameserver_target(nameserver));

    for ((name, rectype), values) in records {
        for (rdata, record_ttl) in values {
            let _ = writeln!(out, "{name} {record_ttl} IN {rectype} {rdata}");
        }
    }
    out
}

/// Inputs of the named.conf fragment.
#[derive(Debug, Clone)]
pub struct NamedConf<'a> {
    /// `controls`/`key` fragment matching the rndc configuration
    pub named_rndc_conf: &'a Path,
    /// TSIG key file referenced by `allow-update`
    pub keys_conf: &'a Path,
    /// Authoritative zones and their master files
    pub zones: Vec<(String, PathBuf)>,
    pub forwarded: &'a [ForwardedZone],
    /// Entries of the `trusted` ACL, before `localnets` and `localhost`
    pub trusted: Vec<String>,
}

impl NamedConf<'_> {
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "include \"{}\";", self.named_rndc_conf.display());
        let _ = writeln!(out, "include \"{}\";", self.keys_conf.display());
        out.push('\n');

        out.push_str("# Authoritative Zone declarations.\n");
        for (zone, file) in &self.zones {
            let _ = writeln!(out, "zone \"{zone}\" {{");
            out.push_str("    type master;\n");
            out.push_str("    # Authoritative zones are never forwarded.\n");
            out.push_str("    forwarders { };\n");
            let _ = writeln!(out, "    file \"{}\";", file.display());
            out.push_str("    allow-update {\n");
            let _ = writeln!(out, "        key {NSUPDATE_KEY_NAME};");
            out.push_str("    };\n");
            out.push_str("};\n\n");
        }

        out.push_str("# Forwarded Zone declarations.\n");
        for zone in self.forwarded {
            let _ = writeln!(out, "zone \"{}\" {{", zone.name);
            out.push_str("    type forward;\n");
            out.push_str("    forward only;\n");
            out.push_str("    forwarders {\n");
            for server in &zone.forwarders {
                let _ = writeln!(out, "        {server};");
            }
            out.push_str("    };\n");
            out.push_str("};\n\n");
        }

        out.push_str("# Access control for recursive queries.  See named.conf.options.inside.maas\n");
        out.push_str("# for the directives used on this ACL.\n");
        out.push_str("acl \"trusted\" {\n");
        for network in &self.trusted {
            let _ = writeln!(out, "    {network};");
        }
        out.push_str("    localnets;\n");
        out.push_str("    localhost;\n");
        out.push_str("};\n");
        out
    }
}

#[cfg(test)]
#[path = "render_tests.rs"]
mod render_tests;
