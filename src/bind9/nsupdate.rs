// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Incremental updates through `nsupdate`.
//!
//! One transaction is sent per zone touched, each ending with an SOA record
//! carrying the new serial. The zone holding the applied-serial marker always
//! receives a transaction so its SOA follows the change log even when no
//! record in it changed.
//!
//! RFC 2136 makes the primitives idempotent: deleting an absent record and
//! adding an identical record are both no-ops, so a batch can be re-sent
//! after a crash without corrupting the zone.

use super::rndc::{CommandRunner, Rndc};
use crate::config::DnsConfig;
use crate::constants::{
    NSUPDATE_EXECUTABLE, SOA_ADMIN_MAILBOX, SOA_EXPIRE_SECS, SOA_REFRESH_SECS, SOA_RETRY_SECS,
};
use crate::dns_errors::{DnsError, ZoneWriteError};
use crate::metrics;
use crate::model::{DynamicUpdate, UpdateOperation};
use crate::network::{reverse_name, zone_chunk_for};
use crate::zone_data::fqdn;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// One `update` line of an nsupdate script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateLine {
    Add {
        name: String,
        ttl: u32,
        rectype: String,
        rdata: String,
    },
    /// Instance-level when `rdata` is present, type-level otherwise
    Delete {
        name: String,
        rectype: String,
        rdata: Option<String>,
    },
}

impl fmt::Display for UpdateLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add {
                name,
                ttl,
                rectype,
                rdata,
            } => write!(f, "update add {name} {ttl} {rectype} {rdata}"),
            Self::Delete {
                name,
                rectype,
                rdata: Some(rdata),
            } => write!(f, "update delete {name} {rectype} {rdata}"),
            Self::Delete {
                name,
                rectype,
                rdata: None,
            } => write!(f, "update delete {name} {rectype}"),
        }
    }
}

/// The updates sent to one zone in a single nsupdate invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneTransaction {
    pub zone: String,
    pub lines: Vec<UpdateLine>,
}

impl ZoneTransaction {
    fn new(zone: &str) -> Self {
        Self {
            zone: zone.to_string(),
            lines: Vec::new(),
        }
    }

    /// The nsupdate script for this transaction.
    #[must_use]
    pub fn script(&self, server: &str, serial: u32, ttl: u32) -> String {
        let zone = &self.zone;
        let mut script = vec![format!("server {server}"), format!("zone {zone}")];
        script.extend(self.lines.iter().map(ToString::to_string));
        script.push(format!(
            "update add {zone}. {ttl} SOA {zone}. {SOA_ADMIN_MAILBOX} {serial} \
             {SOA_REFRESH_SECS} {SOA_RETRY_SECS} {SOA_EXPIRE_SECS} {ttl}"
        ));
        script.push("send\n".to_string());
        script.join("\n")
    }
}

fn transaction<'a>(transactions: &'a mut Vec<ZoneTransaction>, zone: &str) -> &'a mut ZoneTransaction {
    let index = match transactions.iter().position(|t| t.zone == zone) {
        Some(index) => index,
        None => {
            transactions.push(ZoneTransaction::new(zone));
            transactions.len() - 1
        }
    };
    &mut transactions[index]
}

/// Reverse zone and owner of the PTR matching an address update.
fn reverse_target(update: &DynamicUpdate) -> Option<(String, String)> {
    if !update.is_address() {
        return None;
    }
    let ip = update.ip?;
    let chunk = zone_chunk_for(&ip, &update.subnet?)?;
    let rev_zone = update.rev_zone.clone()?;
    Some((rev_zone, reverse_name(&ip, &chunk)))
}

/// Applies [`DynamicUpdate`] batches to the local nameserver.
#[derive(Clone)]
pub struct DynamicUpdater {
    runner: Arc<dyn CommandRunner>,
    rndc: Rndc,
    server: String,
    keys_path: PathBuf,
    default_ttl: u32,
    serial_zone: String,
}

impl DynamicUpdater {
    #[must_use]
    pub fn new(config: &DnsConfig, runner: Arc<dyn CommandRunner>, rndc: Rndc) -> Self {
        Self {
            runner,
            rndc,
            server: config.nsupdate_server.clone(),
            keys_path: config.nsupdate_keys_path(),
            default_ttl: config.default_ttl,
            serial_zone: config.default_domain.clone(),
        }
    }

    /// Group `updates` into per-zone transactions, in order of first appearance.
    ///
    /// The serial zone's transaction always comes last, so its SOA only
    /// moves once every other zone of the batch has been updated.
    ///
    /// # Errors
    ///
    /// Returns [`DnsError::InvalidUpdate`] for a `RELOAD` or an `INSERT`
    /// without an answer.
    pub fn plan(&self, updates: &[DynamicUpdate]) -> Result<Vec<ZoneTransaction>, DnsError> {
        let mut transactions = Vec::new();

        for update in updates {
            let owner = fqdn(&update.name, &update.zone);
            let ttl = update.ttl.unwrap_or(self.default_ttl);
            let lines = &mut transaction(&mut transactions, &update.zone).lines;

            match update.operation {
                UpdateOperation::Reload => {
                    return Err(DnsError::InvalidUpdate(
                        "RELOAD cannot be applied as a dynamic update".to_string(),
                    ));
                }
                UpdateOperation::Insert | UpdateOperation::Update => {
                    let answer = update.answer.clone().ok_or_else(|| {
                        DnsError::InvalidUpdate(format!(
                            "{} {owner} {} has no answer",
                            update.operation, update.rectype
                        ))
                    })?;
                    if update.operation == UpdateOperation::Update {
                        lines.push(UpdateLine::Delete {
                            name: owner.clone(),
                            rectype: update.rectype.clone(),
                            rdata: None,
                        });
                    }
                    lines.push(UpdateLine::Add {
                        name: owner.clone(),
                        ttl,
                        rectype: update.rectype.clone(),
                        rdata: answer,
                    });
                }
                UpdateOperation::Delete => lines.push(UpdateLine::Delete {
                    name: owner.clone(),
                    rectype: update.rectype.clone(),
                    rdata: update.answer.clone(),
                }),
            }

            if let Some((rev_zone, rev_name)) = reverse_target(update) {
                let line = if update.operation == UpdateOperation::Delete {
                    UpdateLine::Delete {
                        name: rev_name,
                        rectype: "PTR".to_string(),
                        rdata: Some(owner),
                    }
                } else {
                    UpdateLine::Add {
                        name: rev_name,
                        ttl,
                        rectype: "PTR".to_string(),
                        rdata: owner,
                    }
                };
                transaction(&mut transactions, &rev_zone).lines.push(line);
            }
        }

        let serial_transaction = match transactions.iter().position(|t| t.zone == self.serial_zone) {
            Some(index) => transactions.remove(index),
            None => ZoneTransaction::new(&self.serial_zone),
        };
        transactions.push(serial_transaction);
        Ok(transactions)
    }

    /// Apply `updates` and bump every touched zone to `serial`.
    ///
    /// # Errors
    ///
    /// Returns [`DnsError::InvalidUpdate`] for batches that cannot be applied
    /// incrementally, [`ZoneWriteError::SerialOutOfRange`] for serials beyond
    /// 32 bits, and [`DnsError::Command`] when nsupdate or `rndc sync` fails.
    pub async fn apply(&self, updates: &[DynamicUpdate], serial: u64) -> Result<(), DnsError> {
        let soa_serial =
            u32::try_from(serial).map_err(|_| ZoneWriteError::SerialOutOfRange { serial })?;
        let transactions = self.plan(updates)?;

        for transaction in &transactions {
            let mut args = vec!["-k".to_string(), self.keys_path.display().to_string()];
            if transaction.lines.len() > 1 {
                // TCP for bulk payloads
                args.push("-v".to_string());
            }
            let script = transaction.script(&self.server, soa_serial, self.default_ttl);

            if let Err(e) = self.runner.run(NSUPDATE_EXECUTABLE, &args, Some(&script)).await {
                error!(zone = %transaction.zone, serial, error = %e, "Dynamic update of DNS failed");
                return Err(e.into());
            }

            let added = transaction
                .lines
                .iter()
                .filter(|line| matches!(line, UpdateLine::Add { .. }))
                .count();
            metrics::record_dynamic_update_lines("add", added);
            metrics::record_dynamic_update_lines("delete", transaction.lines.len() - added);
            debug!(zone = %transaction.zone, lines = transaction.lines.len(), "Sent dynamic update");
        }

        self.rndc.sync().await?;
        info!(
            serial,
            updates = updates.len(),
            zones = transactions.len(),
            "Applied dynamic updates"
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "nsupdate_tests.rs"]
mod nsupdate_tests;
