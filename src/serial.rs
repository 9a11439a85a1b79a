// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Applied-serial tracking.
//!
//! The only durable record of how far a node has caught up with the change
//! log is the serial written into the SOA block of its default-domain zone
//! file:
//!
//! ```text
//!               1000 ; serial
//! ```
//!
//! [`SerialTracker`] reads that marker and collects the change records
//! published after it.

use crate::changelog::DnsRepository;
use crate::dns_errors::{DnsError, RepositoryError, ZoneWriteError};
use crate::model::{DynamicUpdate, UpdateOperation};
use crate::translator::UpdateTranslator;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Work found between the applied serial and the head of the change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChanges {
    /// Serial the zones will carry once the work is applied
    pub new_serial: u64,
    /// Incremental updates in serial order; empty when `force_full_reload` is set
    pub updates: Vec<DynamicUpdate>,
    pub force_full_reload: bool,
}

impl PendingChanges {
    /// Nothing to apply.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.force_full_reload && self.updates.is_empty()
    }
}

/// Extract the serial from the SOA block of a rendered zone file.
#[must_use]
pub fn parse_serial_marker(contents: &str) -> Option<u64> {
    contents.lines().find_map(|line| {
        let (value, comment) = line.split_once(';')?;
        if comment.trim() != "serial" {
            return None;
        }
        value.trim().parse().ok()
    })
}

/// Reads the applied serial of one node and diffs it against the change log.
#[derive(Debug, Clone)]
pub struct SerialTracker {
    zone_file: PathBuf,
    default_ttl: u32,
}

impl SerialTracker {
    /// Track the serial stored in `zone_file`.
    #[must_use]
    pub fn new(zone_file: impl Into<PathBuf>, default_ttl: u32) -> Self {
        Self {
            zone_file: zone_file.into(),
            default_ttl,
        }
    }

    #[must_use]
    pub fn zone_file(&self) -> &Path {
        &self.zone_file
    }

    /// Serial of the last successfully written zone file.
    ///
    /// Returns `None` when the file does not exist yet or carries no serial
    /// marker (first boot, lost file).
    ///
    /// # Errors
    ///
    /// Returns [`ZoneWriteError::Io`] if the file exists but cannot be read.
    pub async fn current_serial(&self) -> Result<Option<u64>, ZoneWriteError> {
        match tokio::fs::read_to_string(&self.zone_file).await {
            Ok(contents) => Ok(parse_serial_marker(&contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ZoneWriteError::Io {
                operation: "read",
                path: self.zone_file.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Change records published after `since`, translated in serial order.
    ///
    /// Without a baseline the result forces a full reload at the latest
    /// published serial. A `RELOAD` anywhere in the window also forces a full
    /// reload and discards the incremental updates.
    ///
    /// # Errors
    ///
    /// Returns [`DnsError::Parse`] for a malformed directive,
    /// [`RepositoryError::OutOfOrder`] if the log violates serial ordering,
    /// or any repository failure.
    pub async fn pending_changes(
        &self,
        repository: &dyn DnsRepository,
        since: Option<u64>,
    ) -> Result<PendingChanges, DnsError> {
        let Some(since) = since else {
            let new_serial = repository.latest_serial().await?.unwrap_or(0);
            info!(new_serial, "No applied serial found, forcing full reload");
            return Ok(PendingChanges {
                new_serial,
                updates: Vec::new(),
                force_full_reload: true,
            });
        };

        let records = repository.changes_since(since).await?;
        let translator = UpdateTranslator::new(self.default_ttl, repository.subnets().await?);

        let mut new_serial = since;
        let mut updates = Vec::new();
        let mut force_full_reload = false;
        for record in &records {
            if record.serial <= new_serial {
                return Err(RepositoryError::OutOfOrder {
                    previous: new_serial,
                    next: record.serial,
                }
                .into());
            }
            new_serial = record.serial;

            let translated = translator.translate(record)?;
            if translated
                .iter()
                .any(|update| update.operation == UpdateOperation::Reload)
            {
                force_full_reload = true;
            }
            updates.extend(translated);
        }

        if force_full_reload {
            updates.clear();
        }
        debug!(
            since,
            new_serial,
            records = records.len(),
            updates = updates.len(),
            force_full_reload,
            "Collected pending DNS changes"
        );
        Ok(PendingChanges {
            new_serial,
            updates,
            force_full_reload,
        })
    }

    /// Read the applied serial and collect everything published after it.
    ///
    /// # Errors
    ///
    /// See [`Self::current_serial`] and [`Self::pending_changes`].
    pub async fn pending_since_applied(
        &self,
        repository: &dyn DnsRepository,
    ) -> Result<(Option<u64>, PendingChanges), DnsError> {
        let current = self.current_serial().await?;
        let pending = self.pending_changes(repository, current).await?;
        Ok((current, pending))
    }
}

#[cfg(test)]
#[path = "serial_tests.rs"]
mod serial_tests;
