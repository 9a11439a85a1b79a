// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The change log and the query interface over the network model.
//!
//! The reconciliation engine never owns the network model. It reads domains,
//! subnets, records and region controllers through [`DnsRepository`] and
//! consumes the append-only change log through the same trait. Appending a
//! change is the only event that wakes the trigger loop.
//!
//! [`MemoryRepository`] is a snapshot-backed implementation used by the
//! binary and the test suite.

use crate::dns_errors::RepositoryError;
use crate::model::{ChangeRecord, DnsData, DnsResource, Domain, RegionController, Subnet};
use anyhow::{Context as _, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

/// Read-only queries plus the append command of the change log.
///
/// All queries of one reconciliation attempt are expected to see a
/// read-committed snapshot; no transaction spans multiple calls.
#[async_trait::async_trait]
pub trait DnsRepository: Send + Sync {
    /// All domains, authoritative or forwarded.
    async fn domains(&self) -> Result<Vec<Domain>, RepositoryError>;

    /// All subnets. Callers filter on `allow_dns` / `rdns_mode`.
    async fn subnets(&self) -> Result<Vec<Subnet>, RepositoryError>;

    /// Region controllers and the addresses their nameservers listen on.
    async fn region_controllers(&self) -> Result<Vec<RegionController>, RepositoryError>;

    /// Resources owned by one domain.
    async fn dns_resources(&self, domain_id: u64) -> Result<Vec<DnsResource>, RepositoryError>;

    /// Non-address records of every resource owned by one domain.
    async fn dns_data(&self, domain_id: u64) -> Result<Vec<DnsData>, RepositoryError>;

    /// Change records with `serial > since`, ordered by serial ascending.
    async fn changes_since(&self, since: u64) -> Result<Vec<ChangeRecord>, RepositoryError>;

    /// Highest serial in the change log, `None` while it is empty.
    async fn latest_serial(&self) -> Result<Option<u64>, RepositoryError>;

    /// Append a directive under the next serial and wake subscribers.
    async fn append_change(&self, update: &str) -> Result<ChangeRecord, RepositoryError>;

    /// Receiver that observes the latest appended serial.
    fn subscribe_changes(&self) -> watch::Receiver<u64>;
}

/// A full copy of the network model plus the change log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub domains: Vec<Domain>,
    pub subnets: Vec<Subnet>,
    pub region_controllers: Vec<RegionController>,
    pub dns_resources: Vec<DnsResource>,
    pub dns_data: Vec<DnsData>,
    pub changes: Vec<ChangeRecord>,
}

/// In-memory [`DnsRepository`] over a [`Snapshot`].
pub struct MemoryRepository {
    state: RwLock<Snapshot>,
    latest: watch::Sender<u64>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new(mut snapshot: Snapshot) -> Self {
        snapshot.changes.sort_by_key(|change| change.serial);
        let latest = snapshot.changes.last().map_or(0, |change| change.serial);
        let (tx, _rx) = watch::channel(latest);
        Self {
            state: RwLock::new(snapshot),
            latest: tx,
        }
    }

    /// Load a snapshot from a YAML file, or JSON when the extension is `.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not deserialize.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read repository snapshot {}", path.display()))?;
        let snapshot: Snapshot = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&raw).with_context(|| {
                format!("Failed to parse repository snapshot {}", path.display())
            })?
        } else {
            serde_yaml::from_str(&raw).with_context(|| {
                format!("Failed to parse repository snapshot {}", path.display())
            })?
        };
        info!(
            path = %path.display(),
            domains = snapshot.domains.len(),
            subnets = snapshot.subnets.len(),
            changes = snapshot.changes.len(),
            "Loaded repository snapshot"
        );
        Ok(Self::new(snapshot))
    }

    /// Apply `mutate` to the model under the write lock.
    ///
    /// Changes to the model do not append to the change log; pair them with
    /// [`DnsRepository::append_change`] the way the change hooks do.
    pub async fn modify<F>(&self, mutate: F)
    where
        F: FnOnce(&mut Snapshot),
    {
        let mut state = self.state.write().await;
        mutate(&mut *state);
    }

    /// Clone of the current model and change log.
    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.clone()
    }
}

#[async_trait::async_trait]
impl DnsRepository for MemoryRepository {
    async fn domains(&self) -> Result<Vec<Domain>, RepositoryError> {
        Ok(self.state.read().await.domains.clone())
    }

    async fn subnets(&self) -> Result<Vec<Subnet>, RepositoryError> {
        Ok(self.state.read().await.subnets.clone())
    }

    async fn region_controllers(&self) -> Result<Vec<RegionController>, RepositoryError> {
        Ok(self.state.read().await.region_controllers.clone())
    }

    async fn dns_resources(&self, domain_id: u64) -> Result<Vec<DnsResource>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .dns_resources
            .iter()
            .filter(|resource| resource.domain_id == domain_id)
            .cloned()
            .collect())
    }

    async fn dns_data(&self, domain_id: u64) -> Result<Vec<DnsData>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .dns_data
            .iter()
            .filter(|data| {
                state
                    .dns_resources
                    .iter()
                    .any(|r| r.id == data.dnsresource_id && r.domain_id == domain_id)
            })
            .cloned()
            .collect())
    }

    async fn changes_since(&self, since: u64) -> Result<Vec<ChangeRecord>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .changes
            .iter()
            .filter(|change| change.serial > since)
            .cloned()
            .collect())
    }

    async fn latest_serial(&self) -> Result<Option<u64>, RepositoryError> {
        Ok(self.state.read().await.changes.last().map(|c| c.serial))
    }

    async fn append_change(&self, update: &str) -> Result<ChangeRecord, RepositoryError> {
        let record = {
            let mut state = self.state.write().await;
            let serial = state.changes.last().map_or(1, |c| c.serial + 1);
            let record = ChangeRecord {
                serial,
                update: update.to_string(),
                created_at: Utc::now(),
            };
            state.changes.push(record.clone());
            record
        };
        debug!(serial = record.serial, update = %record.update, "Appended change record");
        self.latest.send_replace(record.serial);
        Ok(record)
    }

    fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.latest.subscribe()
    }
}

#[cfg(test)]
#[path = "changelog_tests.rs"]
mod changelog_tests;
