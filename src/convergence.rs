// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Confirm that every region controller serves a serial.
//!
//! Each round polls the controllers that have not yet reported the expected
//! serial, concurrently. A controller is tried on each of its addresses in
//! turn until one answers. Rounds are separated by exponential backoff and
//! the number of rounds is bounded.

use crate::config::ConvergenceConfig;
use crate::dns_errors::ConvergenceError;
use crate::metrics;
use crate::model::RegionController;
use crate::reconcilers::retry::ExponentialBackoff;
use futures::future::join_all;
use hickory_client::client::{Client, SyncClient};
use hickory_client::rr::{DNSClass, Name, RData, RecordType};
use hickory_client::udp::UdpClientConnection;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backoff multiplier between poll rounds
const POLL_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Jitter applied to the delay between poll rounds (±10%)
const POLL_RANDOMIZATION_FACTOR: f64 = 0.1;

/// Reads the live SOA serial of a zone from one server.
#[async_trait::async_trait]
pub trait SoaResolver: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ConvergenceError::QueryFailed`] if the server cannot be
    /// reached or its answer holds no SOA record.
    async fn soa_serial(&self, server: IpAddr, zone: &str) -> Result<u64, ConvergenceError>;
}

/// [`SoaResolver`] issuing UDP queries through hickory.
#[derive(Debug, Clone)]
pub struct HickorySoaResolver {
    port: u16,
    timeout: Duration,
}

impl HickorySoaResolver {
    #[must_use]
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait::async_trait]
impl SoaResolver for HickorySoaResolver {
    async fn soa_serial(&self, server: IpAddr, zone: &str) -> Result<u64, ConvergenceError> {
        let server_addr = SocketAddr::new(server, self.port);
        let zone_name = zone.to_string();
        let timeout = self.timeout;
        let query_failed = move |reason: String| ConvergenceError::QueryFailed {
            zone: zone.to_string(),
            server: server_addr.to_string(),
            reason,
        };

        let serial = tokio::task::spawn_blocking(move || {
            let conn = UdpClientConnection::with_timeout(server_addr, timeout)
                .map_err(|e| format!("failed to create UDP connection: {e}"))?;
            let client = SyncClient::new(conn);

            let name = Name::from_str(&zone_name).map_err(|e| format!("invalid zone name: {e}"))?;
            let response = client
                .query(&name, DNSClass::IN, RecordType::SOA)
                .map_err(|e| format!("query failed: {e}"))?;

            response
                .answers()
                .iter()
                .find_map(|record| match record.data() {
                    Some(RData::SOA(soa)) => Some(u64::from(soa.serial())),
                    _ => None,
                })
                .ok_or_else(|| format!("no SOA record in answer ({})", response.response_code()))
        })
        .await
        .map_err(|e| query_failed(format!("query task failed: {e}")))?;

        serial.map_err(query_failed)
    }
}

/// Outcome of a successful wait.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergenceReport {
    /// Poll rounds performed
    pub rounds: u32,
    /// Polls issued per controller system id
    pub polls: BTreeMap<String, u32>,
}

/// Waits until all region controllers report a serial.
#[derive(Clone)]
pub struct ConvergenceChecker {
    resolver: Arc<dyn SoaResolver>,
    zone: String,
    settings: ConvergenceConfig,
}

impl ConvergenceChecker {
    /// Create a checker polling the SOA of `zone`.
    #[must_use]
    pub fn new(resolver: Arc<dyn SoaResolver>, zone: &str, settings: ConvergenceConfig) -> Self {
        Self {
            resolver,
            zone: zone.to_string(),
            settings,
        }
    }

    /// Poll one controller; true once it serves `expected` or newer.
    async fn poll(&self, controller: &RegionController, expected: u64) -> bool {
        for ip in &controller.ip_addresses {
            match self.resolver.soa_serial(*ip, &self.zone).await {
                Ok(serial) if serial >= expected => {
                    metrics::record_convergence_poll("current");
                    return true;
                }
                Ok(serial) => {
                    metrics::record_convergence_poll("stale");
                    debug!(
                        system_id = %controller.system_id,
                        server = %ip,
                        serial,
                        expected,
                        "Region controller is behind"
                    );
                    return false;
                }
                Err(e) => {
                    metrics::record_convergence_poll("error");
                    debug!(system_id = %controller.system_id, error = %e, "SOA query failed");
                }
            }
        }
        false
    }

    /// Wait until every controller serves `expected` or newer.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergenceError::Timeout`] listing the lagging controllers
    /// once `max_rounds` rounds have passed.
    pub async fn wait_for_serial(
        &self,
        controllers: &[RegionController],
        expected: u64,
    ) -> Result<ConvergenceReport, ConvergenceError> {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(self.settings.initial_interval_ms),
            Duration::from_millis(self.settings.max_interval_ms),
            None,
            POLL_BACKOFF_MULTIPLIER,
            POLL_RANDOMIZATION_FACTOR,
        );
        let mut report = ConvergenceReport::default();
        let mut pending: Vec<&RegionController> = controllers.iter().collect();
        let max_rounds = self.settings.max_rounds.max(1);

        for round in 1..=max_rounds {
            report.rounds = round;
            for controller in &pending {
                *report.polls.entry(controller.system_id.clone()).or_default() += 1;
            }

            let converged = join_all(pending.iter().map(|c| self.poll(c, expected))).await;
            pending = pending
                .into_iter()
                .zip(converged)
                .filter_map(|(controller, done)| (!done).then_some(controller))
                .collect();

            if pending.is_empty() {
                info!(serial = expected, rounds = round, "All region controllers converged");
                return Ok(report);
            }
            if round < max_rounds {
                if let Some(delay) = backoff.next_backoff() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let lagging: Vec<String> = pending.iter().map(|c| c.system_id.clone()).collect();
        warn!(serial = expected, lagging = ?lagging, "Region controllers did not converge");
        Err(ConvergenceError::Timeout {
            expected,
            rounds: max_rounds,
            lagging,
        })
    }
}

#[cfg(test)]
#[path = "convergence_tests.rs"]
mod convergence_tests;
