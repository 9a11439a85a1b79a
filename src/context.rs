// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for node-local activities.
//!
//! Every activity receives an `Arc<Context>` that contains:
//! - The engine configuration
//! - The change log and network model query interface
//! - The local BIND9 manager
//! - The convergence checker
//! - The retry policy applied to each activity

use crate::bind9::{Bind9Manager, CommandRunner};
use crate::changelog::DnsRepository;
use crate::config::DnsConfig;
use crate::convergence::{ConvergenceChecker, SoaResolver};
use crate::reconcilers::retry::RetryPolicy;
use crate::serial::SerialTracker;
use crate::zone_data::ZoneDataBuilder;
use std::sync::Arc;

/// Shared context passed to all activities.
#[derive(Clone)]
pub struct Context {
    pub config: DnsConfig,

    /// Change log and network model
    pub repository: Arc<dyn DnsRepository>,

    /// `rndc`/`nsupdate` against the local nameserver
    pub bind9: Bind9Manager,

    /// SOA polling across region controllers
    pub convergence: ConvergenceChecker,

    pub retry_policy: RetryPolicy,
}

impl Context {
    /// Build a context from its seams.
    #[must_use]
    pub fn new(
        config: DnsConfig,
        repository: Arc<dyn DnsRepository>,
        runner: Arc<dyn CommandRunner>,
        resolver: Arc<dyn SoaResolver>,
    ) -> Self {
        let convergence = ConvergenceChecker::new(
            resolver,
            &config.default_domain,
            config.convergence.clone(),
        );
        Self {
            bind9: Bind9Manager::new(&config, runner),
            convergence,
            repository,
            retry_policy: RetryPolicy::default(),
            config,
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Tracker reading this node's applied serial.
    #[must_use]
    pub fn serial_tracker(&self) -> SerialTracker {
        SerialTracker::new(self.config.serial_zone_file_path(), self.config.default_ttl)
    }

    #[must_use]
    pub fn zone_data_builder(&self) -> ZoneDataBuilder {
        ZoneDataBuilder::new(self.config.default_ttl)
    }
}
