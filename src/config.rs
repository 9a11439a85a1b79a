// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Engine configuration.
//!
//! Configuration is read from an optional YAML file and then overridden by
//! environment variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `MAAS_DNS_CONFIG_DIR` | `dns_config_dir` |
//! | `MAAS_ZONE_FILE_CONFIG_DIR` | `zone_file_dir` |
//! | `MAAS_DNS_DEFAULT_TTL` | `default_ttl` |
//! | `MAAS_SYSTEM_ID` | `system_id` |

use crate::constants::{
    DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_CONVERGENCE_INITIAL_INTERVAL_MILLIS,
    DEFAULT_CONVERGENCE_MAX_INTERVAL_MILLIS, DEFAULT_CONVERGENCE_MAX_ROUNDS,
    DEFAULT_DNS_CONFIG_DIR, DEFAULT_DNS_RECORD_TTL_SECS, DEFAULT_DOMAIN_NAME,
    DEFAULT_ESCALATE_AFTER_FAILURES, DEFAULT_NSUPDATE_SERVER, DEFAULT_SOA_QUERY_TIMEOUT_MILLIS,
    DEFAULT_ZONE_FILE_DIR, DNS_PORT, METRICS_SERVER_BIND_ADDRESS, NAMED_CONF_NAME,
    NAMED_RNDC_CONF_NAME, NSUPDATE_KEYS_NAME, RNDC_CONF_NAME, ZONE_FILE_PREFIX,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const ENV_DNS_CONFIG_DIR: &str = "MAAS_DNS_CONFIG_DIR";
pub const ENV_ZONE_FILE_DIR: &str = "MAAS_ZONE_FILE_CONFIG_DIR";
pub const ENV_DEFAULT_TTL: &str = "MAAS_DNS_DEFAULT_TTL";
pub const ENV_SYSTEM_ID: &str = "MAAS_SYSTEM_ID";

/// SOA polling budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub max_rounds: u32,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub query_timeout_ms: u64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_CONVERGENCE_MAX_ROUNDS,
            initial_interval_ms: DEFAULT_CONVERGENCE_INITIAL_INTERVAL_MILLIS,
            max_interval_ms: DEFAULT_CONVERGENCE_MAX_INTERVAL_MILLIS,
            query_timeout_ms: DEFAULT_SOA_QUERY_TIMEOUT_MILLIS,
        }
    }
}

impl ConvergenceConfig {
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Configuration of one region controller's reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// System id of the local region controller
    pub system_id: String,
    pub dns_config_dir: PathBuf,
    pub zone_file_dir: PathBuf,
    pub default_ttl: u32,
    /// Zone whose file carries the applied serial and whose SOA is polled
    pub default_domain: String,
    /// Apex NS host; empty renders as the root `.`
    pub nameserver: String,
    pub nsupdate_server: String,
    pub dns_port: u16,
    pub command_timeout_secs: u64,
    /// Extra entries of the `trusted` ACL
    pub trusted_acl: Vec<String>,
    pub convergence: ConvergenceConfig,
    pub metrics_bind_address: String,
    pub escalate_after_failures: u32,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            system_id: String::new(),
            dns_config_dir: PathBuf::from(DEFAULT_DNS_CONFIG_DIR),
            zone_file_dir: PathBuf::from(DEFAULT_ZONE_FILE_DIR),
            default_ttl: DEFAULT_DNS_RECORD_TTL_SECS,
            default_domain: DEFAULT_DOMAIN_NAME.to_string(),
            nameserver: String::new(),
            nsupdate_server: DEFAULT_NSUPDATE_SERVER.to_string(),
            dns_port: DNS_PORT,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            trusted_acl: Vec::new(),
            convergence: ConvergenceConfig::default(),
            metrics_bind_address: METRICS_SERVER_BIND_ADDRESS.to_string(),
            escalate_after_failures: DEFAULT_ESCALATE_AFTER_FAILURES,
        }
    }
}

impl DnsConfig {
    /// Load from `path` (if given) and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// holds an invalid value.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        debug!(?config, "Loaded DNS configuration");
        Ok(config)
    }

    /// Override fields from `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Returns an error if `MAAS_DNS_DEFAULT_TTL` is not a number.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DNS_CONFIG_DIR) {
            self.dns_config_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_ZONE_FILE_DIR) {
            self.zone_file_dir = PathBuf::from(dir);
        }
        if let Some(ttl) = lookup(ENV_DEFAULT_TTL) {
            self.default_ttl = ttl
                .parse()
                .with_context(|| format!("Invalid {ENV_DEFAULT_TTL} '{ttl}'"))?;
        }
        if let Some(system_id) = lookup(ENV_SYSTEM_ID) {
            self.system_id = system_id;
        }
        Ok(())
    }

    #[must_use]
    pub fn named_conf_path(&self) -> PathBuf {
        self.dns_config_dir.join(NAMED_CONF_NAME)
    }

    #[must_use]
    pub fn rndc_conf_path(&self) -> PathBuf {
        self.dns_config_dir.join(RNDC_CONF_NAME)
    }

    #[must_use]
    pub fn named_rndc_conf_path(&self) -> PathBuf {
        self.dns_config_dir.join(NAMED_RNDC_CONF_NAME)
    }

    #[must_use]
    pub fn nsupdate_keys_path(&self) -> PathBuf {
        self.dns_config_dir.join(NSUPDATE_KEYS_NAME)
    }

    /// Master file of `zone`.
    #[must_use]
    pub fn zone_file_path(&self, zone: &str) -> PathBuf {
        self.zone_file_dir.join(format!("{ZONE_FILE_PREFIX}{zone}"))
    }

    /// Master file carrying the applied serial.
    #[must_use]
    pub fn serial_zone_file_path(&self) -> PathBuf {
        self.zone_file_path(&self.default_domain)
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
