// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the DNS reconciliation engine.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// DNS Protocol Constants
// ============================================================================

/// Standard DNS port for SOA polling
pub const DNS_PORT: u16 = 53;

/// TTL used when neither the record, its resource nor its domain carries one
pub const DEFAULT_DNS_RECORD_TTL_SECS: u32 = 30;

/// SOA refresh interval written into every zone
pub const SOA_REFRESH_SECS: u32 = 600;

/// SOA retry interval written into every zone
pub const SOA_RETRY_SECS: u32 = 1800;

/// SOA expire time (7 days)
pub const SOA_EXPIRE_SECS: u32 = 604_800;

/// SOA negative-caching TTL
pub const SOA_NEGATIVE_TTL_SECS: u32 = 30;

/// Mailbox used in the SOA RNAME field
pub const SOA_ADMIN_MAILBOX: &str = "nobody.example.com.";

/// Name of the TSIG key BIND9 accepts dynamic updates from
pub const NSUPDATE_KEY_NAME: &str = "maas.";

/// Zone polled for convergence and holding the applied-serial marker
pub const DEFAULT_DOMAIN_NAME: &str = "maas";

/// Resource record types that carry an address and have a reverse mapping
pub const ADDRESS_RECORD_TYPES: [&str; 2] = ["A", "AAAA"];

// ============================================================================
// File Layout Constants
// ============================================================================

/// Default directory for generated BIND9 configuration fragments
pub const DEFAULT_DNS_CONFIG_DIR: &str = "/etc/bind/maas";

/// Default directory for generated zone master files
pub const DEFAULT_ZONE_FILE_DIR: &str = "/var/lib/bind/maas";

/// Zone declarations fragment included from named.conf
pub const NAMED_CONF_NAME: &str = "named.conf.maas";

/// rndc client configuration
pub const RNDC_CONF_NAME: &str = "rndc.conf.maas";

/// `controls`/`key` fragment for named matching the rndc configuration
pub const NAMED_RNDC_CONF_NAME: &str = "named.conf.rndc.maas";

/// TSIG key used by nsupdate and referenced by `allow-update`
pub const NSUPDATE_KEYS_NAME: &str = "keys.conf.maas";

/// Prefix of each zone master file name
pub const ZONE_FILE_PREFIX: &str = "zone.";

/// Suffix appended to a target path while it is being written
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

// ============================================================================
// Subprocess Constants
// ============================================================================

/// rndc executable
pub const RNDC_EXECUTABLE: &str = "rndc";

/// nsupdate executable
pub const NSUPDATE_EXECUTABLE: &str = "nsupdate";

/// Default timeout for a single rndc/nsupdate invocation
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Default server nsupdate sends its transactions to
pub const DEFAULT_NSUPDATE_SERVER: &str = "localhost";

// ============================================================================
// Convergence Constants
// ============================================================================

/// Maximum number of SOA poll rounds before giving up
pub const DEFAULT_CONVERGENCE_MAX_ROUNDS: u32 = 10;

/// Delay before the second poll round
pub const DEFAULT_CONVERGENCE_INITIAL_INTERVAL_MILLIS: u64 = 500;

/// Upper bound on the delay between poll rounds
pub const DEFAULT_CONVERGENCE_MAX_INTERVAL_MILLIS: u64 = 10_000;

/// Timeout for a single SOA query
pub const DEFAULT_SOA_QUERY_TIMEOUT_MILLIS: u64 = 2_000;

// ============================================================================
// Reconciler Constants
// ============================================================================

/// Consecutive failed attempts after which an operator alert is raised
pub const DEFAULT_ESCALATE_AFTER_FAILURES: u32 = 5;

/// Capacity of each node's task queue
pub const NODE_QUEUE_CAPACITY: usize = 16;

/// Capacity of the explicit reconciliation request channel
pub const RECONCILE_REQUEST_CAPACITY: usize = 8;

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Default bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0:9090";
