// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # dnssync - DNS change-log reconciliation for BIND9
//!
//! dnssync keeps the BIND9 nameservers of every region controller in step
//! with a serial-numbered DNS change log.
//!
//! ## Overview
//!
//! Each reconciliation attempt reads the change records published since the
//! serial a node last applied and either:
//!
//! - rewrites every zone file and `named.conf` fragment (full reload), or
//! - sends the pending changes to `named` through `nsupdate` (dynamic update)
//!
//! then waits until every region controller answers SOA queries with the new
//! serial.
//!
//! ## Modules
//!
//! - [`changelog`] - Change log and network model query interface
//! - [`translator`] - Change-log directives to typed dynamic updates
//! - [`serial`] - Applied serial tracking and pending changes
//! - [`network`] - Subnet splitting and reverse-zone naming
//! - [`zone_data`] - Forward and reverse zone contents
//! - [`bind9`] - Zone rendering, `rndc` and `nsupdate`
//! - [`convergence`] - SOA polling across region controllers
//! - [`reconcilers`] - Activities, node queues, orchestrator and trigger loop
//! - [`hooks`] - Change-log directives from model changes
//!
//! ## Example
//!
//! ```rust,no_run
//! use dnssync::model::ChangeRecord;
//! use dnssync::translator::UpdateTranslator;
//!
//! let record = ChangeRecord {
//!     serial: 7,
//!     update: "UPDATE example.com www A 30 10.0.0.7".to_string(),
//!     created_at: chrono::Utc::now(),
//! };
//! let updates = UpdateTranslator::new(30, Vec::new()).translate(&record).unwrap();
//! assert_eq!(updates.len(), 2);
//! ```

pub mod bind9;
pub mod changelog;
pub mod config;
pub mod constants;
pub mod context;
pub mod convergence;
pub mod dns_errors;
pub mod hooks;
pub mod metrics;
pub mod model;
pub mod network;
pub mod reconcilers;
pub mod serial;
pub mod translator;
pub mod zone_data;

#[cfg(test)]
pub(crate) mod test_support;
