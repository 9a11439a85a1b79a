// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Node-local activities.
//!
//! Each activity is a single unit of work against this node's nameserver.
//! All of them are idempotent: re-running one after a crash converges on the
//! same zone state, which is what lets [`retry_activity`] retry them blindly.

use super::retry::retry_activity;
use crate::context::Context;
use crate::dns_errors::DnsError;
use crate::model::DynamicUpdate;
use crate::serial::PendingChanges;
use crate::zone_data::ZoneInputs;
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// How a node brings its zones up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Nothing to apply
    NoOp,
    /// Rebuild and rewrite every zone
    FullReload,
    /// Apply the pending change records through nsupdate
    DynamicUpdate,
}

impl Strategy {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoOp => "noop",
            Self::FullReload => "full_reload",
            Self::DynamicUpdate => "dynamic_update",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the strategy decision for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub strategy: Strategy,
    /// Serial found in the node's zone file, `None` on first boot
    pub current_serial: Option<u64>,
    pub pending: PendingChanges,
}

/// What a node did when asked to catch up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationOutcome {
    pub strategy: Strategy,
    /// Serial the node serves afterwards
    pub serial: Option<u64>,
}

/// Choose between a full reload, a dynamic update and nothing.
///
/// A missing baseline, a `RELOAD` record in the window or an explicit
/// request forces a full reload.
///
/// # Errors
///
/// Returns the tracker's error: a malformed or out-of-order change log, an
/// unreadable zone file or an unavailable repository.
pub async fn decide(ctx: &Context, need_full_reload: bool) -> Result<Decision, DnsError> {
    let (current_serial, pending) = ctx
        .serial_tracker()
        .pending_since_applied(ctx.repository.as_ref())
        .await?;

    let strategy = if need_full_reload || pending.force_full_reload {
        Strategy::FullReload
    } else if pending.is_noop() {
        Strategy::NoOp
    } else {
        Strategy::DynamicUpdate
    };

    debug!(
        ?current_serial,
        new_serial = pending.new_serial,
        updates = pending.updates.len(),
        %strategy,
        "Decided reconciliation strategy"
    );
    Ok(Decision {
        strategy,
        current_serial,
        pending,
    })
}

/// Rebuild every zone from the repository and write it at `serial`.
///
/// # Errors
///
/// Returns repository, disk or `rndc` failures.
pub async fn full_reload(ctx: &Context, serial: u64) -> Result<(), DnsError> {
    let inputs = ZoneInputs::fetch(ctx.repository.as_ref()).await?;
    let zone_data = ctx.zone_data_builder().build(&inputs);
    ctx.bind9
        .renderer()
        .write_zone_files(&zone_data, serial, Utc::now())
        .await?;
    info!(serial, "Full reload complete");
    Ok(())
}

/// Apply `updates` through nsupdate and bump zones to `serial`.
///
/// # Errors
///
/// Returns nsupdate or `rndc` failures.
pub async fn dynamic_update(
    ctx: &Context,
    updates: &[DynamicUpdate],
    serial: u64,
) -> Result<(), DnsError> {
    ctx.bind9.updater().apply(updates, serial).await
}

/// Bring this node up to date with the change log on its own terms.
///
/// The node reads its own applied serial, so a node that missed several
/// serials replays all of them, and a node without a baseline falls back to
/// a full reload.
///
/// # Errors
///
/// Returns the first permanent failure, or the last transient failure once
/// the context's retry policy is spent.
pub async fn replicate(
    ctx: &Context,
    need_full_reload: bool,
) -> Result<ReplicationOutcome, DnsError> {
    let policy = &ctx.retry_policy;
    let decision = retry_activity(policy, "decide strategy", || decide(ctx, need_full_reload)).await?;
    let serial = decision.pending.new_serial;

    match decision.strategy {
        Strategy::NoOp => {
            return Ok(ReplicationOutcome {
                strategy: Strategy::NoOp,
                serial: decision.current_serial,
            });
        }
        Strategy::FullReload => {
            retry_activity(policy, "full reload", || full_reload(ctx, serial)).await?;
        }
        Strategy::DynamicUpdate => {
            let updates = &decision.pending.updates;
            retry_activity(policy, "dynamic update", || dynamic_update(ctx, updates, serial))
                .await?;
        }
    }

    Ok(ReplicationOutcome {
        strategy: decision.strategy,
        serial: Some(serial),
    })
}

#[cfg(test)]
#[path = "activities_tests.rs"]
mod activities_tests;
