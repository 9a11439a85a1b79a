// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation of BIND9 zones with the DNS change log.
//!
//! # Reconciliation Architecture
//!
//! 1. **Trigger** - A change-log append (or an explicit request) wakes [`run_trigger_loop`]
//! 2. **Decide** - The orchestrator compares the change log with the applied serial
//! 3. **Apply** - The designated node performs a full reload or a dynamic update
//! 4. **Propagate** - Every other region controller replicates from its own serial
//! 5. **Converge** - SOA polling confirms every controller serves the new serial
//!
//! All zone-writing work runs as node tasks on per-node queues (see [`queue`]),
//! retried per activity with [`retry::RetryPolicy`].
//!
//! # Example
//!
//! ```rust,no_run
//! use dnssync::reconcilers::{run_trigger_loop, QueueRouter, ReconciliationOrchestrator};
//! use dnssync::context::Context;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! async fn start(ctx: Arc<Context>) {
//!     let router = Arc::new(QueueRouter::new());
//!     router.register(&ctx.config.system_id, ctx.clone()).await;
//!
//!     let changes = ctx.repository.subscribe_changes();
//!     let (_requests_tx, requests) = mpsc::channel(8);
//!     let orchestrator = Arc::new(ReconciliationOrchestrator::new(ctx.clone(), router));
//!     run_trigger_loop(orchestrator, changes, requests, 5, std::future::pending()).await;
//! }
//! ```

pub mod activities;
pub mod orchestrator;
pub mod queue;
pub mod retry;

pub use orchestrator::{
    ReconcileOutcome, ReconcileRequest, ReconcileState, ReconciliationOrchestrator,
};
pub use queue::{NodeDispatcher, NodeTask, QueueRouter};

use crate::dns_errors::DnsError;
use crate::metrics;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Counts consecutive failed attempts and raises an alert once they persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureTracker {
    consecutive: u32,
    /// 0 disables escalation
    escalate_after: u32,
}

impl FailureTracker {
    #[must_use]
    pub fn new(escalate_after: u32) -> Self {
        Self {
            consecutive: 0,
            escalate_after,
        }
    }

    #[must_use]
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn record_success(&mut self) {
        if self.consecutive > 0 {
            info!(
                failed_attempts = self.consecutive,
                "DNS reconciliation recovered"
            );
        }
        self.consecutive = 0;
        metrics::set_consecutive_failures(0);
    }

    /// Count a failed attempt.
    ///
    /// Returns true when the failure streak has reached the escalation
    /// threshold and an operator alert was raised.
    pub fn record_failure(&mut self, err: &DnsError) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        metrics::set_consecutive_failures(self.consecutive);

        if self.escalate_after > 0 && self.consecutive >= self.escalate_after {
            error!(
                alert = true,
                failed_attempts = self.consecutive,
                reason = err.status_reason(),
                error = %err,
                "DNS reconciliation keeps failing, operator attention required"
            );
            true
        } else {
            warn!(
                failed_attempts = self.consecutive,
                reason = err.status_reason(),
                "DNS reconciliation attempt failed, retrying on next trigger"
            );
            false
        }
    }
}

/// Run reconciliation attempts until `shutdown` completes.
///
/// An attempt runs at startup, then on every change-log append and every
/// explicit request. A trigger that arrives while an attempt is in flight
/// cancels it and starts over against the newer change log; a pending
/// full-reload request carries over to the restarted attempt.
///
/// # Arguments
///
/// * `orchestrator` - Orchestrator driving each attempt
/// * `changes` - Latest change-log serial, from [`crate::changelog::DnsRepository::subscribe_changes`]
/// * `requests` - Explicit requests, such as an operator-forced full reload
/// * `escalate_after` - Consecutive failures before an operator alert
/// * `shutdown` - Completes when the loop must stop
pub async fn run_trigger_loop<S>(
    orchestrator: Arc<ReconciliationOrchestrator>,
    mut changes: watch::Receiver<u64>,
    mut requests: mpsc::Receiver<ReconcileRequest>,
    escalate_after: u32,
    shutdown: S,
) -> FailureTracker
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut tracker = FailureTracker::new(escalate_after);
    let mut next = Some(ReconcileRequest::default());

    loop {
        let request = match next.take() {
            Some(request) => request,
            None => tokio::select! {
                () = &mut shutdown => break,
                Ok(()) = changes.changed() => ReconcileRequest::default(),
                Some(request) = requests.recv() => request,
                else => {
                    info!("All reconciliation triggers closed");
                    break;
                }
            },
        };

        // Triggers seen so far are covered by this attempt
        let serial = *changes.borrow_and_update();
        debug!(serial, need_full_reload = request.need_full_reload, "Starting reconciliation attempt");

        let attempt = orchestrator.reconcile(request);
        tokio::pin!(attempt);
        tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown requested, abandoning in-flight reconciliation");
                break;
            }
            result = &mut attempt => match result {
                Ok(outcome) => {
                    debug!(?outcome, "Reconciliation attempt finished");
                    tracker.record_success();
                }
                Err(e) => {
                    tracker.record_failure(&e);
                }
            },
            Ok(()) = changes.changed() => {
                info!(
                    serial = *changes.borrow(),
                    "Newer change superseded in-flight reconciliation, restarting"
                );
                next = Some(request);
            }
            Some(extra) = requests.recv() => {
                info!("Reconciliation requested while in flight, restarting");
                next = Some(ReconcileRequest {
                    need_full_reload: request.need_full_reload || extra.need_full_reload,
                });
            }
        }
    }

    tracker
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
