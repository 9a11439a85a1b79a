// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation orchestrator.
//!
//! One attempt walks the state machine
//!
//! ```text
//! Idle -> DecidingStrategy -> FullReload | IncrementalUpdate -> Propagating -> Converging -> Idle
//! ```
//!
//! and lands in `Failed` when any step gives up. `Failed` only describes the
//! last attempt: the next trigger starts again from `DecidingStrategy`.
//!
//! Zone-writing work always goes through a [`NodeDispatcher`], so dropping an
//! attempt only abandons the wait. Work already queued on a node runs to
//! completion on that node's worker.

use super::activities::{self, Strategy};
use super::queue::{NodeDispatcher, NodeTask};
use super::retry::retry_activity;
use crate::context::Context;
use crate::convergence::ConvergenceReport;
use crate::dns_errors::{DispatchError, DnsError};
use crate::metrics;
use crate::model::RegionController;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Where the current (or last) attempt is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileState {
    Idle,
    DecidingStrategy,
    FullReload { serial: u64 },
    IncrementalUpdate { serial: u64, updates: usize },
    Propagating { serial: u64 },
    Converging { serial: u64 },
    /// The last attempt gave up; `reason` is the error's status reason
    Failed { reason: String },
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::DecidingStrategy => write!(f, "DecidingStrategy"),
            Self::FullReload { serial } => write!(f, "FullReload({serial})"),
            Self::IncrementalUpdate { serial, updates } => {
                write!(f, "IncrementalUpdate({serial}, {updates} updates)")
            }
            Self::Propagating { serial } => write!(f, "Propagating({serial})"),
            Self::Converging { serial } => write!(f, "Converging({serial})"),
            Self::Failed { reason } => write!(f, "Failed({reason})"),
        }
    }
}

/// A request to run one attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileRequest {
    /// Skip the pending-change check and rewrite every zone
    pub need_full_reload: bool,
}

/// How a successful attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing was pending; `serial` is the applied serial, if any
    NoOp { serial: Option<u64> },
    /// Every region controller serves `serial`
    Converged {
        serial: u64,
        strategy: Strategy,
        report: ConvergenceReport,
    },
}

/// Drives reconciliation attempts for the installation.
pub struct ReconciliationOrchestrator {
    ctx: Arc<Context>,
    dispatcher: Arc<dyn NodeDispatcher>,
    state: watch::Sender<ReconcileState>,
}

impl ReconciliationOrchestrator {
    #[must_use]
    pub fn new(ctx: Arc<Context>, dispatcher: Arc<dyn NodeDispatcher>) -> Self {
        let (state, _) = watch::channel(ReconcileState::Idle);
        Self {
            ctx,
            dispatcher,
            state,
        }
    }

    /// Receive every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ReconcileState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ReconcileState {
        self.state.borrow().clone()
    }

    fn transition(&self, next: ReconcileState) {
        debug!(state = %next, "Reconciliation state transition");
        self.state.send_replace(next);
    }

    /// Run one reconciliation attempt.
    ///
    /// The designated node (this process's `system_id`) applies the change
    /// first. Every other region controller then replicates on its own
    /// terms, and the attempt succeeds once all of them serve the new serial.
    ///
    /// # Errors
    ///
    /// Returns the strategy decision's error, the designated node's error,
    /// or the convergence timeout. Replication failures on other controllers
    /// are logged and surface as a convergence timeout.
    pub async fn reconcile(&self, request: ReconcileRequest) -> Result<ReconcileOutcome, DnsError> {
        let started = Instant::now();
        let policy = &self.ctx.retry_policy;

        self.transition(ReconcileState::DecidingStrategy);
        let decision = match retry_activity(policy, "decide strategy", || {
            activities::decide(&self.ctx, request.need_full_reload)
        })
        .await
        {
            Ok(decision) => decision,
            Err(e) => return Err(self.fail("decide", started, e)),
        };

        let serial = decision.pending.new_serial;
        let task = match decision.strategy {
            Strategy::NoOp => {
                debug!(serial = ?decision.current_serial, "No pending DNS changes");
                self.transition(ReconcileState::Idle);
                metrics::record_reconciliation(
                    Strategy::NoOp.as_str(),
                    "success",
                    started.elapsed(),
                );
                return Ok(ReconcileOutcome::NoOp {
                    serial: decision.current_serial,
                });
            }
            Strategy::FullReload => {
                self.transition(ReconcileState::FullReload { serial });
                NodeTask::FullReload { serial }
            }
            Strategy::DynamicUpdate => {
                self.transition(ReconcileState::IncrementalUpdate {
                    serial,
                    updates: decision.pending.updates.len(),
                });
                NodeTask::DynamicUpdate {
                    updates: decision.pending.updates,
                    serial,
                }
            }
        };

        let strategy = decision.strategy;
        match self.apply(request, strategy, serial, task).await {
            Ok(report) => {
                info!(
                    serial,
                    %strategy,
                    rounds = report.rounds,
                    elapsed = ?started.elapsed(),
                    "Reconciliation converged"
                );
                self.transition(ReconcileState::Idle);
                metrics::record_reconciliation(strategy.as_str(), "success", started.elapsed());
                Ok(ReconcileOutcome::Converged {
                    serial,
                    strategy,
                    report,
                })
            }
            Err(e) => Err(self.fail(strategy.as_str(), started, e)),
        }
    }

    async fn apply(
        &self,
        request: ReconcileRequest,
        strategy: Strategy,
        serial: u64,
        task: NodeTask,
    ) -> Result<ConvergenceReport, DnsError> {
        let designated = self.ctx.config.system_id.as_str();
        info!(system_id = designated, serial, %strategy, "Applying DNS changes on designated node");
        self.dispatcher.dispatch(designated, task).await?;

        self.transition(ReconcileState::Propagating { serial });
        let repository = &self.ctx.repository;
        let controllers = retry_activity(&self.ctx.retry_policy, "list region controllers", || async move {
            Ok::<_, DnsError>(repository.region_controllers().await?)
        })
        .await?;
        self.propagate(&controllers, request.need_full_reload).await;

        self.transition(ReconcileState::Converging { serial });
        Ok(self.ctx.convergence.wait_for_serial(&controllers, serial).await?)
    }

    /// Ask every controller except the designated one to catch up.
    ///
    /// Each controller is retried on its own; one failing never blocks the
    /// others.
    async fn propagate(&self, controllers: &[RegionController], need_full_reload: bool) {
        let designated = self.ctx.config.system_id.as_str();
        let replicas: Vec<&RegionController> = controllers
            .iter()
            .filter(|c| c.system_id != designated)
            .collect();
        debug!(replicas = replicas.len(), "Propagating to region controllers");

        let results = join_all(replicas.iter().map(|controller| {
            retry_activity(&self.ctx.retry_policy, "replicate", move || {
                self.dispatcher
                    .dispatch(&controller.system_id, NodeTask::Replicate { need_full_reload })
            })
        }))
        .await;

        for (controller, result) in replicas.iter().zip(results) {
            match result {
                Ok(outcome) => debug!(
                    system_id = %controller.system_id,
                    strategy = %outcome.strategy,
                    serial = ?outcome.serial,
                    "Region controller replicated"
                ),
                Err(DnsError::Dispatch(DispatchError::UnknownNode { .. })) => warn!(
                    system_id = %controller.system_id,
                    "Region controller has no task queue here; it catches up on its own trigger"
                ),
                Err(e) => warn!(
                    system_id = %controller.system_id,
                    reason = e.status_reason(),
                    error = %e,
                    "Region controller failed to replicate"
                ),
            }
        }
    }

    fn fail(&self, strategy: &str, started: Instant, e: DnsError) -> DnsError {
        let reason = e.status_reason();
        error!(%strategy, reason, error = %e, "Reconciliation attempt failed");
        self.transition(ReconcileState::Failed {
            reason: reason.to_string(),
        });
        metrics::record_reconciliation(strategy, "error", started.elapsed());
        e
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod orchestrator_tests;
