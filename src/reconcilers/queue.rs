// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-node task queues.
//!
//! All zone-writing work for a node runs on that node's single worker, so two
//! reconciliation attempts never touch the same zone files concurrently.

use super::activities::{self, ReplicationOutcome, Strategy};
use crate::constants::NODE_QUEUE_CAPACITY;
use crate::context::Context;
use crate::dns_errors::{DispatchError, DnsError};
use crate::model::DynamicUpdate;
use crate::reconcilers::retry::retry_activity;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Work routed to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTask {
    /// Rewrite every zone at `serial`
    FullReload { serial: u64 },
    /// Apply `updates` and bump zones to `serial`
    DynamicUpdate {
        updates: Vec<DynamicUpdate>,
        serial: u64,
    },
    /// Catch up with the change log from the node's own applied serial
    Replicate { need_full_reload: bool },
}

impl NodeTask {
    fn name(&self) -> &'static str {
        match self {
            Self::FullReload { .. } => "full reload",
            Self::DynamicUpdate { .. } => "dynamic update",
            Self::Replicate { .. } => "replicate",
        }
    }
}

/// Routes [`NodeTask`]s to the node that must run them.
#[async_trait::async_trait]
pub trait NodeDispatcher: Send + Sync {
    /// Run `task` on `system_id` and wait for its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when the node has no queue or its worker
    /// stopped, otherwise the task's own error.
    async fn dispatch(&self, system_id: &str, task: NodeTask)
        -> Result<ReplicationOutcome, DnsError>;
}

struct Job {
    task: NodeTask,
    reply: oneshot::Sender<Result<ReplicationOutcome, DnsError>>,
}

/// Run one task against `ctx`, retrying each activity per the context policy.
///
/// # Errors
///
/// Returns the activity's error once retries are spent.
pub async fn run_task(ctx: &Context, task: NodeTask) -> Result<ReplicationOutcome, DnsError> {
    let policy = &ctx.retry_policy;
    match &task {
        NodeTask::FullReload { serial } => {
            let serial = *serial;
            retry_activity(policy, task.name(), || activities::full_reload(ctx, serial)).await?;
            Ok(ReplicationOutcome {
                strategy: Strategy::FullReload,
                serial: Some(serial),
            })
        }
        NodeTask::DynamicUpdate { updates, serial } => {
            let serial = *serial;
            retry_activity(policy, task.name(), || {
                activities::dynamic_update(ctx, updates, serial)
            })
            .await?;
            Ok(ReplicationOutcome {
                strategy: Strategy::DynamicUpdate,
                serial: Some(serial),
            })
        }
        NodeTask::Replicate { need_full_reload } => {
            activities::replicate(ctx, *need_full_reload).await
        }
    }
}

/// In-process [`NodeDispatcher`] with one bounded queue and worker per node.
#[derive(Default)]
pub struct QueueRouter {
    queues: RwLock<HashMap<String, mpsc::Sender<Job>>>,
}

impl QueueRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the worker for `system_id`, replacing any previous queue.
    ///
    /// The worker exits once the node is deregistered and its queue drains.
    pub async fn register(&self, system_id: &str, ctx: Arc<Context>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::channel::<Job>(NODE_QUEUE_CAPACITY);
        let node = system_id.to_string();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                debug!(system_id = %node, task = job.task.name(), "Running node task");
                let result = run_task(&ctx, job.task).await;
                // The dispatcher may have given up waiting
                let _ = job.reply.send(result);
            }
            debug!(system_id = %node, "Node worker stopped");
        });

        self.queues.write().await.insert(system_id.to_string(), tx);
        info!(system_id, "Registered node task queue");
        worker
    }

    /// Close the queue of `system_id`.
    pub async fn deregister(&self, system_id: &str) {
        self.queues.write().await.remove(system_id);
    }

    pub async fn is_registered(&self, system_id: &str) -> bool {
        self.queues.read().await.contains_key(system_id)
    }
}

#[async_trait::async_trait]
impl NodeDispatcher for QueueRouter {
    async fn dispatch(
        &self,
        system_id: &str,
        task: NodeTask,
    ) -> Result<ReplicationOutcome, DnsError> {
        let sender = self
            .queues
            .read()
            .await
            .get(system_id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownNode {
                system_id: system_id.to_string(),
            })?;

        let closed = || DispatchError::QueueClosed {
            system_id: system_id.to_string(),
        };
        let (reply, response) = oneshot::channel();
        sender
            .send(Job { task, reply })
            .await
            .map_err(|_| closed())?;
        response.await.map_err(|_| closed())?
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod queue_tests;
