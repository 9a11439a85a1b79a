// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the reconciliation trigger loop

#[cfg(test)]
mod tests {
    use crate::changelog::{DnsRepository, MemoryRepository, Snapshot};
    use crate::config::{ConvergenceConfig, DnsConfig};
    use crate::context::Context;
    use crate::dns_errors::{CommandError, DnsError};
    use crate::model::{ChangeRecord, DnsResource, Domain, RegionController};
    use crate::reconcilers::retry::RetryPolicy;
    use crate::reconcilers::*;
    use crate::test_support::{RecordingRunner, ScriptedResolver};
    use chrono::Utc;
    use std::net::IpAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::{mpsc, oneshot};

    const NODE_IP: &str = "10.1.0.1";

    fn ip(value: &str) -> IpAddr {
        value.parse().unwrap()
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            domains: vec![Domain {
                id: 1,
                name: "example.com".to_string(),
                ttl: Some(30),
                authoritative: true,
                forward_dns_servers: vec![],
            }],
            region_controllers: vec![RegionController {
                system_id: "node1".to_string(),
                ip_addresses: vec![ip(NODE_IP)],
            }],
            dns_resources: vec![DnsResource {
                id: 10,
                name: "rec1".to_string(),
                domain_id: 1,
                address_ttl: None,
                ip_addresses: vec![ip("10.0.0.1")],
            }],
            changes: vec![ChangeRecord {
                serial: 1,
                update: "INSERT example.com rec1 A 30 10.0.0.1".to_string(),
                created_at: Utc::now(),
            }],
            ..Snapshot::default()
        }
    }

    struct Harness {
        _dir: TempDir,
        repository: Arc<MemoryRepository>,
        runner: Arc<RecordingRunner>,
        resolver: Arc<ScriptedResolver>,
        orchestrator: Arc<ReconciliationOrchestrator>,
    }

    async fn harness(convergence: ConvergenceConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let config = DnsConfig {
            system_id: "node1".to_string(),
            dns_config_dir: dir.path().join("conf"),
            zone_file_dir: dir.path().join("zones"),
            convergence,
            ..DnsConfig::default()
        };
        let repository = Arc::new(MemoryRepository::new(snapshot()));
        let runner = Arc::new(RecordingRunner::default());
        let resolver = Arc::new(ScriptedResolver::default());
        let ctx = Arc::new(
            Context::new(
                config,
                repository.clone(),
                runner.clone(),
                resolver.clone(),
            )
            .with_retry_policy(RetryPolicy::no_retry()),
        );
        let router = Arc::new(QueueRouter::new());
        router.register("node1", ctx.clone()).await;
        Harness {
            _dir: dir,
            repository,
            runner,
            resolver,
            orchestrator: Arc::new(ReconciliationOrchestrator::new(ctx, router)),
        }
    }

    fn fast_convergence() -> ConvergenceConfig {
        ConvergenceConfig {
            max_rounds: 3,
            initial_interval_ms: 1,
            max_interval_ms: 2,
            query_timeout_ms: 100,
        }
    }

    async fn eventually<F: Fn() -> bool>(condition: F) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    fn command_error() -> DnsError {
        CommandError::NonZeroExit {
            program: "rndc".to_string(),
            args: "freeze".to_string(),
            code: 1,
            stderr: String::new(),
        }
        .into()
    }

    #[test]
    fn test_failure_tracker_escalates_at_threshold() {
        let mut tracker = FailureTracker::new(3);

        assert!(!tracker.record_failure(&command_error()));
        assert!(!tracker.record_failure(&command_error()));
        assert!(tracker.record_failure(&command_error()));
        // Stays escalated while failures continue
        assert!(tracker.record_failure(&command_error()));
        assert_eq!(tracker.consecutive(), 4);
    }

    #[test]
    fn test_failure_tracker_resets_on_success() {
        let mut tracker = FailureTracker::new(2);
        tracker.record_failure(&command_error());
        tracker.record_success();

        assert_eq!(tracker.consecutive(), 0);
        assert!(!tracker.record_failure(&command_error()));
    }

    #[test]
    fn test_failure_tracker_zero_threshold_never_escalates() {
        let mut tracker = FailureTracker::new(0);
        for _ in 0..10 {
            assert!(!tracker.record_failure(&command_error()));
        }
    }

    #[tokio::test]
    async fn test_loop_reconciles_at_startup_and_on_each_change() {
        let h = harness(fast_convergence()).await;
        h.resolver.script(ip(NODE_IP), &[Some(u64::MAX)]);
        let (_requests_tx, requests) = mpsc::channel(4);
        let (stop, stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(run_trigger_loop(
            h.orchestrator.clone(),
            h.repository.subscribe_changes(),
            requests,
            5,
            async move {
                let _ = stopped.await;
            },
        ));

        let runner = h.runner.clone();
        eventually(|| runner.rndc_commands() == ["freeze", "thaw", "reconfig"]).await;

        h.repository
            .append_change("INSERT example.com rec2 A 30 10.0.0.2")
            .await
            .unwrap();
        eventually(|| {
            runner
                .nsupdate_scripts()
                .iter()
                .any(|script| script.contains("update add rec2.example.com. 30 A 10.0.0.2"))
        })
        .await;

        stop.send(()).unwrap();
        let tracker = handle.await.unwrap();
        assert_eq!(tracker.consecutive(), 0);
    }

    #[tokio::test]
    async fn test_requested_full_reload_rewrites_zones() {
        let h = harness(fast_convergence()).await;
        h.resolver.script(ip(NODE_IP), &[Some(u64::MAX)]);
        let (requests_tx, requests) = mpsc::channel(4);
        let (stop, stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(run_trigger_loop(
            h.orchestrator.clone(),
            h.repository.subscribe_changes(),
            requests,
            5,
            async move {
                let _ = stopped.await;
            },
        ));

        let runner = h.runner.clone();
        eventually(|| runner.rndc_commands().len() == 3).await;
        requests_tx
            .send(ReconcileRequest {
                need_full_reload: true,
            })
            .await
            .unwrap();
        eventually(|| runner.rndc_commands().iter().filter(|c| *c == "freeze").count() == 2)
            .await;

        stop.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_newer_change_supersedes_stuck_attempt() {
        // Convergence would wait for several seconds
        let h = harness(ConvergenceConfig {
            max_rounds: 1000,
            initial_interval_ms: 10,
            max_interval_ms: 10,
            query_timeout_ms: 100,
        })
        .await;
        h.resolver.script(ip(NODE_IP), &[Some(0)]);
        let (_requests_tx, requests) = mpsc::channel(4);
        let (stop, stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(run_trigger_loop(
            h.orchestrator.clone(),
            h.repository.subscribe_changes(),
            requests,
            5,
            async move {
                let _ = stopped.await;
            },
        ));

        let resolver = h.resolver.clone();
        eventually(|| resolver.total_polls() > 0).await;

        h.repository
            .append_change("INSERT example.com rec2 A 30 10.0.0.2")
            .await
            .unwrap();
        let runner = h.runner.clone();
        eventually(|| !runner.nsupdate_scripts().is_empty()).await;
        let orchestrator = h.orchestrator.clone();
        eventually(|| orchestrator.state() == ReconcileState::Converging { serial: 2 }).await;

        // Shutdown abandons the still-converging attempt
        stop.send(()).unwrap();
        let tracker = handle.await.unwrap();
        assert_eq!(tracker.consecutive(), 0);
    }

    #[tokio::test]
    async fn test_failed_attempts_are_counted() {
        let h = harness(fast_convergence()).await;
        h.runner.fail_on("freeze");
        let (requests_tx, requests) = mpsc::channel(4);
        let (stop, stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(run_trigger_loop(
            h.orchestrator.clone(),
            h.repository.subscribe_changes(),
            requests,
            2,
            async move {
                let _ = stopped.await;
            },
        ));

        let runner = h.runner.clone();
        eventually(|| runner.rndc_commands().len() == 1).await;
        requests_tx.send(ReconcileRequest::default()).await.unwrap();
        eventually(|| runner.rndc_commands().len() == 2).await;
        let orchestrator = h.orchestrator.clone();
        eventually(|| matches!(orchestrator.state(), ReconcileState::Failed { .. })).await;

        stop.send(()).unwrap();
        let tracker = handle.await.unwrap();
        assert_eq!(tracker.consecutive(), 2);
    }
}
