// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `orchestrator.rs`

#[cfg(test)]
mod tests {
    use crate::changelog::{DnsRepository, MemoryRepository, Snapshot};
    use crate::config::{ConvergenceConfig, DnsConfig};
    use crate::context::Context;
    use crate::dns_errors::{ConvergenceError, DnsError};
    use crate::model::{ChangeRecord, DnsResource, Domain, RegionController};
    use crate::reconcilers::activities::Strategy;
    use crate::reconcilers::orchestrator::*;
    use crate::reconcilers::queue::QueueRouter;
    use crate::reconcilers::retry::RetryPolicy;
    use crate::test_support::{RecordingRunner, ScriptedResolver};
    use chrono::Utc;
    use std::net::IpAddr;
    use std::sync::Arc;
    use tempfile::TempDir;

    const NODES: [(&str, &str); 2] = [("node1", "10.1.0.1"), ("node2", "10.1.0.2")];

    fn change(serial: u64, update: &str) -> ChangeRecord {
        ChangeRecord {
            serial,
            update: update.to_string(),
            created_at: Utc::now(),
        }
    }

    fn ip(value: &str) -> IpAddr {
        value.parse().unwrap()
    }

    fn snapshot(changes: Vec<ChangeRecord>, controllers: &[(&str, &str)]) -> Snapshot {
        Snapshot {
            domains: vec![Domain {
                id: 1,
                name: "example.com".to_string(),
                ttl: Some(30),
                authoritative: true,
                forward_dns_servers: vec![],
            }],
            region_controllers: controllers
                .iter()
                .map(|(system_id, address)| RegionController {
                    system_id: (*system_id).to_string(),
                    ip_addresses: vec![ip(address)],
                })
                .collect(),
            dns_resources: vec![DnsResource {
                id: 10,
                name: "rec1".to_string(),
                domain_id: 1,
                address_ttl: None,
                ip_addresses: vec![ip("10.0.0.1")],
            }],
            changes,
            ..Snapshot::default()
        }
    }

    struct Node {
        ctx: Arc<Context>,
        runner: Arc<RecordingRunner>,
    }

    impl Node {
        fn write_baseline(&self, serial: u64) {
            let path = self.ctx.config.serial_zone_file_path();
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, format!("              {serial} ; serial\n")).unwrap();
        }
    }

    struct Cluster {
        _dir: TempDir,
        nodes: Vec<Node>,
        resolver: Arc<ScriptedResolver>,
        orchestrator: ReconciliationOrchestrator,
    }

    async fn cluster(changes: Vec<ChangeRecord>, controllers: &[(&str, &str)]) -> Cluster {
        let dir = TempDir::new().unwrap();
        let repository: Arc<dyn DnsRepository> =
            Arc::new(MemoryRepository::new(snapshot(changes, controllers)));
        let resolver = Arc::new(ScriptedResolver::default());
        let router = Arc::new(QueueRouter::new());

        let mut nodes = Vec::new();
        for (system_id, _) in NODES {
            let config = DnsConfig {
                system_id: system_id.to_string(),
                dns_config_dir: dir.path().join(system_id).join("conf"),
                zone_file_dir: dir.path().join(system_id).join("zones"),
                convergence: ConvergenceConfig {
                    max_rounds: 3,
                    initial_interval_ms: 1,
                    max_interval_ms: 2,
                    query_timeout_ms: 100,
                },
                ..DnsConfig::default()
            };
            let runner = Arc::new(RecordingRunner::default());
            let ctx = Arc::new(
                Context::new(config, repository.clone(), runner.clone(), resolver.clone())
                    .with_retry_policy(RetryPolicy::no_retry()),
            );
            router.register(system_id, ctx.clone()).await;
            nodes.push(Node { ctx, runner });
        }

        let orchestrator = ReconciliationOrchestrator::new(nodes[0].ctx.clone(), router);
        Cluster {
            _dir: dir,
            nodes,
            resolver,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn test_first_boot_full_reload_converges_everywhere() {
        let c = cluster(
            vec![change(3, "INSERT example.com rec1 A 30 10.0.0.1")],
            &NODES,
        )
        .await;
        c.resolver.script(ip("10.1.0.1"), &[Some(3)]);
        c.resolver.script(ip("10.1.0.2"), &[Some(3)]);

        let outcome = c
            .orchestrator
            .reconcile(ReconcileRequest::default())
            .await
            .unwrap();

        match outcome {
            ReconcileOutcome::Converged {
                serial,
                strategy,
                report,
            } => {
                assert_eq!(serial, 3);
                assert_eq!(strategy, Strategy::FullReload);
                assert_eq!(report.rounds, 1);
            }
            other => panic!("expected convergence, got {other:?}"),
        }
        for node in &c.nodes {
            assert_eq!(node.runner.rndc_commands(), vec!["freeze", "thaw", "reconfig"]);
            let zone =
                std::fs::read_to_string(node.ctx.config.zone_file_path("example.com")).unwrap();
            assert!(zone.contains("rec1 30 IN A 10.0.0.1"));
        }
        assert_eq!(c.orchestrator.state(), ReconcileState::Idle);
    }

    #[tokio::test]
    async fn test_nothing_pending_touches_nothing() {
        let c = cluster(
            vec![change(3, "INSERT example.com rec1 A 30 10.0.0.1")],
            &NODES,
        )
        .await;
        c.nodes[0].write_baseline(3);

        let outcome = c
            .orchestrator
            .reconcile(ReconcileRequest::default())
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::NoOp { serial: Some(3) });
        assert!(c.nodes.iter().all(|node| node.runner.calls().is_empty()));
        assert_eq!(c.resolver.total_polls(), 0);
        assert_eq!(c.orchestrator.state(), ReconcileState::Idle);
    }

    #[tokio::test]
    async fn test_incremental_update_replicates_per_node() {
        let c = cluster(
            vec![
                change(1, "INSERT example.com rec1 A 30 10.0.0.1"),
                change(2, "INSERT example.com rec2 A 30 10.0.0.2"),
            ],
            &NODES,
        )
        .await;
        c.nodes[0].write_baseline(1);
        c.nodes[1].write_baseline(1);
        c.resolver.script(ip("10.1.0.1"), &[Some(2)]);
        c.resolver.script(ip("10.1.0.2"), &[Some(2)]);

        let outcome = c
            .orchestrator
            .reconcile(ReconcileRequest::default())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ReconcileOutcome::Converged {
                serial: 2,
                strategy: Strategy::DynamicUpdate,
                ..
            }
        ));
        for node in &c.nodes {
            let scripts = node.runner.nsupdate_scripts();
            assert!(scripts
                .iter()
                .any(|script| script.contains("update add rec2.example.com. 30 A 10.0.0.2")));
            assert_eq!(node.runner.rndc_commands(), vec!["sync"]);
        }
    }

    #[tokio::test]
    async fn test_lagging_replica_falls_back_to_full_reload() {
        let c = cluster(
            vec![
                change(1, "INSERT example.com rec1 A 30 10.0.0.1"),
                change(2, "INSERT example.com rec2 A 30 10.0.0.2"),
            ],
            &NODES,
        )
        .await;
        // node2 has never written its zones
        c.nodes[0].write_baseline(1);
        c.resolver.script(ip("10.1.0.1"), &[Some(2)]);
        c.resolver.script(ip("10.1.0.2"), &[Some(2)]);

        c.orchestrator
            .reconcile(ReconcileRequest::default())
            .await
            .unwrap();

        assert_eq!(c.nodes[0].runner.rndc_commands(), vec!["sync"]);
        assert_eq!(
            c.nodes[1].runner.rndc_commands(),
            vec!["freeze", "thaw", "reconfig"]
        );
    }

    #[tokio::test]
    async fn test_requested_full_reload_skips_pending_check() {
        let c = cluster(
            vec![change(3, "INSERT example.com rec1 A 30 10.0.0.1")],
            &NODES,
        )
        .await;
        c.nodes[0].write_baseline(3);
        c.nodes[1].write_baseline(3);
        c.resolver.script(ip("10.1.0.1"), &[Some(3)]);
        c.resolver.script(ip("10.1.0.2"), &[Some(3)]);

        let outcome = c
            .orchestrator
            .reconcile(ReconcileRequest {
                need_full_reload: true,
            })
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ReconcileOutcome::Converged {
                strategy: Strategy::FullReload,
                ..
            }
        ));
        for node in &c.nodes {
            assert_eq!(node.runner.rndc_commands(), vec!["freeze", "thaw", "reconfig"]);
        }
    }

    #[tokio::test]
    async fn test_convergence_timeout_fails_attempt() {
        let c = cluster(
            vec![change(3, "INSERT example.com rec1 A 30 10.0.0.1")],
            &NODES,
        )
        .await;
        c.resolver.script(ip("10.1.0.1"), &[Some(3)]);
        c.resolver.script(ip("10.1.0.2"), &[Some(2)]);

        let result = c.orchestrator.reconcile(ReconcileRequest::default()).await;

        match result {
            Err(DnsError::Convergence(ConvergenceError::Timeout { lagging, .. })) => {
                assert_eq!(lagging, vec!["node2".to_string()]);
            }
            other => panic!("expected convergence timeout, got {other:?}"),
        }
        assert_eq!(
            c.orchestrator.state(),
            ReconcileState::Failed {
                reason: "ConvergenceTimeout".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_designated_node_failure_stops_before_propagation() {
        let c = cluster(
            vec![change(3, "INSERT example.com rec1 A 30 10.0.0.1")],
            &NODES,
        )
        .await;
        c.nodes[0].runner.fail_on("freeze");

        let result = c.orchestrator.reconcile(ReconcileRequest::default()).await;

        assert!(matches!(result, Err(DnsError::Command(_))));
        assert!(c.nodes[1].runner.calls().is_empty());
        assert_eq!(c.resolver.total_polls(), 0);
        assert_eq!(
            c.orchestrator.state(),
            ReconcileState::Failed {
                reason: "CommandFailed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_replica_failure_does_not_block_others() {
        let controllers = [
            ("node1", "10.1.0.1"),
            ("node2", "10.1.0.2"),
            ("node3", "10.1.0.3"),
        ];
        let c = cluster(
            vec![change(3, "INSERT example.com rec1 A 30 10.0.0.1")],
            &controllers,
        )
        .await;
        c.nodes[1].runner.fail_on("freeze");
        // node3 has no queue here but already serves the serial
        c.resolver.script(ip("10.1.0.1"), &[Some(3)]);
        c.resolver.script(ip("10.1.0.2"), &[Some(3)]);
        c.resolver.script(ip("10.1.0.3"), &[Some(3)]);

        let outcome = c
            .orchestrator
            .reconcile(ReconcileRequest::default())
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Converged { serial: 3, .. }));
        assert_eq!(c.nodes[1].runner.rndc_commands(), vec!["freeze"]);
        assert_eq!(c.resolver.polls(ip("10.1.0.3")), 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_final_state() {
        let c = cluster(
            vec![change(3, "INSERT example.com rec1 A 30 10.0.0.1")],
            &NODES,
        )
        .await;
        c.nodes[0].write_baseline(3);
        let mut states = c.orchestrator.subscribe();

        c.orchestrator
            .reconcile(ReconcileRequest::default())
            .await
            .unwrap();

        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ReconcileState::Idle);
    }
}
