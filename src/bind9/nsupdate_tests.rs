// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `nsupdate.rs`

#[cfg(test)]
mod tests {
    use crate::bind9::nsupdate::*;
    use crate::bind9::rndc::{CommandRunner, Rndc};
    use crate::config::DnsConfig;
    use crate::dns_errors::DnsError;
    use crate::model::{DynamicUpdate, UpdateOperation};
    use crate::test_support::{RecordingRunner, Rfc2136Server};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn updater(runner: Arc<dyn CommandRunner>) -> DynamicUpdater {
        let config = DnsConfig::default();
        let rndc = Rndc::new(runner.clone(), PathBuf::from("/etc/bind/maas/rndc.conf.maas"));
        DynamicUpdater::new(&config, runner, rndc)
    }

    fn insert(name: &str, ip: &str) -> DynamicUpdate {
        let mut update = DynamicUpdate::new(UpdateOperation::Insert, "example.com", name, "A");
        update.ttl = Some(30);
        update.answer = Some(ip.to_string());
        update.ip = Some(ip.parse().unwrap());
        update.subnet = Some("10.0.0.0/24".parse().unwrap());
        update.rev_zone = Some("0.0.10.in-addr.arpa".to_string());
        update
    }

    fn delete_ip(name: &str, ip: &str) -> DynamicUpdate {
        let mut update = DynamicUpdate::new(UpdateOperation::Delete, "example.com", name, "A");
        update.ip = Some(ip.parse().unwrap());
        update.subnet = Some("10.0.0.0/24".parse().unwrap());
        update.rev_zone = Some("0.0.10.in-addr.arpa".to_string());
        update
    }

    #[test]
    fn test_plan_groups_by_zone_with_ptr() {
        let plan = updater(Arc::new(RecordingRunner::default()))
            .plan(&[insert("rec1", "10.0.0.1"), delete_ip("rec2", "10.0.0.2")])
            .unwrap();

        let zones: Vec<&str> = plan.iter().map(|t| t.zone.as_str()).collect();
        assert_eq!(zones, vec!["example.com", "0.0.10.in-addr.arpa", "maas"]);

        let forward: Vec<String> = plan[0].lines.iter().map(ToString::to_string).collect();
        assert_eq!(
            forward,
            vec![
                "update add rec1.example.com. 30 A 10.0.0.1",
                "update delete rec2.example.com. A",
            ]
        );
        let reverse: Vec<String> = plan[1].lines.iter().map(ToString::to_string).collect();
        assert_eq!(
            reverse,
            vec![
                "update add 1.0.0.10.in-addr.arpa. 30 PTR rec1.example.com.",
                "update delete 2.0.0.10.in-addr.arpa. PTR rec2.example.com.",
            ]
        );
        assert!(plan[2].lines.is_empty());
    }

    #[test]
    fn test_plan_sends_serial_zone_last() {
        let mut marker = DynamicUpdate::new(UpdateOperation::Insert, "maas", "a", "A");
        marker.ttl = Some(30);
        marker.answer = Some("10.9.0.1".to_string());

        let plan = updater(Arc::new(RecordingRunner::default()))
            .plan(&[marker, insert("b", "10.0.0.2")])
            .unwrap();

        let zones: Vec<&str> = plan.iter().map(|t| t.zone.as_str()).collect();
        assert_eq!(zones, vec!["example.com", "0.0.10.in-addr.arpa", "maas"]);
        let last: Vec<String> = plan[2].lines.iter().map(ToString::to_string).collect();
        assert_eq!(last, vec!["update add a.maas. 30 A 10.9.0.1"]);
    }

    #[tokio::test]
    async fn test_failed_zone_leaves_serial_zone_untouched() {
        let runner = Arc::new(RecordingRunner::default());
        runner.fail_on("nsupdate");
        let mut marker = DynamicUpdate::new(UpdateOperation::Insert, "maas", "a", "A");
        marker.ttl = Some(30);
        marker.answer = Some("10.9.0.1".to_string());

        let result = updater(runner.clone())
            .apply(&[marker, insert("b", "10.0.0.2")], 4)
            .await;

        assert!(result.is_err());
        let scripts = runner.nsupdate_scripts();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].contains("zone example.com"));
        assert!(!scripts[0].contains("zone maas"));
    }

    #[test]
    fn test_plan_rejects_reload() {
        let result = updater(Arc::new(RecordingRunner::default())).plan(&[DynamicUpdate::reload()]);
        assert!(matches!(result, Err(DnsError::InvalidUpdate(_))));
    }

    #[test]
    fn test_plan_rejects_insert_without_answer() {
        let update = DynamicUpdate::new(UpdateOperation::Insert, "example.com", "a", "TXT");
        let result = updater(Arc::new(RecordingRunner::default())).plan(&[update]);
        assert!(matches!(result, Err(DnsError::InvalidUpdate(_))));
    }

    #[test]
    fn test_script_format() {
        let transaction = ZoneTransaction {
            zone: "maas".to_string(),
            lines: vec![UpdateLine::Add {
                name: "a.maas.".to_string(),
                ttl: 30,
                rectype: "A".to_string(),
                rdata: "10.0.0.1".to_string(),
            }],
        };
        assert_eq!(
            transaction.script("localhost", 9, 30),
            "server localhost\n\
             zone maas\n\
             update add a.maas. 30 A 10.0.0.1\n\
             update add maas. 30 SOA maas. nobody.example.com. 9 600 1800 604800 30\n\
             send\n"
        );
    }

    #[tokio::test]
    async fn test_apply_runs_nsupdate_then_sync() {
        let runner = Arc::new(RecordingRunner::default());
        updater(runner.clone())
            .apply(&[insert("rec1", "10.0.0.1")], 12)
            .await
            .unwrap();

        let calls = runner.calls();
        let nsupdate: Vec<_> = calls.iter().filter(|c| c.program == "nsupdate").collect();
        assert_eq!(nsupdate.len(), 3);
        assert_eq!(nsupdate[0].args, vec!["-k", "/etc/bind/maas/keys.conf.maas"]);
        assert!(nsupdate[0].stdin.as_ref().unwrap().contains(" 12 600 1800 604800 "));
        assert_eq!(runner.rndc_commands(), vec!["sync"]);
    }

    #[tokio::test]
    async fn test_bulk_transaction_uses_tcp() {
        let runner = Arc::new(RecordingRunner::default());
        updater(runner.clone())
            .apply(&[insert("rec1", "10.0.0.1"), insert("rec2", "10.0.0.2")], 3)
            .await
            .unwrap();
        assert!(runner.calls()[0].args.contains(&"-v".to_string()));
    }

    #[tokio::test]
    async fn test_nsupdate_failure_stops_batch() {
        let runner = Arc::new(RecordingRunner::default());
        runner.fail_on("nsupdate");

        let result = updater(runner.clone())
            .apply(&[insert("rec1", "10.0.0.1")], 3)
            .await;

        assert!(matches!(result, Err(DnsError::Command(_))));
        assert_eq!(runner.nsupdate_scripts().len(), 1);
        assert!(runner.rndc_commands().is_empty());
    }

    #[tokio::test]
    async fn test_reapplying_batch_is_idempotent() {
        let server = Arc::new(Rfc2136Server::default());
        let updater = updater(server.clone());
        let mut txt = DynamicUpdate::new(UpdateOperation::Insert, "example.com", "info", "TXT");
        txt.ttl = Some(60);
        txt.answer = Some("\"hello world\"".to_string());
        let batch = vec![
            insert("rec1", "10.0.0.1"),
            insert("rec2", "10.0.0.2"),
            delete_ip("rec2", "10.0.0.2"),
            delete_ip("gone", "10.0.0.9"),
            txt,
        ];

        updater.apply(&batch, 5).await.unwrap();
        let once = server.zones();
        updater.apply(&batch, 5).await.unwrap();
        let twice = server.zones();

        assert_eq!(once, twice);
        let forward = &once["example.com"];
        assert_eq!(forward.serial, 5);
        assert!(forward
            .records
            .contains_key(&("rec1.example.com.".to_string(), "A".to_string())));
        assert!(!forward
            .records
            .contains_key(&("rec2.example.com.".to_string(), "A".to_string())));
        assert_eq!(once["maas"].serial, 5);
        assert_eq!(
            once["0.0.10.in-addr.arpa"].records.keys().cloned().collect::<Vec<_>>(),
            vec![("1.0.0.10.in-addr.arpa.".to_string(), "PTR".to_string())]
        );
    }
}
