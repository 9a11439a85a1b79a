// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `writer.rs`

#[cfg(test)]
mod tests {
    use crate::bind9::rndc::Rndc;
    use crate::bind9::writer::*;
    use crate::config::DnsConfig;
    use crate::dns_errors::{DnsError, ZoneWriteError};
    use crate::serial::SerialTracker;
    use crate::test_support::RecordingRunner;
    use crate::zone_data::{RecordSet, ZoneData};
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> DnsConfig {
        DnsConfig {
            dns_config_dir: dir.path().join("conf"),
            zone_file_dir: dir.path().join("zones"),
            ..DnsConfig::default()
        }
    }

    fn zone_data() -> ZoneData {
        let mut records = RecordSet::new();
        records.insert(
            ("rec1".to_string(), "A".to_string()),
            vec![("10.0.0.1".to_string(), 30)],
        );
        let mut zone_data = ZoneData::default();
        zone_data.forward.insert("example.com".to_string(), records);
        zone_data.zone_ttls.insert("example.com".to_string(), 30);
        zone_data.trusted_networks = vec!["10.0.0.0/24".parse().unwrap()];
        zone_data
    }

    fn renderer(config: &DnsConfig, runner: &Arc<RecordingRunner>) -> BindRenderer {
        BindRenderer::new(
            config.clone(),
            Rndc::new(runner.clone(), config.rndc_conf_path()),
        )
    }

    #[test]
    fn test_temp_path() {
        assert_eq!(
            temp_path(std::path::Path::new("/zones/zone.maas")),
            std::path::PathBuf::from("/zones/zone.maas.tmp")
        );
    }

    #[test]
    fn test_render_all_includes_serial_zone() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let files = render_all(&config, &zone_data(), 5, &Utc::now()).unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                config.zone_file_path("maas"),
                config.zone_file_path("example.com"),
                config.named_conf_path(),
            ]
        );
        let named_conf = &files[2].contents;
        assert!(named_conf.contains("zone \"maas\" {"));
        assert!(named_conf.contains("zone \"example.com\" {"));
        assert!(named_conf.contains("    10.0.0.0/24;\n"));
    }

    #[test]
    fn test_render_all_rejects_oversized_serial() {
        let dir = TempDir::new().unwrap();
        let result = render_all(&config(&dir), &zone_data(), u64::from(u32::MAX) + 1, &Utc::now());
        assert!(matches!(result, Err(ZoneWriteError::SerialOutOfRange { .. })));
    }

    #[tokio::test]
    async fn test_write_zone_files_under_freeze() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runner = Arc::new(RecordingRunner::default());

        let paths = renderer(&config, &runner)
            .write_zone_files(&zone_data(), 7, Utc::now())
            .await
            .unwrap();

        assert_eq!(paths.len(), 3);
        assert_eq!(runner.rndc_commands(), vec!["freeze", "thaw", "reconfig"]);

        let zone = std::fs::read_to_string(config.zone_file_path("example.com")).unwrap();
        assert!(zone.contains("@   30 IN NS .\n"));
        assert!(zone.contains("rec1 30 IN A 10.0.0.1\n"));

        let tracker = SerialTracker::new(config.serial_zone_file_path(), 30);
        assert_eq!(tracker.current_serial().await.unwrap(), Some(7));

        assert!(config.nsupdate_keys_path().exists());
        let leftovers = std::fs::read_dir(&config.zone_file_dir)
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_disk_failure_thaws_and_skips_reconfig() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        // A regular file where the zone directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        config.zone_file_dir = blocker.join("zones");
        let runner = Arc::new(RecordingRunner::default());

        let result = renderer(&config, &runner)
            .write_zone_files(&zone_data(), 7, Utc::now())
            .await;

        assert!(matches!(
            result,
            Err(DnsError::ZoneWrite(ZoneWriteError::Io { .. }))
        ));
        assert_eq!(runner.rndc_commands(), vec!["freeze", "thaw"]);
        assert!(!config.named_conf_path().exists());
    }

    #[tokio::test]
    async fn test_rndc_failure_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runner = Arc::new(RecordingRunner::default());
        runner.fail_on("reconfig");

        let result = renderer(&config, &runner)
            .write_zone_files(&zone_data(), 7, Utc::now())
            .await;

        assert!(matches!(result, Err(DnsError::Command(_))));
        assert!(result.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_rewrite_replaces_previous_files() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runner = Arc::new(RecordingRunner::default());
        let renderer = renderer(&config, &runner);

        renderer.write_zone_files(&zone_data(), 7, Utc::now()).await.unwrap();
        renderer
            .write_zone_files(&ZoneData::default(), 8, Utc::now())
            .await
            .unwrap();

        let tracker = SerialTracker::new(config.serial_zone_file_path(), 30);
        assert_eq!(tracker.current_serial().await.unwrap(), Some(8));
        let named_conf = std::fs::read_to_string(config.named_conf_path()).unwrap();
        assert!(!named_conf.contains("example.com"));
    }
}
