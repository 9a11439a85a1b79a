// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Full reload: render every zone and swap the files in under `rndc freeze`.
//!
//! Files are first written next to their target with a `.tmp` suffix and
//! then renamed over it, so BIND9 never reads a partially written file.

use super::keys::ensure_key_file;
use super::render::{render_zone_file, NamedConf};
use super::rndc::Rndc;
use crate::config::DnsConfig;
use crate::constants::TEMP_FILE_SUFFIX;
use crate::dns_errors::{DnsError, ZoneWriteError};
use crate::zone_data::{RecordSet, ZoneData};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A file and the bytes it must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub path: PathBuf,
    pub contents: String,
}

fn io_error(operation: &'static str, path: &Path, e: &std::io::Error) -> ZoneWriteError {
    ZoneWriteError::Io {
        operation,
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Path a file is staged at before being renamed into place.
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(TEMP_FILE_SUFFIX);
    PathBuf::from(staged)
}

/// Render every zone file and the named.conf fragment for `serial`.
///
/// The zone carrying the applied serial (`default_domain`) is always
/// rendered, even when it holds no records.
///
/// # Errors
///
/// Returns [`ZoneWriteError::SerialOutOfRange`] if `serial` does not fit the
/// 32-bit SOA serial field.
pub fn render_all(
    config: &DnsConfig,
    zone_data: &ZoneData,
    serial: u64,
    modified: &DateTime<Utc>,
) -> Result<Vec<RenderedFile>, ZoneWriteError> {
    let soa_serial = u32::try_from(serial).map_err(|_| ZoneWriteError::SerialOutOfRange { serial })?;

    let empty = RecordSet::new();
    let mut zones: Vec<(&str, &RecordSet)> = zone_data
        .zones()
        .map(|(zone, records)| (zone.as_str(), records))
        .collect();
    if !zone_data.forward.contains_key(&config.default_domain) {
        zones.insert(0, (config.default_domain.as_str(), &empty));
    }

    let mut files = Vec::with_capacity(zones.len() + 1);
    let mut declarations = Vec::with_capacity(zones.len());
    for (zone, records) in zones {
        let path = config.zone_file_path(zone);
        let ttl = zone_data.zone_ttl(zone, config.default_ttl);
        files.push(RenderedFile {
            path: path.clone(),
            contents: render_zone_file(zone, records, soa_serial, ttl, &config.nameserver, modified),
        });
        declarations.push((zone.to_string(), path));
    }

    let named_rndc_conf = config.named_rndc_conf_path();
    let keys_conf = config.nsupdate_keys_path();
    let trusted = zone_data
        .trusted_networks
        .iter()
        .map(ToString::to_string)
        .chain(config.trusted_acl.iter().cloned())
        .collect();
    files.push(RenderedFile {
        path: config.named_conf_path(),
        contents: NamedConf {
            named_rndc_conf: &named_rndc_conf,
            keys_conf: &keys_conf,
            zones: declarations,
            forwarded: &zone_data.forwarded,
            trusted,
        }
        .render(),
    });
    Ok(files)
}

async fn remove_staged(paths: &[PathBuf]) {
    for staged in paths {
        if let Err(e) = tokio::fs::remove_file(staged).await {
            warn!(path = %staged.display(), error = %e, "Failed to remove staged file");
        }
    }
}

/// Stage every file then rename each over its target.
///
/// Nothing is renamed unless every file was staged successfully.
///
/// # Errors
///
/// Returns [`ZoneWriteError::Io`] for the first failing directory creation,
/// write or rename. Staged files left behind by the failure are removed.
pub async fn write_atomically(files: &[RenderedFile]) -> Result<(), ZoneWriteError> {
    let mut staged = Vec::with_capacity(files.len());
    for file in files {
        if let Some(parent) = file.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                remove_staged(&staged).await;
                return Err(io_error("create directory", parent, &e));
            }
        }
        let temp = temp_path(&file.path);
        if let Err(e) = tokio::fs::write(&temp, &file.contents).await {
            remove_staged(&staged).await;
            return Err(io_error("write", &temp, &e));
        }
        staged.push(temp);
    }

    for (index, file) in files.iter().enumerate() {
        if let Err(e) = tokio::fs::rename(&staged[index], &file.path).await {
            remove_staged(&staged[index..]).await;
            return Err(io_error("rename", &file.path, &e));
        }
        debug!(path = %file.path.display(), "Wrote file");
    }
    Ok(())
}

/// Writes zone files and the named.conf fragment for a full reload.
#[derive(Clone)]
pub struct BindRenderer {
    config: DnsConfig,
    rndc: Rndc,
}

impl BindRenderer {
    #[must_use]
    pub fn new(config: DnsConfig, rndc: Rndc) -> Self {
        Self { config, rndc }
    }

    /// Write every zone at `serial` and make BIND9 load them.
    ///
    /// Order of operations: provision the TSIG key if missing, render,
    /// `rndc freeze`, stage and rename, `rndc thaw`, `rndc reconfig`.
    ///
    /// # Errors
    ///
    /// Returns [`DnsError::ZoneWrite`] for render or disk failures and
    /// [`DnsError::Command`] for `rndc` failures. Thaw is issued on both paths
    /// once the freeze succeeded.
    pub async fn write_zone_files(
        &self,
        zone_data: &ZoneData,
        serial: u64,
        modified: DateTime<Utc>,
    ) -> Result<Vec<PathBuf>, DnsError> {
        ensure_key_file(&self.config.nsupdate_keys_path()).await?;
        let files = render_all(&self.config, zone_data, serial, &modified)?;
        let paths: Vec<PathBuf> = files.iter().map(|file| file.path.clone()).collect();

        self.rndc
            .frozen(move || async move { write_atomically(&files).await.map_err(DnsError::from) })
            .await?;
        self.rndc.reconfig().await?;

        info!(serial, files = paths.len(), "Wrote zone files");
        Ok(paths)
    }
}

#[cfg(test)]
#[path = "writer_tests.rs"]
mod writer_tests;
