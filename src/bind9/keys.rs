// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! TSIG key used by `nsupdate` and referenced by `allow-update { key maas.; }`.

use crate::constants::NSUPDATE_KEY_NAME;
use crate::dns_errors::ZoneWriteError;
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;
use std::path::Path;
use tracing::info;

/// Algorithm of generated keys
pub const TSIG_ALGORITHM: &str = "hmac-sha512";

/// Secret length in bytes (512 bits for HMAC-SHA512)
const TSIG_SECRET_BYTES: usize = 64;

/// A BIND9 `key` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsigKey {
    pub name: String,
    pub algorithm: String,
    /// Base64-encoded secret
    pub secret: String,
}

impl TsigKey {
    /// Generate a random `maas.` key.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut key_bytes = [0u8; TSIG_SECRET_BYTES];
        rng.fill(&mut key_bytes[..]);

        Self {
            name: NSUPDATE_KEY_NAME.to_string(),
            algorithm: TSIG_ALGORITHM.to_string(),
            secret: BASE64.encode(key_bytes),
        }
    }

    /// Render as a BIND9 key file.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "key \"{}\" {{\n    algorithm {};\n    secret \"{}\";\n}};\n",
            self.name, self.algorithm, self.secret
        )
    }

    /// Parse a BIND9 key file.
    ///
    /// Expected format:
    /// ```text
    /// key "maas." {
    ///     algorithm hmac-sha512;
    ///     secret "base64secret==";
    /// };
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if a field is missing or the secret is not valid base64.
    pub fn parse(content: &str) -> Result<Self> {
        let name = content
            .lines()
            .find(|line| line.trim_start().starts_with("key"))
            .and_then(|line| line.split('"').nth(1))
            .context("Failed to parse key name from key file")?
            .to_string();

        let algorithm = content
            .lines()
            .find(|line| line.contains("algorithm"))
            .and_then(|line| {
                line.split_whitespace()
                    .nth(1)
                    .map(|s| s.trim_end_matches(';'))
            })
            .context("Failed to parse algorithm from key file")?
            .to_string();

        let secret = content
            .lines()
            .find(|line| line.contains("secret"))
            .and_then(|line| line.split('"').nth(1))
            .context("Failed to parse secret from key file")?
            .to_string();

        BASE64
            .decode(&secret)
            .context("Key file secret is not valid base64")?;

        Ok(Self {
            name,
            algorithm,
            secret,
        })
    }
}

/// Create the key file at `path` unless one already exists.
///
/// Returns `true` when a new key was written.
///
/// # Errors
///
/// Returns [`ZoneWriteError::Io`] if the directory or file cannot be written.
pub async fn ensure_key_file(path: &Path) -> Result<bool, ZoneWriteError> {
    let io_error = |operation: &'static str, e: std::io::Error| ZoneWriteError::Io {
        operation,
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    if tokio::fs::try_exists(path)
        .await
        .map_err(|e| io_error("stat", e))?
    {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error("create directory for", e))?;
    }
    tokio::fs::write(path, TsigKey::generate().render())
        .await
        .map_err(|e| io_error("write", e))?;

    info!(path = %path.display(), "Generated TSIG key for dynamic updates");
    Ok(true)
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod keys_tests;
