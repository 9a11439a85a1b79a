// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! BIND9 management through `rndc` and `nsupdate`.
//!
//! This module owns everything that touches the local nameserver:
//!
//! - Rendering zone master files and the named.conf fragment
//! - Swapping files in atomically under `rndc freeze`/`thaw`
//! - Applying incremental changes via dynamic updates (nsupdate protocol)
//! - Provisioning the TSIG key referenced by `allow-update`
//!
//! # Example
//!
//! ```rust,no_run
//! use dnssync::bind9::Bind9Manager;
//! use dnssync::bind9::rndc::TokioCommandRunner;
//! use dnssync::config::DnsConfig;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), dnssync::dns_errors::DnsError> {
//! let config = DnsConfig::default();
//! let runner = Arc::new(TokioCommandRunner::new(config.command_timeout()));
//! let manager = Bind9Manager::new(&config, runner);
//!
//! manager.updater().apply(&[], 42).await?;
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod keys;
pub mod nsupdate;
pub mod render;
pub mod rndc;
pub mod writer;

pub use nsupdate::DynamicUpdater;
pub use rndc::{CommandRunner, Rndc, TokioCommandRunner};
pub use writer::BindRenderer;

use crate::config::DnsConfig;
use std::sync::Arc;

/// The local nameserver's full-reload and incremental paths.
#[derive(Clone)]
pub struct Bind9Manager {
    rndc: Rndc,
    renderer: BindRenderer,
    updater: DynamicUpdater,
}

impl Bind9Manager {
    /// Create a new `Bind9Manager` running commands through `runner`.
    #[must_use]
    pub fn new(config: &DnsConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let rndc = Rndc::new(runner.clone(), config.rndc_conf_path());
        Self {
            renderer: BindRenderer::new(config.clone(), rndc.clone()),
            updater: DynamicUpdater::new(config, runner, rndc.clone()),
            rndc,
        }
    }

    #[must_use]
    pub fn rndc(&self) -> &Rndc {
        &self.rndc
    }

    #[must_use]
    pub fn renderer(&self) -> &BindRenderer {
        &self.renderer
    }

    #[must_use]
    pub fn updater(&self) -> &DynamicUpdater {
        &self.updater
    }
}
