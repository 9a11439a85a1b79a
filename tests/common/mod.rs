// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common test utilities for integration tests
//!
//! [`FakeNamed`] stands in for `rndc` and `nsupdate` on one region controller
//! and tracks the serial that controller would serve. [`FakeResolver`]
//! answers SOA queries from those serials.

#![allow(dead_code)]

use chrono::Utc;
use dnssync::bind9::rndc::{CommandOutput, CommandRunner};
use dnssync::constants::{NSUPDATE_EXECUTABLE, RNDC_EXECUTABLE};
use dnssync::convergence::SoaResolver;
use dnssync::dns_errors::{CommandError, ConvergenceError};
use dnssync::model::ChangeRecord;
use dnssync::serial::parse_serial_marker;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub fn change(serial: u64, update: &str) -> ChangeRecord {
    ChangeRecord {
        serial,
        update: update.to_string(),
        created_at: Utc::now(),
    }
}

/// A `named` that loads zone files on `rndc reconfig` and applies SOA
/// updates sent through `nsupdate`.
pub struct FakeNamed {
    zone: String,
    serial_zone_file: PathBuf,
    served: Mutex<Option<u64>>,
    commands: Mutex<Vec<String>>,
    scripts: Mutex<Vec<String>>,
}

impl FakeNamed {
    pub fn new(zone: &str, serial_zone_file: PathBuf) -> Self {
        Self {
            zone: zone.to_string(),
            serial_zone_file,
            served: Mutex::new(None),
            commands: Mutex::new(Vec::new()),
            scripts: Mutex::new(Vec::new()),
        }
    }

    pub fn served_serial(&self) -> Option<u64> {
        *self.served.lock().unwrap()
    }

    /// rndc sub-commands in call order
    pub fn rndc_commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn nsupdate_scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    fn soa_serial_in(&self, script: &str) -> Option<u64> {
        let owner = format!("{}.", self.zone);
        script.lines().find_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                ["update", "add", name, _, "SOA", _, _, serial, ..] if *name == owner => {
                    serial.parse().ok()
                }
                _ => None,
            }
        })
    }
}

#[async_trait::async_trait]
impl CommandRunner for FakeNamed {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError> {
        if program == RNDC_EXECUTABLE {
            let command = args.last().cloned().unwrap_or_default();
            if command == "reconfig" {
                let contents = std::fs::read_to_string(&self.serial_zone_file).unwrap_or_default();
                *self.served.lock().unwrap() = parse_serial_marker(&contents);
            }
            self.commands.lock().unwrap().push(command);
        } else if program == NSUPDATE_EXECUTABLE {
            let script = stdin.unwrap_or_default().to_string();
            if let Some(serial) = self.soa_serial_in(&script) {
                *self.served.lock().unwrap() = Some(serial);
            }
            self.scripts.lock().unwrap().push(script);
        }
        Ok(CommandOutput::default())
    }
}

/// Answers SOA queries with the serial each controller's [`FakeNamed`] serves.
#[derive(Default)]
pub struct FakeResolver {
    servers: Mutex<HashMap<IpAddr, Arc<FakeNamed>>>,
}

impl FakeResolver {
    pub fn serve(&self, ip: IpAddr, named: Arc<FakeNamed>) {
        self.servers.lock().unwrap().insert(ip, named);
    }
}

#[async_trait::async_trait]
impl SoaResolver for FakeResolver {
    async fn soa_serial(&self, server: IpAddr, zone: &str) -> Result<u64, ConvergenceError> {
        let served = self
            .servers
            .lock()
            .unwrap()
            .get(&server)
            .and_then(|named| named.served_serial());
        served.ok_or_else(|| ConvergenceError::QueryFailed {
            zone: zone.to_string(),
            server: server.to_string(),
            reason: "SERVFAIL".to_string(),
        })
    }
}
