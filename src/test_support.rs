// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Fakes for the subprocess and resolver seams, shared by unit tests.

use crate::bind9::rndc::{CommandOutput, CommandRunner};
use crate::constants::{NSUPDATE_EXECUTABLE, RNDC_EXECUTABLE};
use crate::convergence::SoaResolver;
use crate::dns_errors::{CommandError, ConvergenceError};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;

/// One invocation seen by [`RecordingRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

/// Records every command and succeeds unless told to fail.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<RecordedCall>>,
    failing: Mutex<BTreeSet<String>>,
}

impl RecordingRunner {
    /// Fail every call whose program or last argument equals `token`.
    pub fn fail_on(&self, token: &str) {
        self.failing.lock().unwrap().insert(token.to_string());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// rndc sub-commands in call order.
    pub fn rndc_commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.program == RNDC_EXECUTABLE)
            .filter_map(|call| call.args.last().cloned())
            .collect()
    }

    /// nsupdate scripts in call order.
    pub fn nsupdate_scripts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.program == NSUPDATE_EXECUTABLE)
            .filter_map(|call| call.stdin)
            .collect()
    }
}

#[async_trait::async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(RecordedCall {
            program: program.to_string(),
            args: args.to_vec(),
            stdin: stdin.map(str::to_string),
        });

        let failing = self.failing.lock().unwrap();
        let last = args.last().map(String::as_str).unwrap_or_default();
        if failing.contains(program) || failing.contains(last) {
            return Err(CommandError::NonZeroExit {
                program: program.to_string(),
                args: args.join(" "),
                code: 1,
                stderr: "simulated failure".to_string(),
            });
        }
        Ok(CommandOutput::default())
    }
}

/// Answers SOA queries from per-server scripts.
///
/// Each server returns its queued answers in order and repeats the last
/// one once the queue is down to a single entry.
#[derive(Default)]
pub struct ScriptedResolver {
    answers: Mutex<HashMap<IpAddr, VecDeque<Option<u64>>>>,
    polls: Mutex<HashMap<IpAddr, u32>>,
}

impl ScriptedResolver {
    /// Queue answers for `server`; `None` simulates an unreachable server.
    pub fn script(&self, server: IpAddr, answers: &[Option<u64>]) {
        self.answers
            .lock()
            .unwrap()
            .insert(server, answers.iter().copied().collect());
    }

    pub fn polls(&self, server: IpAddr) -> u32 {
        self.polls.lock().unwrap().get(&server).copied().unwrap_or(0)
    }

    pub fn total_polls(&self) -> u32 {
        self.polls.lock().unwrap().values().sum()
    }
}

#[async_trait::async_trait]
impl SoaResolver for ScriptedResolver {
    async fn soa_serial(&self, server: IpAddr, zone: &str) -> Result<u64, ConvergenceError> {
        *self.polls.lock().unwrap().entry(server).or_default() += 1;

        let mut answers = self.answers.lock().unwrap();
        let queue = answers.entry(server).or_default();
        let answer = if queue.len() > 1 {
            queue.pop_front().flatten()
        } else {
            queue.front().copied().flatten()
        };
        answer.ok_or_else(|| ConvergenceError::QueryFailed {
            zone: zone.to_string(),
            server: server.to_string(),
            reason: "no answer".to_string(),
        })
    }
}

/// One zone held by [`Rfc2136Server`]: `(owner, type) -> rdata set`, plus the SOA serial.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ZoneState {
    pub records: BTreeMap<(String, String), BTreeSet<String>>,
    pub serial: u32,
}

/// Applies nsupdate scripts with RFC 2136 semantics.
#[derive(Default)]
pub struct Rfc2136Server {
    zones: Mutex<BTreeMap<String, ZoneState>>,
}

impl Rfc2136Server {
    /// Add a record before any script runs.
    pub fn seed(&self, zone: &str, owner: &str, rectype: &str, rdata: &str) {
        self.zones
            .lock()
            .unwrap()
            .entry(zone.to_string())
            .or_default()
            .records
            .entry((owner.to_string(), rectype.to_string()))
            .or_default()
            .insert(rdata.to_string());
    }

    pub fn zones(&self) -> BTreeMap<String, ZoneState> {
        self.zones.lock().unwrap().clone()
    }

    /// Rdata held at `owner`/`rectype` in `zone`.
    pub fn rrset(&self, zone: &str, owner: &str, rectype: &str) -> BTreeSet<String> {
        self.zones
            .lock()
            .unwrap()
            .get(zone)
            .and_then(|state| state.records.get(&(owner.to_string(), rectype.to_string())))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl CommandRunner for Rfc2136Server {
    async fn run(
        &self,
        program: &str,
        _args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError> {
        let Some(script) = stdin.filter(|_| program == NSUPDATE_EXECUTABLE) else {
            return Ok(CommandOutput::default());
        };
        let mut zones = self.zones.lock().unwrap();
        let mut current = String::new();
        for line in script.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                ["zone", zone] => current = (*zone).to_string(),
                ["update", "add", _, _, "SOA", _, _, serial, ..] => {
                    zones.entry(current.clone()).or_default().serial = serial.parse().unwrap();
                }
                ["update", "add", name, _, rectype, rdata @ ..] => {
                    zones
                        .entry(current.clone())
                        .or_default()
                        .records
                        .entry(((*name).to_string(), (*rectype).to_string()))
                        .or_default()
                        .insert(rdata.join(" "));
                }
                ["update", "delete", name, rectype] => {
                    zones
                        .entry(current.clone())
                        .or_default()
                        .records
                        .remove(&((*name).to_string(), (*rectype).to_string()));
                }
                ["update", "delete", name, rectype, rdata @ ..] => {
                    let state = zones.entry(current.clone()).or_default();
                    let key = ((*name).to_string(), (*rectype).to_string());
                    if let Some(values) = state.records.get_mut(&key) {
                        values.remove(&rdata.join(" "));
                        if values.is_empty() {
                            state.records.remove(&key);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(CommandOutput::default())
    }
}
