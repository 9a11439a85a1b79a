// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the DNS reconciliation engine.
//!
//! This module provides specialized error types for:
//! - Parsing change-log directives
//! - Running `rndc` and `nsupdate` subprocesses
//! - Writing zone files and configuration fragments
//! - Waiting for region controllers to converge on a serial
//! - Reading from and appending to the change log
//!
//! [`DnsError`] wraps all of them and classifies each failure as transient
//! (retry with backoff) or permanent (surface immediately).

use thiserror::Error;

/// A change-log directive that could not be parsed.
///
/// Malformed directives are never skipped: the attempt that reads them fails
/// so the zone cannot silently drift from the database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChangeParseError {
    /// The directive text was empty
    #[error("Change record {serial} has an empty directive")]
    Empty {
        /// Serial of the offending change record
        serial: u64,
    },

    /// The first token is not a known action
    #[error("Change record {serial} has unknown action '{action}'")]
    UnknownAction {
        /// Serial of the offending change record
        serial: u64,
        /// The unrecognised action token
        action: String,
    },

    /// The directive has the wrong number of fields for its action
    #[error("Change record {serial}: '{directive}' expects {expected}")]
    WrongArity {
        /// Serial of the offending change record
        serial: u64,
        /// The full directive text
        directive: String,
        /// Human-readable description of the expected shape
        expected: &'static str,
    },

    /// A field failed to parse (TTL, IP address, interface id)
    #[error("Change record {serial}: invalid {field} '{value}'")]
    InvalidField {
        /// Serial of the offending change record
        serial: u64,
        /// Name of the field
        field: &'static str,
        /// Raw field value
        value: String,
    },
}

/// Failures of an external command (`rndc`, `nsupdate`).
#[derive(Error, Debug, Clone)]
pub enum CommandError {
    /// The process could not be started
    #[error("Failed to spawn '{program}': {reason}")]
    SpawnFailed {
        /// Executable name
        program: String,
        /// OS error text
        reason: String,
    },

    /// The process ran longer than its deadline and was killed
    #[error("'{program} {args}' timed out after {timeout_secs}s")]
    Timeout {
        /// Executable name
        program: String,
        /// Space-joined arguments
        args: String,
        /// Deadline in seconds
        timeout_secs: u64,
    },

    /// The process exited with a non-zero status
    #[error("'{program} {args}' exited with status {code}: {stderr}")]
    NonZeroExit {
        /// Executable name
        program: String,
        /// Space-joined arguments
        args: String,
        /// Exit code (-1 when killed by a signal)
        code: i32,
        /// Captured standard error
        stderr: String,
    },
}

/// Failures while writing zone files or configuration fragments to disk.
#[derive(Error, Debug, Clone)]
pub enum ZoneWriteError {
    /// Filesystem operation failed
    #[error("Failed to {operation} '{path}': {reason}")]
    Io {
        /// What was being attempted (write, rename, create directory)
        operation: &'static str,
        /// The affected path
        path: String,
        /// OS error text
        reason: String,
    },

    /// The serial does not fit the 32-bit SOA serial field
    #[error("Serial {serial} does not fit in a 32-bit SOA serial")]
    SerialOutOfRange {
        /// The offending serial
        serial: u64,
    },

    /// The zone-writing task was aborted before it finished
    #[error("Zone write task aborted: {reason}")]
    TaskAborted {
        /// Join error text
        reason: String,
    },
}

/// Failures while confirming that all region controllers serve a serial.
#[derive(Error, Debug, Clone)]
pub enum ConvergenceError {
    /// The retry budget ran out while some controllers lagged behind
    #[error("Serial {expected} not reached after {rounds} rounds by: {}", lagging.join(", "))]
    Timeout {
        /// Serial that every controller had to report
        expected: u64,
        /// Poll rounds performed
        rounds: u32,
        /// System ids of controllers that never caught up
        lagging: Vec<String>,
    },

    /// An SOA query failed (unreachable, refused, no SOA in the answer)
    #[error("SOA query for zone '{zone}' to {server} failed: {reason}")]
    QueryFailed {
        /// Zone queried
        zone: String,
        /// Resolver address
        server: String,
        /// Failure description
        reason: String,
    },
}

/// Failures of the query/command interface backing the change log.
#[derive(Error, Debug, Clone)]
pub enum RepositoryError {
    /// The underlying store could not be read or written
    #[error("Repository operation '{operation}' failed: {reason}")]
    Unavailable {
        /// The operation attempted
        operation: &'static str,
        /// Failure description
        reason: String,
    },

    /// Change records were returned out of serial order
    #[error("Change records out of order: serial {next} follows {previous}")]
    OutOfOrder {
        /// Serial of the earlier record in the result
        previous: u64,
        /// Serial of the record that should have come first
        next: u64,
    },
}

/// Failures dispatching work to a region controller's task queue.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// No task queue is registered for the controller
    #[error("No task queue registered for region controller '{system_id}'")]
    UnknownNode {
        /// Controller system id
        system_id: String,
    },

    /// The controller's worker stopped before answering
    #[error("Task queue for region controller '{system_id}' is closed")]
    QueueClosed {
        /// Controller system id
        system_id: String,
    },
}

/// Composite error type that encompasses all DNS reconciliation errors.
///
/// This is the primary error type returned by the engine's operations.
#[derive(Error, Debug, Clone)]
pub enum DnsError {
    /// Malformed change-log directive
    #[error(transparent)]
    Parse(#[from] ChangeParseError),

    /// `rndc`/`nsupdate` failure
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Zone file or config write failure
    #[error(transparent)]
    ZoneWrite(#[from] ZoneWriteError),

    /// Convergence check failure
    #[error(transparent)]
    Convergence(#[from] ConvergenceError),

    /// Change log / query interface failure
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Task queue dispatch failure
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// An update batch that cannot be applied incrementally
    #[error("Invalid dynamic update: {0}")]
    InvalidUpdate(String),

    /// Generic error for operations that don't fit other categories
    #[error("DNS operation failed: {0}")]
    Generic(String),
}

impl DnsError {
    /// Returns true if this error is transient and the operation should be retried.
    ///
    /// Subprocess, disk, resolver and closed-queue failures are transient.
    /// Parse errors, ordering violations and unknown nodes are permanent.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Command(_)
            | Self::ZoneWrite(ZoneWriteError::Io { .. } | ZoneWriteError::TaskAborted { .. })
            | Self::Convergence(_)
            | Self::Repository(RepositoryError::Unavailable { .. })
            | Self::Dispatch(DispatchError::QueueClosed { .. })
            | Self::Generic(_) => true,

            Self::Parse(_)
            | Self::ZoneWrite(ZoneWriteError::SerialOutOfRange { .. })
            | Self::Repository(RepositoryError::OutOfOrder { .. })
            | Self::Dispatch(DispatchError::UnknownNode { .. })
            | Self::InvalidUpdate(_) => false,
        }
    }

    /// Returns a stable reason code for logs and metric labels.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::Parse(_) => "ChangeParseFailed",

            Self::Command(CommandError::SpawnFailed { .. }) => "CommandSpawnFailed",
            Self::Command(CommandError::Timeout { .. }) => "CommandTimeout",
            Self::Command(CommandError::NonZeroExit { .. }) => "CommandFailed",

            Self::ZoneWrite(ZoneWriteError::Io { .. }) => "ZoneWriteFailed",
            Self::ZoneWrite(ZoneWriteError::SerialOutOfRange { .. }) => "SerialOutOfRange",
            Self::ZoneWrite(ZoneWriteError::TaskAborted { .. }) => "ZoneWriteAborted",

            Self::Convergence(ConvergenceError::Timeout { .. }) => "ConvergenceTimeout",
            Self::Convergence(ConvergenceError::QueryFailed { .. }) => "SoaQueryFailed",

            Self::Repository(RepositoryError::Unavailable { .. }) => "RepositoryUnavailable",
            Self::Repository(RepositoryError::OutOfOrder { .. }) => "ChangeLogOutOfOrder",

            Self::Dispatch(DispatchError::UnknownNode { .. }) => "UnknownNode",
            Self::Dispatch(DispatchError::QueueClosed { .. }) => "QueueClosed",

            Self::InvalidUpdate(_) => "InvalidDynamicUpdate",
            Self::Generic(_) => "DnsOperationFailed",
        }
    }
}

// Conversion from anyhow::Error to DnsError for call sites that use anyhow context
impl From<anyhow::Error> for DnsError {
    fn from(err: anyhow::Error) -> Self {
        Self::Generic(err.to_string())
    }
}

#[cfg(test)]
#[path = "dns_errors_tests.rs"]
mod dns_errors_tests;
