// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Error types for the P4Runtime client

use std::fmt;

use thiserror::Error;

/// How a failure should be treated by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Abort the process
    StartupFatal,
    /// RPC-level failure; fatal during provisioning, logged in steady state
    Transport,
    /// Unknown name or value of the wrong shape; skip the item
    SchemaMismatch,
    /// Value wider than its field; masked and logged
    Truncation,
}

/// One `p4.v1.Error` reported by the device for a single update of a Write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateError {
    /// Position of the update inside the Write batch
    pub index: usize,
    pub canonical_code: i32,
    pub message: String,
    pub space: String,
    pub code: i32,
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "update #{}: code {} ({})",
            self.index, self.canonical_code, self.message
        )
    }
}

#[derive(Error, Debug)]
pub enum P4RuntimeError {
    #[error("Unknown {kind} '{name}'")]
    SchemaLookup { kind: &'static str, name: String },

    #[error("Field '{field}' of table '{table}' is {declared}, cannot accept {supplied}")]
    UnsupportedMatchKind {
        table: String,
        field: String,
        declared: String,
        supplied: String,
    },

    #[error("Table '{0}' has ternary/range fields; entry requires a priority")]
    MissingPriority(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid bit width {0} (supported: 1..=128)")]
    InvalidBitWidth(u32),

    #[error("{operation} failed for {target}: {status}{}", format_update_errors(.update_errors))]
    Transport {
        operation: &'static str,
        target: String,
        status: String,
        update_errors: Vec<UpdateError>,
    },

    #[error("Mastership arbitration rejected: {0}")]
    ArbitrationRejected(String),

    #[error("Control stream closed: {0}")]
    StreamClosed(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Failed to parse P4Info: {0}")]
    SchemaParse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_update_errors(errors: &[UpdateError]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!(" [{}]", parts.join("; "))
}

impl P4RuntimeError {
    pub fn schema_lookup(kind: &'static str, name: impl Into<String>) -> Self {
        P4RuntimeError::SchemaLookup {
            kind,
            name: name.into(),
        }
    }

    pub fn transport(
        operation: &'static str,
        target: impl Into<String>,
        status: impl fmt::Display,
    ) -> Self {
        P4RuntimeError::Transport {
            operation,
            target: target.into(),
            status: status.to_string(),
            update_errors: Vec::new(),
        }
    }

    /// Map to the handling category
    pub fn category(&self) -> ErrorCategory {
        match self {
            P4RuntimeError::SchemaLookup { .. }
            | P4RuntimeError::UnsupportedMatchKind { .. }
            | P4RuntimeError::MissingPriority(_)
            | P4RuntimeError::InvalidValue(_)
            | P4RuntimeError::InvalidBitWidth(_)
            | P4RuntimeError::Decode(_) => ErrorCategory::SchemaMismatch,
            P4RuntimeError::Transport { .. } | P4RuntimeError::StreamClosed(_) => {
                ErrorCategory::Transport
            }
            P4RuntimeError::ArbitrationRejected(_)
            | P4RuntimeError::SchemaParse(_)
            | P4RuntimeError::Io(_) => ErrorCategory::StartupFatal,
        }
    }

    /// Per-update errors reported by the device, if any
    pub fn update_errors(&self) -> &[UpdateError] {
        match self {
            P4RuntimeError::Transport { update_errors, .. } => update_errors,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for P4RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        P4RuntimeError::SchemaParse(err.to_string())
    }
}

impl From<prost::DecodeError> for P4RuntimeError {
    fn from(err: prost::DecodeError) -> Self {
        P4RuntimeError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, P4RuntimeError>;
