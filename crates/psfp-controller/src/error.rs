// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Controller error types

use std::path::PathBuf;

use psfp_p4runtime::{ErrorCategory, P4RuntimeError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    P4Runtime(#[from] P4RuntimeError),

    #[error("Failed to read rule file {path}: {source}")]
    RuleFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid rule file {path}: {source}")]
    RuleFileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Control stream task failed: {0}")]
    StreamTask(String),
}

impl ControllerError {
    /// Handling category; file problems always abort startup
    pub fn category(&self) -> ErrorCategory {
        match self {
            ControllerError::P4Runtime(e) => e.category(),
            ControllerError::RuleFileRead { .. } | ControllerError::RuleFileParse { .. } => {
                ErrorCategory::StartupFatal
            }
            ControllerError::StreamTask(_) => ErrorCategory::Transport,
        }
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
