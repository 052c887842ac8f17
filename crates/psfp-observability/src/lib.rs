// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! # psfp-observability
//!
//! Logging infrastructure shared by the controller crates, with per-crate
//! debug flag support.
//!
//! ## Features
//! - `file-logging`: JSON log file per run with retention cleanup

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Known crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "psfp-config",
    "psfp-p4runtime",
    "psfp-controller",
];

/// Tracing targets use the module path, which spells crate names with underscores
pub fn crate_target(crate_name: &str) -> String {
    crate_name.replace('-', "_")
}
