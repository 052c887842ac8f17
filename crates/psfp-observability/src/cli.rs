// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Per-crate debug flags
//!
//! Flags come from the binary's `--debug <crate>` / `--debug-all` options and
//! from the `PSFP_DEBUG` environment variable.

use std::collections::HashMap;
use std::env;

use crate::{crate_target, KNOWN_CRATES};

/// Set of crates with debug logging enabled
///
/// # Example
/// ```rust
/// use psfp_observability::CrateDebugFlags;
///
/// let flags = CrateDebugFlags::from_crate_names(["psfp-p4runtime"], false);
/// assert!(flags.is_enabled("psfp-p4runtime"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CrateDebugFlags {
    pub enabled_crates: HashMap<String, bool>,
}

impl CrateDebugFlags {
    /// Build flags from crate names; `debug_all` enables every known crate.
    pub fn from_crate_names<I, S>(names: I, debug_all: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut enabled_crates = HashMap::new();
        for name in names {
            let name = name.as_ref().trim();
            if !name.is_empty() {
                enabled_crates.insert(name.to_string(), true);
            }
        }

        if debug_all {
            for crate_name in KNOWN_CRATES {
                enabled_crates.insert(crate_name.to_string(), true);
            }
        }

        CrateDebugFlags { enabled_crates }
    }

    /// Merge in `PSFP_DEBUG` (comma-separated crate names, or `all`).
    pub fn with_env(mut self) -> Self {
        if let Ok(env_var) = env::var("PSFP_DEBUG") {
            self.merge_env_value(&env_var);
        }
        self
    }

    fn merge_env_value(&mut self, value: &str) {
        if value == "all" {
            for crate_name in KNOWN_CRATES {
                self.enabled_crates.insert(crate_name.to_string(), true);
            }
            return;
        }
        for crate_name in value.split(',') {
            let crate_name = crate_name.trim();
            if !crate_name.is_empty() {
                self.enabled_crates.insert(crate_name.to_string(), true);
            }
        }
    }

    /// Check if debug is enabled for a specific crate
    pub fn is_enabled(&self, crate_name: &str) -> bool {
        self.enabled_crates.contains_key(crate_name)
    }

    /// Check if debug is enabled for any crate
    pub fn any_enabled(&self) -> bool {
        !self.enabled_crates.is_empty()
    }

    /// Get log level for a crate
    pub fn log_level(&self, crate_name: &str) -> tracing::Level {
        if self.is_enabled(crate_name) {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Create an `EnvFilter` directive string from the flags
    ///
    /// Format: `psfp_p4runtime=debug,<base_level>`, or just `<base_level>` if none enabled.
    pub fn to_filter_string(&self, base_level: &str) -> String {
        if self.enabled_crates.is_empty() {
            return base_level.to_string();
        }

        let mut names: Vec<&String> = self.enabled_crates.keys().collect();
        names.sort();
        let mut filters: Vec<String> = names
            .into_iter()
            .map(|name| format!("{}=debug", crate_target(name)))
            .collect();
        filters.push(base_level.to_string());
        filters.join(",")
    }
}

/// Generate help text for debug flags
pub fn debug_flags_help() -> String {
    format!(
        r#"Debug Flags:
  --debug-all                    Enable debug logging for all crates
  --debug <crate-name>           Enable debug logging for a specific crate (repeatable)

Available crates:
  {}

Environment Variable:
  PSFP_DEBUG=<crate-name>[,<crate-name>]  Enable debug for crates (comma-separated)
  PSFP_DEBUG=all                          Enable debug for all crates
"#,
        KNOWN_CRATES.join(", ")
    )
}
