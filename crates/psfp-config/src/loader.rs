// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base values; built-in defaults when no file exists)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, PsfpConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "psfp_controller.toml";

/// Find the controller configuration file
///
/// Search order:
/// 1. `PSFP_CONFIG_PATH` environment variable
/// 2. Current working directory: `./psfp_controller.toml`
/// 3. Parent directories (up to 5 levels)
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("PSFP_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        } else {
            return Err(ConfigError::FileNotFound(format!(
                "Config file specified by PSFP_CONFIG_PATH not found: {}",
                path.display()
            )));
        }
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.clone();
        for _ in 0..5 {
            if let Some(parent) = current.parent() {
                search_paths.push(parent.join(CONFIG_FILE_NAME));
                current = parent.to_path_buf();
            }
        }
    }

    for path in &search_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, the file is searched for and
///   the built-in defaults are used when none exists.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if an explicit config file is missing or contains invalid TOML.
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<PsfpConfig> {
    let config_file = match config_path {
        Some(path) if !path.exists() => {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file().ok(),
    };

    let mut config = match config_file {
        Some(file) => {
            let content = fs::read_to_string(&file)?;
            toml::from_str::<PsfpConfig>(&content)?
        }
        None => PsfpConfig::default(),
    };

    apply_environment_overrides(&mut config);

    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    Ok(config)
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `PSFP_DEVICE_ADDRESS` -> `device.address`
/// - `PSFP_DEVICE_ID` -> `device.device_id`
/// - `PSFP_ELECTION_ID_LOW` -> `device.election_id_low`
/// - `PSFP_P4INFO` -> `pipeline.p4info`
/// - `PSFP_DEVICE_CONFIG` -> `pipeline.device_config`
/// - `PSFP_RULES` -> `pipeline.rules`
/// - `PSFP_TELEMETRY_INTERVAL_SECS` -> `telemetry.poll_interval_secs`
/// - `PSFP_LOG_LEVEL` -> `logging.level`
pub fn apply_environment_overrides(config: &mut PsfpConfig) {
    if let Ok(value) = env::var("PSFP_DEVICE_ADDRESS") {
        config.device.address = value;
    }
    if let Ok(value) = env::var("PSFP_DEVICE_ID") {
        if let Ok(id) = value.parse::<u64>() {
            config.device.device_id = id;
        }
    }
    if let Ok(value) = env::var("PSFP_ELECTION_ID_LOW") {
        if let Ok(id) = value.parse::<u64>() {
            config.device.election_id_low = id;
        }
    }

    if let Ok(value) = env::var("PSFP_P4INFO") {
        config.pipeline.p4info = PathBuf::from(value);
    }
    if let Ok(value) = env::var("PSFP_DEVICE_CONFIG") {
        config.pipeline.device_config = PathBuf::from(value);
    }
    if let Ok(value) = env::var("PSFP_RULES") {
        config.pipeline.rules = Some(PathBuf::from(value));
    }

    if let Ok(value) = env::var("PSFP_TELEMETRY_INTERVAL_SECS") {
        if let Ok(secs) = value.parse::<u64>() {
            config.telemetry.poll_interval_secs = secs;
        }
    }
    if let Ok(value) = env::var("PSFP_LOG_LEVEL") {
        config.logging.level = value;
    }
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"address": "10.0.0.2:50051", "p4info": "x.json"}`)
pub fn apply_cli_overrides(config: &mut PsfpConfig, cli_args: &HashMap<String, String>) {
    if let Some(value) = cli_args.get("address") {
        config.device.address = value.clone();
    }
    if let Some(value) = cli_args.get("device_id") {
        if let Ok(id) = value.parse::<u64>() {
            config.device.device_id = id;
        }
    }

    if let Some(value) = cli_args.get("p4info") {
        config.pipeline.p4info = PathBuf::from(value);
    }
    if let Some(value) = cli_args.get("device_config") {
        config.pipeline.device_config = PathBuf::from(value);
    }
    if let Some(value) = cli_args.get("rules") {
        config.pipeline.rules = Some(PathBuf::from(value));
    }

    if let Some(value) = cli_args.get("log_level") {
        config.logging.level = value.clone();
    }
    if let Some(value) = cli_args.get("log_dir") {
        config.logging.log_dir = PathBuf::from(value);
        config.logging.file_logging = true;
    }
}
