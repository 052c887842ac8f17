// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Checks that timing values are usable, the gate list is well formed and
//! fallback register widths are encodable. All problems are collected and
//! reported together.

use crate::{ConfigError, ConfigResult, PsfpConfig};
use std::collections::HashSet;

/// Largest bit width the value codec can encode
pub const MAX_BIT_WIDTH: u32 = 128;

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
    DuplicateGate { gate_id: u32 },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
            Self::DuplicateGate { gate_id } => {
                write!(f, "Stream gate {} is configured more than once", gate_id)
            }
        }
    }
}

/// Validate the complete configuration
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &PsfpConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_required_fields(config, &mut errors);
    validate_timing(config, &mut errors);
    validate_gates(config, &mut errors);
    validate_fallback_widths(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_required_fields(config: &PsfpConfig, errors: &mut Vec<ConfigValidationError>) {
    let required = [
        ("device.address", config.device.address.as_str()),
        ("hyperperiod.state_table", config.hyperperiod.state_table.as_str()),
        ("hyperperiod.state_action", config.hyperperiod.state_action.as_str()),
        ("hyperperiod.gate_match_field", config.hyperperiod.gate_match_field.as_str()),
        ("hyperperiod.digest", config.hyperperiod.digest.as_str()),
        (
            "hyperperiod.last_hyperperiod_register",
            config.hyperperiod.last_hyperperiod_register.as_str(),
        ),
        (
            "hyperperiod.period_count_register",
            config.hyperperiod.period_count_register.as_str(),
        ),
        ("hyperperiod.done_register", config.hyperperiod.done_register.as_str()),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            errors.push(ConfigValidationError::MissingRequired {
                field: field.to_string(),
            });
        }
    }

    if config.pipeline.p4info.as_os_str().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "pipeline.p4info".to_string(),
        });
    }
    if config.pipeline.device_config.as_os_str().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "pipeline.device_config".to_string(),
        });
    }
}

fn validate_timing(config: &PsfpConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.stream.keepalive_interval_ms == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "stream.keepalive_interval_ms".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
    if config.stream.outbound_queue_depth == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "stream.outbound_queue_depth".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
    if config.telemetry.poll_interval_secs == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "telemetry.poll_interval_secs".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
    if config.telemetry.counter_index < 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "telemetry.counter_index".to_string(),
            reason: "must not be negative".to_string(),
        });
    }
}

fn validate_gates(config: &PsfpConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.hyperperiod.gates.is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "hyperperiod.gates".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for gate in &config.hyperperiod.gates {
        if !seen.insert(gate.id) {
            errors.push(ConfigValidationError::DuplicateGate { gate_id: gate.id });
        }
        if gate.hyperperiod_secs == 0 {
            errors.push(ConfigValidationError::InvalidValue {
                field: format!("hyperperiod.gates[{}].hyperperiod_secs", gate.id),
                reason: "must be greater than 0".to_string(),
            });
        }
    }
}

fn validate_fallback_widths(config: &PsfpConfig, errors: &mut Vec<ConfigValidationError>) {
    let widths = &config.hyperperiod.fallback_widths;
    let mut check = |field: &str, width: u32| {
        if width == 0 || width > MAX_BIT_WIDTH {
            errors.push(ConfigValidationError::InvalidValue {
                field: format!("hyperperiod.fallback_widths.{}", field),
                reason: format!("{} is outside 1..={}", width, MAX_BIT_WIDTH),
            });
        }
    };
    check("timestamp_bits", widths.timestamp_bits);
    check("flag_bits", widths.flag_bits);
    if let Some(bits) = widths.counter_bits {
        check("counter_bits", bits);
    }
}
