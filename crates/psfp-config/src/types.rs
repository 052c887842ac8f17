// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `psfp_controller.toml`. Every struct carries `#[serde(default)]`, so a file
//! only needs to name the values it changes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PsfpConfig {
    pub device: DeviceConfig,
    pub pipeline: PipelineConfig,
    pub stream: StreamConfig,
    pub telemetry: TelemetryConfig,
    pub hyperperiod: HyperperiodConfig,
    pub meters: Vec<MeterConfig>,
    pub logging: LoggingConfig,
}

/// Connection parameters for the single managed switch
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Human-readable switch name used in log lines
    pub name: String,
    /// `host:port` of the P4Runtime gRPC endpoint
    pub address: String,
    pub device_id: u64,
    pub election_id_high: u64,
    pub election_id_low: u64,
    pub connect_timeout_ms: u64,
}

/// Files describing the forwarding pipeline
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// P4Info in protobuf-JSON form
    pub p4info: PathBuf,
    /// Device image (BMv2 JSON)
    pub device_config: PathBuf,
    /// Declarative rule table (`table_entries` JSON)
    pub rules: Option<PathBuf>,
    /// Read installed entries back after provisioning and log them at debug level
    pub read_back_rules: bool,
}

/// Control stream timing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    pub keepalive_interval_ms: u64,
    /// Capacity of the outbound stream message queue
    pub outbound_queue_depth: usize,
}

/// Periodic counter polling
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub poll_interval_secs: u64,
    pub counters: Vec<String>,
    pub counter_index: i64,
    /// Tables whose direct counters are read on every poll
    pub direct_counter_tables: Vec<String>,
    /// Log the host-side hyperperiod state on every poll
    pub log_hyperperiod_state: bool,
}

/// Hyperperiod state table, registers and digest names
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HyperperiodConfig {
    pub state_table: String,
    pub state_action: String,
    pub gate_match_field: String,
    pub digest: String,
    pub last_hyperperiod_register: String,
    pub period_count_register: String,
    pub done_register: String,
    pub fallback_widths: FallbackWidths,
    pub gates: Vec<GateConfig>,
}

/// Widths used only when the P4Info declares no bitstring width for a register
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackWidths {
    pub timestamp_bits: u32,
    pub counter_bits: Option<u32>,
    pub flag_bits: u32,
}

/// One stream gate and its hyperperiod
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GateConfig {
    pub id: u32,
    pub hyperperiod_secs: u64,
}

/// Meter programmed once at startup
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MeterConfig {
    pub name: String,
    pub index: i64,
    /// Committed information rate (bytes/s)
    pub cir: i64,
    /// Committed burst size (bytes)
    pub cburst: i64,
    /// Peak information rate (bytes/s)
    pub pir: i64,
    /// Peak burst size (bytes)
    pub pburst: i64,
    /// Direct meters are keyed by the owning table's default entry
    #[serde(default)]
    pub direct_table: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: PathBuf,
    pub file_logging: bool,
    pub retention_days: u64,
    pub retention_runs: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "s1".to_string(),
            address: "127.0.0.1:50051".to_string(),
            device_id: 0,
            election_id_high: 0,
            election_id_low: 1,
            connect_timeout_ms: 5000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            p4info: PathBuf::from("./build/sdn-psfp.p4.p4info.json"),
            device_config: PathBuf::from("./build/sdn-psfp.json"),
            rules: Some(PathBuf::from("./s1-runtime.json")),
            read_back_rules: true,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: 1000,
            outbound_queue_depth: 64,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            counters: vec![
                "IngressImpl.psfp_c.streamFilter_c.overall_counter".to_string(),
                "IngressImpl.psfp_c.streamFilter_c.missed_max_sdu_filter_counter".to_string(),
                "IngressImpl.psfp_c.streamGate_c.not_passed_gate_counter".to_string(),
                "IngressImpl.psfp_c.flowMeter_c.marked_red_counter".to_string(),
                "IngressImpl.psfp_c.flowMeter_c.marked_yellow_counter".to_string(),
                "IngressImpl.psfp_c.flowMeter_c.marked_green_counter".to_string(),
            ],
            counter_index: 0,
            direct_counter_tables: Vec::new(),
            log_hyperperiod_state: true,
        }
    }
}

impl Default for HyperperiodConfig {
    fn default() -> Self {
        Self {
            state_table: "IngressImpl.psfp_c.hyperperiod_state".to_string(),
            state_action: "IngressImpl.psfp_c.set_hyperperiod_state".to_string(),
            gate_match_field: "meta.ingress_md.stream_filter.stream_gate_id".to_string(),
            digest: "digest_finished_hyperperiod_t".to_string(),
            last_hyperperiod_register: "IngressImpl.psfp_c.last_hyperperiod_reg".to_string(),
            period_count_register: "IngressImpl.psfp_c.period_count".to_string(),
            done_register: "IngressImpl.psfp_c.hyperperiod_done_reg".to_string(),
            fallback_widths: FallbackWidths::default(),
            gates: vec![
                GateConfig { id: 1, hyperperiod_secs: 20 },
                GateConfig { id: 2, hyperperiod_secs: 16 },
                GateConfig { id: 3, hyperperiod_secs: 26 },
                GateConfig { id: 4, hyperperiod_secs: 20 },
            ],
        }
    }
}

impl Default for FallbackWidths {
    fn default() -> Self {
        Self {
            timestamp_bits: 48,
            counter_bits: None,
            flag_bits: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("./logs"),
            file_logging: false,
            retention_days: 30,
            retention_runs: 10,
        }
    }
}

impl HyperperiodConfig {
    /// Hyperperiod of a configured gate in microseconds (the switch timebase)
    pub fn hyperperiod_us(&self, gate_id: u32) -> Option<u64> {
        self.gates
            .iter()
            .find(|g| g.id == gate_id)
            .map(|g| g.hyperperiod_secs.saturating_mul(1_000_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = PsfpConfig::default();
        assert_eq!(config.device.address, "127.0.0.1:50051");
        assert_eq!(config.device.election_id_low, 1);
        assert_eq!(config.stream.keepalive_interval_ms, 1000);
        assert_eq!(config.telemetry.poll_interval_secs, 10);
        assert_eq!(config.telemetry.counters.len(), 6);
        let ids: Vec<u32> = config.hyperperiod.gates.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_hyperperiod_us_conversion() {
        let config = HyperperiodConfig::default();
        assert_eq!(config.hyperperiod_us(2), Some(16_000_000));
        assert_eq!(config.hyperperiod_us(9), None);
    }
}
