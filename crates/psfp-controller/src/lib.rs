// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! # psfp-controller
//!
//! Control-plane logic for an sdn-psfp switch: hyperperiod synchronization
//! driven by device digests, static rule provisioning, meter programming and
//! counter telemetry. The `psfp-controller` binary wires these together.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod app;
pub mod error;
pub mod hyperperiod;
pub mod meters;
pub mod provisioning;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use app::{missing_pipeline_file, session_config, stream_config, Controller, Started, StartupReport};
pub use error::{ControllerError, Result};
pub use hyperperiod::{
    wall_clock_baseline_us, DigestEvent, GateStates, HyperperiodState, HyperperiodSynchronizer,
    SyncOutcome,
};
pub use meters::{configure_meters, MeterReport};
pub use provisioning::{load_rules, provision_rules, read_back, ProvisionReport, RuleFile};
pub use telemetry::{CounterSample, PollReport, TelemetryPoller};
