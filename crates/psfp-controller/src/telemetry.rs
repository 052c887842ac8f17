// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Periodic counter polling
//!
//! Read-only: the poller shares the device session with the control stream
//! task but never writes. Read failures are logged and the next poll tries
//! again.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use psfp_config::TelemetryConfig;
use psfp_p4runtime::{DeviceSession, P4RuntimeError, ResourceSpec, SchemaIndex};

use crate::hyperperiod::GateStates;

/// Packet and byte count of one counter cell or table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSample {
    pub name: String,
    pub index: i64,
    pub packets: i64,
    pub bytes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub counters: Vec<CounterSample>,
    /// Direct counters, indexed by entry position within their table
    pub direct: Vec<CounterSample>,
    pub failures: usize,
}

#[derive(Debug, Clone)]
struct TableRef {
    id: u32,
    name: String,
}

pub struct TelemetryPoller {
    session: DeviceSession,
    counters: Vec<ResourceSpec>,
    direct_tables: Vec<TableRef>,
    index: i64,
    states: Option<GateStates>,
}

impl TelemetryPoller {
    /// Counters and tables missing from the P4Info are dropped with a warning
    pub fn new(
        session: DeviceSession,
        schema: &SchemaIndex,
        config: &TelemetryConfig,
        states: Option<GateStates>,
    ) -> Self {
        let counters = config
            .counters
            .iter()
            .filter_map(|name| match schema.counter(name) {
                Ok(spec) => Some(spec.clone()),
                Err(e) => {
                    warn!("[TELEMETRY] Not polling {}: {}", name, e);
                    None
                }
            })
            .collect();

        let direct_tables = config
            .direct_counter_tables
            .iter()
            .filter_map(|name| {
                let table = match schema.table(name) {
                    Ok(table) => table,
                    Err(e) => {
                        warn!("[TELEMETRY] Not polling {}: {}", name, e);
                        return None;
                    }
                };
                if schema.direct_counter_for_table(table.id).is_none() {
                    warn!("[TELEMETRY] Table {} has no direct counter", table.name);
                    return None;
                }
                Some(TableRef {
                    id: table.id,
                    name: table.name.clone(),
                })
            })
            .collect();

        Self {
            session,
            counters,
            direct_tables,
            index: config.counter_index,
            states: if config.log_hyperperiod_state { states } else { None },
        }
    }

    /// Read one indexed counter cell
    pub async fn read_counter(&self, spec: &ResourceSpec, index: i64) -> Result<CounterSample, P4RuntimeError> {
        let target = format!("{}[{}]", spec.name, index);
        let data = self.session.read_counter(spec.id, index, &target).await?;
        Ok(CounterSample {
            name: spec.name.clone(),
            index,
            packets: data.packet_count,
            bytes: data.byte_count,
        })
    }

    pub async fn poll_once(&self) -> PollReport {
        let mut report = PollReport::default();

        for spec in &self.counters {
            match self.read_counter(spec, self.index).await {
                Ok(sample) => {
                    info!(
                        "[TELEMETRY] {}[{}]: {} packets, {} bytes",
                        sample.name, sample.index, sample.packets, sample.bytes
                    );
                    report.counters.push(sample);
                }
                Err(e) => {
                    warn!("[TELEMETRY] {}", e);
                    report.failures += 1;
                }
            }
        }

        for table in &self.direct_tables {
            match self.session.read_direct_counters(table.id, &table.name).await {
                Ok(entries) => {
                    for (position, entry) in entries.iter().enumerate() {
                        let data = entry.data.clone().unwrap_or_default();
                        info!(
                            "[TELEMETRY] {} entry {}: {} packets, {} bytes",
                            table.name, position, data.packet_count, data.byte_count
                        );
                        report.direct.push(CounterSample {
                            name: table.name.clone(),
                            index: position as i64,
                            packets: data.packet_count,
                            bytes: data.byte_count,
                        });
                    }
                }
                Err(e) => {
                    warn!("[TELEMETRY] {}", e);
                    report.failures += 1;
                }
            }
        }

        if let Some(states) = &self.states {
            for (gate, state) in states.read().iter() {
                info!(
                    "[TELEMETRY] gate {}: hyperperiod={}us last={}us done={}",
                    gate, state.duration_us, state.last_hyperperiod_us, state.done
                );
            }
        }

        report
    }

    /// Poll every `interval` until `shutdown` turns true
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[TELEMETRY] Polling {} counters and {} tables every {:?}",
            self.counters.len(),
            self.direct_tables.len(),
            interval
        );
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    self.poll_once().await;
                }
            }
        }
        debug!("[TELEMETRY] Poller stopped");
    }
}
