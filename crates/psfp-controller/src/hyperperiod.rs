// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Hyperperiod Synchronizer
//!
//! Keeps each stream gate's hyperperiod window on the device in step with what
//! the device measured. At startup every configured gate gets its row in the
//! hyperperiod state table. After that, each hyperperiod digest advances the
//! gate's last-hyperperiod timestamp by one duration and clears its period
//! counter and done flag.
//!
//! The new register values are a pure function of the digest's own fields, so
//! a redelivered digest writes the same values again.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use psfp_config::{GateConfig, HyperperiodConfig};
use psfp_p4runtime::codec::width_mask;
use psfp_p4runtime::proto::p4runtime::{DigestList, P4Data};
use psfp_p4runtime::{
    decode_struct, DecodedStruct, DeviceSession, DigestHandler, DigestSpec, MatchField,
    P4RuntimeError, RegisterRef, RuleBuilder, SchemaIndex, TableEntryRule, UpdateKind,
};

/// Width of the switch timebase (microseconds)
pub const TIMESTAMP_BITS: u32 = 48;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Members of the hyperperiod digest struct
pub mod member {
    pub const GATE_ID: &str = "stream_gate_id";
    pub const INGRESS_TS: &str = "ingress_ts";
    pub const HYPERPERIOD_TS: &str = "hyperperiod_ts";
    pub const LAST_HYPERPERIOD: &str = "last_hyperperiod";

    pub const ALL: [&str; 4] = [GATE_ID, INGRESS_TS, HYPERPERIOD_TS, LAST_HYPERPERIOD];
}

/// Parameters of the hyperperiod state action
pub mod param {
    pub const GATE_ID: &str = "gate_id";
    pub const HYPERPERIOD_TS: &str = "hyperperiod_ts";
    pub const LAST_HYPERPERIOD: &str = "last_hyperperiod";
}

/// Host-side view of one gate's hyperperiod window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HyperperiodState {
    pub duration_us: u64,
    pub last_hyperperiod_us: u64,
    pub done: bool,
}

/// Per-gate state shared with the telemetry poller
pub type GateStates = Arc<RwLock<BTreeMap<u32, HyperperiodState>>>;

/// One decoded hyperperiod digest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestEvent {
    pub gate_id: u32,
    pub ingress_ts_us: u64,
    pub hyperperiod_duration_us: u64,
    pub last_hyperperiod_ts_us: u64,
}

impl DigestEvent {
    pub fn from_struct(decoded: &DecodedStruct) -> Result<Self, P4RuntimeError> {
        let gate_id = decoded.get(member::GATE_ID)?;
        Ok(Self {
            gate_id: u32::try_from(gate_id).map_err(|_| {
                P4RuntimeError::InvalidValue(format!("gate id {} out of range", gate_id))
            })?,
            ingress_ts_us: narrow(decoded, member::INGRESS_TS)?,
            hyperperiod_duration_us: narrow(decoded, member::HYPERPERIOD_TS)?,
            last_hyperperiod_ts_us: narrow(decoded, member::LAST_HYPERPERIOD)?,
        })
    }

    /// Start of the next hyperperiod; wrapping to the register width happens on write
    pub fn next_last_hyperperiod(&self) -> u128 {
        u128::from(self.last_hyperperiod_ts_us) + u128::from(self.hyperperiod_duration_us)
    }
}

fn narrow(decoded: &DecodedStruct, name: &str) -> Result<u64, P4RuntimeError> {
    let value = decoded.get(name)?;
    u64::try_from(value).map_err(|_| {
        P4RuntimeError::InvalidValue(format!("digest member '{}' value {} exceeds 64 bits", name, value))
    })
}

/// Result of one digest cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub gate_id: u32,
    pub new_last_us: u128,
    /// Registers whose write failed
    pub failed: Vec<String>,
}

impl SyncOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Current wall-clock time in microseconds, masked to the switch timebase
pub fn wall_clock_baseline_us() -> u64 {
    let now = u128::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0);
    // Masked to 48 bits, always fits
    (now & width_mask(TIMESTAMP_BITS)) as u64
}

pub struct HyperperiodSynchronizer {
    session: DeviceSession,
    schema: Arc<SchemaIndex>,
    digest: DigestSpec,
    last_hyperperiod: RegisterRef,
    period_count: RegisterRef,
    done: RegisterRef,
    state_table: String,
    state_action: String,
    gate_match_field: String,
    known_gates: BTreeSet<u32>,
    states: GateStates,
}

impl HyperperiodSynchronizer {
    /// Resolve the digest, registers and state table once
    ///
    /// Any unknown name is returned as a schema lookup error; the caller
    /// treats it as fatal at startup.
    pub fn new(
        session: DeviceSession,
        schema: Arc<SchemaIndex>,
        config: &HyperperiodConfig,
    ) -> Result<Self, P4RuntimeError> {
        let digest = schema.digest(&config.digest)?.clone();
        if let Some(missing) = member::ALL
            .iter()
            .find(|name| !digest.members.iter().any(|m| m.name == **name))
        {
            return Err(P4RuntimeError::schema_lookup("digest member", *missing));
        }

        let widths = &config.fallback_widths;
        let last_hyperperiod =
            schema.register(&config.last_hyperperiod_register, Some(widths.timestamp_bits))?;
        let period_count = schema.register(&config.period_count_register, widths.counter_bits)?;
        let done = schema.register(&config.done_register, Some(widths.flag_bits))?;

        let table = schema.table(&config.state_table)?;
        if table.match_field(&config.gate_match_field).is_none() {
            return Err(P4RuntimeError::schema_lookup("match field", config.gate_match_field.as_str()));
        }
        schema.action(&config.state_action)?;

        debug!(
            "[HP] Digest {} (id {}), registers {} / {} / {} ({} / {} / {} bits)",
            digest.name,
            digest.id,
            last_hyperperiod.name,
            period_count.name,
            done.name,
            last_hyperperiod.bit_width,
            period_count.bit_width,
            done.bit_width
        );

        Ok(Self {
            session,
            digest,
            last_hyperperiod,
            period_count,
            done,
            state_table: table.name.clone(),
            state_action: config.state_action.clone(),
            gate_match_field: config.gate_match_field.clone(),
            known_gates: config.gates.iter().map(|g| g.id).collect(),
            states: Arc::new(RwLock::new(BTreeMap::new())),
            schema,
        })
    }

    pub fn digest_id(&self) -> u32 {
        self.digest.id
    }

    /// Handle to the per-gate state
    pub fn states(&self) -> GateStates {
        Arc::clone(&self.states)
    }

    pub fn snapshot(&self) -> BTreeMap<u32, HyperperiodState> {
        self.states.read().clone()
    }

    /// Insert-or-replace the state table row of one gate
    pub async fn initialize(
        &self,
        gate_id: u32,
        duration_us: u64,
        baseline_ts_us: u64,
    ) -> Result<(), P4RuntimeError> {
        let rule = TableEntryRule::new(&self.state_table, &self.state_action)
            .with_match(&self.gate_match_field, MatchField::exact(gate_id))
            .with_param(param::GATE_ID, gate_id)
            .with_param(param::HYPERPERIOD_TS, duration_us)
            .with_param(param::LAST_HYPERPERIOD, baseline_ts_us);
        let entry = RuleBuilder::new(&self.schema).build(&rule)?;

        let target = format!("{}[gate {}]", self.state_table, gate_id);
        self.session
            .write_table_entry(UpdateKind::Upsert, entry, &target)
            .await?;

        self.states.write().insert(
            gate_id,
            HyperperiodState {
                duration_us,
                last_hyperperiod_us: baseline_ts_us,
                done: false,
            },
        );
        info!(
            "[HP] gate {}: hyperperiod={}us last={}us",
            gate_id, duration_us, baseline_ts_us
        );
        Ok(())
    }

    /// Initialize every configured gate with one shared baseline
    pub async fn initialize_gates(
        &self,
        gates: &[GateConfig],
        baseline_ts_us: u64,
    ) -> Result<usize, P4RuntimeError> {
        for gate in gates {
            let duration_us = gate.hyperperiod_secs.saturating_mul(MICROS_PER_SECOND);
            self.initialize(gate.id, duration_us, baseline_ts_us).await?;
        }
        Ok(gates.len())
    }

    /// Decode one digest entry with the digest's registered member widths
    pub fn decode_entry(&self, data: &P4Data) -> Result<DigestEvent, P4RuntimeError> {
        let decoded = decode_struct(&self.digest, data)?;
        DigestEvent::from_struct(&decoded)
    }

    /// Push the next hyperperiod window of one gate
    ///
    /// The three register writes are independent: a failed write is logged
    /// and reported in the outcome, and the remaining writes still go out.
    pub async fn on_digest(&self, event: &DigestEvent) -> SyncOutcome {
        debug!(
            "[HP] Digest: gate_id={}, ingress_ts={}, hyperperiod_ts={}, last={}",
            event.gate_id,
            event.ingress_ts_us,
            event.hyperperiod_duration_us,
            event.last_hyperperiod_ts_us
        );

        let new_last = event.next_last_hyperperiod();
        let index = i64::from(event.gate_id);
        let writes = [
            (&self.last_hyperperiod, new_last),
            (&self.period_count, 0),
            (&self.done, 0),
        ];

        let mut failed = Vec::new();
        for (register, value) in writes {
            if let Err(e) = self.session.write_register(register, index, value).await {
                warn!(
                    "[HP] Failed to write {} for gate {}: {}",
                    register.name, event.gate_id, e
                );
                failed.push(register.name.clone());
            }
        }

        self.record(event, new_last, &failed);

        if failed.is_empty() {
            info!(
                "[HP] gate {}: next hyperperiod starts at {}us",
                event.gate_id, new_last
            );
        }
        SyncOutcome {
            gate_id: event.gate_id,
            new_last_us: new_last,
            failed,
        }
    }

    fn record(&self, event: &DigestEvent, new_last: u128, failed: &[String]) {
        if !self.known_gates.contains(&event.gate_id) {
            warn!(
                "[HP] Digest for gate {} which is not configured; host state not tracked",
                event.gate_id
            );
            return;
        }

        let last_written = !failed.contains(&self.last_hyperperiod.name);
        let done_cleared = !failed.contains(&self.done.name);
        let mut states = self.states.write();
        let state = states.entry(event.gate_id).or_insert(HyperperiodState {
            duration_us: event.hyperperiod_duration_us,
            last_hyperperiod_us: event.last_hyperperiod_ts_us,
            done: true,
        });
        state.duration_us = event.hyperperiod_duration_us;
        if last_written {
            // Masked to 48 bits, always fits
            state.last_hyperperiod_us = (new_last & width_mask(TIMESTAMP_BITS)) as u64;
        }
        // The digest means the device raised the flag; it stays up until cleared
        state.done = !done_cleared;
    }
}

#[async_trait]
impl DigestHandler for HyperperiodSynchronizer {
    async fn on_digest_list(&self, list: &DigestList) -> psfp_p4runtime::Result<()> {
        if list.digest_id != self.digest.id {
            warn!(
                "[HP] Digest id {} is not {} (id {}); acknowledging without processing",
                list.digest_id, self.digest.name, self.digest.id
            );
            return Ok(());
        }

        let mut first_error = None;
        for data in &list.data {
            match self.decode_entry(data) {
                Ok(event) => {
                    let outcome = self.on_digest(&event).await;
                    if !outcome.is_complete() && first_error.is_none() {
                        first_error = Some(P4RuntimeError::transport(
                            "Write",
                            format!("hyperperiod registers of gate {}", outcome.gate_id),
                            format!("failed: {}", outcome.failed.join(", ")),
                        ));
                    }
                }
                Err(e) => {
                    warn!("[HP] Cannot decode entry of digest list {}: {}", list.list_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
