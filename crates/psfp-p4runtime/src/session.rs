// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Device Session
//!
//! Owns the control connection to one device and the identity the controller
//! presents on every call (device id, election id). The session is cheap to
//! clone; clones share the transport, so the control stream task and the
//! telemetry poller issue independent calls over one connection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::codec::{self, Truncation};
use crate::error::{P4RuntimeError, Result};
use crate::proto::config::P4Info;
use crate::proto::p4runtime::{
    entity, set_forwarding_pipeline_config_request, update, CounterData, CounterEntry,
    DirectCounterEntry, Entity, ForwardingPipelineConfig, Index, P4Data, ReadRequest,
    RegisterEntry, SetForwardingPipelineConfigRequest, TableEntry, Uint128, Update,
    WriteRequest,
};
use crate::schema::RegisterRef;
use crate::stream::{ControlStream, ControlStreamConfig};
use crate::transport::{GrpcTransport, P4RuntimeTransport};

/// Election id of this controller; higher wins mastership
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ElectionId {
    pub high: u64,
    pub low: u64,
}

impl ElectionId {
    pub fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }
}

impl From<ElectionId> for Uint128 {
    fn from(id: ElectionId) -> Self {
        Uint128 {
            high: id.high,
            low: id.low,
        }
    }
}

impl fmt::Display for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.high, self.low)
    }
}

/// Operation kind of one update in a Write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Insert,
    Modify,
    /// Insert-or-replace; sent as MODIFY, which the device applies to
    /// existing table entries and to register cells
    Upsert,
    Delete,
}

impl UpdateKind {
    fn wire_type(self) -> update::Type {
        match self {
            UpdateKind::Insert => update::Type::Insert,
            UpdateKind::Modify | UpdateKind::Upsert => update::Type::Modify,
            UpdateKind::Delete => update::Type::Delete,
        }
    }
}

/// Connection parameters of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub name: String,
    pub address: String,
    pub device_id: u64,
    pub election_id: ElectionId,
    pub connect_timeout: Duration,
}

/// Lazily read entities
pub type EntityStream = BoxStream<'static, Result<Entity>>;

/// The control connection to one device
#[derive(Clone)]
pub struct DeviceSession {
    name: String,
    device_id: u64,
    election_id: ElectionId,
    transport: Arc<dyn P4RuntimeTransport>,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("name", &self.name)
            .field("endpoint", &self.transport.endpoint())
            .field("device_id", &self.device_id)
            .field("election_id", &self.election_id)
            .finish()
    }
}

impl DeviceSession {
    /// Open a gRPC connection to the device
    pub async fn connect(config: &SessionConfig) -> Result<Self> {
        let transport = GrpcTransport::connect(&config.address, config.connect_timeout).await?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build a session over an existing transport
    pub fn with_transport(config: &SessionConfig, transport: Arc<dyn P4RuntimeTransport>) -> Self {
        Self {
            name: config.name.clone(),
            device_id: config.device_id,
            election_id: config.election_id,
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn election_id(&self) -> ElectionId {
        self.election_id
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Open the control stream and complete the arbitration handshake
    ///
    /// Returns the stream in the `Active` phase. A non-OK arbitration status
    /// is returned as `ArbitrationRejected`; there is no retry.
    pub async fn send_mastership_arbitration(
        &self,
        config: &ControlStreamConfig,
    ) -> Result<ControlStream> {
        let stream = ControlStream::open(
            Arc::clone(&self.transport),
            self.device_id,
            self.election_id,
            config,
        )
        .await?;
        info!(
            "[SESSION] {} is master for device {} with election id {}",
            self.name, self.device_id, self.election_id
        );
        Ok(stream)
    }

    /// Push the P4Info and device image with VERIFY_AND_COMMIT
    pub async fn set_forwarding_pipeline_config(
        &self,
        p4info: &P4Info,
        device_config: Vec<u8>,
    ) -> Result<()> {
        let request = SetForwardingPipelineConfigRequest {
            device_id: self.device_id,
            election_id: Some(self.election_id.into()),
            action: set_forwarding_pipeline_config_request::Action::VerifyAndCommit as i32,
            config: Some(ForwardingPipelineConfig {
                p4info: Some(p4info.clone()),
                p4_device_config: device_config,
            }),
            role: String::new(),
        };
        self.transport
            .set_forwarding_pipeline_config(request)
            .await
            .map_err(|e| e.with_target(&self.name))?;
        info!("[SESSION] Installed forwarding pipeline on {}", self.name);
        Ok(())
    }

    /// Send a batch of updates in one Write
    ///
    /// The device may apply part of a batch; any failure is returned with the
    /// per-update errors it reported.
    pub async fn write(&self, updates: Vec<(UpdateKind, Entity)>, target: &str) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let request = WriteRequest {
            device_id: self.device_id,
            election_id: Some(self.election_id.into()),
            updates: updates
                .into_iter()
                .map(|(kind, entity)| Update {
                    r#type: kind.wire_type() as i32,
                    entity: Some(entity),
                })
                .collect(),
            role: String::new(),
        };
        let count = request.updates.len();
        self.transport.write(request).await.map_err(|e| {
            let e = e.with_target(target);
            for update_error in e.update_errors() {
                warn!("[SESSION] {}: {}", target, update_error);
            }
            e
        })?;
        debug!("[SESSION] Wrote {} update(s) for {}", count, target);
        Ok(())
    }

    /// Single-update convenience over [`DeviceSession::write`]
    pub async fn write_one(&self, kind: UpdateKind, entity: Entity, target: &str) -> Result<()> {
        self.write(vec![(kind, entity)], target).await
    }

    pub async fn write_table_entry(&self, kind: UpdateKind, entry: TableEntry, target: &str) -> Result<()> {
        self.write_one(kind, Entity::table_entry(entry), target).await
    }

    /// Write one register cell at the register's resolved width
    ///
    /// A value wider than the register is masked and the truncation returned
    /// (and logged); it does not fail the write.
    pub async fn write_register(
        &self,
        register: &RegisterRef,
        index: i64,
        value: u128,
    ) -> Result<Option<Truncation>> {
        let target = format!("{}[{}]", register.name, index);
        let encoded = codec::encode(value, register.bit_width)?;
        encoded.warn_if_truncated(&target);
        let truncation = encoded.truncation;

        let entry = RegisterEntry {
            register_id: register.id,
            index: Some(Index { index }),
            data: Some(P4Data::bitstring(encoded.into_bytes())),
        };
        self.write_one(UpdateKind::Upsert, Entity::register_entry(entry), &target)
            .await?;
        debug!("[REG WRITE] {} = {}", target, value);
        Ok(truncation)
    }

    /// Read entities matching `filters`
    ///
    /// Nothing is fetched until the stream is polled; each call issues a fresh
    /// Read, so the sequence can be restarted by calling again.
    pub async fn read(&self, filters: Vec<Entity>, target: &str) -> Result<EntityStream> {
        let request = ReadRequest {
            device_id: self.device_id,
            entities: filters,
            role: String::new(),
        };
        let target = target.to_string();
        let responses = self
            .transport
            .read(request)
            .await
            .map_err(|e| e.with_target(&target))?;
        Ok(responses
            .map_err(move |e| e.with_target(&target))
            .map_ok(|response| {
                futures::stream::iter(response.entities.into_iter().map(Ok::<_, P4RuntimeError>))
            })
            .try_flatten()
            .boxed())
    }

    /// All entries of one table
    pub async fn read_table_entries(&self, table_id: u32, target: &str) -> Result<Vec<TableEntry>> {
        let filter = Entity::table_entry(TableEntry {
            table_id,
            ..Default::default()
        });
        self.read(vec![filter], target)
            .await?
            .try_filter_map(|entity| async move {
                Ok(match entity.entity {
                    Some(entity::Entity::TableEntry(entry)) => Some(entry),
                    _ => None,
                })
            })
            .try_collect()
            .await
    }

    /// Packet and byte count of one indexed counter cell
    pub async fn read_counter(&self, counter_id: u32, index: i64, target: &str) -> Result<CounterData> {
        let filter = Entity::counter_entry(CounterEntry {
            counter_id,
            index: Some(Index { index }),
            data: None,
        });
        let mut entities = self.read(vec![filter], target).await?;
        while let Some(entity) = entities.next().await {
            if let Some(entity::Entity::CounterEntry(entry)) = entity?.entity {
                return Ok(entry.data.unwrap_or_default());
            }
        }
        Err(P4RuntimeError::Decode(format!("no counter data returned for {}", target)))
    }

    /// Direct counter values of every entry of a table
    pub async fn read_direct_counters(
        &self,
        table_id: u32,
        target: &str,
    ) -> Result<Vec<DirectCounterEntry>> {
        let filter = Entity {
            entity: Some(entity::Entity::DirectCounterEntry(DirectCounterEntry {
                table_entry: Some(TableEntry {
                    table_id,
                    ..Default::default()
                }),
                data: None,
            })),
        };
        self.read(vec![filter], target)
            .await?
            .try_filter_map(|entity| async move {
                Ok(match entity.entity {
                    Some(entity::Entity::DirectCounterEntry(entry)) => Some(entry),
                    _ => None,
                })
            })
            .try_collect()
            .await
    }
}

impl P4RuntimeError {
    /// Replace the target of a transport error with call-site context
    pub fn with_target(self, target: &str) -> Self {
        match self {
            P4RuntimeError::Transport {
                operation,
                status,
                update_errors,
                ..
            } => P4RuntimeError::Transport {
                operation,
                target: target.to_string(),
                status,
                update_errors,
            },
            other => other,
        }
    }
}
