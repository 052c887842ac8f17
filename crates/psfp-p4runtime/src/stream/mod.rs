// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Control Stream
//!
//! The StreamChannel layered on a device session. [`ControlStream::open`]
//! sends arbitration and waits for the answer; [`ControlStream::run`] then
//! keeps the channel alive and dispatches inbound messages one at a time
//! until shutdown or a transport failure. Every digest list handed to the
//! [`DigestHandler`] is acknowledged after the handler returns, whether it
//! succeeded or not.

mod state_machine;

pub use state_machine::{
    digest_ack, CloseReason, StreamAction, StreamEvent, StreamPhase, StreamStateMachine,
};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{P4RuntimeError, Result};
use crate::proto::p4runtime::{DigestList, StreamMessageRequest};
use crate::session::ElectionId;
use crate::transport::{InboundStream, P4RuntimeTransport};

/// Receives digest lists from the control stream
#[async_trait]
pub trait DigestHandler: Send + Sync {
    /// Process one digest list. An error is logged; the list is still acknowledged.
    async fn on_digest_list(&self, list: &DigestList) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ControlStreamConfig {
    pub keepalive_interval: Duration,
    pub outbound_queue_depth: usize,
    pub arbitration_timeout: Duration,
}

impl Default for ControlStreamConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(1),
            outbound_queue_depth: 64,
            arbitration_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters kept while the stream runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub digests_received: u64,
    pub digests_failed: u64,
    pub acks_sent: u64,
    pub keepalives_sent: u64,
}

pub struct ControlStream {
    machine: StreamStateMachine,
    outbound: Option<mpsc::Sender<StreamMessageRequest>>,
    inbound: InboundStream,
    keepalive_interval: Duration,
    stats: StreamStats,
}

impl std::fmt::Debug for ControlStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlStream")
            .field("machine", &self.machine)
            .field("outbound", &self.outbound)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl ControlStream {
    /// Open the channel, send arbitration and wait until it is accepted
    ///
    /// The arbitration request is queued before the channel is opened: some
    /// servers send their response headers only after it arrives. Opening and
    /// the wait for the answer together are bounded by `arbitration_timeout`.
    pub async fn open(
        transport: Arc<dyn P4RuntimeTransport>,
        device_id: u64,
        election_id: ElectionId,
        config: &ControlStreamConfig,
    ) -> Result<Self> {
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_queue_depth.max(1));
        let mut machine = StreamStateMachine::new(device_id, election_id);

        debug!(
            "[STREAM] Sending arbitration for device {} with election id {}",
            device_id, election_id
        );
        for action in machine.handle(StreamEvent::Opened) {
            if let StreamAction::Send(message) = action {
                outbound
                    .try_send(message)
                    .map_err(|_| P4RuntimeError::StreamClosed("outbound queue full".to_string()))?;
            }
        }

        let keepalive_interval = config.keepalive_interval;
        let waited = tokio::time::timeout(config.arbitration_timeout, async move {
            let inbound = transport.open_stream_channel(outbound_rx).await?;
            let mut stream = ControlStream {
                machine,
                outbound: Some(outbound),
                inbound,
                keepalive_interval,
                stats: StreamStats::default(),
            };
            while stream.machine.phase() == StreamPhase::Arbitrating {
                let event = stream.next_inbound_event().await;
                let actions = stream.machine.handle(event);
                stream.apply(actions, None::<&NoDigests>).await?;
            }
            Ok::<_, P4RuntimeError>(stream)
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(P4RuntimeError::ArbitrationRejected(format!(
                "no arbitration response within {:?}",
                config.arbitration_timeout
            ))),
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.machine.phase()
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Keep the channel alive and dispatch inbound messages until shutdown
    ///
    /// Returns `Ok` when stopped through `shutdown`, and an error when the
    /// transport fails or the server ends the stream. There is no reconnect.
    pub async fn run<H>(mut self, handler: &H, mut shutdown: watch::Receiver<bool>) -> Result<StreamStats>
    where
        H: DigestHandler + ?Sized,
    {
        let mut keepalive = tokio::time::interval_at(
            Instant::now() + self.keepalive_interval,
            self.keepalive_interval,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("[STREAM] Control stream active");

        while self.machine.phase() != StreamPhase::Closed {
            let event = if *shutdown.borrow() {
                StreamEvent::ShutdownRequested
            } else {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_ok() && !*shutdown.borrow() {
                            continue;
                        }
                        StreamEvent::ShutdownRequested
                    }
                    event = self.next_inbound_event() => event,
                    _ = keepalive.tick() => StreamEvent::KeepAliveDue,
                }
            };

            let actions = self.machine.handle(event);
            self.apply(actions, Some(handler)).await?;
        }

        info!(
            "[STREAM] Closed after {} digest list(s), {} ack(s)",
            self.stats.digests_received, self.stats.acks_sent
        );
        Ok(self.stats)
    }

    async fn next_inbound_event(&mut self) -> StreamEvent {
        match self.inbound.next().await {
            Some(Ok(message)) => StreamEvent::Received(message),
            Some(Err(e)) => StreamEvent::TransportFailed(e.to_string()),
            None => StreamEvent::ServerClosed,
        }
    }

    async fn send(&mut self, message: StreamMessageRequest) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| P4RuntimeError::StreamClosed("outbound half closed".to_string()))?;
        outbound
            .send(message)
            .await
            .map_err(|_| P4RuntimeError::StreamClosed("outbound channel dropped".to_string()))
    }

    /// Execute actions in order; actions produced along the way run before
    /// the remaining ones.
    async fn apply<H>(&mut self, actions: Vec<StreamAction>, handler: Option<&H>) -> Result<()>
    where
        H: DigestHandler + ?Sized,
    {
        let mut pending: VecDeque<StreamAction> = actions.into();

        while let Some(action) = pending.pop_front() {
            match action {
                StreamAction::Send(message) => {
                    let kind = outbound_kind(&message);
                    self.send(message).await?;
                    match kind {
                        OutboundKind::KeepAlive => self.stats.keepalives_sent += 1,
                        OutboundKind::Ack => self.stats.acks_sent += 1,
                        OutboundKind::Arbitration => {}
                    }
                }
                StreamAction::DeliverDigest(list) => {
                    self.stats.digests_received += 1;
                    debug!(
                        "[STREAM] Digest list {} (digest {}, {} entries)",
                        list.list_id,
                        list.digest_id,
                        list.data.len()
                    );
                    if let Some(handler) = handler {
                        if let Err(e) = handler.on_digest_list(&list).await {
                            self.stats.digests_failed += 1;
                            warn!("[STREAM] Digest list {} processing failed: {}", list.list_id, e);
                        }
                    }
                    let follow_up = self.machine.handle(StreamEvent::DigestHandled {
                        digest_id: list.digest_id,
                        list_id: list.list_id,
                    });
                    for action in follow_up.into_iter().rev() {
                        pending.push_front(action);
                    }
                }
                StreamAction::BecameActive => {
                    info!("[STREAM] Arbitration accepted");
                }
                StreamAction::ArbitrationNotice { code, message } => {
                    if code == crate::proto::rpc::CODE_OK {
                        debug!("[STREAM] Arbitration update: still master");
                    } else {
                        warn!("[STREAM] Arbitration update: code {} ({})", code, message);
                    }
                }
                StreamAction::ServerError { code, message } => {
                    warn!("[STREAM] Server reported stream error {}: {}", code, message);
                }
                StreamAction::Ignored(reason) => {
                    debug!("[STREAM] Ignored inbound message: {}", reason);
                }
                StreamAction::Closed(reason) => {
                    self.outbound = None;
                    return match reason {
                        CloseReason::Shutdown => {
                            info!("[STREAM] Shutdown requested");
                            Ok(())
                        }
                        CloseReason::ArbitrationRejected(e) => {
                            error!("[STREAM] Arbitration rejected: {}", e);
                            Err(P4RuntimeError::ArbitrationRejected(e))
                        }
                        CloseReason::Transport(e) => {
                            error!("[STREAM] Transport failure: {}", e);
                            Err(P4RuntimeError::StreamClosed(e))
                        }
                        CloseReason::ServerClosed => {
                            error!("[STREAM] Server closed the stream");
                            Err(P4RuntimeError::StreamClosed("server closed the stream".to_string()))
                        }
                    };
                }
            }
        }
        Ok(())
    }
}

enum OutboundKind {
    Arbitration,
    Ack,
    KeepAlive,
}

fn outbound_kind(message: &StreamMessageRequest) -> OutboundKind {
    use crate::proto::p4runtime::stream_message_request::Update;
    match message.update {
        Some(Update::Arbitration(_)) => OutboundKind::Arbitration,
        Some(Update::DigestAck(_)) => OutboundKind::Ack,
        None => OutboundKind::KeepAlive,
    }
}

/// Placeholder handler type for the arbitration phase, where digests are never delivered
struct NoDigests;

#[async_trait]
impl DigestHandler for NoDigests {
    async fn on_digest_list(&self, _list: &DigestList) -> Result<()> {
        Ok(())
    }
}
