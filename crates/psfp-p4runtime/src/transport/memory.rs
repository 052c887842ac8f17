// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! In-process transport for tests
//!
//! Records every request, serves reads from a handler, fails selected writes,
//! and exposes the StreamChannel through a [`StreamPeer`]. Arbitration
//! requests are answered automatically unless disabled.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{InboundStream, P4RuntimeTransport, ReadResponseStream};
use crate::error::{P4RuntimeError, Result};
use crate::proto::p4runtime::{
    stream_message_request, stream_message_response, Entity, MasterArbitrationUpdate,
    ReadRequest, ReadResponse, SetForwardingPipelineConfigRequest, StreamMessageRequest,
    StreamMessageResponse, WriteRequest,
};
use crate::proto::rpc;

type ReadHandler = Box<dyn Fn(&ReadRequest) -> Vec<Entity> + Send + Sync>;
type WriteFilter = Box<dyn Fn(&WriteRequest) -> bool + Send + Sync>;
type InboundSender = mpsc::UnboundedSender<Result<StreamMessageResponse>>;

enum ArbitrationReply {
    Accept,
    Reject(String),
    Silent,
}

/// When `open_stream_channel` hands back the inbound stream
#[derive(Clone, Copy)]
enum StreamOpening {
    Immediate,
    AfterFirstMessage,
    Never,
}

struct MemoryState {
    writes: Vec<WriteRequest>,
    reads: Vec<ReadRequest>,
    pipelines: Vec<SetForwardingPipelineConfigRequest>,
    stream_sent: Vec<StreamMessageRequest>,
    read_handler: Option<ReadHandler>,
    write_filter: Option<WriteFilter>,
    arbitration: ArbitrationReply,
    opening: StreamOpening,
    inbound_tx: Option<InboundSender>,
    inbound_rx: Option<mpsc::UnboundedReceiver<Result<StreamMessageResponse>>>,
    outbound_tx: mpsc::UnboundedSender<StreamMessageRequest>,
    outbound_rx: Option<mpsc::UnboundedReceiver<StreamMessageRequest>>,
}

/// Transport that never leaves the process
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                writes: Vec::new(),
                reads: Vec::new(),
                pipelines: Vec::new(),
                stream_sent: Vec::new(),
                read_handler: None,
                write_filter: None,
                arbitration: ArbitrationReply::Accept,
                opening: StreamOpening::Immediate,
                inbound_tx: Some(inbound_tx),
                inbound_rx: Some(inbound_rx),
                outbound_tx,
                outbound_rx: Some(outbound_rx),
            })),
        }
    }

    /// Answer arbitration with a non-OK status
    pub fn reject_arbitration(&self, message: impl Into<String>) {
        self.state.lock().arbitration = ArbitrationReply::Reject(message.into());
    }

    /// Leave arbitration unanswered; the test replies through the peer
    pub fn manual_arbitration(&self) {
        self.state.lock().arbitration = ArbitrationReply::Silent;
    }

    /// Open the StreamChannel only once the client's first message has arrived,
    /// like a server that sends response headers with its first reply
    pub fn open_stream_after_first_message(&self) {
        self.state.lock().opening = StreamOpening::AfterFirstMessage;
    }

    /// Never complete `open_stream_channel`
    pub fn stall_stream_open(&self) {
        self.state.lock().opening = StreamOpening::Never;
    }

    /// Serve Read requests from `handler`; without one, reads return nothing
    pub fn on_read<F>(&self, handler: F)
    where
        F: Fn(&ReadRequest) -> Vec<Entity> + Send + Sync + 'static,
    {
        self.state.lock().read_handler = Some(Box::new(handler));
    }

    /// Fail every Write for which `filter` returns true (the request is still recorded)
    pub fn fail_writes_where<F>(&self, filter: F)
    where
        F: Fn(&WriteRequest) -> bool + Send + Sync + 'static,
    {
        self.state.lock().write_filter = Some(Box::new(filter));
    }

    pub fn writes(&self) -> Vec<WriteRequest> {
        self.state.lock().writes.clone()
    }

    pub fn reads(&self) -> Vec<ReadRequest> {
        self.state.lock().reads.clone()
    }

    pub fn pipelines(&self) -> Vec<SetForwardingPipelineConfigRequest> {
        self.state.lock().pipelines.clone()
    }

    /// Every message the client has sent on the StreamChannel so far
    pub fn stream_sent(&self) -> Vec<StreamMessageRequest> {
        self.state.lock().stream_sent.clone()
    }

    /// Server side of the StreamChannel; can be taken once
    pub fn stream_peer(&self) -> Option<StreamPeer> {
        let mut state = self.state.lock();
        let outbound = state.outbound_rx.take()?;
        Some(StreamPeer {
            state: Arc::clone(&self.state),
            outbound,
        })
    }
}

/// Server end of an in-memory StreamChannel
pub struct StreamPeer {
    state: Arc<Mutex<MemoryState>>,
    outbound: mpsc::UnboundedReceiver<StreamMessageRequest>,
}

impl StreamPeer {
    /// Deliver a message to the client
    pub fn send(&self, message: StreamMessageResponse) -> bool {
        deliver(&self.state, Ok(message))
    }

    /// Deliver a stream error to the client
    pub fn fail(&self, error: P4RuntimeError) -> bool {
        deliver(&self.state, Err(error))
    }

    /// End the inbound half; the client sees the stream close
    pub fn close(&self) {
        self.state.lock().inbound_tx = None;
    }

    /// Next message the client sent, in order
    pub async fn recv(&mut self) -> Option<StreamMessageRequest> {
        self.outbound.recv().await
    }

    /// Next message that is not a keep-alive
    pub async fn recv_non_keepalive(&mut self) -> Option<StreamMessageRequest> {
        loop {
            let message = self.outbound.recv().await?;
            if message.update.is_some() {
                return Some(message);
            }
        }
    }
}

fn deliver(state: &Mutex<MemoryState>, item: Result<StreamMessageResponse>) -> bool {
    let sender = state.lock().inbound_tx.clone();
    match sender {
        Some(tx) => tx.send(item).is_ok(),
        None => false,
    }
}

fn arbitration_reply(request: &MasterArbitrationUpdate, reply: &ArbitrationReply) -> Option<StreamMessageResponse> {
    let status = match reply {
        ArbitrationReply::Accept => rpc::Status {
            code: rpc::CODE_OK,
            ..Default::default()
        },
        ArbitrationReply::Reject(message) => rpc::Status {
            code: rpc::CODE_ALREADY_EXISTS,
            message: message.clone(),
            details: Vec::new(),
        },
        ArbitrationReply::Silent => return None,
    };
    Some(StreamMessageResponse {
        update: Some(stream_message_response::Update::Arbitration(
            MasterArbitrationUpdate {
                device_id: request.device_id,
                election_id: request.election_id.clone(),
                status: Some(status),
            },
        )),
    })
}

/// Record one client message, answer it if it is arbitration, and pass it to the peer
fn relay(state: &Mutex<MemoryState>, message: StreamMessageRequest) {
    let (peer_tx, reply) = {
        let mut guard = state.lock();
        guard.stream_sent.push(message.clone());
        let reply = match &message.update {
            Some(stream_message_request::Update::Arbitration(request)) => {
                arbitration_reply(request, &guard.arbitration)
            }
            _ => None,
        };
        (guard.outbound_tx.clone(), reply)
    };
    if let Some(reply) = reply {
        deliver(state, Ok(reply));
    }
    let _ = peer_tx.send(message);
}

#[async_trait]
impl P4RuntimeTransport for MemoryTransport {
    fn endpoint(&self) -> &str {
        "memory"
    }

    async fn write(&self, request: WriteRequest) -> Result<()> {
        let mut state = self.state.lock();
        let failed = state
            .write_filter
            .as_ref()
            .is_some_and(|filter| filter(&request));
        state.writes.push(request);
        if failed {
            return Err(P4RuntimeError::transport("Write", "memory", "injected failure"));
        }
        Ok(())
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResponseStream> {
        let mut state = self.state.lock();
        let entities = state
            .read_handler
            .as_ref()
            .map(|handler| handler(&request))
            .unwrap_or_default();
        state.reads.push(request);

        // One response per entity, so consumers see a multi-message stream
        let responses: Vec<Result<ReadResponse>> = entities
            .into_iter()
            .map(|entity| {
                Ok(ReadResponse {
                    entities: vec![entity],
                })
            })
            .collect();
        Ok(futures::stream::iter(responses).boxed())
    }

    async fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> Result<()> {
        self.state.lock().pipelines.push(request);
        Ok(())
    }

    async fn open_stream_channel(
        &self,
        mut outbound: mpsc::Receiver<StreamMessageRequest>,
    ) -> Result<InboundStream> {
        let inbound = self
            .state
            .lock()
            .inbound_rx
            .take()
            .ok_or_else(|| P4RuntimeError::StreamClosed("stream already opened".to_string()))?;

        let opening = self.state.lock().opening;
        match opening {
            StreamOpening::Immediate => {}
            StreamOpening::AfterFirstMessage => {
                let first = outbound.recv().await.ok_or_else(|| {
                    P4RuntimeError::StreamClosed("client closed before sending".to_string())
                })?;
                relay(&self.state, first);
            }
            StreamOpening::Never => futures::future::pending::<()>().await,
        }

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                relay(&state, message);
            }
        });

        Ok(UnboundedReceiverStream::new(inbound).boxed())
    }
}
