// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Control stream state machine
//!
//! Pure and deterministic: no I/O, no timers. The driver feeds events in
//! arrival order and executes the returned actions in order.
//!
//! ```text
//! Unopened --open--> Arbitrating --OK arbitration--> Active
//!     any --shutdown / transport error / rejection--> Closed
//! ```

use crate::proto::p4runtime::{
    stream_message_request, stream_message_response, DigestList, DigestListAck,
    MasterArbitrationUpdate, StreamMessageRequest, StreamMessageResponse, Uint128,
};
use crate::session::ElectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Unopened,
    Arbitrating,
    Active,
    Closed,
}

/// Why the stream reached `Closed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Shutdown,
    ArbitrationRejected(String),
    Transport(String),
    ServerClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The channel is open; arbitration goes out first
    Opened,
    Received(StreamMessageResponse),
    KeepAliveDue,
    /// Processing of a delivered digest list finished, successfully or not
    DigestHandled { digest_id: u32, list_id: u64 },
    TransportFailed(String),
    ServerClosed,
    ShutdownRequested,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamAction {
    Send(StreamMessageRequest),
    DeliverDigest(DigestList),
    BecameActive,
    /// Arbitration update received while already active
    ArbitrationNotice { code: i32, message: String },
    ServerError { code: i32, message: String },
    Ignored(&'static str),
    Closed(CloseReason),
}

#[derive(Debug, Clone)]
pub struct StreamStateMachine {
    device_id: u64,
    election_id: ElectionId,
    phase: StreamPhase,
    last_error: Option<String>,
}

impl StreamStateMachine {
    pub fn new(device_id: u64, election_id: ElectionId) -> Self {
        Self {
            device_id,
            election_id,
            phase: StreamPhase::Unopened,
            last_error: None,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn handle(&mut self, event: StreamEvent) -> Vec<StreamAction> {
        if self.phase == StreamPhase::Closed {
            return vec![StreamAction::Ignored("stream is closed")];
        }

        match event {
            StreamEvent::Opened => self.on_opened(),
            StreamEvent::Received(message) => self.on_message(message),
            StreamEvent::KeepAliveDue => match self.phase {
                StreamPhase::Active => vec![StreamAction::Send(StreamMessageRequest::default())],
                _ => Vec::new(),
            },
            StreamEvent::DigestHandled { digest_id, list_id } => match self.phase {
                StreamPhase::Active => vec![StreamAction::Send(digest_ack(digest_id, list_id))],
                _ => vec![StreamAction::Ignored("digest handled outside active phase")],
            },
            StreamEvent::TransportFailed(error) => self.close(CloseReason::Transport(error)),
            StreamEvent::ServerClosed => self.close(CloseReason::ServerClosed),
            StreamEvent::ShutdownRequested => self.close(CloseReason::Shutdown),
        }
    }

    fn on_opened(&mut self) -> Vec<StreamAction> {
        if self.phase != StreamPhase::Unopened {
            return vec![StreamAction::Ignored("stream already opened")];
        }
        self.phase = StreamPhase::Arbitrating;
        let arbitration = MasterArbitrationUpdate {
            device_id: self.device_id,
            election_id: Some(Uint128::from(self.election_id)),
            status: None,
        };
        vec![StreamAction::Send(StreamMessageRequest {
            update: Some(stream_message_request::Update::Arbitration(arbitration)),
        })]
    }

    fn on_message(&mut self, message: StreamMessageResponse) -> Vec<StreamAction> {
        match (self.phase, message.update) {
            (StreamPhase::Arbitrating, Some(stream_message_response::Update::Arbitration(update))) => {
                let (code, text) = status_of(&update);
                if code == crate::proto::rpc::CODE_OK {
                    self.phase = StreamPhase::Active;
                    vec![StreamAction::BecameActive]
                } else {
                    self.close(CloseReason::ArbitrationRejected(format!("code {}: {}", code, text)))
                }
            }
            (StreamPhase::Active, Some(stream_message_response::Update::Arbitration(update))) => {
                let (code, message) = status_of(&update);
                vec![StreamAction::ArbitrationNotice { code, message }]
            }
            (StreamPhase::Active, Some(stream_message_response::Update::Digest(list))) => {
                vec![StreamAction::DeliverDigest(list)]
            }
            (_, Some(stream_message_response::Update::Error(error))) => {
                vec![StreamAction::ServerError {
                    code: error.canonical_code,
                    message: error.message,
                }]
            }
            (StreamPhase::Active, None) => vec![StreamAction::Ignored("unrecognized stream message")],
            _ => vec![StreamAction::Ignored("message not expected in this phase")],
        }
    }

    fn close(&mut self, reason: CloseReason) -> Vec<StreamAction> {
        self.phase = StreamPhase::Closed;
        self.last_error = match &reason {
            CloseReason::Shutdown => None,
            CloseReason::ArbitrationRejected(e) | CloseReason::Transport(e) => Some(e.clone()),
            CloseReason::ServerClosed => Some("server closed the stream".to_string()),
        };
        vec![StreamAction::Closed(reason)]
    }
}

fn status_of(update: &MasterArbitrationUpdate) -> (i32, String) {
    update
        .status
        .as_ref()
        .map(|s| (s.code, s.message.clone()))
        .unwrap_or((crate::proto::rpc::CODE_OK, String::new()))
}

/// Acknowledgment for one digest list
pub fn digest_ack(digest_id: u32, list_id: u64) -> StreamMessageRequest {
    StreamMessageRequest {
        update: Some(stream_message_request::Update::DigestAck(DigestListAck {
            digest_id,
            list_id,
        })),
    }
}
