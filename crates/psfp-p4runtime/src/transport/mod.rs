// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Transport seam between the device session and the P4Runtime service
//!
//! [`GrpcTransport`] talks to a real server. `MemoryTransport` (feature
//! `testing`) keeps everything in process for tests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::proto::p4runtime::{
    ReadRequest, ReadResponse, SetForwardingPipelineConfigRequest, StreamMessageRequest,
    StreamMessageResponse, WriteRequest,
};

mod grpc;
#[cfg(any(test, feature = "testing"))]
mod memory;

pub use grpc::{update_errors_from_details, GrpcTransport};
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryTransport, StreamPeer};

/// Lazily delivered Read responses
pub type ReadResponseStream = BoxStream<'static, Result<ReadResponse>>;

/// Inbound half of the StreamChannel
pub type InboundStream = BoxStream<'static, Result<StreamMessageResponse>>;

/// The four P4Runtime RPCs the controller uses
#[async_trait]
pub trait P4RuntimeTransport: Send + Sync {
    /// Endpoint description used in log and error context
    fn endpoint(&self) -> &str;

    async fn write(&self, request: WriteRequest) -> Result<()>;

    async fn read(&self, request: ReadRequest) -> Result<ReadResponseStream>;

    async fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> Result<()>;

    /// Open the bidirectional stream; messages queued on `outbound` are sent
    /// in order until the sender is dropped.
    async fn open_stream_channel(
        &self,
        outbound: mpsc::Receiver<StreamMessageRequest>,
    ) -> Result<InboundStream>;
}
