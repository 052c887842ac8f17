// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! tonic client for the `p4.v1.P4Runtime` service

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use http::uri::PathAndQuery;
use prost::Message;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use super::{InboundStream, P4RuntimeTransport, ReadResponseStream};
use crate::error::{P4RuntimeError, Result, UpdateError};
use crate::proto::p4runtime::{
    Error as P4Error, ReadRequest, ReadResponse, SetForwardingPipelineConfigRequest,
    SetForwardingPipelineConfigResponse, StreamMessageRequest, StreamMessageResponse,
    WriteRequest, WriteResponse,
};
use crate::proto::{method, rpc, P4_ERROR_TYPE_URL};

/// P4Runtime over a tonic `Channel`
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    grpc: Grpc<Channel>,
    endpoint: String,
}

impl GrpcTransport {
    /// Connect to `address` (`host:port`, or a full `http://` URI)
    pub async fn connect(address: &str, connect_timeout: Duration) -> Result<Self> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| P4RuntimeError::InvalidValue(format!("address '{}': {}", address, e)))?
            .connect_timeout(connect_timeout)
            .tcp_nodelay(true);

        debug!("[SESSION] Connecting to {}", address);
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| P4RuntimeError::transport("Connect", address, e))?;
        info!("[SESSION] gRPC channel to {} established", address);

        Ok(Self {
            grpc: Grpc::new(channel),
            endpoint: address.to_string(),
        })
    }

    async fn ready(&self, operation: &'static str) -> Result<Grpc<Channel>> {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| P4RuntimeError::transport(operation, &self.endpoint, e))?;
        Ok(grpc)
    }

    async fn unary<Req, Resp>(
        &self,
        operation: &'static str,
        path: &'static str,
        request: Req,
    ) -> Result<Resp>
    where
        Req: Message + Send + Sync + 'static,
        Resp: Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.ready(operation).await?;
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                ProstCodec::<Req, Resp>::default(),
            )
            .await
            .map_err(|status| status_error(operation, &self.endpoint, &status))?;
        Ok(response.into_inner())
    }
}

/// Convert a failed call into a transport error, keeping per-update details
fn status_error(operation: &'static str, target: &str, status: &tonic::Status) -> P4RuntimeError {
    P4RuntimeError::Transport {
        operation,
        target: target.to_string(),
        status: format!("{:?}: {}", status.code(), status.message()),
        update_errors: update_errors_from_details(status.details()),
    }
}

/// Decode the `google.rpc.Status` details of a failed Write into the errors
/// of the individual updates. Updates that succeeded are left out.
pub fn update_errors_from_details(details: &[u8]) -> Vec<UpdateError> {
    if details.is_empty() {
        return Vec::new();
    }
    let Ok(status) = rpc::Status::decode(details) else {
        return Vec::new();
    };

    status
        .details
        .iter()
        .enumerate()
        .filter(|(_, any)| any.type_url == P4_ERROR_TYPE_URL || any.type_url.ends_with("/p4.v1.Error"))
        .filter_map(|(index, any)| {
            let error = P4Error::decode(any.value.as_slice()).ok()?;
            (error.canonical_code != rpc::CODE_OK).then(|| UpdateError {
                index,
                canonical_code: error.canonical_code,
                message: error.message,
                space: error.space,
                code: error.code,
            })
        })
        .collect()
}

#[async_trait]
impl P4RuntimeTransport for GrpcTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn write(&self, request: WriteRequest) -> Result<()> {
        self.unary::<_, WriteResponse>("Write", method::WRITE, request)
            .await
            .map(|_| ())
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResponseStream> {
        let mut grpc = self.ready("Read").await?;
        let endpoint = self.endpoint.clone();
        let response = grpc
            .server_streaming(
                tonic::Request::new(request),
                PathAndQuery::from_static(method::READ),
                ProstCodec::<ReadRequest, ReadResponse>::default(),
            )
            .await
            .map_err(|status| status_error("Read", &endpoint, &status))?;

        Ok(response
            .into_inner()
            .map(move |item| item.map_err(|status| status_error("Read", &endpoint, &status)))
            .boxed())
    }

    async fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> Result<()> {
        self.unary::<_, SetForwardingPipelineConfigResponse>(
            "SetForwardingPipelineConfig",
            method::SET_FORWARDING_PIPELINE_CONFIG,
            request,
        )
        .await
        .map(|_| ())
    }

    async fn open_stream_channel(
        &self,
        outbound: mpsc::Receiver<StreamMessageRequest>,
    ) -> Result<InboundStream> {
        let mut grpc = self.ready("StreamChannel").await?;
        let endpoint = self.endpoint.clone();
        let response = grpc
            .streaming(
                tonic::Request::new(ReceiverStream::new(outbound)),
                PathAndQuery::from_static(method::STREAM_CHANNEL),
                ProstCodec::<StreamMessageRequest, StreamMessageResponse>::default(),
            )
            .await
            .map_err(|status| status_error("StreamChannel", &endpoint, &status))?;

        Ok(response
            .into_inner()
            .map(move |item| item.map_err(|status| status_error("StreamChannel", &endpoint, &status)))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::rpc::Any;

    fn p4_error(code: i32, message: &str) -> Any {
        Any {
            type_url: P4_ERROR_TYPE_URL.to_string(),
            value: P4Error {
                canonical_code: code,
                message: message.to_string(),
                space: "ALL-sswitch-p4org".to_string(),
                code: 0,
                details: None,
            }
            .encode_to_vec(),
        }
    }

    #[test]
    fn test_update_errors_skip_ok_entries() {
        let status = rpc::Status {
            code: 2,
            message: "Write failure.".to_string(),
            details: vec![
                p4_error(rpc::CODE_OK, ""),
                p4_error(rpc::CODE_ALREADY_EXISTS, "Match entry exists"),
            ],
        };
        let errors = update_errors_from_details(&status.encode_to_vec());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 1);
        assert_eq!(errors[0].canonical_code, rpc::CODE_ALREADY_EXISTS);
        assert_eq!(errors[0].message, "Match entry exists");
    }

    #[test]
    fn test_garbage_details_yield_nothing() {
        assert!(update_errors_from_details(&[]).is_empty());
        assert!(update_errors_from_details(&[0xff, 0xff, 0xff]).is_empty());
    }
}
