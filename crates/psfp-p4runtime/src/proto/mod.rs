// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! P4Runtime wire messages.

pub mod config;
pub mod p4runtime;
pub mod rpc;

/// Fully-qualified gRPC method paths of the `p4.v1.P4Runtime` service.
pub mod method {
    pub const WRITE: &str = "/p4.v1.P4Runtime/Write";
    pub const READ: &str = "/p4.v1.P4Runtime/Read";
    pub const SET_FORWARDING_PIPELINE_CONFIG: &str =
        "/p4.v1.P4Runtime/SetForwardingPipelineConfig";
    pub const STREAM_CHANNEL: &str = "/p4.v1.P4Runtime/StreamChannel";
}

/// Type URL of `p4.v1.Error` inside a `google.protobuf.Any`.
pub const P4_ERROR_TYPE_URL: &str = "type.googleapis.com/p4.v1.Error";
