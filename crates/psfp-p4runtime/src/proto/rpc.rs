// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! `google.rpc.Status` and `google.protobuf.Any`, as carried by P4Runtime.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Any {
    #[prost(string, tag = "1")]
    pub type_url: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "3")]
    pub details: ::prost::alloc::vec::Vec<Any>,
}

/// `google.rpc.Code::OK`
pub const CODE_OK: i32 = 0;
/// `google.rpc.Code::ALREADY_EXISTS`
pub const CODE_ALREADY_EXISTS: i32 = 6;
/// `google.rpc.Code::NOT_FOUND`
pub const CODE_NOT_FOUND: i32 = 5;

impl Status {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}
