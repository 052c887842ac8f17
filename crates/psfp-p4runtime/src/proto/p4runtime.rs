// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! `p4.v1` messages used by the controller.
//!
//! Field tags follow `p4/v1/p4runtime.proto` and `p4/v1/p4data.proto`, so the
//! subset declared here is wire compatible with any P4Runtime server. Fields
//! the controller never sets or reads are left out; prost skips them on decode.

use super::config::P4Info;
use super::rpc::{Any, Status};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Uint128 {
    #[prost(uint64, tag = "1")]
    pub high: u64,
    #[prost(uint64, tag = "2")]
    pub low: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteRequest {
    #[prost(uint64, tag = "1")]
    pub device_id: u64,
    #[prost(message, optional, tag = "3")]
    pub election_id: ::core::option::Option<Uint128>,
    #[prost(message, repeated, tag = "4")]
    pub updates: ::prost::alloc::vec::Vec<Update>,
    #[prost(string, tag = "6")]
    pub role: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadRequest {
    #[prost(uint64, tag = "1")]
    pub device_id: u64,
    #[prost(message, repeated, tag = "2")]
    pub entities: ::prost::alloc::vec::Vec<Entity>,
    #[prost(string, tag = "3")]
    pub role: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadResponse {
    #[prost(message, repeated, tag = "1")]
    pub entities: ::prost::alloc::vec::Vec<Entity>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Update {
    #[prost(enumeration = "update::Type", tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub entity: ::core::option::Option<Entity>,
}

pub mod update {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        Unspecified = 0,
        Insert = 1,
        Modify = 2,
        Delete = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Entity {
    #[prost(oneof = "entity::Entity", tags = "2, 5, 6, 7, 8, 11, 12")]
    pub entity: ::core::option::Option<entity::Entity>,
}

pub mod entity {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Entity {
        #[prost(message, tag = "2")]
        TableEntry(super::TableEntry),
        #[prost(message, tag = "5")]
        MeterEntry(super::MeterEntry),
        #[prost(message, tag = "6")]
        DirectMeterEntry(super::DirectMeterEntry),
        #[prost(message, tag = "7")]
        CounterEntry(super::CounterEntry),
        #[prost(message, tag = "8")]
        DirectCounterEntry(super::DirectCounterEntry),
        #[prost(message, tag = "11")]
        RegisterEntry(super::RegisterEntry),
        #[prost(message, tag = "12")]
        DigestEntry(super::DigestEntry),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableEntry {
    #[prost(uint32, tag = "1")]
    pub table_id: u32,
    #[prost(message, repeated, tag = "2")]
    pub r#match: ::prost::alloc::vec::Vec<FieldMatch>,
    #[prost(message, optional, tag = "3")]
    pub action: ::core::option::Option<TableAction>,
    #[prost(int32, tag = "4")]
    pub priority: i32,
    #[prost(message, optional, tag = "6")]
    pub meter_config: ::core::option::Option<MeterConfig>,
    #[prost(message, optional, tag = "7")]
    pub counter_data: ::core::option::Option<CounterData>,
    #[prost(bool, tag = "8")]
    pub is_default_action: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FieldMatch {
    #[prost(uint32, tag = "1")]
    pub field_id: u32,
    #[prost(oneof = "field_match::FieldMatchType", tags = "2, 3, 4, 6, 7")]
    pub field_match_type: ::core::option::Option<field_match::FieldMatchType>,
}

pub mod field_match {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Exact {
        #[prost(bytes = "vec", tag = "1")]
        pub value: ::prost::alloc::vec::Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Ternary {
        #[prost(bytes = "vec", tag = "1")]
        pub value: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub mask: ::prost::alloc::vec::Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Lpm {
        #[prost(bytes = "vec", tag = "1")]
        pub value: ::prost::alloc::vec::Vec<u8>,
        #[prost(int32, tag = "2")]
        pub prefix_len: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Range {
        #[prost(bytes = "vec", tag = "1")]
        pub low: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub high: ::prost::alloc::vec::Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Optional {
        #[prost(bytes = "vec", tag = "1")]
        pub value: ::prost::alloc::vec::Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum FieldMatchType {
        #[prost(message, tag = "2")]
        Exact(Exact),
        #[prost(message, tag = "3")]
        Ternary(Ternary),
        #[prost(message, tag = "4")]
        Lpm(Lpm),
        #[prost(message, tag = "6")]
        Range(Range),
        #[prost(message, tag = "7")]
        Optional(Optional),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableAction {
    #[prost(oneof = "table_action::Type", tags = "1")]
    pub r#type: ::core::option::Option<table_action::Type>,
}

pub mod table_action {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Type {
        #[prost(message, tag = "1")]
        Action(super::Action),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Action {
    #[prost(uint32, tag = "1")]
    pub action_id: u32,
    #[prost(message, repeated, tag = "4")]
    pub params: ::prost::alloc::vec::Vec<action::Param>,
}

pub mod action {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Param {
        #[prost(uint32, tag = "2")]
        pub param_id: u32,
        #[prost(bytes = "vec", tag = "3")]
        pub value: ::prost::alloc::vec::Vec<u8>,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Index {
    #[prost(int64, tag = "1")]
    pub index: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MeterConfig {
    #[prost(int64, tag = "1")]
    pub cir: i64,
    #[prost(int64, tag = "2")]
    pub cburst: i64,
    #[prost(int64, tag = "3")]
    pub pir: i64,
    #[prost(int64, tag = "4")]
    pub pburst: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MeterEntry {
    #[prost(uint32, tag = "1")]
    pub meter_id: u32,
    #[prost(message, optional, tag = "2")]
    pub index: ::core::option::Option<Index>,
    #[prost(message, optional, tag = "3")]
    pub config: ::core::option::Option<MeterConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DirectMeterEntry {
    #[prost(message, optional, tag = "1")]
    pub table_entry: ::core::option::Option<TableEntry>,
    #[prost(message, optional, tag = "2")]
    pub config: ::core::option::Option<MeterConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CounterEntry {
    #[prost(uint32, tag = "1")]
    pub counter_id: u32,
    #[prost(message, optional, tag = "2")]
    pub index: ::core::option::Option<Index>,
    #[prost(message, optional, tag = "3")]
    pub data: ::core::option::Option<CounterData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DirectCounterEntry {
    #[prost(message, optional, tag = "1")]
    pub table_entry: ::core::option::Option<TableEntry>,
    #[prost(message, optional, tag = "2")]
    pub data: ::core::option::Option<CounterData>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct CounterData {
    #[prost(int64, tag = "1")]
    pub byte_count: i64,
    #[prost(int64, tag = "2")]
    pub packet_count: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterEntry {
    #[prost(uint32, tag = "1")]
    pub register_id: u32,
    #[prost(message, optional, tag = "2")]
    pub index: ::core::option::Option<Index>,
    #[prost(message, optional, tag = "3")]
    pub data: ::core::option::Option<P4Data>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DigestEntry {
    #[prost(uint32, tag = "1")]
    pub digest_id: u32,
    #[prost(message, optional, tag = "2")]
    pub config: ::core::option::Option<digest_entry::Config>,
}

pub mod digest_entry {
    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Config {
        #[prost(int64, tag = "1")]
        pub max_timeout_ns: i64,
        #[prost(int32, tag = "2")]
        pub max_list_size: i32,
        #[prost(int64, tag = "3")]
        pub ack_timeout_ns: i64,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamMessageRequest {
    #[prost(oneof = "stream_message_request::Update", tags = "1, 3")]
    pub update: ::core::option::Option<stream_message_request::Update>,
}

pub mod stream_message_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Update {
        #[prost(message, tag = "1")]
        Arbitration(super::MasterArbitrationUpdate),
        #[prost(message, tag = "3")]
        DigestAck(super::DigestListAck),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamMessageResponse {
    #[prost(oneof = "stream_message_response::Update", tags = "1, 3, 6")]
    pub update: ::core::option::Option<stream_message_response::Update>,
}

pub mod stream_message_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Update {
        #[prost(message, tag = "1")]
        Arbitration(super::MasterArbitrationUpdate),
        #[prost(message, tag = "3")]
        Digest(super::DigestList),
        #[prost(message, tag = "6")]
        Error(super::StreamError),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MasterArbitrationUpdate {
    #[prost(uint64, tag = "1")]
    pub device_id: u64,
    #[prost(message, optional, tag = "3")]
    pub election_id: ::core::option::Option<Uint128>,
    #[prost(message, optional, tag = "4")]
    pub status: ::core::option::Option<Status>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DigestList {
    #[prost(uint32, tag = "1")]
    pub digest_id: u32,
    #[prost(uint64, tag = "2")]
    pub list_id: u64,
    #[prost(message, repeated, tag = "3")]
    pub data: ::prost::alloc::vec::Vec<P4Data>,
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
pub struct DigestListAck {
    #[prost(uint32, tag = "1")]
    pub digest_id: u32,
    #[prost(uint64, tag = "2")]
    pub list_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamError {
    #[prost(int32, tag = "1")]
    pub canonical_code: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub space: ::prost::alloc::string::String,
    #[prost(int32, tag = "4")]
    pub code: i32,
}

/// Per-update error carried in the details of a failed Write status.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
    #[prost(int32, tag = "1")]
    pub canonical_code: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub space: ::prost::alloc::string::String,
    #[prost(int32, tag = "4")]
    pub code: i32,
    #[prost(message, optional, tag = "5")]
    pub details: ::core::option::Option<Any>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardingPipelineConfig {
    #[prost(message, optional, tag = "1")]
    pub p4info: ::core::option::Option<P4Info>,
    #[prost(bytes = "vec", tag = "2")]
    pub p4_device_config: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetForwardingPipelineConfigRequest {
    #[prost(uint64, tag = "1")]
    pub device_id: u64,
    #[prost(message, optional, tag = "3")]
    pub election_id: ::core::option::Option<Uint128>,
    #[prost(
        enumeration = "set_forwarding_pipeline_config_request::Action",
        tag = "4"
    )]
    pub action: i32,
    #[prost(message, optional, tag = "5")]
    pub config: ::core::option::Option<ForwardingPipelineConfig>,
    #[prost(string, tag = "6")]
    pub role: ::prost::alloc::string::String,
}

pub mod set_forwarding_pipeline_config_request {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Action {
        Unspecified = 0,
        Verify = 1,
        VerifyAndSave = 2,
        VerifyAndCommit = 3,
        Commit = 4,
        ReconcileAndCommit = 5,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetForwardingPipelineConfigResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct P4Data {
    #[prost(oneof = "p4_data::Data", tags = "1, 3, 5")]
    pub data: ::core::option::Option<p4_data::Data>,
}

pub mod p4_data {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Data {
        #[prost(bytes, tag = "1")]
        Bitstring(::prost::alloc::vec::Vec<u8>),
        #[prost(bool, tag = "3")]
        Bool(bool),
        #[prost(message, tag = "5")]
        Struct(super::P4StructLike),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct P4StructLike {
    #[prost(message, repeated, tag = "1")]
    pub members: ::prost::alloc::vec::Vec<P4Data>,
}

impl Entity {
    pub fn table_entry(entry: TableEntry) -> Self {
        Self {
            entity: Some(entity::Entity::TableEntry(entry)),
        }
    }

    pub fn register_entry(entry: RegisterEntry) -> Self {
        Self {
            entity: Some(entity::Entity::RegisterEntry(entry)),
        }
    }

    pub fn counter_entry(entry: CounterEntry) -> Self {
        Self {
            entity: Some(entity::Entity::CounterEntry(entry)),
        }
    }
}

impl P4Data {
    pub fn bitstring(bytes: Vec<u8>) -> Self {
        Self {
            data: Some(p4_data::Data::Bitstring(bytes)),
        }
    }
}
