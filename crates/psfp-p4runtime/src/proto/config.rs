// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! `p4.config.v1` P4Info messages.
//!
//! The compiler emits P4Info as protobuf JSON (lowerCamelCase keys, enum values
//! by name, 64-bit integers as strings). The same structs deserialize from that
//! JSON and encode to the binary form pushed with the pipeline config. Oneofs
//! the controller inspects are kept as optional message fields, which have the
//! same wire layout as long as at most one of them is set.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct P4Info {
    #[prost(message, optional, tag = "1")]
    pub pkg_info: ::core::option::Option<PkgInfo>,
    #[prost(message, repeated, tag = "2")]
    pub tables: ::prost::alloc::vec::Vec<Table>,
    #[prost(message, repeated, tag = "3")]
    pub actions: ::prost::alloc::vec::Vec<Action>,
    #[prost(message, repeated, tag = "5")]
    pub counters: ::prost::alloc::vec::Vec<Counter>,
    #[prost(message, repeated, tag = "6")]
    pub direct_counters: ::prost::alloc::vec::Vec<DirectCounter>,
    #[prost(message, repeated, tag = "7")]
    pub meters: ::prost::alloc::vec::Vec<Meter>,
    #[prost(message, repeated, tag = "8")]
    pub direct_meters: ::prost::alloc::vec::Vec<DirectMeter>,
    #[prost(message, repeated, tag = "11")]
    pub registers: ::prost::alloc::vec::Vec<Register>,
    #[prost(message, repeated, tag = "12")]
    pub digests: ::prost::alloc::vec::Vec<Digest>,
    #[prost(message, optional, tag = "200")]
    pub type_info: ::core::option::Option<P4TypeInfo>,
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct PkgInfo {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub version: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub arch: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct Preamble {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub alias: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "4")]
    pub annotations: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct Table {
    #[prost(message, optional, tag = "1")]
    pub preamble: ::core::option::Option<Preamble>,
    #[prost(message, repeated, tag = "2")]
    pub match_fields: ::prost::alloc::vec::Vec<MatchField>,
    #[prost(message, repeated, tag = "3")]
    pub action_refs: ::prost::alloc::vec::Vec<ActionRef>,
    #[prost(uint32, tag = "4")]
    pub const_default_action_id: u32,
    #[prost(uint32, repeated, tag = "7")]
    pub direct_resource_ids: ::prost::alloc::vec::Vec<u32>,
    #[prost(int64, tag = "8")]
    #[serde(deserialize_with = "json::int64")]
    pub size: i64,
    #[prost(bool, tag = "10")]
    pub is_const_table: bool,
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct MatchField {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(int32, tag = "4")]
    pub bitwidth: i32,
    #[prost(enumeration = "match_field::MatchType", tag = "5")]
    #[serde(deserialize_with = "json::match_type")]
    pub match_type: i32,
}

pub mod match_field {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum MatchType {
        Unspecified = 0,
        Exact = 2,
        Lpm = 3,
        Ternary = 4,
        Range = 5,
        Optional = 6,
    }

    impl MatchType {
        pub fn from_json_name(name: &str) -> Option<Self> {
            match name {
                "UNSPECIFIED" => Some(Self::Unspecified),
                "EXACT" => Some(Self::Exact),
                "LPM" => Some(Self::Lpm),
                "TERNARY" => Some(Self::Ternary),
                "RANGE" => Some(Self::Range),
                "OPTIONAL" => Some(Self::Optional),
                _ => None,
            }
        }

        pub fn json_name(self) -> &'static str {
            match self {
                Self::Unspecified => "UNSPECIFIED",
                Self::Exact => "EXACT",
                Self::Lpm => "LPM",
                Self::Ternary => "TERNARY",
                Self::Range => "RANGE",
                Self::Optional => "OPTIONAL",
            }
        }
    }
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionRef {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(enumeration = "action_ref::Scope", tag = "3")]
    #[serde(deserialize_with = "json::action_scope")]
    pub scope: i32,
}

pub mod action_ref {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Scope {
        TableAndDefault = 0,
        TableOnly = 1,
        DefaultOnly = 2,
    }

    impl Scope {
        pub fn from_json_name(name: &str) -> Option<Self> {
            match name {
                "TABLE_AND_DEFAULT" => Some(Self::TableAndDefault),
                "TABLE_ONLY" => Some(Self::TableOnly),
                "DEFAULT_ONLY" => Some(Self::DefaultOnly),
                _ => None,
            }
        }
    }
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct Action {
    #[prost(message, optional, tag = "1")]
    pub preamble: ::core::option::Option<Preamble>,
    #[prost(message, repeated, tag = "2")]
    pub params: ::prost::alloc::vec::Vec<action::Param>,
}

pub mod action {
    use serde::Deserialize;

    #[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
    #[serde(default, rename_all = "camelCase")]
    pub struct Param {
        #[prost(uint32, tag = "1")]
        pub id: u32,
        #[prost(string, tag = "2")]
        pub name: ::prost::alloc::string::String,
        #[prost(int32, tag = "4")]
        pub bitwidth: i32,
    }
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct CounterSpec {
    #[prost(enumeration = "counter_spec::Unit", tag = "1")]
    #[serde(deserialize_with = "json::counter_unit")]
    pub unit: i32,
}

pub mod counter_spec {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Unit {
        Unspecified = 0,
        Bytes = 1,
        Packets = 2,
        Both = 3,
    }

    impl Unit {
        pub fn from_json_name(name: &str) -> Option<Self> {
            match name {
                "UNSPECIFIED" => Some(Self::Unspecified),
                "BYTES" => Some(Self::Bytes),
                "PACKETS" => Some(Self::Packets),
                "BOTH" => Some(Self::Both),
                _ => None,
            }
        }
    }
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct Counter {
    #[prost(message, optional, tag = "1")]
    pub preamble: ::core::option::Option<Preamble>,
    #[prost(message, optional, tag = "2")]
    pub spec: ::core::option::Option<CounterSpec>,
    #[prost(int64, tag = "3")]
    #[serde(deserialize_with = "json::int64")]
    pub size: i64,
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct DirectCounter {
    #[prost(message, optional, tag = "1")]
    pub preamble: ::core::option::Option<Preamble>,
    #[prost(message, optional, tag = "2")]
    pub spec: ::core::option::Option<CounterSpec>,
    #[prost(uint32, tag = "3")]
    pub direct_table_id: u32,
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct MeterSpec {
    #[prost(enumeration = "meter_spec::Unit", tag = "1")]
    #[serde(deserialize_with = "json::meter_unit")]
    pub unit: i32,
}

pub mod meter_spec {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Unit {
        Unspecified = 0,
        Bytes = 1,
        Packets = 2,
    }

    impl Unit {
        pub fn from_json_name(name: &str) -> Option<Self> {
            match name {
                "UNSPECIFIED" => Some(Self::Unspecified),
                "BYTES" => Some(Self::Bytes),
                "PACKETS" => Some(Self::Packets),
                _ => None,
            }
        }
    }
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct Meter {
    #[prost(message, optional, tag = "1")]
    pub preamble: ::core::option::Option<Preamble>,
    #[prost(message, optional, tag = "2")]
    pub spec: ::core::option::Option<MeterSpec>,
    #[prost(int64, tag = "3")]
    #[serde(deserialize_with = "json::int64")]
    pub size: i64,
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct DirectMeter {
    #[prost(message, optional, tag = "1")]
    pub preamble: ::core::option::Option<Preamble>,
    #[prost(message, optional, tag = "2")]
    pub spec: ::core::option::Option<MeterSpec>,
    #[prost(uint32, tag = "3")]
    pub direct_table_id: u32,
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct Register {
    #[prost(message, optional, tag = "1")]
    pub preamble: ::core::option::Option<Preamble>,
    #[prost(message, optional, tag = "2")]
    pub type_spec: ::core::option::Option<P4DataTypeSpec>,
    #[prost(int32, tag = "3")]
    pub size: i32,
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct Digest {
    #[prost(message, optional, tag = "1")]
    pub preamble: ::core::option::Option<Preamble>,
    #[prost(message, optional, tag = "2")]
    pub type_spec: ::core::option::Option<P4DataTypeSpec>,
}

/// `p4.config.v1.P4DataTypeSpec`; `bitstring`, `bool`, `struct` and `header`
/// are members of one oneof.
#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct P4DataTypeSpec {
    #[prost(message, optional, tag = "1")]
    pub bitstring: ::core::option::Option<P4BitstringLikeTypeSpec>,
    #[prost(message, optional, tag = "2")]
    pub bool: ::core::option::Option<P4BoolType>,
    #[prost(message, optional, tag = "4")]
    #[serde(rename = "struct")]
    pub struct_type: ::core::option::Option<P4NamedType>,
    #[prost(message, optional, tag = "5")]
    pub header: ::core::option::Option<P4NamedType>,
}

/// `bit`, `int` and `varbit` are members of one oneof.
#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct P4BitstringLikeTypeSpec {
    #[prost(message, optional, tag = "1")]
    pub bit: ::core::option::Option<P4BitWidth>,
    #[prost(message, optional, tag = "2")]
    pub int: ::core::option::Option<P4BitWidth>,
}

/// Shared layout of `P4BitTypeSpec` and `P4IntTypeSpec`.
#[derive(Clone, Copy, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct P4BitWidth {
    #[prost(int32, tag = "1")]
    pub bitwidth: i32,
}

#[derive(Clone, Copy, PartialEq, Deserialize, ::prost::Message)]
pub struct P4BoolType {}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct P4NamedType {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct P4TypeInfo {
    #[prost(map = "string, message", tag = "1")]
    pub structs: HashMap<::prost::alloc::string::String, P4StructTypeSpec>,
    #[prost(map = "string, message", tag = "2")]
    pub headers: HashMap<::prost::alloc::string::String, P4StructTypeSpec>,
}

/// Ordered members of a struct or header type.
#[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
#[serde(default, rename_all = "camelCase")]
pub struct P4StructTypeSpec {
    #[prost(message, repeated, tag = "1")]
    pub members: ::prost::alloc::vec::Vec<p4_struct_type_spec::Member>,
}

pub mod p4_struct_type_spec {
    use serde::Deserialize;

    #[derive(Clone, PartialEq, Deserialize, ::prost::Message)]
    #[serde(default, rename_all = "camelCase")]
    pub struct Member {
        #[prost(string, tag = "1")]
        pub name: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "2")]
        pub type_spec: ::core::option::Option<super::P4DataTypeSpec>,
    }
}

impl P4DataTypeSpec {
    /// Width of a `bit<W>` or `int<W>` type; `bool` counts as one bit.
    pub fn bitwidth(&self) -> Option<u32> {
        if let Some(bits) = &self.bitstring {
            let width = bits.bit.or(bits.int)?.bitwidth;
            return u32::try_from(width).ok();
        }
        self.bool.map(|_| 1)
    }

    pub fn struct_name(&self) -> Option<&str> {
        self.struct_type
            .as_ref()
            .or(self.header.as_ref())
            .map(|named| named.name.as_str())
    }
}

/// Protobuf JSON helpers for enum names and 64-bit integers.
mod json {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    use super::{action_ref, counter_spec, match_field, meter_spec};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NameOrNumber {
        Number(i64),
        Name(String),
    }

    fn enum_value<'de, D, F>(deserializer: D, what: &str, lookup: F) -> Result<i32, D::Error>
    where
        D: Deserializer<'de>,
        F: Fn(&str) -> Option<i32>,
    {
        match NameOrNumber::deserialize(deserializer)? {
            NameOrNumber::Number(n) => i32::try_from(n)
                .map_err(|_| D::Error::custom(format!("{} value {} out of range", what, n))),
            NameOrNumber::Name(name) => lookup(&name)
                .ok_or_else(|| D::Error::custom(format!("unknown {} '{}'", what, name))),
        }
    }

    pub fn match_type<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        enum_value(deserializer, "match type", |name| {
            match_field::MatchType::from_json_name(name).map(i32::from)
        })
    }

    pub fn action_scope<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        enum_value(deserializer, "action scope", |name| {
            action_ref::Scope::from_json_name(name).map(i32::from)
        })
    }

    pub fn counter_unit<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        enum_value(deserializer, "counter unit", |name| {
            counter_spec::Unit::from_json_name(name).map(i32::from)
        })
    }

    pub fn meter_unit<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        enum_value(deserializer, "meter unit", |name| {
            meter_spec::Unit::from_json_name(name).map(i32::from)
        })
    }

    pub fn int64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match NameOrNumber::deserialize(deserializer)? {
            NameOrNumber::Number(n) => Ok(n),
            NameOrNumber::Name(text) => text
                .parse()
                .map_err(|_| D::Error::custom(format!("invalid int64 '{}'", text))),
        }
    }
}
