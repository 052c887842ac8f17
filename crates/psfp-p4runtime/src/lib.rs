// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! # psfp-p4runtime
//!
//! P4Runtime client plumbing for the PSFP controller:
//! - [`proto`]: wire messages (prost) for the subset of P4Runtime v1 in use
//! - [`schema`]: name/width index over the device's P4Info
//! - [`codec`]: fixed-width bitstring encode/decode with truncation reporting
//! - [`rule`]: declarative table entries to wire entries
//! - [`session`]: the control connection to one device
//! - [`stream`]: the StreamChannel state machine and its tokio driver
//!
//! ## Features
//! - `testing`: in-memory transport for tests of downstream crates

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod codec;
pub mod error;
pub mod proto;
pub mod rule;
pub mod schema;
pub mod session;
pub mod stream;
pub mod transport;

pub use codec::{decode, decode_struct, encode, DecodedStruct, Encoded, Truncation};
pub use error::{ErrorCategory, P4RuntimeError, Result, UpdateError};
pub use rule::{FieldValue, MatchField, MatchValue, RuleBuilder, RuleDescription, TableEntryRule};
pub use schema::{
    ActionSpec, DigestSpec, DirectResourceSpec, FieldSpec, MatchKind, RegisterRef, ResourceSpec,
    SchemaIndex, TableSpec,
};
pub use session::{DeviceSession, ElectionId, EntityStream, SessionConfig, UpdateKind};
pub use stream::{
    ControlStream, ControlStreamConfig, DigestHandler, StreamPhase, StreamStats,
};
#[cfg(any(test, feature = "testing"))]
pub use transport::{MemoryTransport, StreamPeer};
pub use transport::{GrpcTransport, P4RuntimeTransport};
