// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! # psfp - control plane for sdn-psfp switches
//!
//! A P4Runtime client for a BMv2 switch running the sdn-psfp program
//! (IEEE 802.1Qci per-stream filtering and policing). It takes mastership of
//! the device, installs the pipeline and the static rule table, and keeps
//! each stream gate's hyperperiod state in sync with the digests the switch
//! sends.
//!
//! ## Feature Flags
//! - **`controller`** (default): hyperperiod synchronizer, provisioning,
//!   meters and telemetry
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use psfp::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config(None, None)?;
//! let schema = Arc::new(SchemaIndex::load(&config.pipeline.p4info)?);
//! let session = DeviceSession::connect(&session_config(&config)).await?;
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! Controller::new(config, schema, session).run(shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

// Re-export foundation
pub use psfp_config as config;
pub use psfp_observability as observability;

// Re-export protocol layer
pub use psfp_p4runtime as p4runtime;

// Re-export application layer
#[cfg(feature = "controller")]
pub use psfp_controller as controller;

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::config::{load_config, validate_config, PsfpConfig};
    pub use crate::p4runtime::{
        DeviceSession, DigestHandler, MatchField, P4RuntimeError, RuleBuilder, SchemaIndex,
        TableEntryRule, UpdateKind,
    };

    #[cfg(feature = "controller")]
    pub use crate::controller::{session_config, Controller, HyperperiodSynchronizer};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_facade_imports() {
        use crate::p4runtime::codec;
        assert_eq!(codec::byte_len(48), 6);
    }
}
