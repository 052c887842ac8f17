// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Fixtures shared by the unit tests of this crate

use std::sync::Arc;
use std::time::Duration;

use psfp_p4runtime::proto::p4runtime::{entity, p4_data, P4Data, P4StructLike};
use psfp_p4runtime::{codec, DeviceSession, ElectionId, MemoryTransport, SchemaIndex, SessionConfig};

pub const P4INFO_JSON: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../config/sdn-psfp.p4info.json"
));

pub fn config_dir() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

pub fn schema() -> Arc<SchemaIndex> {
    Arc::new(SchemaIndex::from_json_str(P4INFO_JSON).unwrap())
}

pub fn session(transport: &MemoryTransport) -> DeviceSession {
    let config = SessionConfig {
        name: "s1".to_string(),
        address: "memory".to_string(),
        device_id: 0,
        election_id: ElectionId::new(0, 1),
        connect_timeout: Duration::from_secs(1),
    };
    DeviceSession::with_transport(&config, Arc::new(transport.clone()))
}

/// (register id, index, value) of every register write, in send order
pub fn register_writes(transport: &MemoryTransport) -> Vec<(u32, i64, u128)> {
    transport
        .writes()
        .iter()
        .flat_map(|w| w.updates.iter())
        .filter_map(|u| match u.entity.as_ref()?.entity.as_ref()? {
            entity::Entity::RegisterEntry(r) => {
                let Some(p4_data::Data::Bitstring(bytes)) = r.data.as_ref()?.data.as_ref() else {
                    return None;
                };
                Some((r.register_id, r.index.as_ref()?.index, codec::decode(bytes, 128).ok()?))
            }
            _ => None,
        })
        .collect()
}

/// Hyperperiod digest entry: gate, ingress ts, duration, last hyperperiod
pub fn digest_entry(values: [u128; 4]) -> P4Data {
    let widths = [8, 48, 48, 48];
    P4Data {
        data: Some(p4_data::Data::Struct(P4StructLike {
            members: values
                .iter()
                .zip(widths)
                .map(|(v, w)| P4Data::bitstring(codec::encode(*v, w).unwrap().into_bytes()))
                .collect(),
        })),
    }
}
