// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Schema, rule and codec behavior against the deployment P4Info and rule file

use std::collections::BTreeMap;
use std::path::PathBuf;

use psfp_p4runtime::proto::p4runtime::{field_match, p4_data, P4Data, P4StructLike};
use psfp_p4runtime::{
    codec, decode_struct, MatchKind, P4RuntimeError, RuleBuilder, RuleDescription, SchemaIndex,
};
use serde::Deserialize;

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

fn schema() -> SchemaIndex {
    SchemaIndex::load(&config_dir().join("sdn-psfp.p4info.json")).expect("deployment p4info")
}

#[derive(Deserialize)]
struct RuleFile {
    table_entries: Vec<RuleDescription>,
}

fn rules() -> Vec<RuleDescription> {
    let text = std::fs::read_to_string(config_dir().join("s1-runtime.json")).unwrap();
    serde_json::from_str::<RuleFile>(&text).unwrap().table_entries
}

#[test]
fn test_register_widths_come_from_p4info() {
    let schema = schema();
    let last = schema.register("IngressImpl.psfp_c.last_hyperperiod_reg", None).unwrap();
    let done = schema.register("hyperperiod_done_reg", None).unwrap();
    let count = schema.register("IngressImpl.psfp_c.period_count", Some(8)).unwrap();

    assert_eq!(last.bit_width, 48);
    assert_eq!(done.bit_width, 1);
    assert_eq!(done.name, "IngressImpl.psfp_c.hyperperiod_done_reg");
    // Declared width wins over the fallback
    assert_eq!(count.bit_width, 32);
    assert_eq!(schema.register_size("IngressImpl.psfp_c.last_hyperperiod_reg").unwrap(), 16);
}

#[test]
fn test_unknown_register_is_schema_lookup() {
    let schema = schema();
    let err = schema.register("IngressImpl.psfp_c.no_such_reg", Some(48)).unwrap_err();
    assert!(matches!(err, P4RuntimeError::SchemaLookup { kind: "register", .. }));
}

#[test]
fn test_match_kinds_of_psfp_tables() {
    let schema = schema();
    let sdu = schema.table("IngressImpl.psfp_c.streamFilter_c.max_sdu_filter").unwrap();
    let kinds: Vec<MatchKind> = sdu.match_fields.iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MatchKind::Exact, MatchKind::Ternary, MatchKind::Range]);
    assert!(sdu.requires_priority());

    let state = schema.table("hyperperiod_state").unwrap();
    assert!(!state.requires_priority());
    assert_eq!(state.match_fields[0].field.bit_width, 8);
}

#[test]
fn test_every_deployment_rule_builds() {
    let schema = schema();
    let builder = RuleBuilder::new(&schema);
    let rules = rules();
    assert_eq!(rules.len(), 41);

    let mut per_table: BTreeMap<String, usize> = BTreeMap::new();
    for desc in &rules {
        let entry = builder
            .build_description(desc)
            .unwrap_or_else(|e| panic!("rule for {} failed: {}", desc.table, e));
        assert_eq!(entry.table_id, schema.table(&desc.table).unwrap().id);
        *per_table.entry(desc.table.clone()).or_default() += 1;
    }
    assert_eq!(per_table["IngressImpl.psfp_c.streamGate_c.stream_gate_instance"], 14);
    assert_eq!(per_table["IngressImpl.ipv4_c.ipv4"], 3);
}

#[test]
fn test_gate_window_range_keeps_bounds() {
    let schema = schema();
    let desc = rules()
        .into_iter()
        .find(|d| {
            d.table.ends_with("stream_gate_instance") && d.priority == Some(98)
                && d.action_params.get("interval_identifier").map(|v| v.get()) == Some(2)
                && d.action_params.get("ipv").map(|v| v.get()) == Some(2)
        })
        .expect("gate 1 interval 2");
    let entry = RuleBuilder::new(&schema).build_description(&desc).unwrap();

    let range = entry
        .r#match
        .iter()
        .find_map(|m| match &m.field_match_type {
            Some(field_match::FieldMatchType::Range(r)) => Some(r.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(range.low.len(), 6);
    assert_eq!(codec::decode(&range.low, 48).unwrap(), 2_000_000);
    assert_eq!(codec::decode(&range.high, 48).unwrap(), 8_000_000);
    assert_eq!(entry.priority, 98);
}

#[test]
fn test_ternary_value_and_mask_at_declared_width() {
    let schema = schema();
    let desc = rules()
        .into_iter()
        .find(|d| d.table.ends_with("max_sdu_filter") && d.priority == Some(100))
        .unwrap();
    let entry = RuleBuilder::new(&schema).build_description(&desc).unwrap();
    let ternary = entry
        .r#match
        .iter()
        .find_map(|m| match &m.field_match_type {
            Some(field_match::FieldMatchType::Ternary(t)) => Some(t.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(ternary.value, vec![5]);
    assert_eq!(ternary.mask, vec![7]);
}

#[test]
fn test_hyperperiod_digest_layout_and_decode() {
    let schema = schema();
    let digest = schema.digest("digest_finished_hyperperiod_t").unwrap();
    let widths: Vec<(&str, u32)> = digest
        .members
        .iter()
        .map(|m| (m.name.as_str(), m.bit_width))
        .collect();
    assert_eq!(
        widths,
        vec![
            ("stream_gate_id", 8),
            ("ingress_ts", 48),
            ("hyperperiod_ts", 48),
            ("last_hyperperiod", 48)
        ]
    );
    assert_eq!(schema.digest_by_id(digest.id).map(|d| d.name.as_str()), Some(digest.name.as_str()));

    let member = |value: u128, width: u32| P4Data::bitstring(codec::encode(value, width).unwrap().into_bytes());
    let entry = P4Data {
        data: Some(p4_data::Data::Struct(P4StructLike {
            members: vec![
                member(2, 8),
                member(123_456, 48),
                member(16_000_000, 48),
                member(9_000_000_000, 48),
            ],
        })),
    };
    let decoded = decode_struct(digest, &entry).unwrap();
    assert_eq!(decoded.get("stream_gate_id").unwrap(), 2);
    assert_eq!(decoded.get("last_hyperperiod").unwrap(), 9_000_000_000);
    assert_eq!(decoded.get("hyperperiod_ts").unwrap(), 16_000_000);
}

#[test]
fn test_roundtrip_at_declared_widths() {
    for width in [1u32, 6, 8, 32, 48] {
        let max = codec::width_mask(width);
        for value in [0, 1, max / 2, max] {
            let encoded = codec::encode(value, width).unwrap();
            assert!(encoded.truncation.is_none());
            assert_eq!(codec::decode(&encoded.bytes, width).unwrap(), value);
        }
        let over = codec::encode(max + 1, width).unwrap();
        assert_eq!(over.bytes, codec::encode(0, width).unwrap().bytes);
        assert!(over.truncation.is_some());
    }
}
