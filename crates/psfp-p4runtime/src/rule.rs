// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Rule Builder
//!
//! Turns declarative table entries into wire `TableEntry` messages. A rule
//! description coming from a file carries match values as loose shapes (a
//! scalar or a pair); [`RuleBuilder::resolve`] picks the [`MatchField`]
//! variant from the table's declared match kind, and [`RuleBuilder::build`]
//! encodes a typed [`TableEntryRule`] at the declared widths.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};

use crate::codec::{self, width_mask};
use crate::error::{P4RuntimeError, Result};
use crate::proto::p4runtime::{
    action, field_match, table_action, Action, FieldMatch, TableAction, TableEntry,
};
use crate::schema::{FieldSpec, MatchKind, SchemaIndex, TableSpec};

/// An unsigned field value
///
/// Parsed from integers, dotted IPv4 addresses (`10.0.1.1`), colon-separated
/// MAC addresses (`08:00:00:00:01:11`), `0x` hex strings or decimal strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldValue(pub u128);

impl FieldValue {
    pub fn get(self) -> u128 {
        self.0
    }
}

impl From<u128> for FieldValue {
    fn from(value: u128) -> Self {
        FieldValue(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue(u128::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue(u128::from(value))
    }
}

impl From<Ipv4Addr> for FieldValue {
    fn from(addr: Ipv4Addr) -> Self {
        FieldValue(u128::from(u32::from(addr)))
    }
}

impl FromStr for FieldValue {
    type Err = P4RuntimeError;

    fn from_str(text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = || P4RuntimeError::InvalidValue(format!("cannot parse '{}'", text));

        if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            return u128::from_str_radix(hex, 16)
                .map(FieldValue)
                .map_err(|_| invalid());
        }
        if let Ok(addr) = text.parse::<Ipv4Addr>() {
            return Ok(addr.into());
        }
        if text.contains(':') {
            let octets: Vec<&str> = text.split(':').collect();
            if octets.len() != 6 {
                return Err(invalid());
            }
            let mut value = 0u128;
            for octet in octets {
                let byte = u8::from_str_radix(octet, 16).map_err(|_| invalid())?;
                value = (value << 8) | u128::from(byte);
            }
            return Ok(FieldValue(value));
        }
        text.parse::<u128>().map(FieldValue).map_err(|_| invalid())
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct FieldValueVisitor;

        impl<'de> Visitor<'de> for FieldValueVisitor {
            type Value = FieldValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an unsigned integer, IPv4/MAC address or hex string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<FieldValue, E> {
                Ok(FieldValue::from(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<FieldValue, E> {
                u64::try_from(v)
                    .map(FieldValue::from)
                    .map_err(|_| E::custom(format!("negative value {}", v)))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<FieldValue, E> {
                Ok(FieldValue(u128::from(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<FieldValue, E> {
                v.parse().map_err(|e: P4RuntimeError| E::custom(e.to_string()))
            }
        }

        deserializer.deserialize_any(FieldValueVisitor)
    }
}

/// Typed match on one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Exact { value: FieldValue },
    Ternary { value: FieldValue, mask: FieldValue },
    Range { low: FieldValue, high: FieldValue },
    Lpm { value: FieldValue, prefix_len: u32 },
}

impl MatchField {
    pub fn exact(value: impl Into<FieldValue>) -> Self {
        MatchField::Exact { value: value.into() }
    }

    pub fn ternary(value: impl Into<FieldValue>, mask: impl Into<FieldValue>) -> Self {
        MatchField::Ternary {
            value: value.into(),
            mask: mask.into(),
        }
    }

    pub fn range(low: impl Into<FieldValue>, high: impl Into<FieldValue>) -> Self {
        MatchField::Range {
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn lpm(value: impl Into<FieldValue>, prefix_len: u32) -> Self {
        MatchField::Lpm {
            value: value.into(),
            prefix_len,
        }
    }

    pub fn kind(&self) -> MatchKind {
        match self {
            MatchField::Exact { .. } => MatchKind::Exact,
            MatchField::Ternary { .. } => MatchKind::Ternary,
            MatchField::Range { .. } => MatchKind::Range,
            MatchField::Lpm { .. } => MatchKind::Lpm,
        }
    }
}

/// Loose match value as written in a rule file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MatchValue {
    Scalar(FieldValue),
    Pair(FieldValue, FieldValue),
}

impl MatchValue {
    fn shape(&self) -> &'static str {
        match self {
            MatchValue::Scalar(_) => "a single value",
            MatchValue::Pair(..) => "a pair of values",
        }
    }
}

/// A table entry as described by an operator, before schema resolution
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuleDescription {
    pub table: String,
    #[serde(default, rename = "match")]
    pub matches: BTreeMap<String, MatchValue>,
    #[serde(default)]
    pub default_action: bool,
    pub action_name: String,
    #[serde(default)]
    pub action_params: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub priority: Option<i32>,
}

/// A typed table entry, ready to be encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntryRule {
    pub table_name: String,
    pub matches: BTreeMap<String, MatchField>,
    pub action_name: String,
    pub action_params: BTreeMap<String, FieldValue>,
    pub priority: Option<i32>,
    pub is_default: bool,
}

impl TableEntryRule {
    pub fn new(table_name: impl Into<String>, action_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            matches: BTreeMap::new(),
            action_name: action_name.into(),
            action_params: BTreeMap::new(),
            priority: None,
            is_default: false,
        }
    }

    pub fn with_match(mut self, field: impl Into<String>, m: MatchField) -> Self {
        self.matches.insert(field.into(), m);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.action_params.insert(name.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

/// P4Runtime priorities start at 1; zero means "no priority" on the wire
fn positive_priority(table: &str, priority: Option<i32>) -> Result<Option<i32>> {
    match priority {
        Some(p) if p <= 0 => Err(P4RuntimeError::InvalidValue(format!(
            "priority {} for table '{}' must be positive",
            p, table
        ))),
        other => Ok(other),
    }
}

/// Builds wire table entries against a schema
#[derive(Debug, Clone, Copy)]
pub struct RuleBuilder<'a> {
    schema: &'a SchemaIndex,
}

impl<'a> RuleBuilder<'a> {
    pub fn new(schema: &'a SchemaIndex) -> Self {
        Self { schema }
    }

    /// Pick the match variant for every described field from the table schema
    pub fn resolve(&self, desc: &RuleDescription) -> Result<TableEntryRule> {
        let table = self.schema.table(&desc.table)?;

        let mut matches = BTreeMap::new();
        if !desc.default_action {
            for (name, value) in &desc.matches {
                let spec = table
                    .match_field(name)
                    .ok_or_else(|| P4RuntimeError::schema_lookup("match field", name))?;
                let field = match (spec.kind, *value) {
                    (MatchKind::Exact | MatchKind::Optional, MatchValue::Scalar(v)) => {
                        MatchField::Exact { value: v }
                    }
                    (MatchKind::Ternary, MatchValue::Pair(value, mask)) => {
                        MatchField::Ternary { value, mask }
                    }
                    (MatchKind::Range, MatchValue::Pair(low, high)) => {
                        MatchField::Range { low, high }
                    }
                    (MatchKind::Lpm, MatchValue::Pair(value, prefix)) => MatchField::Lpm {
                        value,
                        prefix_len: u32::try_from(prefix.get()).map_err(|_| {
                            P4RuntimeError::InvalidValue(format!(
                                "prefix length {} for '{}'",
                                prefix.get(),
                                name
                            ))
                        })?,
                    },
                    (kind, value) => {
                        return Err(P4RuntimeError::UnsupportedMatchKind {
                            table: table.name.clone(),
                            field: name.clone(),
                            declared: kind.to_string(),
                            supplied: value.shape().to_string(),
                        })
                    }
                };
                matches.insert(name.clone(), field);
            }
        }

        Ok(TableEntryRule {
            table_name: table.name.clone(),
            matches,
            action_name: desc.action_name.clone(),
            action_params: desc.action_params.clone(),
            priority: positive_priority(&table.name, desc.priority)?,
            is_default: desc.default_action,
        })
    }

    /// Resolve then build in one step
    pub fn build_description(&self, desc: &RuleDescription) -> Result<TableEntry> {
        self.build(&self.resolve(desc)?)
    }

    /// Encode a typed rule into a wire table entry
    pub fn build(&self, rule: &TableEntryRule) -> Result<TableEntry> {
        let table = self.schema.table(&rule.table_name)?;

        let mut entry = TableEntry {
            table_id: table.id,
            action: Some(self.build_action(table, rule)?),
            ..Default::default()
        };

        if rule.is_default {
            entry.is_default_action = true;
            return Ok(entry);
        }

        // Fields in declaration order keep the encoded entry deterministic
        for spec in &table.match_fields {
            let Some(m) = rule.matches.get(&spec.field.name) else {
                continue;
            };
            let accepted = match spec.kind {
                MatchKind::Optional => m.kind() == MatchKind::Exact,
                kind => m.kind() == kind,
            };
            if !accepted {
                return Err(P4RuntimeError::UnsupportedMatchKind {
                    table: table.name.clone(),
                    field: spec.field.name.clone(),
                    declared: spec.kind.to_string(),
                    supplied: m.kind().to_string(),
                });
            }
            if let Some(field_match) = encode_match(&spec.field, spec.kind, m)? {
                entry.r#match.push(field_match);
            }
        }

        if let Some(name) = rule
            .matches
            .keys()
            .find(|name| table.match_field(name).is_none())
        {
            return Err(P4RuntimeError::schema_lookup("match field", name.as_str()));
        }

        let priority = positive_priority(&table.name, rule.priority)?;
        if table.requires_priority() {
            entry.priority = priority.ok_or_else(|| P4RuntimeError::MissingPriority(table.name.clone()))?;
        } else if let Some(priority) = priority {
            entry.priority = priority;
        }

        Ok(entry)
    }

    fn build_action(&self, table: &TableSpec, rule: &TableEntryRule) -> Result<TableAction> {
        let action = self.schema.action(&rule.action_name)?;
        if !table.action_ids.contains(&action.id) {
            return Err(P4RuntimeError::InvalidValue(format!(
                "action '{}' is not usable in table '{}'",
                action.name, table.name
            )));
        }

        if let Some(unknown) = rule
            .action_params
            .keys()
            .find(|name| action.param(name).is_none())
        {
            return Err(P4RuntimeError::schema_lookup("action parameter", unknown.as_str()));
        }

        let mut params = Vec::with_capacity(action.params.len());
        for param in &action.params {
            let value = rule.action_params.get(&param.name).ok_or_else(|| {
                P4RuntimeError::InvalidValue(format!(
                    "action '{}' is missing parameter '{}'",
                    action.name, param.name
                ))
            })?;
            params.push(action::Param {
                param_id: param.id,
                value: codec::encode_field(param, value.get())?,
            });
        }

        Ok(TableAction {
            r#type: Some(table_action::Type::Action(Action {
                action_id: action.id,
                params,
            })),
        })
    }
}

/// Encode one match; `None` means the match is a wildcard and must be omitted
fn encode_match(field: &FieldSpec, kind: MatchKind, m: &MatchField) -> Result<Option<FieldMatch>> {
    let field_match_type = match *m {
        MatchField::Exact { value } if kind == MatchKind::Optional => {
            field_match::FieldMatchType::Optional(field_match::Optional {
                value: codec::encode_field(field, value.get())?,
            })
        }
        MatchField::Exact { value } => field_match::FieldMatchType::Exact(field_match::Exact {
            value: codec::encode_field(field, value.get())?,
        }),
        MatchField::Ternary { value, mask } => {
            let mask = mask.get() & width_mask(field.bit_width);
            if mask == 0 {
                return Ok(None);
            }
            field_match::FieldMatchType::Ternary(field_match::Ternary {
                value: codec::encode_field(field, value.get() & mask)?,
                mask: codec::encode_field(field, mask)?,
            })
        }
        MatchField::Range { low, high } => {
            if low > high {
                return Err(P4RuntimeError::InvalidValue(format!(
                    "range {}..={} on '{}' is empty",
                    low.get(),
                    high.get(),
                    field.name
                )));
            }
            if low.get() == 0 && high.get() >= width_mask(field.bit_width) {
                return Ok(None);
            }
            field_match::FieldMatchType::Range(field_match::Range {
                low: codec::encode_field(field, low.get())?,
                high: codec::encode_field(field, high.get())?,
            })
        }
        MatchField::Lpm { value, prefix_len } => {
            if prefix_len > field.bit_width {
                return Err(P4RuntimeError::InvalidValue(format!(
                    "prefix length {} exceeds {} bits of '{}'",
                    prefix_len, field.bit_width, field.name
                )));
            }
            if prefix_len == 0 {
                return Ok(None);
            }
            let host_bits = width_mask(field.bit_width - prefix_len);
            let network = value.get() & !host_bits;
            field_match::FieldMatchType::Lpm(field_match::Lpm {
                value: codec::encode_field(field, network)?,
                prefix_len: prefix_len as i32,
            })
        }
    };

    Ok(Some(FieldMatch {
        field_id: field.id,
        field_match_type: Some(field_match_type),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const P4INFO: &str = r#"{
      "tables": [
        { "preamble": { "id": 1, "name": "IngressImpl.ipv4_lpm", "alias": "ipv4_lpm" },
          "matchFields": [{ "id": 1, "name": "hdr.ipv4.dstAddr", "bitwidth": 32, "matchType": "LPM" }],
          "actionRefs": [{ "id": 10 }, { "id": 11 }] },
        { "preamble": { "id": 2, "name": "IngressImpl.psfp_c.max_sdu_filter", "alias": "max_sdu_filter" },
          "matchFields": [
            { "id": 1, "name": "meta.ingress_md.stream_filter.stream_handle", "bitwidth": 16, "matchType": "TERNARY" },
            { "id": 2, "name": "standard_metadata.packet_length", "bitwidth": 32, "matchType": "RANGE" }
          ],
          "actionRefs": [{ "id": 11 }] },
        { "preamble": { "id": 3, "name": "IngressImpl.stream_id", "alias": "stream_id" },
          "matchFields": [{ "id": 1, "name": "hdr.vlan.vid", "bitwidth": 12, "matchType": "EXACT" }],
          "actionRefs": [{ "id": 11 }] }
      ],
      "actions": [
        { "preamble": { "id": 10, "name": "IngressImpl.ipv4_forward", "alias": "ipv4_forward" },
          "params": [
            { "id": 1, "name": "dstAddr", "bitwidth": 48 },
            { "id": 2, "name": "port", "bitwidth": 9 }
          ] },
        { "preamble": { "id": 11, "name": "NoAction" } }
      ]
    }"#;

    fn schema() -> SchemaIndex {
        SchemaIndex::from_json_str(P4INFO).unwrap()
    }

    fn range_of(entry: &TableEntry) -> Option<&field_match::Range> {
        entry.r#match.iter().find_map(|m| match &m.field_match_type {
            Some(field_match::FieldMatchType::Range(r)) => Some(r),
            _ => None,
        })
    }

    #[test]
    fn test_range_bounds_recorded_unchanged() {
        let schema = schema();
        let rule = TableEntryRule::new("max_sdu_filter", "NoAction")
            .with_match("meta.ingress_md.stream_filter.stream_handle", MatchField::ternary(1u32, 0xffffu32))
            .with_match("standard_metadata.packet_length", MatchField::range(1u32, 1500u32))
            .with_priority(1);
        let entry = RuleBuilder::new(&schema).build(&rule).unwrap();

        let range = range_of(&entry).unwrap();
        assert_eq!(codec::decode(&range.low, 32).unwrap(), 1);
        assert_eq!(codec::decode(&range.high, 32).unwrap(), 1500);
        assert_eq!(entry.priority, 1);
    }

    #[test]
    fn test_pair_on_exact_field_is_rejected() {
        let schema = schema();
        let desc: RuleDescription = serde_json::from_value(serde_json::json!({
            "table": "IngressImpl.stream_id",
            "match": { "hdr.vlan.vid": [1, 1500] },
            "action_name": "NoAction"
        }))
        .unwrap();
        let err = RuleBuilder::new(&schema).resolve(&desc).unwrap_err();
        assert!(matches!(err, P4RuntimeError::UnsupportedMatchKind { .. }));

        let typed = TableEntryRule::new("stream_id", "NoAction")
            .with_match("hdr.vlan.vid", MatchField::range(1u32, 1500u32));
        let err = RuleBuilder::new(&schema).build(&typed).unwrap_err();
        assert!(matches!(err, P4RuntimeError::UnsupportedMatchKind { .. }));
    }

    #[test]
    fn test_missing_priority() {
        let schema = schema();
        let rule = TableEntryRule::new("max_sdu_filter", "NoAction")
            .with_match("standard_metadata.packet_length", MatchField::range(1u32, 1500u32));
        let err = RuleBuilder::new(&schema).build(&rule).unwrap_err();
        assert!(matches!(err, P4RuntimeError::MissingPriority(_)));
    }

    #[test]
    fn test_non_positive_priority_rejected() {
        let schema = schema();
        let desc: RuleDescription = serde_json::from_value(serde_json::json!({
            "table": "max_sdu_filter",
            "match": {
                "meta.ingress_md.stream_filter.stream_handle": [1, 65535],
                "standard_metadata.packet_length": [1, 1500]
            },
            "action_name": "NoAction",
            "priority": -3
        }))
        .unwrap();
        let err = RuleBuilder::new(&schema).resolve(&desc).unwrap_err();
        assert!(matches!(err, P4RuntimeError::InvalidValue(_)));

        let rule = TableEntryRule::new("max_sdu_filter", "NoAction")
            .with_match("standard_metadata.packet_length", MatchField::range(1u32, 1500u32))
            .with_priority(0);
        let err = RuleBuilder::new(&schema).build(&rule).unwrap_err();
        assert!(matches!(err, P4RuntimeError::InvalidValue(_)));
    }

    #[test]
    fn test_exact_table_needs_no_priority() {
        let schema = schema();
        let rule = TableEntryRule::new("stream_id", "NoAction")
            .with_match("hdr.vlan.vid", MatchField::exact(7u32));
        let entry = RuleBuilder::new(&schema).build(&rule).unwrap();
        assert_eq!(entry.priority, 0);
        assert_eq!(entry.r#match.len(), 1);
    }

    #[test]
    fn test_default_entry_skips_matches() {
        let schema = schema();
        let desc: RuleDescription = serde_json::from_value(serde_json::json!({
            "table": "IngressImpl.ipv4_lpm",
            "default_action": true,
            "action_name": "NoAction",
            "action_params": {}
        }))
        .unwrap();
        let entry = RuleBuilder::new(&schema).build_description(&desc).unwrap();
        assert!(entry.is_default_action);
        assert!(entry.r#match.is_empty());
        assert!(entry.action.is_some());
    }

    #[test]
    fn test_lpm_from_rule_file() {
        let schema = schema();
        let desc: RuleDescription = serde_json::from_value(serde_json::json!({
            "table": "IngressImpl.ipv4_lpm",
            "match": { "hdr.ipv4.dstAddr": ["10.0.1.1", 24] },
            "action_name": "IngressImpl.ipv4_forward",
            "action_params": { "dstAddr": "08:00:00:00:01:11", "port": 1 }
        }))
        .unwrap();
        let entry = RuleBuilder::new(&schema).build_description(&desc).unwrap();

        match &entry.r#match[0].field_match_type {
            Some(field_match::FieldMatchType::Lpm(lpm)) => {
                assert_eq!(lpm.value, vec![10, 0, 1, 0]);
                assert_eq!(lpm.prefix_len, 24);
            }
            other => panic!("expected lpm, got {:?}", other),
        }
        let Some(table_action::Type::Action(action)) = entry.action.unwrap().r#type else {
            panic!("expected action");
        };
        assert_eq!(action.params[0].value, vec![0x08, 0, 0, 0, 0x01, 0x11]);
        assert_eq!(action.params[1].value, vec![0, 1]);
    }

    #[test]
    fn test_missing_action_param() {
        let schema = schema();
        let rule = TableEntryRule::new("ipv4_lpm", "ipv4_forward")
            .with_match("hdr.ipv4.dstAddr", MatchField::lpm(Ipv4Addr::new(10, 0, 2, 2), 32))
            .with_param("port", 2u32);
        assert!(matches!(
            RuleBuilder::new(&schema).build(&rule),
            Err(P4RuntimeError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_field_value_parsing() {
        assert_eq!("0x1F".parse::<FieldValue>().unwrap(), FieldValue(31));
        assert_eq!("10.0.0.1".parse::<FieldValue>().unwrap(), FieldValue(0x0a00_0001));
        assert_eq!("00:00:00:00:00:ff".parse::<FieldValue>().unwrap(), FieldValue(255));
        assert_eq!("1500".parse::<FieldValue>().unwrap(), FieldValue(1500));
        assert!("ten".parse::<FieldValue>().is_err());
    }
}
