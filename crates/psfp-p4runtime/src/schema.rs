// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Read-only index over the device's P4Info
//!
//! Built once at startup and shared (`Arc<SchemaIndex>`) by every component
//! that resolves names to ids or needs a field's bit width. Entities are
//! found by fully-qualified name (`IngressImpl.psfp_c.hyperperiod_state`) or
//! by alias (`hyperperiod_state`) when the alias is unambiguous.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::error::{P4RuntimeError, Result};
use crate::proto::config::{match_field, P4DataTypeSpec, P4Info, Preamble};

/// Name, id and declared width of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub id: u32,
    pub bit_width: u32,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, id: u32, bit_width: u32) -> Self {
        Self {
            name: name.into(),
            id,
            bit_width,
        }
    }
}

/// Comparison semantics of a table match field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    Exact,
    Lpm,
    Ternary,
    Range,
    Optional,
}

impl MatchKind {
    /// Kinds that make the device order entries by priority
    pub fn needs_priority(self) -> bool {
        matches!(self, MatchKind::Ternary | MatchKind::Range | MatchKind::Optional)
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchKind::Exact => "exact",
            MatchKind::Lpm => "lpm",
            MatchKind::Ternary => "ternary",
            MatchKind::Range => "range",
            MatchKind::Optional => "optional",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFieldSpec {
    pub field: FieldSpec,
    pub kind: MatchKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub id: u32,
    pub name: String,
    /// Match fields in declaration order
    pub match_fields: Vec<MatchFieldSpec>,
    pub action_ids: Vec<u32>,
    pub size: i64,
}

impl TableSpec {
    pub fn match_field(&self, name: &str) -> Option<&MatchFieldSpec> {
        self.match_fields.iter().find(|m| m.field.name == name)
    }

    /// True when any field is ternary, range or optional
    pub fn requires_priority(&self) -> bool {
        self.match_fields.iter().any(|m| m.kind.needs_priority())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub id: u32,
    pub name: String,
    pub params: Vec<FieldSpec>,
}

impl ActionSpec {
    pub fn param(&self, name: &str) -> Option<&FieldSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// A register resolved for repeated writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRef {
    pub name: String,
    pub id: u32,
    pub bit_width: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RegisterSpec {
    id: u32,
    name: String,
    bit_width: Option<u32>,
    size: i32,
}

/// Indexed counter or meter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub id: u32,
    pub name: String,
    pub size: i64,
}

/// Direct counter or meter attached to a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectResourceSpec {
    pub id: u32,
    pub name: String,
    pub table_id: u32,
}

/// A digest and the ordered layout of its struct members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSpec {
    pub id: u32,
    pub name: String,
    pub members: Vec<FieldSpec>,
}

/// Name-to-index lookup keyed by full name and unambiguous alias
#[derive(Debug, Default)]
struct NameIndex {
    by_name: HashMap<String, usize>,
    by_id: HashMap<u32, usize>,
}

impl NameIndex {
    fn build<'a>(preambles: impl Iterator<Item = &'a Preamble>) -> Self {
        let mut index = NameIndex::default();
        let mut aliases: HashMap<String, Option<usize>> = HashMap::new();
        for (pos, preamble) in preambles.enumerate() {
            index.by_name.insert(preamble.name.clone(), pos);
            index.by_id.insert(preamble.id, pos);
            if !preamble.alias.is_empty() && preamble.alias != preamble.name {
                aliases
                    .entry(preamble.alias.clone())
                    .and_modify(|slot| *slot = None)
                    .or_insert(Some(pos));
            }
        }
        for (alias, pos) in aliases {
            if let Some(pos) = pos {
                index.by_name.entry(alias).or_insert(pos);
            }
        }
        index
    }

    fn get(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    fn get_id(&self, id: u32) -> Option<usize> {
        self.by_id.get(&id).copied()
    }
}

/// Immutable lookup tables derived from one P4Info
#[derive(Debug)]
pub struct SchemaIndex {
    p4info: P4Info,
    tables: Vec<TableSpec>,
    table_index: NameIndex,
    actions: Vec<ActionSpec>,
    action_index: NameIndex,
    registers: Vec<RegisterSpec>,
    register_index: NameIndex,
    counters: Vec<ResourceSpec>,
    counter_index: NameIndex,
    meters: Vec<ResourceSpec>,
    meter_index: NameIndex,
    direct_counters: Vec<DirectResourceSpec>,
    direct_counter_index: NameIndex,
    direct_meters: Vec<DirectResourceSpec>,
    direct_meter_index: NameIndex,
    digests: Vec<DigestSpec>,
    digest_index: NameIndex,
}

fn preamble_of(preamble: &Option<Preamble>, what: &str) -> Result<Preamble> {
    preamble
        .clone()
        .ok_or_else(|| P4RuntimeError::SchemaParse(format!("{} without preamble", what)))
}

fn width_of(raw: i32, owner: &str) -> Result<u32> {
    match u32::try_from(raw) {
        Ok(w) if w > 0 => Ok(w),
        _ => Err(P4RuntimeError::SchemaParse(format!(
            "'{}' declares bit width {}",
            owner, raw
        ))),
    }
}

impl SchemaIndex {
    /// Load the protobuf-JSON P4Info emitted by the compiler
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let index = Self::from_json_str(&text)?;
        debug!(
            "[SCHEMA] Loaded {}: {} tables, {} registers, {} digests",
            path.display(),
            index.tables.len(),
            index.registers.len(),
            index.digests.len()
        );
        Ok(index)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let info: P4Info = serde_json::from_str(text)?;
        Self::from_p4info(info)
    }

    pub fn from_p4info(p4info: P4Info) -> Result<Self> {
        let mut tables = Vec::with_capacity(p4info.tables.len());
        let mut table_preambles = Vec::with_capacity(p4info.tables.len());
        for table in &p4info.tables {
            let preamble = preamble_of(&table.preamble, "table")?;
            let mut match_fields = Vec::with_capacity(table.match_fields.len());
            for mf in &table.match_fields {
                let kind = match match_field::MatchType::try_from(mf.match_type) {
                    Ok(match_field::MatchType::Exact) => MatchKind::Exact,
                    Ok(match_field::MatchType::Lpm) => MatchKind::Lpm,
                    Ok(match_field::MatchType::Ternary) => MatchKind::Ternary,
                    Ok(match_field::MatchType::Range) => MatchKind::Range,
                    Ok(match_field::MatchType::Optional) => MatchKind::Optional,
                    _ => {
                        return Err(P4RuntimeError::SchemaParse(format!(
                            "field '{}' of table '{}' has unsupported match type {}",
                            mf.name, preamble.name, mf.match_type
                        )))
                    }
                };
                match_fields.push(MatchFieldSpec {
                    field: FieldSpec::new(mf.name.clone(), mf.id, width_of(mf.bitwidth, &mf.name)?),
                    kind,
                });
            }
            tables.push(TableSpec {
                id: preamble.id,
                name: preamble.name.clone(),
                match_fields,
                action_ids: table.action_refs.iter().map(|a| a.id).collect(),
                size: table.size,
            });
            table_preambles.push(preamble);
        }

        let mut actions = Vec::with_capacity(p4info.actions.len());
        let mut action_preambles = Vec::with_capacity(p4info.actions.len());
        for action in &p4info.actions {
            let preamble = preamble_of(&action.preamble, "action")?;
            let params = action
                .params
                .iter()
                .map(|p| Ok(FieldSpec::new(p.name.clone(), p.id, width_of(p.bitwidth, &p.name)?)))
                .collect::<Result<Vec<_>>>()?;
            actions.push(ActionSpec {
                id: preamble.id,
                name: preamble.name.clone(),
                params,
            });
            action_preambles.push(preamble);
        }

        let mut registers = Vec::with_capacity(p4info.registers.len());
        let mut register_preambles = Vec::with_capacity(p4info.registers.len());
        for register in &p4info.registers {
            let preamble = preamble_of(&register.preamble, "register")?;
            registers.push(RegisterSpec {
                id: preamble.id,
                name: preamble.name.clone(),
                bit_width: register.type_spec.as_ref().and_then(P4DataTypeSpec::bitwidth),
                size: register.size,
            });
            register_preambles.push(preamble);
        }

        let mut counters = Vec::new();
        let mut counter_preambles = Vec::new();
        for counter in &p4info.counters {
            let preamble = preamble_of(&counter.preamble, "counter")?;
            counters.push(ResourceSpec {
                id: preamble.id,
                name: preamble.name.clone(),
                size: counter.size,
            });
            counter_preambles.push(preamble);
        }

        let mut meters = Vec::new();
        let mut meter_preambles = Vec::new();
        for meter in &p4info.meters {
            let preamble = preamble_of(&meter.preamble, "meter")?;
            meters.push(ResourceSpec {
                id: preamble.id,
                name: preamble.name.clone(),
                size: meter.size,
            });
            meter_preambles.push(preamble);
        }

        let mut direct_counters = Vec::new();
        let mut direct_counter_preambles = Vec::new();
        for counter in &p4info.direct_counters {
            let preamble = preamble_of(&counter.preamble, "direct counter")?;
            direct_counters.push(DirectResourceSpec {
                id: preamble.id,
                name: preamble.name.clone(),
                table_id: counter.direct_table_id,
            });
            direct_counter_preambles.push(preamble);
        }

        let mut direct_meters = Vec::new();
        let mut direct_meter_preambles = Vec::new();
        for meter in &p4info.direct_meters {
            let preamble = preamble_of(&meter.preamble, "direct meter")?;
            direct_meters.push(DirectResourceSpec {
                id: preamble.id,
                name: preamble.name.clone(),
                table_id: meter.direct_table_id,
            });
            direct_meter_preambles.push(preamble);
        }

        let mut digests = Vec::new();
        let mut digest_preambles = Vec::new();
        for digest in &p4info.digests {
            let preamble = preamble_of(&digest.preamble, "digest")?;
            digests.push(DigestSpec {
                id: preamble.id,
                name: preamble.name.clone(),
                members: digest_members(&p4info, &preamble.name, digest.type_spec.as_ref())?,
            });
            digest_preambles.push(preamble);
        }

        Ok(SchemaIndex {
            table_index: NameIndex::build(table_preambles.iter()),
            action_index: NameIndex::build(action_preambles.iter()),
            register_index: NameIndex::build(register_preambles.iter()),
            counter_index: NameIndex::build(counter_preambles.iter()),
            meter_index: NameIndex::build(meter_preambles.iter()),
            direct_counter_index: NameIndex::build(direct_counter_preambles.iter()),
            direct_meter_index: NameIndex::build(direct_meter_preambles.iter()),
            digest_index: NameIndex::build(digest_preambles.iter()),
            p4info,
            tables,
            actions,
            registers,
            counters,
            meters,
            direct_counters,
            direct_meters,
            digests,
        })
    }

    /// The P4Info this index was built from, for pipeline installation
    pub fn p4info(&self) -> &P4Info {
        &self.p4info
    }

    pub fn table(&self, name: &str) -> Result<&TableSpec> {
        self.table_index
            .get(name)
            .map(|i| &self.tables[i])
            .ok_or_else(|| P4RuntimeError::schema_lookup("table", name))
    }

    pub fn table_by_id(&self, id: u32) -> Option<&TableSpec> {
        self.table_index.get_id(id).map(|i| &self.tables[i])
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    pub fn action(&self, name: &str) -> Result<&ActionSpec> {
        self.action_index
            .get(name)
            .map(|i| &self.actions[i])
            .ok_or_else(|| P4RuntimeError::schema_lookup("action", name))
    }

    pub fn action_by_id(&self, id: u32) -> Option<&ActionSpec> {
        self.action_index.get_id(id).map(|i| &self.actions[i])
    }

    /// Resolve a register for writing
    ///
    /// The declared width wins. `fallback_width` is only used when the P4Info
    /// does not declare one; with neither, the lookup fails.
    pub fn register(&self, name: &str, fallback_width: Option<u32>) -> Result<RegisterRef> {
        let spec = self
            .register_index
            .get(name)
            .map(|i| &self.registers[i])
            .ok_or_else(|| P4RuntimeError::schema_lookup("register", name))?;
        let bit_width = spec
            .bit_width
            .or(fallback_width)
            .ok_or_else(|| P4RuntimeError::schema_lookup("register width", name))?;
        Ok(RegisterRef {
            name: spec.name.clone(),
            id: spec.id,
            bit_width,
        })
    }

    /// Number of cells of a register
    pub fn register_size(&self, name: &str) -> Result<i32> {
        self.register_index
            .get(name)
            .map(|i| self.registers[i].size)
            .ok_or_else(|| P4RuntimeError::schema_lookup("register", name))
    }

    pub fn counter(&self, name: &str) -> Result<&ResourceSpec> {
        self.counter_index
            .get(name)
            .map(|i| &self.counters[i])
            .ok_or_else(|| P4RuntimeError::schema_lookup("counter", name))
    }

    pub fn meter(&self, name: &str) -> Result<&ResourceSpec> {
        self.meter_index
            .get(name)
            .map(|i| &self.meters[i])
            .ok_or_else(|| P4RuntimeError::schema_lookup("meter", name))
    }

    pub fn direct_counter(&self, name: &str) -> Result<&DirectResourceSpec> {
        self.direct_counter_index
            .get(name)
            .map(|i| &self.direct_counters[i])
            .ok_or_else(|| P4RuntimeError::schema_lookup("direct counter", name))
    }

    /// Direct counter attached to a table, if any
    pub fn direct_counter_for_table(&self, table_id: u32) -> Option<&DirectResourceSpec> {
        self.direct_counters.iter().find(|c| c.table_id == table_id)
    }

    pub fn direct_meter(&self, name: &str) -> Result<&DirectResourceSpec> {
        self.direct_meter_index
            .get(name)
            .map(|i| &self.direct_meters[i])
            .ok_or_else(|| P4RuntimeError::schema_lookup("direct meter", name))
    }

    pub fn digest(&self, name: &str) -> Result<&DigestSpec> {
        self.digest_index
            .get(name)
            .map(|i| &self.digests[i])
            .ok_or_else(|| P4RuntimeError::schema_lookup("digest", name))
    }

    pub fn digest_by_id(&self, id: u32) -> Option<&DigestSpec> {
        self.digest_index.get_id(id).map(|i| &self.digests[i])
    }
}

fn digest_members(
    p4info: &P4Info,
    digest: &str,
    type_spec: Option<&P4DataTypeSpec>,
) -> Result<Vec<FieldSpec>> {
    let type_spec = type_spec
        .ok_or_else(|| P4RuntimeError::SchemaParse(format!("digest '{}' has no type", digest)))?;

    if let Some(width) = type_spec.bitwidth() {
        return Ok(vec![FieldSpec::new(digest, 1, width)]);
    }

    let struct_name = type_spec.struct_name().ok_or_else(|| {
        P4RuntimeError::SchemaParse(format!("digest '{}' is not a struct or bitstring", digest))
    })?;
    let layout = p4info
        .type_info
        .as_ref()
        .and_then(|info| {
            info.structs
                .get(struct_name)
                .or_else(|| info.headers.get(struct_name))
        })
        .ok_or_else(|| {
            P4RuntimeError::SchemaParse(format!(
                "digest '{}' refers to unknown struct '{}'",
                digest, struct_name
            ))
        })?;

    layout
        .members
        .iter()
        .enumerate()
        .map(|(pos, member)| {
            let width = member
                .type_spec
                .as_ref()
                .and_then(P4DataTypeSpec::bitwidth)
                .ok_or_else(|| {
                    P4RuntimeError::SchemaParse(format!(
                        "member '{}' of '{}' is not a bitstring",
                        member.name, struct_name
                    ))
                })?;
            Ok(FieldSpec::new(member.name.clone(), pos as u32 + 1, width))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const P4INFO: &str = r#"{
      "tables": [
        {
          "preamble": { "id": 1, "name": "IngressImpl.stream_id", "alias": "stream_id" },
          "matchFields": [
            { "id": 1, "name": "hdr.ethernet.dstAddr", "bitwidth": 48, "matchType": "EXACT" },
            { "id": 2, "name": "hdr.vlan.vid", "bitwidth": 12, "matchType": "EXACT" }
          ],
          "actionRefs": [{ "id": 10 }],
          "size": "1024"
        },
        {
          "preamble": { "id": 2, "name": "IngressImpl.max_sdu_filter", "alias": "max_sdu_filter" },
          "matchFields": [
            { "id": 1, "name": "meta.filter_id", "bitwidth": 16, "matchType": "TERNARY" },
            { "id": 2, "name": "standard_metadata.packet_length", "bitwidth": 32, "matchType": "RANGE" }
          ],
          "actionRefs": [{ "id": 10 }]
        }
      ],
      "actions": [
        { "preamble": { "id": 10, "name": "IngressImpl.forward", "alias": "forward" },
          "params": [{ "id": 1, "name": "port", "bitwidth": 9 }] }
      ],
      "registers": [
        { "preamble": { "id": 20, "name": "IngressImpl.a.reg", "alias": "reg" },
          "typeSpec": { "bitstring": { "bit": { "bitwidth": 48 } } }, "size": 8 },
        { "preamble": { "id": 21, "name": "IngressImpl.b.reg", "alias": "reg" },
          "typeSpec": { "struct": { "name": "opaque_t" } }, "size": 8 }
      ],
      "digests": [
        { "preamble": { "id": 30, "name": "digest_t" },
          "typeSpec": { "struct": { "name": "digest_t" } } }
      ],
      "typeInfo": { "structs": { "digest_t": { "members": [
        { "name": "gate", "typeSpec": { "bitstring": { "bit": { "bitwidth": 8 } } } },
        { "name": "ts", "typeSpec": { "bitstring": { "bit": { "bitwidth": 48 } } } }
      ]}}}
    }"#;

    #[test]
    fn test_lookup_by_name_and_alias() {
        let schema = SchemaIndex::from_json_str(P4INFO).unwrap();
        assert_eq!(schema.table("IngressImpl.stream_id").unwrap().id, 1);
        assert_eq!(schema.table("stream_id").unwrap().id, 1);
        assert_eq!(schema.table_by_id(2).unwrap().name, "IngressImpl.max_sdu_filter");
        assert!(matches!(
            schema.table("nope"),
            Err(P4RuntimeError::SchemaLookup { kind: "table", .. })
        ));
    }

    #[test]
    fn test_ambiguous_alias_is_not_indexed() {
        let schema = SchemaIndex::from_json_str(P4INFO).unwrap();
        assert!(schema.register("reg", Some(1)).is_err());
        assert_eq!(schema.register("IngressImpl.a.reg", None).unwrap().id, 20);
    }

    #[test]
    fn test_register_width_fallback() {
        let schema = SchemaIndex::from_json_str(P4INFO).unwrap();
        assert_eq!(schema.register("IngressImpl.a.reg", Some(1)).unwrap().bit_width, 48);
        assert_eq!(schema.register("IngressImpl.b.reg", Some(1)).unwrap().bit_width, 1);
        assert!(schema.register("IngressImpl.b.reg", None).is_err());
    }

    #[test]
    fn test_priority_requirement() {
        let schema = SchemaIndex::from_json_str(P4INFO).unwrap();
        assert!(!schema.table("stream_id").unwrap().requires_priority());
        assert!(schema.table("max_sdu_filter").unwrap().requires_priority());
    }

    #[test]
    fn test_digest_layout_follows_type_info() {
        let schema = SchemaIndex::from_json_str(P4INFO).unwrap();
        let digest = schema.digest("digest_t").unwrap();
        assert_eq!(digest.id, 30);
        assert_eq!(
            digest.members,
            vec![FieldSpec::new("gate", 1, 8), FieldSpec::new("ts", 2, 48)]
        );
        assert_eq!(schema.digest_by_id(30).unwrap().name, "digest_t");
    }
}
