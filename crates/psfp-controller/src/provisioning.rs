// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Static rule provisioning
//!
//! Installs the table entries of a runtime rule file (stream identification,
//! stream filters, gate schedules, flow meters, IPv4 forwarding). A rule that
//! does not fit the loaded P4Info is skipped with a warning; a rule the device
//! refuses aborts provisioning.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use psfp_p4runtime::{
    DeviceSession, ErrorCategory, RuleBuilder, RuleDescription, SchemaIndex, UpdateKind,
};

use crate::error::{ControllerError, Result};

/// Runtime rule file; keys other than `table_entries` are ignored
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleFile {
    #[serde(default)]
    pub table_entries: Vec<RuleDescription>,
}

/// Load and parse a rule file
pub fn load_rules(path: &Path) -> Result<RuleFile> {
    let text = std::fs::read_to_string(path).map_err(|source| ControllerError::RuleFileRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ControllerError::RuleFileParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Installed and skipped rule counts per table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub installed: BTreeMap<String, usize>,
    pub skipped: BTreeMap<String, usize>,
}

impl ProvisionReport {
    pub fn installed_total(&self) -> usize {
        self.installed.values().sum()
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// Install every rule in file order
///
/// Default-action rules are sent as MODIFY (the default entry always exists),
/// all others as INSERT.
pub async fn provision_rules(
    session: &DeviceSession,
    schema: &SchemaIndex,
    rules: &[RuleDescription],
) -> Result<ProvisionReport> {
    let builder = RuleBuilder::new(schema);
    let mut report = ProvisionReport::default();

    for (position, desc) in rules.iter().enumerate() {
        let entry = match builder.build_description(desc) {
            Ok(entry) => entry,
            Err(e) if e.category() == ErrorCategory::SchemaMismatch => {
                warn!(
                    "[RULES] Skipping rule #{} for table {}: {}",
                    position, desc.table, e
                );
                *report.skipped.entry(desc.table.clone()).or_default() += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let kind = if desc.default_action {
            UpdateKind::Modify
        } else {
            UpdateKind::Insert
        };
        let target = format!("{} rule #{}", desc.table, position);
        session.write_table_entry(kind, entry, &target).await?;

        info!(
            "[RULES] Installed rule on {} for table {}",
            session.name(),
            desc.table
        );
        *report.installed.entry(desc.table.clone()).or_default() += 1;
    }

    info!(
        "[RULES] {} rules installed, {} skipped",
        report.installed_total(),
        report.skipped_total()
    );
    Ok(report)
}

/// Read back the entries of every provisioned table and log them
///
/// Returns the number of entries seen per table.
pub async fn read_back(
    session: &DeviceSession,
    schema: &SchemaIndex,
    tables: impl IntoIterator<Item = &str>,
) -> Result<BTreeMap<String, usize>> {
    let mut seen = BTreeMap::new();
    for name in tables {
        let table = schema.table(name)?;
        let entries = session.read_table_entries(table.id, &table.name).await?;
        for entry in &entries {
            debug!(
                "[READ] {}: {} match fields, priority {}, default {}",
                table.name,
                entry.r#match.len(),
                entry.priority,
                entry.is_default_action
            );
        }
        info!("[READ] {} entries in {}", entries.len(), table.name);
        seen.insert(table.name.clone(), entries.len());
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{config_dir, schema, session};
    use psfp_p4runtime::proto::p4runtime::{update, Entity, TableEntry};
    use psfp_p4runtime::{FieldValue, MatchValue, MemoryTransport};

    fn desc(table: &str, action: &str) -> RuleDescription {
        RuleDescription {
            table: table.to_string(),
            default_action: false,
            matches: BTreeMap::new(),
            action_name: action.to_string(),
            action_params: BTreeMap::new(),
            priority: None,
        }
    }

    #[test]
    fn test_load_deployment_rule_file() {
        let file = load_rules(&config_dir().join("s1-runtime.json")).unwrap();
        assert_eq!(file.table_entries.len(), 41);
    }

    #[test]
    fn test_missing_rule_file_is_startup_fatal() {
        let err = load_rules(Path::new("/nonexistent/rules.json")).unwrap_err();
        assert!(matches!(err, ControllerError::RuleFileRead { .. }));
        assert_eq!(err.category(), ErrorCategory::StartupFatal);
    }

    #[test]
    fn test_malformed_rule_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "{ \"table_entries\": [ { \"table\": 5 } ] }").unwrap();
        assert!(matches!(
            load_rules(&path).unwrap_err(),
            ControllerError::RuleFileParse { .. }
        ));
    }

    #[tokio::test]
    async fn test_provision_installs_all_deployment_rules() {
        let transport = MemoryTransport::new();
        let rules = load_rules(&config_dir().join("s1-runtime.json")).unwrap();
        let report = provision_rules(&session(&transport), &schema(), &rules.table_entries)
            .await
            .unwrap();

        assert_eq!(report.installed_total(), 41);
        assert_eq!(report.skipped_total(), 0);

        let writes = transport.writes();
        assert_eq!(writes.len(), 41);
        let modifies = writes
            .iter()
            .filter(|w| w.updates[0].r#type == update::Type::Modify as i32)
            .count();
        // Only the IPv4 default entry
        assert_eq!(modifies, 1);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_skipped() {
        let transport = MemoryTransport::new();
        let mut bad = desc("IngressImpl.psfp_c.streamFilter_c.max_sdu_filter", "NoAction");
        bad.matches.insert(
            "hdr.eth_802_1q.pcp".to_string(),
            MatchValue::Scalar(FieldValue(5)),
        );
        let unknown = desc("IngressImpl.no_such_table", "NoAction");
        let mut good = desc("IngressImpl.psfp_c.hyperperiod_state", "IngressImpl.psfp_c.set_hyperperiod_state");
        good.matches.insert(
            "meta.ingress_md.stream_filter.stream_gate_id".to_string(),
            MatchValue::Scalar(FieldValue(1)),
        );
        for (name, value) in [("gate_id", 1u128), ("hyperperiod_ts", 20_000_000), ("last_hyperperiod", 0)] {
            good.action_params.insert(name.to_string(), FieldValue(value));
        }

        let report = provision_rules(&session(&transport), &schema(), &[bad, unknown, good])
            .await
            .unwrap();
        assert_eq!(report.installed_total(), 1);
        assert_eq!(report.skipped_total(), 2);
        assert_eq!(transport.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_device_rejection_aborts() {
        let transport = MemoryTransport::new();
        transport.fail_writes_where(|_| true);
        let rules = load_rules(&config_dir().join("s1-runtime.json")).unwrap();
        let err = provision_rules(&session(&transport), &schema(), &rules.table_entries)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert_eq!(transport.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_read_back_counts_entries() {
        let transport = MemoryTransport::new();
        let schema = schema();
        let ipv4_id = schema.table("IngressImpl.ipv4_c.ipv4").unwrap().id;
        transport.on_read(move |request| {
            let asked = request.entities.iter().any(|e| {
                matches!(
                    &e.entity,
                    Some(psfp_p4runtime::proto::p4runtime::entity::Entity::TableEntry(t)) if t.table_id == ipv4_id
                )
            });
            if !asked {
                return Vec::new();
            }
            (0..3)
                .map(|_| Entity::table_entry(TableEntry { table_id: ipv4_id, ..Default::default() }))
                .collect()
        });

        let seen = read_back(
            &session(&transport),
            &schema,
            ["IngressImpl.ipv4_c.ipv4", "IngressImpl.psfp_c.hyperperiod_state"],
        )
        .await
        .unwrap();
        assert_eq!(seen["IngressImpl.ipv4_c.ipv4"], 3);
        assert_eq!(seen["IngressImpl.psfp_c.hyperperiod_state"], 0);
    }
}
