// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Flow meter programming
//!
//! Meter rates are opaque operator values. A meter that cannot be resolved or
//! written is logged and left at the device default.

use tracing::{info, warn};

use psfp_config::MeterConfig;
use psfp_p4runtime::proto::p4runtime::{
    entity, DirectMeterEntry, Entity, Index, MeterConfig as WireMeterConfig, MeterEntry,
    TableEntry,
};
use psfp_p4runtime::{DeviceSession, P4RuntimeError, SchemaIndex, UpdateKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeterReport {
    pub configured: Vec<String>,
    pub failed: Vec<String>,
}

fn wire_config(meter: &MeterConfig) -> WireMeterConfig {
    WireMeterConfig {
        cir: meter.cir,
        cburst: meter.cburst,
        pir: meter.pir,
        pburst: meter.pburst,
    }
}

/// Resolve a configured meter into the entity that programs it
pub fn meter_entity(schema: &SchemaIndex, meter: &MeterConfig) -> Result<Entity, P4RuntimeError> {
    let entity = match &meter.direct_table {
        Some(table_name) => {
            let spec = schema.direct_meter(&meter.name)?;
            let table = schema.table(table_name)?;
            if spec.table_id != table.id {
                return Err(P4RuntimeError::InvalidValue(format!(
                    "direct meter '{}' is not attached to table '{}'",
                    spec.name, table.name
                )));
            }
            entity::Entity::DirectMeterEntry(DirectMeterEntry {
                table_entry: Some(TableEntry {
                    table_id: table.id,
                    is_default_action: true,
                    ..Default::default()
                }),
                config: Some(wire_config(meter)),
            })
        }
        None => {
            let spec = schema.meter(&meter.name)?;
            if meter.index < 0 || meter.index >= spec.size {
                return Err(P4RuntimeError::InvalidValue(format!(
                    "meter index {} outside '{}' (size {})",
                    meter.index, spec.name, spec.size
                )));
            }
            entity::Entity::MeterEntry(MeterEntry {
                meter_id: spec.id,
                index: Some(Index { index: meter.index }),
                config: Some(wire_config(meter)),
            })
        }
    };
    Ok(Entity {
        entity: Some(entity),
    })
}

/// Program every configured meter with MODIFY
pub async fn configure_meters(
    session: &DeviceSession,
    schema: &SchemaIndex,
    meters: &[MeterConfig],
) -> MeterReport {
    let mut report = MeterReport::default();
    for meter in meters {
        let target = match &meter.direct_table {
            Some(table) => format!("{} on {}", meter.name, table),
            None => format!("{}[{}]", meter.name, meter.index),
        };
        let result = match meter_entity(schema, meter) {
            Ok(entity) => session.write_one(UpdateKind::Modify, entity, &target).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                info!(
                    "[METER] {}: cir={} cburst={} pir={} pburst={}",
                    target, meter.cir, meter.cburst, meter.pir, meter.pburst
                );
                report.configured.push(target);
            }
            Err(e) => {
                warn!("[METER] Failed to configure {}: {}", target, e);
                report.failed.push(target);
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{schema, session};
    use psfp_p4runtime::MemoryTransport;

    fn meter(name: &str, index: i64, direct_table: Option<&str>) -> MeterConfig {
        MeterConfig {
            name: name.to_string(),
            index,
            cir: 1_250_000,
            cburst: 3_000,
            pir: 2_500_000,
            pburst: 6_000,
            direct_table: direct_table.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_indexed_and_direct_meters() {
        let transport = MemoryTransport::new();
        let meters = [
            meter("IngressImpl.psfp_c.flowMeter_c.flow_meter", 1, None),
            meter(
                "color_meter",
                0,
                Some("IngressImpl.psfp_c.flowMeter_c.flow_meter_instance"),
            ),
        ];
        let report = configure_meters(&session(&transport), &schema(), &meters).await;
        assert_eq!(report.configured.len(), 2);
        assert!(report.failed.is_empty());

        let writes = transport.writes();
        let Some(entity::Entity::MeterEntry(indexed)) = &writes[0].updates[0].entity.as_ref().unwrap().entity else {
            panic!("expected meter entry");
        };
        assert_eq!(indexed.meter_id, 337983122);
        assert_eq!(indexed.index.as_ref().unwrap().index, 1);
        assert_eq!(indexed.config.as_ref().unwrap().pir, 2_500_000);

        let Some(entity::Entity::DirectMeterEntry(direct)) = &writes[1].updates[0].entity.as_ref().unwrap().entity else {
            panic!("expected direct meter entry");
        };
        let entry = direct.table_entry.as_ref().unwrap();
        assert_eq!(entry.table_id, 41006519);
        assert!(entry.is_default_action);
    }

    #[tokio::test]
    async fn test_bad_meters_are_reported_not_fatal() {
        let transport = MemoryTransport::new();
        let meters = [
            meter("IngressImpl.no_such_meter", 0, None),
            meter("IngressImpl.psfp_c.flowMeter_c.flow_meter", 16, None),
            meter("color_meter", 0, Some("IngressImpl.ipv4_c.ipv4")),
            meter("IngressImpl.psfp_c.flowMeter_c.flow_meter", 0, None),
        ];
        let report = configure_meters(&session(&transport), &schema(), &meters).await;
        assert_eq!(report.failed.len(), 3);
        assert_eq!(report.configured, vec!["IngressImpl.psfp_c.flowMeter_c.flow_meter[0]".to_string()]);
        assert_eq!(transport.writes().len(), 1);
    }
}
