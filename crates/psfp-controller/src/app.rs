// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Controller lifecycle
//!
//! Startup runs in a fixed order and any failure in it aborts:
//! arbitration, pipeline install, meters, rules, hyperperiod state. One task
//! owns the control stream from arbitration on; once startup is done the
//! caller's task polls counters. A control stream that ends before shutdown ends the controller.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

use psfp_config::PsfpConfig;
use psfp_p4runtime::{
    ControlStreamConfig, DeviceSession, ElectionId, P4RuntimeError, SchemaIndex,
    SessionConfig, StreamStats,
};

use crate::error::{ControllerError, Result};
use crate::hyperperiod::{wall_clock_baseline_us, HyperperiodSynchronizer};
use crate::meters::{configure_meters, MeterReport};
use crate::provisioning::{load_rules, provision_rules, read_back, ProvisionReport};
use crate::telemetry::TelemetryPoller;

/// Session parameters from the `[device]` section
pub fn session_config(config: &PsfpConfig) -> SessionConfig {
    SessionConfig {
        name: config.device.name.clone(),
        address: config.device.address.clone(),
        device_id: config.device.device_id,
        election_id: ElectionId::new(config.device.election_id_high, config.device.election_id_low),
        connect_timeout: Duration::from_millis(config.device.connect_timeout_ms),
    }
}

/// Control stream parameters from the `[stream]` section
pub fn stream_config(config: &PsfpConfig) -> ControlStreamConfig {
    ControlStreamConfig {
        keepalive_interval: Duration::from_millis(config.stream.keepalive_interval_ms),
        outbound_queue_depth: config.stream.outbound_queue_depth,
        arbitration_timeout: Duration::from_millis(config.device.connect_timeout_ms),
    }
}

/// First required pipeline file that does not exist, described for the operator
pub fn missing_pipeline_file(config: &PsfpConfig) -> Option<String> {
    let required = [
        ("p4info file", &config.pipeline.p4info),
        ("BMv2 JSON file", &config.pipeline.device_config),
    ];
    required
        .into_iter()
        .find(|(_, path)| !path.exists())
        .map(|(what, path)| format!("{} not found: {}", what, path.display()))
}

#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    pub meters: MeterReport,
    pub rules: Option<ProvisionReport>,
    pub gates_initialized: usize,
}

/// A controller past startup; the control stream is already being served
pub struct Started {
    pub stream_task: JoinHandle<psfp_p4runtime::Result<StreamStats>>,
    pub synchronizer: Arc<HyperperiodSynchronizer>,
    pub report: StartupReport,
}

pub struct Controller {
    config: PsfpConfig,
    schema: Arc<SchemaIndex>,
    session: DeviceSession,
}

impl Controller {
    pub fn new(config: PsfpConfig, schema: Arc<SchemaIndex>, session: DeviceSession) -> Self {
        Self {
            config,
            schema,
            session,
        }
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// One-time provisioning
    ///
    /// The control stream task is spawned as soon as arbitration succeeds, so
    /// keep-alives and digest acks continue while the device is provisioned.
    /// It stops when `shutdown` turns true, and is aborted if provisioning fails.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<Started> {
        let synchronizer = Arc::new(HyperperiodSynchronizer::new(
            self.session.clone(),
            Arc::clone(&self.schema),
            &self.config.hyperperiod,
        )?);

        let stream = self
            .session
            .send_mastership_arbitration(&stream_config(&self.config))
            .await?;
        let handler = Arc::clone(&synchronizer);
        let stream_task = tokio::spawn(async move { stream.run(handler.as_ref(), shutdown).await });

        match self.provision(&synchronizer).await {
            Ok(report) => Ok(Started {
                stream_task,
                synchronizer,
                report,
            }),
            Err(e) => {
                stream_task.abort();
                Err(e)
            }
        }
    }

    async fn provision(&self, synchronizer: &HyperperiodSynchronizer) -> Result<StartupReport> {
        let device_image = std::fs::read(&self.config.pipeline.device_config)
            .map_err(P4RuntimeError::from)?;
        self.session
            .set_forwarding_pipeline_config(self.schema.p4info(), device_image)
            .await?;

        let meters = configure_meters(&self.session, &self.schema, &self.config.meters).await;

        let rules = match &self.config.pipeline.rules {
            Some(path) => {
                let file = load_rules(path)?;
                let report = provision_rules(&self.session, &self.schema, &file.table_entries).await?;
                if self.config.pipeline.read_back_rules {
                    let tables: BTreeSet<&str> =
                        report.installed.keys().map(String::as_str).collect();
                    read_back(&self.session, &self.schema, tables).await?;
                }
                Some(report)
            }
            None => {
                info!("[RULES] No rule file configured");
                None
            }
        };

        let gates_initialized = synchronizer
            .initialize_gates(&self.config.hyperperiod.gates, wall_clock_baseline_us())
            .await?;

        Ok(StartupReport {
            meters,
            rules,
            gates_initialized,
        })
    }

    /// Start, then serve digests and poll counters until `shutdown` turns true
    ///
    /// Returns the control stream statistics on a clean shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<StreamStats> {
        let Started {
            mut stream_task,
            synchronizer,
            report,
        } = self.start(shutdown.clone()).await?;
        info!(
            "[APP] Startup complete on {}: {} meters, {} rules, {} gates",
            self.session.name(),
            report.meters.configured.len(),
            report.rules.as_ref().map_or(0, |r| r.installed_total()),
            report.gates_initialized
        );

        let poller = TelemetryPoller::new(
            self.session.clone(),
            &self.schema,
            &self.config.telemetry,
            Some(synchronizer.states()),
        );

        let interval = Duration::from_secs(self.config.telemetry.poll_interval_secs.max(1));
        tokio::select! {
            _ = poller.run(interval, shutdown) => {}
            joined = &mut stream_task => {
                let outcome = stream_outcome(joined);
                if let Err(e) = &outcome {
                    error!("[APP] Control stream ended: {}", e);
                }
                return outcome;
            }
        }

        stream_outcome(stream_task.await)
    }
}

fn stream_outcome(
    joined: std::result::Result<psfp_p4runtime::Result<StreamStats>, JoinError>,
) -> Result<StreamStats> {
    match joined {
        Ok(result) => Ok(result?),
        Err(e) => Err(ControllerError::StreamTask(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{config_dir, schema, session};
    use psfp_config::MeterConfig;
    use psfp_p4runtime::proto::p4runtime::{entity, stream_message_request, update};
    use psfp_p4runtime::{ErrorCategory, MemoryTransport};

    fn deployment_config(image: &std::path::Path) -> PsfpConfig {
        let mut config = PsfpConfig::default();
        config.pipeline.p4info = config_dir().join("sdn-psfp.p4info.json");
        config.pipeline.device_config = image.to_path_buf();
        config.pipeline.rules = Some(config_dir().join("s1-runtime.json"));
        config.device.connect_timeout_ms = 1_000;
        config.meters = vec![MeterConfig {
            name: "IngressImpl.psfp_c.flowMeter_c.flow_meter".to_string(),
            index: 1,
            cir: 100_000,
            cburst: 4_096,
            pir: 200_000,
            pburst: 8_192,
            direct_table: None,
        }];
        config
    }

    fn device_image() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"{\"program\": \"sdn-psfp.p4\"}").unwrap();
        file
    }

    #[test]
    fn test_missing_pipeline_file() {
        let image = device_image();
        let mut config = deployment_config(image.path());
        assert_eq!(missing_pipeline_file(&config), None);

        config.pipeline.p4info = "/nonexistent/sdn-psfp.p4info.json".into();
        let reason = missing_pipeline_file(&config).unwrap();
        assert!(reason.starts_with("p4info file not found"));
    }

    #[tokio::test]
    async fn test_startup_order() {
        let transport = MemoryTransport::new();
        let image = device_image();
        let controller = Controller::new(deployment_config(image.path()), schema(), session(&transport));

        let (_tx, rx) = watch::channel(false);
        let started = controller.start(rx).await.unwrap();
        assert_eq!(started.report.meters.configured.len(), 1);
        assert_eq!(started.report.rules.as_ref().unwrap().installed_total(), 41);
        assert_eq!(started.report.gates_initialized, 4);

        // Arbitration went out first and the pipeline carries the image bytes
        let sent = transport.stream_sent();
        assert!(matches!(
            sent[0].update,
            Some(stream_message_request::Update::Arbitration(_))
        ));
        let pipelines = transport.pipelines();
        assert_eq!(pipelines.len(), 1);
        assert_eq!(
            pipelines[0].config.as_ref().unwrap().p4_device_config,
            b"{\"program\": \"sdn-psfp.p4\"}".to_vec()
        );

        // meter, 41 rules, 4 hyperperiod rows
        let writes = transport.writes();
        assert_eq!(writes.len(), 46);
        assert!(matches!(
            writes[0].updates[0].entity.as_ref().unwrap().entity,
            Some(entity::Entity::MeterEntry(_))
        ));
        for write in &writes[42..] {
            assert_eq!(write.updates[0].r#type, update::Type::Modify as i32);
        }
        assert_eq!(started.synchronizer.snapshot().len(), 4);
        // Read-back covers every provisioned table
        assert_eq!(transport.reads().len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_served_from_arbitration_on() {
        let transport = MemoryTransport::new();
        let image = device_image();
        let controller = Controller::new(deployment_config(image.path()), schema(), session(&transport));
        let mut peer = transport.stream_peer().unwrap();
        let (tx, rx) = watch::channel(false);

        let started = controller.start(rx).await.unwrap();

        // Keep-alives flow with no poll loop running yet
        let first = peer.recv().await.unwrap();
        assert!(matches!(
            first.update,
            Some(stream_message_request::Update::Arbitration(_))
        ));
        for _ in 0..2 {
            let message = peer.recv().await.unwrap();
            assert!(message.update.is_none());
        }

        tx.send(true).unwrap();
        let stats = started.stream_task.await.unwrap().unwrap();
        assert!(stats.keepalives_sent >= 2);
    }

    #[tokio::test]
    async fn test_rejected_arbitration_aborts_before_any_write() {
        let transport = MemoryTransport::new();
        transport.reject_arbitration("another controller is master");
        let image = device_image();
        let controller = Controller::new(deployment_config(image.path()), schema(), session(&transport));

        let (_tx, rx) = watch::channel(false);
        let err = controller.start(rx).await.err().unwrap();
        assert_eq!(err.category(), ErrorCategory::StartupFatal);
        assert!(transport.pipelines().is_empty());
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_missing_device_image_is_fatal() {
        let transport = MemoryTransport::new();
        let controller = Controller::new(
            deployment_config(std::path::Path::new("/nonexistent/sdn-psfp.json")),
            schema(),
            session(&transport),
        );
        let (_tx, rx) = watch::channel(false);
        let err = controller.start(rx).await.err().unwrap();
        assert_eq!(err.category(), ErrorCategory::StartupFatal);
        assert!(transport.pipelines().is_empty());
    }

    #[tokio::test]
    async fn test_stream_failure_ends_run() {
        let transport = MemoryTransport::new();
        let image = device_image();
        let mut config = deployment_config(image.path());
        config.pipeline.rules = None;
        let controller = Controller::new(config, schema(), session(&transport));
        let peer = transport.stream_peer().unwrap();
        let (_tx, rx) = watch::channel(false);

        let run = tokio::spawn(controller.run(rx));
        // Startup is done once all four gates are initialized
        while transport.writes().len() < 5 {
            tokio::task::yield_now().await;
        }
        peer.fail(P4RuntimeError::transport("StreamChannel", "memory", "connection reset"));

        let err = run.await.unwrap().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transport);
    }

    #[tokio::test]
    async fn test_shutdown_stops_stream_and_poller() {
        let transport = MemoryTransport::new();
        let image = device_image();
        let mut config = deployment_config(image.path());
        config.pipeline.rules = None;
        let controller = Controller::new(config, schema(), session(&transport));
        let (tx, rx) = watch::channel(false);

        let run = tokio::spawn(controller.run(rx));
        while transport.writes().len() < 5 {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();

        let stats = run.await.unwrap().unwrap();
        assert_eq!(stats.digests_received, 0);
    }
}
