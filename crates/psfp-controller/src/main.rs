// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tokio::sync::watch;
use tracing::{error, info, warn};

use psfp_config::{load_config, validate_config, PsfpConfig};
use psfp_controller::{missing_pipeline_file, session_config, Controller};
use psfp_observability::{debug_flags_help, init_logging, CrateDebugFlags, FileLogging};
use psfp_p4runtime::{DeviceSession, SchemaIndex};

/// P4Runtime controller for the sdn-psfp switch
#[derive(Parser, Debug)]
#[command(name = "psfp-controller", version, author, long_about = None, after_help = debug_flags_help())]
struct Args {
    /// Path to psfp_controller.toml (searched for when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// P4Info file from p4c (protobuf JSON)
    #[arg(long)]
    p4info: Option<PathBuf>,

    /// BMv2 JSON file from p4c
    #[arg(long)]
    bmv2_json: Option<PathBuf>,

    /// Runtime rule file (s1-runtime.json format)
    #[arg(long)]
    rules: Option<PathBuf>,

    /// P4Runtime endpoint, host:port
    #[arg(long)]
    address: Option<String>,

    #[arg(long)]
    device_id: Option<u64>,

    /// Enable debug logging for a crate (repeatable)
    #[arg(long = "debug", value_name = "CRATE")]
    debug: Vec<String>,

    /// Enable debug logging for every crate
    #[arg(long, default_value_t = false)]
    debug_all: bool,

    /// Also write JSON logs under this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        let paths = [
            ("p4info", &self.p4info),
            ("device_config", &self.bmv2_json),
            ("rules", &self.rules),
            ("log_dir", &self.log_dir),
        ];
        for (key, path) in paths {
            if let Some(path) = path {
                overrides.insert(key.to_string(), path.display().to_string());
            }
        }
        if let Some(address) = &self.address {
            overrides.insert("address".to_string(), address.clone());
        }
        if let Some(device_id) = self.device_id {
            overrides.insert("device_id".to_string(), device_id.to_string());
        }
        overrides
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref(), Some(&args.overrides())) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Checked before logging or any connection
    if let Some(reason) = missing_pipeline_file(&config) {
        eprintln!("{}", Args::command().render_help());
        eprintln!("\n{}\nHave you run 'make'?", reason);
        return ExitCode::FAILURE;
    }

    if let Err(e) = validate_config(&config) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let flags = CrateDebugFlags::from_crate_names(&args.debug, args.debug_all).with_env();
    let file_logging = config.logging.file_logging.then(|| FileLogging {
        log_dir: config.logging.log_dir.clone(),
        retention_days: config.logging.retention_days,
        retention_runs: config.logging.retention_runs,
    });
    let _guard = match init_logging(&flags, &config.logging.level, file_logging.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: PsfpConfig) -> anyhow::Result<()> {
    let schema = Arc::new(
        SchemaIndex::load(&config.pipeline.p4info)
            .with_context(|| format!("loading {}", config.pipeline.p4info.display()))?,
    );
    info!(
        "Loaded P4Info {}: {} tables",
        config.pipeline.p4info.display(),
        schema.tables().len()
    );

    let session = DeviceSession::connect(&session_config(&config))
        .await
        .with_context(|| format!("connecting to {}", config.device.address))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down.");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Dropping the sender would read as a shutdown
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    let stats = Controller::new(config, schema, session).run(shutdown_rx).await?;
    info!(
        "Control stream handled {} digest list(s) ({} failed), sent {} ack(s)",
        stats.digests_received, stats.digests_failed, stats.acks_sent
    );
    Ok(())
}
