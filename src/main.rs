//! # v8bridge
//!
//! Bridge binary: loads settings, installs logging, serves front-ends over
//! WebSocket and relays them to a V8 debugger.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use v8bridge_server::BridgeServer;
use v8bridge_settings::{BridgeSettings, SessionPolicy};

/// Relay a JSON debugger front-end to a V8 debugger port.
#[derive(Parser, Debug)]
#[command(name = "v8bridge", version, about)]
struct Cli {
    /// Settings file (defaults to `~/.v8bridge/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind the WebSocket listener on.
    #[arg(long)]
    host: Option<String>,

    /// WebSocket port (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Host of the V8 debugger.
    #[arg(long)]
    debugger_host: Option<String>,

    /// Port of the V8 debugger.
    #[arg(long)]
    debugger_port: Option<u16>,

    /// Spawn and supervise the debuggee runtime.
    #[arg(long)]
    managed: bool,

    /// Script the managed runtime launches.
    #[arg(long)]
    script: Option<PathBuf>,

    /// Runtime executable for managed mode.
    #[arg(long)]
    runtime: Option<String>,

    /// Retry the debugger connection while a front-end is attached.
    #[arg(long)]
    reconnect: bool,

    /// Delay between reconnect attempts in milliseconds.
    #[arg(long)]
    reconnect_interval_ms: Option<u64>,

    /// Session policy: `exclusive` or `per-session`.
    #[arg(long)]
    policy: Option<SessionPolicy>,

    /// Log level (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(self, settings: &mut BridgeSettings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(policy) = self.policy {
            settings.server.policy = policy;
        }
        if let Some(host) = self.debugger_host {
            settings.debuggee.host = host;
        }
        if let Some(port) = self.debugger_port {
            settings.debuggee.port = port;
        }
        if self.reconnect {
            settings.debuggee.reconnect_enabled = true;
        }
        if let Some(ms) = self.reconnect_interval_ms {
            settings.debuggee.reconnect_interval_ms = ms;
        }
        if self.managed {
            settings.process.managed = true;
        }
        if let Some(runtime) = self.runtime {
            settings.process.runtime = runtime;
        }
        if let Some(script) = self.script {
            settings.process.script_path = Some(script);
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

fn load(cli: Cli) -> Result<BridgeSettings> {
    let mut settings = match &cli.config {
        Some(path) => v8bridge_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => v8bridge_settings::load_settings().context("failed to load settings")?,
    };
    cli.apply(&mut settings);
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = load(Cli::parse())?;
    let _ = v8bridge_telemetry::init_telemetry(&settings.logging);

    let shutdown_timeout = settings.server.shutdown_timeout();
    let server = BridgeServer::new(settings);
    let (addr, server_task) = server
        .listen()
        .await
        .context("failed to bind WebSocket listener")?;
    tracing::info!(%addr, "v8bridge ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");

    let clean = server
        .shutdown()
        .graceful_shutdown(vec![server_task], shutdown_timeout)
        .await;
    server.close_debuggees().await;
    if !clean {
        tracing::warn!("listener did not stop cleanly");
    }
    Ok(())
}
