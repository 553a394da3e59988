//! Settings types and their compiled defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Placeholder in [`ProcessSettings::runtime_args`] replaced by the debugger port.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Front-end listener.
    pub server: ServerSettings,
    /// Debuggee endpoint and reconnect policy.
    pub debuggee: DebuggeeSettings,
    /// Managed debuggee process.
    pub process: ProcessSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl BridgeSettings {
    /// Reject combinations that cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.debuggee.reconnect_enabled && self.debuggee.reconnect_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "debuggee.reconnectIntervalMs must be positive when reconnect is enabled".into(),
            ));
        }
        if self.process.managed && self.process.runtime.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "process.runtime must be set when the debuggee is managed".into(),
            ));
        }
        if self.server.send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueue must be positive".into(),
            ));
        }
        if self.debuggee.max_frame_bytes == 0 {
            return Err(SettingsError::InvalidValue(
                "debuggee.maxFrameBytes must be positive".into(),
            ));
        }
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// How front-end sessions share debuggee connections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPolicy {
    /// One shared debuggee connection; a new front-end displaces the previous one.
    #[default]
    Exclusive,
    /// Each front-end gets its own debuggee connection, closed on disconnect.
    PerSession,
}

impl std::str::FromStr for SessionPolicy {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(&['-', '_'][..], "").as_str() {
            "exclusive" => Ok(Self::Exclusive),
            "persession" => Ok(Self::PerSession),
            _ => Err(SettingsError::InvalidValue(format!(
                "unknown session policy {s:?} (expected exclusive or per-session)"
            ))),
        }
    }
}

/// Front-end listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket port.
    pub port: u16,
    /// Session sharing policy.
    pub policy: SessionPolicy,
    /// Outbound message queue per front-end.
    pub send_queue: usize,
    /// WebSocket ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close front-ends silent for longer than this, in milliseconds.
    pub client_timeout_ms: u64,
    /// Grace period for shutdown in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3858,
            policy: SessionPolicy::Exclusive,
            send_queue: 256,
            heartbeat_interval_ms: 30_000,
            client_timeout_ms: 90_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ServerSettings {
    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Ping interval as a duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Front-end silence limit as a duration.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    /// Shutdown grace period as a duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Debuggee endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebuggeeSettings {
    /// Debugger host.
    pub host: String,
    /// Debugger port.
    pub port: u16,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Retry failed or dropped connections while a front-end is attached.
    pub reconnect_enabled: bool,
    /// Fixed delay between retries in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Largest message body accepted from the debugger, in bytes.
    pub max_frame_bytes: usize,
}

impl Default for DebuggeeSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5858,
            connect_timeout_ms: 5_000,
            reconnect_enabled: false,
            reconnect_interval_ms: 1_000,
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}

impl DebuggeeSettings {
    /// `host:port` to connect to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Retry interval as a duration.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Managed debuggee process settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessSettings {
    /// Spawn and supervise the debuggee instead of connecting to an existing one.
    pub managed: bool,
    /// Runtime executable.
    pub runtime: String,
    /// Arguments placed before the script path; `{port}` is substituted.
    pub runtime_args: Vec<String>,
    /// Script launched by the runtime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,
    /// Wait between spawn and the first connect attempt, in milliseconds.
    pub settle_delay_ms: u64,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            managed: false,
            runtime: "node".to_string(),
            runtime_args: vec![format!("--debug-brk={PORT_PLACEHOLDER}")],
            script_path: None,
            settle_delay_ms: 500,
        }
    }
}

impl ProcessSettings {
    /// Full argument list for a spawn: runtime args with the port substituted,
    /// then the script path.
    pub fn command_args(&self, port: u16, script: &Path) -> Vec<String> {
        let port = port.to_string();
        self.runtime_args
            .iter()
            .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
            .chain(std::iter::once(script.display().to_string()))
            .collect()
    }

    /// Settle delay as a duration.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
    /// Per-module level overrides, e.g. `v8bridge_core = "debug"`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}
