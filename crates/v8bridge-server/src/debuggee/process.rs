//! Spawning and terminating a managed debuggee runtime.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use v8bridge_core::BridgeError;
use v8bridge_settings::ProcessSettings;

/// Launch the runtime with the debugger enabled and break-on-entry.
///
/// Standard I/O is inherited so the operator sees the script's output.
pub fn spawn_runtime(
    process: &ProcessSettings,
    debugger_port: u16,
    script: &Path,
) -> Result<Child, BridgeError> {
    let args = process.command_args(debugger_port, script);

    let mut cmd = Command::new(&process.runtime);
    let _ = cmd
        .args(&args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    debug!(runtime = %process.runtime, ?args, "spawning debuggee");

    let child = cmd.spawn().map_err(|e| {
        BridgeError::Connection(format!("failed to spawn {}: {e}", process.runtime))
    })?;

    info!(
        pid = child.id(),
        runtime = %process.runtime,
        script = %script.display(),
        debugger_port,
        "debuggee process started"
    );
    Ok(child)
}

/// Forcefully kill a child and reap it.
pub async fn terminate(mut child: Child) -> Option<ExitStatus> {
    let pid = child.id();
    if let Err(e) = child.start_kill() {
        // Already exited; `wait` still reaps it.
        debug!(?pid, error = %e, "kill failed");
    }
    match child.wait().await {
        Ok(status) => {
            info!(?pid, %status, "debuggee process terminated");
            Some(status)
        }
        Err(e) => {
            warn!(?pid, error = %e, "failed to reap debuggee process");
            None
        }
    }
}

/// Wait for an optional child. Pending forever when there is none.
pub async fn wait_child(child: &mut Option<Child>) -> std::io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}
