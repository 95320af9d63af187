//! Supervision of a locally spawned sidecar process.

use std::{collections::HashMap, path::PathBuf, process::Stdio, time::Duration};

use {
    anyhow::{Context, Result, bail},
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
};

const LOG_TARGET: &str = "whatsapp_sidecar";

/// How to launch the sidecar.
#[derive(Debug, Clone, Default)]
pub struct SidecarCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Grace period between SIGTERM and a hard kill.
    pub stop_timeout: Duration,
}

/// Handle to a running sidecar process. The child is killed if the handle is
/// dropped without calling [`SidecarProcess::stop`].
pub struct SidecarProcess {
    child: Child,
    stop_timeout: Duration,
}

impl SidecarProcess {
    /// Spawn the sidecar and forward its output to tracing.
    pub async fn spawn(command: &SidecarCommand) -> Result<Self> {
        if command.program.is_empty() {
            bail!("sidecar command is empty");
        }

        info!(program = %command.program, args = ?command.args, "starting whatsapp sidecar");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn sidecar `{}`", command.program))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    forward_log_line(&line);
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: LOG_TARGET, "{}", line);
                }
            });
        }

        // Catch processes that die on startup (missing deps, bad port).
        tokio::time::sleep(Duration::from_millis(500)).await;
        if let Some(status) = child
            .try_wait()
            .context("failed to check sidecar process status")?
        {
            bail!("sidecar process exited immediately with status: {status}");
        }

        info!(pid = ?child.id(), "whatsapp sidecar started");
        Ok(Self {
            child,
            stop_timeout: command.stop_timeout,
        })
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the process to exit, then kill it after the stop timeout.
    pub async fn stop(&mut self) -> Result<()> {
        info!("stopping whatsapp sidecar");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id()
                && let Ok(pid) = i32::try_from(pid)
            {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        match tokio::time::timeout(self.stop_timeout, self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "whatsapp sidecar exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar process"),
            Err(_) => {
                warn!("sidecar did not exit in time, killing");
                self.child
                    .kill()
                    .await
                    .context("failed to kill sidecar process")?;
            },
        }
        Ok(())
    }
}

/// Re-emit a sidecar log line, honoring pino's numeric levels when the line
/// is JSON.
fn forward_log_line(line: &str) {
    if line.starts_with('{')
        && let Ok(log) = serde_json::from_str::<serde_json::Value>(line)
    {
        let msg = log.get("msg").and_then(|v| v.as_str()).unwrap_or(line);
        match log.get("level").and_then(|v| v.as_u64()).unwrap_or(30) {
            10 | 20 => debug!(target: LOG_TARGET, "{}", msg),
            30 => info!(target: LOG_TARGET, "{}", msg),
            40 => warn!(target: LOG_TARGET, "{}", msg),
            _ => error!(target: LOG_TARGET, "{}", msg),
        }
        return;
    }
    info!(target: LOG_TARGET, "{}", line);
}
