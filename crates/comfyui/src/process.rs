//! The subordinate ComfyUI server as a child process.
//!
//! [`ServerProcess`] owns the [`tokio::process::Child`]. On unix the child
//! leads its own process group, and every signal goes to the whole group:
//! launcher scripts such as `/start.sh` start ComfyUI as a grandchild,
//! which must not survive the launcher.
//!
//! [`ServerProcess::terminate`] is the orderly path (SIGTERM, grace
//! period, then SIGKILL). Dropping a `ServerProcess` that was not
//! terminated kills the group outright, so the server cannot outlive its
//! owner even when the owning task panics or is aborted.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use comfyrun_core::env::overlay_env;
use comfyrun_core::profile::PlatformConfig;
use tokio::process::{Child, Command};

use crate::supervisor::SupervisorError;

/// How long a terminated server gets to shut down before it is killed.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// LaunchSpec
// ---------------------------------------------------------------------------

/// Fully resolved command line and environment for the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Complete environment; the child does not inherit anything else.
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Resolve a platform config against the current process environment.
    pub fn from_platform(config: &PlatformConfig) -> Self {
        let parent = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
        Self::with_base_env(config, parent)
    }

    /// Resolve a platform config against an explicit base environment.
    pub fn with_base_env<B>(config: &PlatformConfig, base: B) -> Self
    where
        B: IntoIterator<Item = (String, String)>,
    {
        let mut command = config.command.iter().cloned();
        let program = command.next().unwrap_or_default();

        Self {
            program,
            args: command.collect(),
            env: overlay_env(base, &config.env_vars),
            working_dir: config.working_dir.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerProcess
// ---------------------------------------------------------------------------

/// A running (or recently exited) subordinate server.
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
    pid: Option<u32>,
    grace: Duration,
    /// Set once the process group has been killed.
    swept: bool,
}

impl ServerProcess {
    /// Launch the server described by `spec`.
    ///
    /// Output is inherited so the server's own logs land next to ours.
    pub fn spawn(spec: &LaunchSpec) -> Result<Self, SupervisorError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .env_clear()
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(SupervisorError::Spawn)?;
        let pid = child.id();

        tracing::info!(
            pid,
            program = %spec.program,
            args = ?spec.args,
            "Started subordinate server",
        );

        Ok(Self {
            child,
            pid,
            grace: DEFAULT_TERMINATE_GRACE,
            swept: false,
        })
    }

    /// Override the SIGTERM grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking check for exit. `None` while the child is running.
    ///
    /// An error querying the child is logged and treated as still running;
    /// the readiness budget bounds how long that can go on.
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(pid = self.pid, error = %e, "Failed to query subordinate server");
                None
            }
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.try_exit().is_none()
    }

    /// Stop the server and everything it started, and reap it. Returns
    /// the exit code if there was one.
    ///
    /// Sends SIGTERM to the process group and waits up to the grace
    /// period, then kills. Whatever is left of the group afterwards is
    /// killed too. Safe to call on a child that already exited.
    pub async fn terminate(mut self) -> Option<i32> {
        let code = self.stop_leader().await;
        self.sweep_group();
        code
    }

    async fn stop_leader(&mut self) -> Option<i32> {
        if let Some(status) = self.try_exit() {
            tracing::info!(pid = self.pid, exit_code = ?status.code(), "Subordinate server already exited");
            return status.code();
        }

        tracing::info!(pid = self.pid, "Turning off subordinate server");
        if let Err(e) = self.signal_group(Signal::Terminate) {
            tracing::warn!(pid = self.pid, error = %e, "SIGTERM failed, killing");
            if let Err(e) = self.child.start_kill() {
                tracing::warn!(pid = self.pid, error = %e, "Failed to kill subordinate server");
            }
        }

        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(pid = self.pid, exit_code = ?status.code(), "Subordinate server stopped");
                status.code()
            }
            Ok(Err(e)) => {
                tracing::error!(pid = self.pid, error = %e, "Failed to reap subordinate server");
                None
            }
            Err(_) => {
                tracing::warn!(
                    pid = self.pid,
                    grace_secs = self.grace.as_secs(),
                    "Subordinate server ignored SIGTERM, killing",
                );
                self.sweep_group();
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(pid = self.pid, error = %e, "Failed to kill subordinate server");
                }
                None
            }
        }
    }

    /// SIGKILL whatever remains of the process group.
    fn sweep_group(&mut self) {
        if self.swept {
            return;
        }
        self.swept = true;
        if let Err(e) = self.signal_group(Signal::Kill) {
            tracing::warn!(pid = self.pid, error = %e, "Failed to kill subordinate process group");
        }
    }

    /// Signal every process in the child's group. A group with no
    /// members left is not an error.
    #[cfg(unix)]
    fn signal_group(&self, signal: Signal) -> std::io::Result<()> {
        let pid = self
            .pid
            .ok_or_else(|| std::io::Error::other("child has no pid"))?;
        let signo = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // Safety: kill(2) on the group the child leads (process_group(0)
        // at spawn). A negative pid addresses the whole group.
        let ret = unsafe { libc::kill(-(pid as libc::pid_t), signo) };
        if ret == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self, _signal: Signal) -> std::io::Result<()> {
        self.child.start_kill()
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if !self.swept {
            tracing::debug!(pid = self.pid, "Subordinate server dropped without terminate");
            self.sweep_group();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}
