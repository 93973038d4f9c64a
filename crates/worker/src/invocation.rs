//! One invocation: launch the server, supervise the job, tear down.
//!
//! Under [`ProcessPolicy::TerminateAfterJob`] every job gets a fresh
//! ComfyUI process which is terminated once the job ends, whatever the
//! outcome. Under
//! [`ProcessPolicy::KeepWarm`] a single process is started on first use
//! and reused until it dies or the runner shuts down. A warm server only
//! has to open its port before it takes the slot; HTTP readiness is then
//! checked per job, and a warm server that never answers is discarded.

use std::sync::Arc;

use comfyrun_comfyui::api::ComfyDeployApi;
use comfyrun_comfyui::process::{LaunchSpec, ServerProcess};
use comfyrun_comfyui::startup::{await_startup, wait_until_listening};
use comfyrun_comfyui::supervisor::{run_job, SupervisorError};
use comfyrun_core::job::{JobRequest, JobStatus};
use comfyrun_core::lifecycle::ProcessPolicy;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

/// Runs jobs against a locally launched ComfyUI server.
pub struct JobRunner {
    config: WorkerConfig,
    launch: LaunchSpec,
    api: Arc<ComfyDeployApi>,
    /// Long-lived server under [`ProcessPolicy::KeepWarm`].
    warm: Mutex<Option<ServerProcess>>,
}

impl JobRunner {
    /// Build a runner whose server inherits this process's environment.
    pub fn new(config: WorkerConfig) -> Self {
        let launch = LaunchSpec::from_platform(&config.platform);
        Self::with_launch(config, launch)
    }

    pub fn with_launch(config: WorkerConfig, launch: LaunchSpec) -> Self {
        let api = Arc::new(ComfyDeployApi::new(config.endpoint()));
        Self {
            config,
            launch,
            api,
            warm: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Execute one job to a terminal status or a classified failure.
    ///
    /// Invalid requests are rejected before any process is launched.
    pub async fn run(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, SupervisorError> {
        request.validate()?;

        match self.config.process_policy {
            ProcessPolicy::TerminateAfterJob => self.run_isolated(request, cancel).await,
            ProcessPolicy::KeepWarm => self.run_warm(request, cancel).await,
        }
    }

    /// Terminate the warm server, if any.
    pub async fn shutdown(&self) {
        if let Some(process) = self.warm.lock().await.take() {
            tracing::info!(pid = process.pid(), "Stopping warm subordinate server");
            process.terminate().await;
        }
    }

    async fn run_isolated(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, SupervisorError> {
        let mut process = self.spawn()?;

        let outcome = match await_startup(
            &mut process,
            self.api.as_ref(),
            &self.config.reachability,
            cancel,
        )
        .await
        {
            Ok(()) => self.supervise(request, cancel).await,
            Err(e) => Err(e),
        };

        let exit_code = process.terminate().await;
        tracing::debug!(prompt_id = %request.job_id, ?exit_code, "Invocation torn down");

        outcome
    }

    async fn run_warm(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, SupervisorError> {
        let pid = self.ensure_warm(cancel).await?;

        let outcome = self.supervise(request, cancel).await;

        if let Err(SupervisorError::Unreachable { .. }) = &outcome {
            self.discard_warm(pid).await;
        }
        outcome
    }

    /// Make sure a live warm server holds the slot and return its pid.
    async fn ensure_warm(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<u32>, SupervisorError> {
        let mut slot = self.warm.lock().await;

        if let Some(process) = slot.as_mut() {
            if process.is_running() {
                return Ok(process.pid());
            }
        }

        if let Some(dead) = slot.take() {
            let code = dead.terminate().await;
            tracing::warn!(exit_code = ?code, "Warm subordinate server died, restarting");
        }

        let endpoint = self.config.endpoint();
        let mut process = self.spawn()?;
        if let Err(e) = wait_until_listening(
            &mut process,
            endpoint.connect_host(),
            endpoint.port,
            &self.config.reachability,
            cancel,
        )
        .await
        {
            process.terminate().await;
            return Err(e);
        }

        let pid = process.pid();
        *slot = Some(process);
        Ok(pid)
    }

    /// Terminate the warm server started as `pid`, unless it has already
    /// been replaced.
    async fn discard_warm(&self, pid: Option<u32>) {
        let mut slot = self.warm.lock().await;
        if slot.as_ref().map(ServerProcess::pid) != Some(pid) {
            return;
        }
        if let Some(process) = slot.take() {
            tracing::warn!(pid, "Warm subordinate server never answered, discarding");
            process.terminate().await;
        }
    }

    fn spawn(&self) -> Result<ServerProcess, SupervisorError> {
        Ok(ServerProcess::spawn(&self.launch)?.with_grace(self.config.terminate_grace))
    }

    async fn supervise(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, SupervisorError> {
        run_job(
            self.api.as_ref(),
            request,
            &self.config.reachability,
            &self.config.completion,
            cancel,
        )
        .await
    }
}
