//! Fire-and-forget dispatch of runs onto background tasks.
//!
//! [`Dispatcher::dispatch`] returns as soon as the run is recorded; the
//! job itself waits for an admission permit on its own task. Outcomes
//! land in the [`RunRegistry`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use comfyrun_comfyui::supervisor::SupervisorError;
use comfyrun_core::error::CoreError;
use comfyrun_core::job::{JobRequest, RunInput};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::invocation::JobRunner;
use crate::registry::RunRegistry;

pub struct Dispatcher {
    runner: Arc<JobRunner>,
    registry: Arc<RunRegistry>,
    /// Admission bound: one permit per concurrently executing run.
    permits: Arc<Semaphore>,
    /// Master token, cancelled on shutdown. Each run gets a child.
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(runner: JobRunner) -> Self {
        let config = runner.config();
        let registry = Arc::new(RunRegistry::new(config.registry_capacity));
        let permits = Arc::new(Semaphore::new(config.max_concurrent_runs));

        Self {
            runner: Arc::new(runner),
            registry,
            permits,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Validate `input`, record it as queued and start it in the
    /// background. Returns the run's `prompt_id`.
    ///
    /// A `prompt_id` that is still queued or running is refused with
    /// [`CoreError::Conflict`].
    pub async fn dispatch(&self, input: RunInput) -> Result<String, CoreError> {
        input.validate()?;

        if self.cancel.is_cancelled() {
            return Err(CoreError::Internal("Worker is shutting down".to_string()));
        }

        let request = input.into_request();
        let prompt_id = request.job_id.clone();

        self.registry.insert_queued(&prompt_id).await?;
        tracing::info!(prompt_id = %prompt_id, "Run queued");

        self.tracker.spawn(execute(
            Arc::clone(&self.runner),
            Arc::clone(&self.registry),
            Arc::clone(&self.permits),
            self.cancel.child_token(),
            request,
        ));

        Ok(prompt_id)
    }

    /// Cancel in-flight runs, wait up to `timeout` for them to wind down,
    /// then stop the warm server.
    pub async fn shutdown(&self, timeout: Duration) {
        self.tracker.close();
        self.cancel.cancel();

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                remaining = self.tracker.len(),
                "Runs still active after shutdown timeout",
            );
        }

        self.runner.shutdown().await;
        tracing::info!("Dispatcher stopped");
    }
}

async fn execute(
    runner: Arc<JobRunner>,
    registry: Arc<RunRegistry>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    request: JobRequest,
) {
    let prompt_id = request.job_id.as_str();

    let _permit = tokio::select! {
        _ = cancel.cancelled() => {
            registry.finish(prompt_id, &Err(SupervisorError::Cancelled)).await;
            return;
        }
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                registry.finish(prompt_id, &Err(SupervisorError::Cancelled)).await;
                return;
            }
        },
    };

    registry.mark_running(prompt_id).await;
    let started = Instant::now();

    let outcome = runner.run(&request, &cancel).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match &outcome {
        Ok(status) => tracing::info!(prompt_id, %status, elapsed_ms, "Run finished"),
        Err(e) => tracing::error!(
            prompt_id,
            kind = e.kind(),
            error = %e,
            elapsed_ms,
            "Run failed",
        ),
    }

    registry.finish(prompt_id, &outcome).await;
}
