//! Waiting for a freshly spawned server to accept work.
//!
//! Both waits check the child before every probe: a server that exits
//! while booting is a fatal startup error and ends the wait at once,
//! rather than burning the rest of the readiness budget.

use std::time::Duration;

use comfyrun_core::retry::{retry_bounded, Attempt, RetryError, RetryPolicy};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::process::ServerProcess;
use crate::service::SubordinateService;
use crate::supervisor::SupervisorError;

/// Connect timeout for a single TCP readiness probe.
const TCP_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// HTTP readiness wait bound to a child process.
///
/// Like [`crate::supervisor::await_reachable`], but fails with
/// [`SupervisorError::ProcessExit`] as soon as the child is seen to have
/// exited, and with [`SupervisorError::Unreachable`] when the budget runs
/// out.
pub async fn await_startup<S>(
    process: &mut ServerProcess,
    service: &S,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<(), SupervisorError>
where
    S: SubordinateService + ?Sized,
{
    let pid = process.pid();

    let result = retry_bounded(policy, cancel, |attempt| {
        let exited = process.try_exit();
        async move {
            if let Some(status) = exited {
                return Attempt::Abort(SupervisorError::ProcessExit {
                    code: status.code(),
                });
            }
            match service.probe().await {
                Ok(()) => Attempt::Done(attempt),
                Err(e) => {
                    tracing::debug!(pid, attempt, error = %e, "Server not ready yet");
                    Attempt::Retry
                }
            }
        }
    })
    .await;

    finish(pid, result)
}

/// Raw TCP readiness wait bound to a child process.
///
/// Used when only the listening socket matters, e.g. before handing the
/// server to a long-lived warm slot.
pub async fn wait_until_listening(
    process: &mut ServerProcess,
    host: &str,
    port: u16,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<(), SupervisorError> {
    let pid = process.pid();

    let result = retry_bounded(policy, cancel, |attempt| {
        let exited = process.try_exit();
        async move {
            if let Some(status) = exited {
                return Attempt::Abort(SupervisorError::ProcessExit {
                    code: status.code(),
                });
            }
            if tcp_probe(host, port).await {
                Attempt::Done(attempt)
            } else {
                Attempt::Retry
            }
        }
    })
    .await;

    finish(pid, result)
}

/// Whether something accepts TCP connections on `host:port`.
pub async fn tcp_probe(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(TCP_PROBE_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

fn finish(
    pid: Option<u32>,
    result: Result<u32, RetryError<SupervisorError>>,
) -> Result<(), SupervisorError> {
    match result {
        Ok(attempts) => {
            tracing::info!(pid, attempts, "Subordinate server is ready");
            Ok(())
        }
        Err(RetryError::Aborted(err)) => {
            tracing::error!(pid, error = %err, "Subordinate server died during startup");
            Err(err)
        }
        Err(RetryError::Exhausted { attempts }) => {
            tracing::warn!(pid, attempts, "Subordinate server did not become ready");
            Err(SupervisorError::Unreachable { attempts })
        }
        Err(RetryError::Cancelled) => Err(SupervisorError::Cancelled),
    }
}
