//! Subordinate process lifecycle and admission settings.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const POLICY_TERMINATE: &str = "terminate";
pub const POLICY_KEEP_WARM: &str = "keep-warm";

/// One invocation per worker instance, as the hosted deployments run.
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 1;

/// What happens to the subordinate process once a job finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessPolicy {
    /// Start a fresh server for every job and stop it afterwards,
    /// whatever the outcome. Slow to start, fully isolated.
    #[default]
    TerminateAfterJob,
    /// Keep one server running across jobs; restart it only if it died.
    KeepWarm,
}

impl ProcessPolicy {
    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_ascii_lowercase().as_str() {
            POLICY_TERMINATE => Ok(Self::TerminateAfterJob),
            POLICY_KEEP_WARM => Ok(Self::KeepWarm),
            other => Err(CoreError::Config(format!(
                "Unknown process policy '{other}'. Must be one of: {POLICY_TERMINATE}, {POLICY_KEEP_WARM}"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TerminateAfterJob => POLICY_TERMINATE,
            Self::KeepWarm => POLICY_KEEP_WARM,
        }
    }
}

/// Validate the admission bound against the process policy.
///
/// Every terminate-after-job invocation starts its own server on the
/// profile's fixed port, so only one may run at a time.
pub fn validate_admission(policy: ProcessPolicy, max_concurrent: usize) -> Result<(), CoreError> {
    if max_concurrent == 0 {
        return Err(CoreError::Config(
            "MAX_CONCURRENT_RUNS must be at least 1".to_string(),
        ));
    }
    if policy == ProcessPolicy::TerminateAfterJob && max_concurrent > 1 {
        return Err(CoreError::Config(format!(
            "MAX_CONCURRENT_RUNS={max_concurrent} requires PROCESS_POLICY={POLICY_KEEP_WARM}"
        )));
    }
    Ok(())
}
