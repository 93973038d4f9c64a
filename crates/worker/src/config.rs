use std::path::PathBuf;
use std::time::Duration;

use comfyrun_core::endpoint::ServiceEndpoint;
use comfyrun_core::error::CoreError;
use comfyrun_core::lifecycle::{validate_admission, ProcessPolicy, DEFAULT_MAX_CONCURRENT_RUNS};
use comfyrun_core::profile::{DeploymentProfile, PlatformConfig};
use comfyrun_core::retry::{
    RetryPolicy, DEFAULT_COMPLETION_INTERVAL, DEFAULT_COMPLETION_MAX_ATTEMPTS,
    DEFAULT_REACHABILITY_INTERVAL, DEFAULT_REACHABILITY_MAX_ATTEMPTS,
};
use comfyrun_comfyui::process::DEFAULT_TERMINATE_GRACE;

use crate::registry::DEFAULT_REGISTRY_CAPACITY;

/// Worker configuration loaded from environment variables.
///
/// Defaults reproduce the hosted deployment: one job per worker, a fresh
/// ComfyUI process per job, modal profile.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub profile: DeploymentProfile,
    /// GPU type requested from the provider. Informational only.
    pub gpu: String,
    /// Launch settings, with any `COMFYUI_*` overrides applied.
    pub platform: PlatformConfig,
    pub reachability: RetryPolicy,
    pub completion: RetryPolicy,
    pub process_policy: ProcessPolicy,
    pub max_concurrent_runs: usize,
    pub terminate_grace: Duration,
    pub registry_capacity: usize,
}

impl WorkerConfig {
    /// Defaults for a profile, without consulting the environment.
    pub fn for_profile(profile: DeploymentProfile) -> Self {
        Self {
            profile,
            gpu: "A10G".to_string(),
            platform: profile.platform_config(),
            reachability: RetryPolicy::reachability(),
            completion: RetryPolicy::completion(),
            process_policy: ProcessPolicy::default(),
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default      |
    /// |-----------------------------------|--------------|
    /// | `PLATFORM`                        | `modal`      |
    /// | `GPU`                             | `A10G`       |
    /// | `COMFYUI_HOST`                    | profile      |
    /// | `COMFYUI_PORT`                    | `8188`       |
    /// | `COMFYUI_DIR`                     | profile      |
    /// | `COMFYUI_COMMAND`                 | profile      |
    /// | `COMFY_API_AVAILABLE_INTERVAL_MS` | `50`         |
    /// | `COMFY_API_AVAILABLE_MAX_RETRIES` | `500`        |
    /// | `COMFY_POLLING_INTERVAL_MS`       | `250`        |
    /// | `COMFY_POLLING_MAX_RETRIES`       | `1000`       |
    /// | `PROCESS_POLICY`                  | `terminate`  |
    /// | `MAX_CONCURRENT_RUNS`             | `1`          |
    /// | `TERMINATE_GRACE_SECS`            | `10`         |
    /// | `RUN_REGISTRY_CAPACITY`           | `1024`       |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let profile = lookup("PLATFORM")
            .map(|p| DeploymentProfile::from_str_or_default(&p))
            .unwrap_or(DeploymentProfile::Modal);

        let mut config = Self::for_profile(profile);

        if let Some(gpu) = lookup("GPU") {
            config.gpu = gpu;
        }
        if let Some(host) = lookup("COMFYUI_HOST") {
            config.platform.host = host;
        }
        if let Some(port) = parse_var::<u16, _>(&lookup, "COMFYUI_PORT")? {
            config.platform.port = port;
        }
        if let Some(dir) = lookup("COMFYUI_DIR") {
            config.platform.working_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        if let Some(command) = lookup("COMFYUI_COMMAND") {
            config.platform.command = command.split_whitespace().map(str::to_string).collect();
        }

        config.reachability = policy_from(
            &lookup,
            "COMFY_API_AVAILABLE_MAX_RETRIES",
            "COMFY_API_AVAILABLE_INTERVAL_MS",
            DEFAULT_REACHABILITY_MAX_ATTEMPTS,
            DEFAULT_REACHABILITY_INTERVAL,
        )?;
        config.completion = policy_from(
            &lookup,
            "COMFY_POLLING_MAX_RETRIES",
            "COMFY_POLLING_INTERVAL_MS",
            DEFAULT_COMPLETION_MAX_ATTEMPTS,
            DEFAULT_COMPLETION_INTERVAL,
        )?;

        if let Some(policy) = lookup("PROCESS_POLICY") {
            config.process_policy = ProcessPolicy::from_str_value(&policy)?;
        }
        if let Some(n) = parse_var(&lookup, "MAX_CONCURRENT_RUNS")? {
            config.max_concurrent_runs = n;
        }
        if let Some(secs) = parse_var(&lookup, "TERMINATE_GRACE_SECS")? {
            config.terminate_grace = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var(&lookup, "RUN_REGISTRY_CAPACITY")? {
            config.registry_capacity = n;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.platform.validate()?;
        validate_admission(self.process_policy, self.max_concurrent_runs)?;
        if self.registry_capacity == 0 {
            return Err(CoreError::Config(
                "RUN_REGISTRY_CAPACITY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Where the launched server will be reachable.
    pub fn endpoint(&self) -> ServiceEndpoint {
        self.platform.endpoint()
    }
}

/// Parse an optional variable; present-but-invalid is a config error.
fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, CoreError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| CoreError::Config(format!("{key} has an invalid value '{raw}'")))
        })
        .transpose()
}

fn policy_from<F>(
    lookup: &F,
    attempts_key: &str,
    interval_key: &str,
    default_attempts: u32,
    default_interval: Duration,
) -> Result<RetryPolicy, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    let attempts = parse_var(lookup, attempts_key)?.unwrap_or(default_attempts);
    let interval = parse_var(lookup, interval_key)?
        .map(Duration::from_millis)
        .unwrap_or(default_interval);

    RetryPolicy::new(attempts, interval)
        .map_err(|e| CoreError::Config(format!("{attempts_key}: {e}")))
}
