//! Deployment profiles for the supported GPU hosting providers.
//!
//! Each provider launches ComfyUI differently (command, working
//! directory, bind address, extra environment). The set is closed, so
//! it is an enum rather than a string-keyed table.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::endpoint::ServiceEndpoint;
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const PROFILE_MODAL: &str = "modal";
pub const PROFILE_RUNPOD: &str = "runpod";

/// All accepted profile names.
pub const VALID_PROFILES: &[&str] = &[PROFILE_MODAL, PROFILE_RUNPOD];

/// Port ComfyUI listens on in both profiles.
pub const COMFYUI_PORT: u16 = 8188;

/// Install location of ComfyUI inside the worker image.
pub const COMFYUI_DIR: &str = "/comfyui";

/// Environment shared by every profile.
const BASE_ENV: &[(&str, &str)] = &[
    ("DEBIAN_FRONTEND", "noninteractive"),
    ("PIP_PREFER_BINARY", "1"),
    ("PYTHONUNBUFFERED", "1"),
];

// ---------------------------------------------------------------------------
// DeploymentProfile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentProfile {
    Modal,
    RunPod,
}

impl DeploymentProfile {
    /// Parse a profile name (case-insensitive).
    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_ascii_lowercase().as_str() {
            PROFILE_MODAL => Ok(Self::Modal),
            PROFILE_RUNPOD => Ok(Self::RunPod),
            other => Err(CoreError::Config(format!(
                "Unknown platform '{other}'. Must be one of: {}",
                VALID_PROFILES.join(", ")
            ))),
        }
    }

    /// Parse a profile name, falling back to [`DeploymentProfile::Modal`]
    /// for anything unrecognised.
    pub fn from_str_or_default(s: &str) -> Self {
        Self::from_str_value(s).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to the modal profile");
            Self::Modal
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Modal => PROFILE_MODAL,
            Self::RunPod => PROFILE_RUNPOD,
        }
    }

    /// Launch settings for this provider.
    pub fn platform_config(&self) -> PlatformConfig {
        let mut env_vars: Vec<(String, String)> = BASE_ENV
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        match self {
            Self::Modal => PlatformConfig {
                env_vars,
                command: vec![
                    "python".to_string(),
                    "main.py".to_string(),
                    "--disable-auto-launch".to_string(),
                    "--disable-metadata".to_string(),
                ],
                working_dir: Some(PathBuf::from(COMFYUI_DIR)),
                host: "127.0.0.1".to_string(),
                port: COMFYUI_PORT,
            },
            Self::RunPod => {
                env_vars.push(("CUDA_VISIBLE_DEVICES".to_string(), "0".to_string()));
                env_vars.push(("PYTHONPATH".to_string(), COMFYUI_DIR.to_string()));
                // The RunPod image's start script cds into ComfyUI itself.
                PlatformConfig {
                    env_vars,
                    command: vec!["/start.sh".to_string()],
                    working_dir: None,
                    host: "0.0.0.0".to_string(),
                    port: COMFYUI_PORT,
                }
            }
        }
    }
}

impl std::fmt::Display for DeploymentProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// PlatformConfig
// ---------------------------------------------------------------------------

/// How to start the subordinate server and where it will listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Overlaid on the parent environment when spawning.
    pub env_vars: Vec<(String, String)>,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub host: String,
    pub port: u16,
}

impl PlatformConfig {
    /// Endpoint for the server this config launches.
    pub fn endpoint(&self) -> ServiceEndpoint {
        ServiceEndpoint::new(self.host.clone(), self.port)
    }

    /// Check the command is launchable.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self.command.first() {
            Some(program) if !program.trim().is_empty() => Ok(()),
            _ => Err(CoreError::Config(
                "server command must name a program".to_string(),
            )),
        }
    }
}
