//! Address of the subordinate service.

use serde::Serialize;

/// Path answering the readiness probe (the ComfyUI index page).
pub const DEFAULT_HEALTH_PATH: &str = "/";

/// `comfyui-deploy` workflow submission route.
pub const DEFAULT_RUN_PATH: &str = "/comfyui-deploy/run";

/// `comfyui-deploy` status route, queried with `?prompt_id=<id>`.
pub const DEFAULT_STATUS_PATH: &str = "/comfyui-deploy/check-status";

/// Host/port of the subordinate service plus the routes the supervisor
/// talks to. Fixed for the lifetime of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
    pub host: String,
    pub port: u16,
    pub health_path: String,
    pub run_path: String,
    pub status_path: String,
}

impl ServiceEndpoint {
    /// Endpoint with the default `comfyui-deploy` routes.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            run_path: DEFAULT_RUN_PATH.to_string(),
            status_path: DEFAULT_STATUS_PATH.to_string(),
        }
    }

    /// Host to dial. A wildcard bind address is reached via loopback.
    pub fn connect_host(&self) -> &str {
        match self.host.as_str() {
            "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
            other => other,
        }
    }

    /// Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.connect_host(), self.port)
    }

    pub fn health_url(&self) -> String {
        self.url_for(&self.health_path)
    }

    pub fn run_url(&self) -> String {
        self.url_for(&self.run_path)
    }

    /// Status URL without the `prompt_id` query parameter.
    pub fn status_url(&self) -> String {
        self.url_for(&self.status_path)
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url())
        } else {
            format!("{}/{path}", self.base_url())
        }
    }
}
