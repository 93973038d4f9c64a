//! Integration with a ComfyUI server running the `comfyui-deploy` node.
//!
//! Provides the HTTP client for the deploy endpoints, the
//! [`service::SubordinateService`] seam the supervisor is written
//! against, the readiness/completion [`supervisor`], and management of
//! the server as a child process.

pub mod api;
pub mod process;
pub mod service;
pub mod startup;
pub mod supervisor;
