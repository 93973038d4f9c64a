//! `comfyrun-worker` library crate.
//!
//! Runs jobs against a locally launched ComfyUI server. Used by the
//! `comfyrun-worker` one-shot binary and by the HTTP API. The binary
//! entrypoint lives in `main.rs`.

pub mod config;
pub mod dispatcher;
pub mod invocation;
pub mod registry;
pub mod telemetry;
