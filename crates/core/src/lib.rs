//! Domain types and pure logic shared by the comfyrun crates.
//!
//! Nothing in this crate performs network or process I/O; the only
//! runtime dependency is the Tokio timer used by [`retry::retry_bounded`].

pub mod endpoint;
pub mod env;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod profile;
pub mod retry;
