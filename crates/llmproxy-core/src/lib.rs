//! LLM Proxy Core - headless supervisor for a local language-model proxy.
//!
//! The crate starts, watches and stops a single `litellm` server process on
//! behalf of a front end. The front end hands over a [`LaunchConfig`] and
//! observes two things: whether the proxy is running and the text it has
//! written so far.
//!
//! See [`process`] for the moving parts and an example.

pub mod config;
pub mod error;
pub mod platform;
pub mod process;

// Re-export commonly used types
pub use config::{SupervisorConfig, SupervisorOptions};
pub use error::{Result, SupervisorError};
pub use process::{
    ExecutableResolver, ExecutionStrategy, LaunchConfig, LaunchPlan, ProcessSupervisor,
    StartOutcome, SupervisorStatus,
};
