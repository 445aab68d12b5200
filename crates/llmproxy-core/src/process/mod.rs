//! Process supervision.
//!
//! Three pieces compose the supervisor:
//! 1. **resolver** - finds the executable, or defers to a login shell
//! 2. **launcher** - builds argv and environment, spawns with piped output
//! 3. **reader** - drains stdout/stderr and reports the exit exactly once
//!
//! # Example
//!
//! ```rust,no_run
//! use llmproxy_core::{LaunchConfig, ProcessSupervisor, SupervisorOptions};
//!
//! #[tokio::main]
//! async fn main() -> llmproxy_core::Result<()> {
//!     let supervisor = ProcessSupervisor::new(SupervisorOptions::default());
//!     let mut running = supervisor.subscribe_running();
//!
//!     let config = LaunchConfig::new("gemini/gemini-1.5-pro", "4000")
//!         .with_secret("GEMINI_API_KEY", "sk-...");
//!     supervisor.start(&config)?;
//!
//!     supervisor.stop();
//!     let _ = running.wait_for(|running| !*running).await;
//!     print!("{}", supervisor.logs());
//!     Ok(())
//! }
//! ```

mod launcher;
mod reader;
mod resolver;
mod supervisor;

pub use launcher::{shell_command, shell_quote, LaunchConfig, LaunchPlan};
pub use reader::{describe_exit, StreamKind};
pub use resolver::{ExecutableResolver, ExecutionStrategy};
pub use supervisor::{ProcessSupervisor, StartOutcome, SupervisorStatus};
