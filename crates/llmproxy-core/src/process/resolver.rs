//! Executable resolution.
//!
//! Decides how the proxy gets started: a concrete path invoked directly, or a
//! login shell that resolves the program through the user's own startup files.

use super::launcher::LaunchConfig;
use crate::config::SupervisorOptions;
use crate::error::{Result, SupervisorError};
use crate::platform;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How the child process will be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Invoke this executable directly.
    Direct(PathBuf),
    /// Hand a composed command line to a login shell.
    Shell,
}

/// Locates the proxy executable.
#[derive(Debug, Clone)]
pub struct ExecutableResolver {
    executable_name: String,
    search_locations: Vec<PathBuf>,
}

impl ExecutableResolver {
    /// Create a resolver probing `search_locations` in order.
    pub fn new(executable_name: impl Into<String>, search_locations: Vec<PathBuf>) -> Self {
        Self {
            executable_name: executable_name.into(),
            search_locations,
        }
    }

    /// Create a resolver from supervisor options.
    pub fn from_options(options: &SupervisorOptions) -> Self {
        Self::new(
            options.executable_name.clone(),
            options.resolved_search_locations(),
        )
    }

    pub fn executable_name(&self) -> &str {
        &self.executable_name
    }

    pub fn search_locations(&self) -> &[PathBuf] {
        &self.search_locations
    }

    /// Pick an execution strategy for `config`.
    ///
    /// Non-fatal findings (a custom path that does not exist) are pushed onto
    /// `warnings` as user-facing log lines.
    ///
    /// # Errors
    /// `ResolutionFailed` when direct mode finds nothing to run.
    pub fn resolve(
        &self,
        config: &LaunchConfig,
        warnings: &mut Vec<String>,
    ) -> Result<ExecutionStrategy> {
        if config.use_shell_mode {
            debug!("Shell mode: leaving executable lookup to the shell");
            return Ok(ExecutionStrategy::Shell);
        }

        if !config.custom_executable_path.is_empty() {
            let custom = Path::new(&config.custom_executable_path);
            if custom.exists() {
                return Ok(ExecutionStrategy::Direct(self.checked(custom)));
            }
            warn!("Custom executable path {} does not exist", custom.display());
            warnings.push(format!(
                "Warning: Custom path '{}' does not exist.",
                config.custom_executable_path
            ));
        }

        for candidate in &self.search_locations {
            debug!("Probing {}", candidate.display());
            if candidate.exists() {
                return Ok(ExecutionStrategy::Direct(self.checked(candidate)));
            }
        }

        Err(SupervisorError::ResolutionFailed {
            executable: self.executable_name.clone(),
        })
    }

    fn checked(&self, path: &Path) -> PathBuf {
        if !platform::is_executable(path) {
            warn!(
                "{} exists but does not look executable; spawning may fail",
                path.display()
            );
        }
        path.to_path_buf()
    }
}
