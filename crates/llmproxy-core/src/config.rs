//! Centralized configuration for the proxy supervisor.
//!
//! `SupervisorConfig` holds compile-time defaults. `SupervisorOptions` is the
//! runtime view of the same knobs, loadable from JSON so a front end can
//! override them without recompiling.

use crate::error::{Result, SupervisorError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Supervisor defaults.
pub struct SupervisorConfig;

impl SupervisorConfig {
    /// Name of the proxy executable.
    pub const EXECUTABLE_NAME: &'static str = "litellm";
    /// Shell used for the shell strategy.
    pub const DEFAULT_SHELL: &'static str = "/bin/zsh";
    /// System-wide directories probed for the executable and appended to PATH.
    pub const SYSTEM_BIN_DIRS: [&'static str; 2] = ["/usr/local/bin", "/opt/homebrew/bin"];
    /// Per-user bin directory, relative to the home directory.
    pub const USER_BIN_DIR: [&'static str; 2] = [".local", "bin"];

    /// Buffered log messages per subscriber before it starts lagging.
    pub const LOG_BROADCAST_CAPACITY: usize = 1024;
    /// Size of a single read from a child's output pipe.
    pub const READ_CHUNK_SIZE: usize = 8192;
    /// How long the lifecycle task waits for readers to hit EOF after exit.
    pub const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
}

/// Runtime options for a supervisor instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorOptions {
    /// Executable name used for the default search locations and the shell command.
    pub executable_name: String,
    /// Candidate executable paths, probed in order. `None` uses the conventional locations.
    pub search_locations: Option<Vec<PathBuf>>,
    /// Directories appended to PATH for direct launches. `None` uses the conventional bin dirs.
    pub extra_path_dirs: Option<Vec<PathBuf>>,
    /// Shell used by the shell strategy.
    pub shell: PathBuf,
    /// Pass `-i` to the shell in addition to `-l`.
    pub shell_interactive: bool,
    /// Escalate to a forced kill when the child outlives a stop request by this long.
    pub stop_grace_ms: Option<u64>,
    /// Upper bound on waiting for trailing output once the child has exited.
    pub reader_drain_timeout_ms: u64,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            executable_name: SupervisorConfig::EXECUTABLE_NAME.to_string(),
            search_locations: None,
            extra_path_dirs: None,
            shell: PathBuf::from(SupervisorConfig::DEFAULT_SHELL),
            shell_interactive: true,
            stop_grace_ms: None,
            reader_drain_timeout_ms: SupervisorConfig::READER_DRAIN_TIMEOUT.as_millis() as u64,
        }
    }
}

impl SupervisorOptions {
    /// Load options from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| SupervisorError::io_with_path(e, path))?;
        let options: Self = serde_json::from_str(&content)?;
        if options.executable_name.trim().is_empty() {
            return Err(SupervisorError::Config {
                message: format!("{}: executable_name must not be empty", path.display()),
            });
        }
        Ok(options)
    }

    /// Set the executable name.
    pub fn with_executable_name(mut self, name: impl Into<String>) -> Self {
        self.executable_name = name.into();
        self
    }

    /// Replace the candidate executable paths.
    pub fn with_search_locations(mut self, locations: Vec<PathBuf>) -> Self {
        self.search_locations = Some(locations);
        self
    }

    /// Replace the directories appended to PATH.
    pub fn with_extra_path_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.extra_path_dirs = Some(dirs);
        self
    }

    /// Set the shell program and whether it runs interactively.
    pub fn with_shell(mut self, shell: impl AsRef<Path>, interactive: bool) -> Self {
        self.shell = shell.as_ref().to_path_buf();
        self.shell_interactive = interactive;
        self
    }

    /// Enable forced-kill escalation after a stop request.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_ms = Some(grace.as_millis() as u64);
        self
    }

    /// Set the trailing-output wait after exit.
    pub fn with_reader_drain_timeout(mut self, timeout: Duration) -> Self {
        self.reader_drain_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn stop_grace(&self) -> Option<Duration> {
        self.stop_grace_ms.map(Duration::from_millis)
    }

    pub fn reader_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.reader_drain_timeout_ms)
    }

    /// Candidate executable paths in probe order.
    pub fn resolved_search_locations(&self) -> Vec<PathBuf> {
        match &self.search_locations {
            Some(locations) => locations.clone(),
            None => conventional_bin_dirs()
                .into_iter()
                .map(|dir| dir.join(&self.executable_name))
                .collect(),
        }
    }

    /// Directories appended to PATH for direct launches.
    pub fn resolved_extra_path_dirs(&self) -> Vec<PathBuf> {
        self.extra_path_dirs
            .clone()
            .unwrap_or_else(conventional_bin_dirs)
    }
}

/// System bin directories followed by the per-user local bin directory.
fn conventional_bin_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = SupervisorConfig::SYSTEM_BIN_DIRS
        .iter()
        .map(PathBuf::from)
        .collect();
    if let Some(home) = dirs::home_dir() {
        let [first, second] = SupervisorConfig::USER_BIN_DIR;
        dirs.push(home.join(first).join(second));
    }
    dirs
}
