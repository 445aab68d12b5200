//! Process launching.
//!
//! A launch is split in two: `LaunchPlan::build` computes the program,
//! argument vector and environment overrides without touching the OS, and
//! `LaunchPlan::spawn` turns the plan into a running child with piped output.

use super::resolver::ExecutionStrategy;
use crate::config::SupervisorOptions;
use crate::error::{Result, SupervisorError};
use crate::platform;
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{error, info};

/// Form fields for one `start` call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Model passed to `--model`.
    pub model_identifier: String,
    /// Port passed to `--port`. Kept as text and not validated.
    pub port: String,
    /// Credential injected into the child environment.
    pub secret_value: String,
    /// Name of the variable that receives `secret_value`.
    pub secret_env_var_name: String,
    /// Explicit executable path; empty means "search the usual places".
    pub custom_executable_path: String,
    /// Start through a login shell instead of a resolved path.
    pub use_shell_mode: bool,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            model_identifier: "gemini/gemini-1.5-pro".to_string(),
            port: "4000".to_string(),
            secret_value: String::new(),
            secret_env_var_name: "GEMINI_API_KEY".to_string(),
            custom_executable_path: String::new(),
            use_shell_mode: false,
        }
    }
}

impl fmt::Debug for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = if self.secret_value.is_empty() {
            ""
        } else {
            "<redacted>"
        };
        f.debug_struct("LaunchConfig")
            .field("model_identifier", &self.model_identifier)
            .field("port", &self.port)
            .field("secret_value", &secret)
            .field("secret_env_var_name", &self.secret_env_var_name)
            .field("custom_executable_path", &self.custom_executable_path)
            .field("use_shell_mode", &self.use_shell_mode)
            .finish()
    }
}

impl LaunchConfig {
    /// Create a config for `model` on `port` with the remaining fields at their defaults.
    pub fn new(model_identifier: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            model_identifier: model_identifier.into(),
            port: port.into(),
            ..Self::default()
        }
    }

    /// Set the credential and the variable it is injected as.
    pub fn with_secret(
        mut self,
        env_var_name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.secret_env_var_name = env_var_name.into();
        self.secret_value = value.into();
        self
    }

    /// Set the custom executable path.
    pub fn with_custom_path(mut self, path: impl Into<String>) -> Self {
        self.custom_executable_path = path.into();
        self
    }

    /// Toggle shell mode.
    pub fn with_shell_mode(mut self, use_shell_mode: bool) -> Self {
        self.use_shell_mode = use_shell_mode;
        self
    }

    /// The credential variable to inject, if both halves are present.
    pub fn injected_secret(&self) -> Option<(&str, &str)> {
        if self.secret_env_var_name.is_empty() || self.secret_value.is_empty() {
            None
        } else {
            Some((&self.secret_env_var_name, &self.secret_value))
        }
    }
}

/// Fully computed launch: what to run and what to change in the environment.
#[derive(Clone)]
pub struct LaunchPlan {
    program: PathBuf,
    args: Vec<String>,
    /// Overrides applied on top of the inherited environment.
    env: Vec<(String, OsString)>,
    secret_key: Option<String>,
}

impl fmt::Debug for LaunchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(key, _)| key.as_str()).collect();
        f.debug_struct("LaunchPlan")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env_keys", &env_keys)
            .finish()
    }
}

impl LaunchPlan {
    /// Build a plan against the current process's search path.
    pub fn build(
        strategy: &ExecutionStrategy,
        config: &LaunchConfig,
        options: &SupervisorOptions,
    ) -> Result<Self> {
        let inherited = std::env::var_os(platform::SEARCH_PATH_VAR);
        Self::build_with_search_path(strategy, config, options, inherited.as_deref())
    }

    /// Build a plan against an explicit inherited search path.
    pub fn build_with_search_path(
        strategy: &ExecutionStrategy,
        config: &LaunchConfig,
        options: &SupervisorOptions,
        inherited_path: Option<&OsStr>,
    ) -> Result<Self> {
        let mut env = Vec::new();

        let (program, args) = match strategy {
            ExecutionStrategy::Direct(executable) => {
                // No login shell here, so its PATH additions have to be recreated.
                let search_path = platform::extend_search_path(
                    inherited_path,
                    &options.resolved_extra_path_dirs(),
                )?;
                env.push((platform::SEARCH_PATH_VAR.to_string(), search_path));

                let args = vec![
                    "--model".to_string(),
                    config.model_identifier.clone(),
                    "--port".to_string(),
                    config.port.clone(),
                ];
                (executable.clone(), args)
            }
            ExecutionStrategy::Shell => {
                let mut args = vec!["-l".to_string()];
                if options.shell_interactive {
                    args.push("-i".to_string());
                }
                args.push("-c".to_string());
                args.push(shell_command(
                    &options.executable_name,
                    &config.model_identifier,
                    &config.port,
                ));
                (options.shell.clone(), args)
            }
        };

        let secret_key = config.injected_secret().map(|(key, value)| {
            env.push((key.to_string(), OsString::from(value)));
            key.to_string()
        });

        Ok(Self {
            program,
            args,
            env,
            secret_key,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Value this plan sets for `key`, if it overrides it.
    pub fn env_override(&self, key: &str) -> Option<&OsStr> {
        self.env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_os_str())
    }

    /// Name of the injected credential variable, if any.
    pub fn secret_key(&self) -> Option<&str> {
        self.secret_key.as_deref()
    }

    /// Build the command with both output streams piped.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // New session without a terminal; its group is what stop signals.
        platform::detach_session(&mut cmd);

        cmd
    }

    /// Spawn the planned process.
    ///
    /// # Errors
    /// `SpawnFailed` with the OS error when the process cannot be started.
    pub fn spawn(&self) -> Result<Child> {
        info!("Launching {} {:?}", self.program.display(), self.args);
        self.command().spawn().map_err(|source| {
            error!("Failed to spawn {}: {}", self.program.display(), source);
            SupervisorError::SpawnFailed {
                program: self.program.clone(),
                source,
            }
        })
    }
}

/// Command line handed to the shell in shell mode.
pub fn shell_command(executable_name: &str, model_identifier: &str, port: &str) -> String {
    format!(
        "{} --model {} --port {}",
        executable_name,
        shell_quote(model_identifier),
        shell_quote(port)
    )
}

/// Quote a value as a single POSIX shell word.
///
/// Everything goes inside single quotes; an embedded `'` closes the quote,
/// emits an escaped quote and reopens it.
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}
