//! LLM Proxy CLI - terminal front end for the proxy supervisor.
//!
//! Takes the launch fields as flags, streams the supervisor's log buffer to
//! stdout and stops the proxy on Ctrl-C. Diagnostics go to stderr so the
//! proxy's own output stays clean.

use anyhow::Result;
use clap::Parser;
use llmproxy_core::{LaunchConfig, ProcessSupervisor, SupervisorOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How long to wait for the last log lines after the supervisor is dropped.
const LOG_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "llmproxy")]
#[command(about = "Run and supervise a local litellm proxy server")]
struct Args {
    /// Model identifier passed to --model
    #[arg(short, long, default_value = "gemini/gemini-1.5-pro")]
    model: String,

    /// Port passed to --port (not validated)
    #[arg(short, long, default_value = "4000")]
    port: String,

    /// API key injected into the proxy's environment (visible in `ps`; exporting
    /// the variable yourself avoids that)
    #[arg(long, default_value = "")]
    api_key: String,

    /// Environment variable that receives the API key
    #[arg(long, default_value = "GEMINI_API_KEY")]
    env_var_name: String,

    /// Explicit path to the litellm executable
    #[arg(long, default_value = "")]
    executable: String,

    /// Start through a login shell instead of a resolved path
    #[arg(long)]
    shell: bool,

    /// Shell used with --shell
    #[arg(long)]
    shell_path: Option<PathBuf>,

    /// Kill the proxy if it is still running this many seconds after a stop request
    #[arg(long)]
    stop_grace_secs: Option<u64>,

    /// JSON file with supervisor options
    #[arg(long)]
    options: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn launch_config(&self) -> LaunchConfig {
        LaunchConfig::new(&self.model, &self.port)
            .with_secret(&self.env_var_name, &self.api_key)
            .with_custom_path(&self.executable)
            .with_shell_mode(self.shell)
    }

    fn supervisor_options(&self) -> llmproxy_core::Result<SupervisorOptions> {
        let mut options = match &self.options {
            Some(path) => SupervisorOptions::from_json_file(path)?,
            None => SupervisorOptions::default(),
        };
        if let Some(shell) = &self.shell_path {
            let interactive = options.shell_interactive;
            options = options.with_shell(shell, interactive);
        }
        if let Some(secs) = self.stop_grace_secs {
            options = options.with_stop_grace(Duration::from_secs(secs));
        }
        Ok(options)
    }

    fn log_filter(&self) -> EnvFilter {
        let default = if self.debug { "debug" } else { "info" };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    FmtSubscriber::builder()
        .with_env_filter(args.log_filter())
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = args.launch_config();
    let supervisor = ProcessSupervisor::new(args.supervisor_options()?);
    info!(
        "Supervising {} on {} ({:?})",
        supervisor.options().executable_name,
        llmproxy_core::platform::current_platform(),
        config
    );

    let printer = tokio::spawn(print_logs(supervisor.subscribe_logs()));

    if let Err(e) = supervisor.start(&config) {
        if !e.is_launch_failure() {
            warn!("Unexpected start failure: {}", e);
        }
        drop(supervisor);
        flush_printer(printer).await;
        return Err(e.into());
    }

    let mut running = supervisor.subscribe_running();
    let interrupted = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            true
        }
        _ = running.wait_for(|running| !*running) => false,
    };

    if interrupted {
        info!("Shutdown signal received, stopping proxy");
        supervisor.stop();
        let _ = running.wait_for(|running| !*running).await;
    }

    info!("Proxy stopped");
    drop(supervisor);
    flush_printer(printer).await;
    Ok(())
}

/// Copy log appends to stdout until the supervisor goes away.
async fn print_logs(mut updates: tokio::sync::broadcast::Receiver<String>) {
    let mut stdout = std::io::stdout();
    loop {
        match updates.recv().await {
            Ok(text) => {
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
            Err(RecvError::Lagged(skipped)) => warn!("Skipped {} log messages", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn flush_printer(printer: tokio::task::JoinHandle<()>) {
    if tokio::time::timeout(LOG_FLUSH_TIMEOUT, printer).await.is_err() {
        warn!("Timed out flushing proxy output");
    }
}
