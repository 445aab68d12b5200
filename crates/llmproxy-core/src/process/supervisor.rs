//! Supervisor façade: `start`, `stop` and the observable state.
//!
//! # State ownership
//!
//! The running flag and the active-run slot change together under one lock:
//! `start` sets both after a successful spawn, and the aggregator task clears
//! both when it processes the termination report. `stop` only signals.

use super::launcher::{LaunchConfig, LaunchPlan};
use super::reader::{self, Delivery, LogBuffer, LogWriter, StreamKind};
use super::resolver::{ExecutableResolver, ExecutionStrategy};
use crate::config::{SupervisorConfig, SupervisorOptions};
use crate::error::Result;
use crate::platform;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const TROUBLESHOOTING_HINT: &str = "Troubleshooting: make sure the executable is installed and \
     that this app is allowed to spawn processes (sandboxed builds usually are not).";

/// What `start` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new child was spawned.
    Started { pid: Option<u32> },
    /// A child was already running; nothing changed.
    AlreadyRunning,
}

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub last_error: Option<String>,
}

/// The single live child.
struct ActiveRun {
    run_id: u64,
    pid: Option<u32>,
    /// Asks the lifecycle task to kill the child outright.
    force_tx: Option<oneshot::Sender<()>>,
    escalation_armed: bool,
}

impl ActiveRun {
    fn force(&mut self) -> bool {
        self.force_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

/// State shared with the aggregator task.
struct Shared {
    logs: LogBuffer,
    running: watch::Sender<bool>,
    active: Mutex<Option<ActiveRun>>,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn finish_run(&self, run_id: u64, report: &str) {
        let mut active = lock(&self.active);
        match active.as_ref() {
            Some(run) if run.run_id == run_id => {
                self.logs.push_line(report);
                self.running.send_replace(false);
                *active = None;
            }
            _ => warn!("Ignoring termination report for stale run {}", run_id),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Supervises at most one proxy server process.
///
/// `start` and `stop` are synchronous and meant to be called from one
/// logical caller (a UI event loop or a CLI task). Output and exit handling
/// run as tokio tasks, so a supervisor must be created inside a runtime.
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
    log: LogWriter,
    resolver: ExecutableResolver,
    options: SupervisorOptions,
    next_run_id: AtomicU64,
}

impl ProcessSupervisor {
    /// Create a supervisor with the given options.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn new(options: SupervisorOptions) -> Self {
        let (running, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            logs: LogBuffer::new(SupervisorConfig::LOG_BROADCAST_CAPACITY),
            running,
            active: Mutex::new(None),
            last_error: Mutex::new(None),
        });
        let (log, rx) = LogWriter::channel();
        tokio::spawn(aggregate(rx, shared.clone()));

        Self {
            shared,
            log,
            resolver: ExecutableResolver::from_options(&options),
            options,
            next_run_id: AtomicU64::new(1),
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Start the proxy unless one is already running.
    ///
    /// Failures are written to the log buffer before they are returned, and
    /// leave the supervisor not running.
    pub fn start(&self, config: &LaunchConfig) -> Result<StartOutcome> {
        let mut active = lock(&self.shared.active);
        if active.is_some() {
            debug!("start ignored: proxy already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let mut child = match self.launch(config) {
            Ok(child) => child,
            Err(e) => {
                *lock(&self.shared.last_error) = Some(e.to_string());
                return Err(e);
            }
        };

        let pid = child.id();
        let readers: Vec<JoinHandle<()>> = [
            child.stdout.take().map(|out| {
                tokio::spawn(reader::pump_stream(out, StreamKind::Stdout, self.log.clone()))
            }),
            child.stderr.take().map(|err| {
                tokio::spawn(reader::pump_stream(err, StreamKind::Stderr, self.log.clone()))
            }),
        ]
        .into_iter()
        .flatten()
        .collect();

        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let (force_tx, force_rx) = oneshot::channel();
        *active = Some(ActiveRun {
            run_id,
            pid,
            force_tx: Some(force_tx),
            escalation_armed: false,
        });
        self.shared.running.send_replace(true);
        *lock(&self.shared.last_error) = None;

        tokio::spawn(reader::watch_exit(
            child,
            readers,
            force_rx,
            self.options.reader_drain_timeout(),
            run_id,
            self.log.clone(),
        ));

        info!("Proxy started (run {}, PID {:?})", run_id, pid);
        Ok(StartOutcome::Started { pid })
    }

    /// Resolve, plan and spawn, logging each step.
    fn launch(&self, config: &LaunchConfig) -> Result<Child> {
        let name = self.resolver.executable_name();

        let mut warnings = Vec::new();
        let resolved = self.resolver.resolve(config, &mut warnings);
        for warning in warnings {
            self.log.append(warning);
        }
        let strategy = resolved.inspect_err(|e| {
            warn!("{}", e);
            self.log.append(format!("Error: {}", e));
        })?;

        if let ExecutionStrategy::Direct(path) = &strategy {
            self.log
                .append(format!("Found {} at: {}", name, path.display()));
        }
        self.log.append(format!(
            "Starting {} with model: {} on port: {}...",
            name, config.model_identifier, config.port
        ));
        if strategy == ExecutionStrategy::Shell {
            self.log.append(format!(
                "Mode: Shell Execution ({} -l)",
                self.options.shell.display()
            ));
        }

        LaunchPlan::build(&strategy, config, &self.options)
            .and_then(|plan| plan.spawn())
            .inspect_err(|e| {
                self.log.append(format!("Failed to start process: {}", e));
                self.log.append(TROUBLESHOOTING_HINT);
            })
    }

    /// Ask the running proxy to terminate.
    ///
    /// Returns `false` (and logs nothing) when nothing is running. Does not
    /// wait: the running flag drops once the termination report comes in.
    pub fn stop(&self) -> bool {
        let mut active = lock(&self.shared.active);
        let Some(run) = active.as_mut() else {
            debug!("stop ignored: proxy not running");
            return false;
        };

        self.log.append("Stopping server...");
        info!("Stopping proxy (run {}, PID {:?})", run.run_id, run.pid);

        match run.pid.map(|pid| platform::request_termination(pid, true)) {
            Some(Ok(true)) => {}
            Some(Ok(false)) | None => {
                // Nothing graceful to send here; exiting or no signal support.
                if !cfg!(unix) {
                    run.force();
                }
            }
            Some(Err(e)) => {
                warn!("{}", e);
                self.log.append(format!("Warning: {}", e));
            }
        }

        if let Some(grace) = self.options.stop_grace() {
            if !run.escalation_armed {
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        run.escalation_armed = true;
                        handle.spawn(escalate(
                            self.shared.clone(),
                            self.log.clone(),
                            run.run_id,
                            grace,
                        ));
                    }
                    Err(_) => debug!("No runtime available; skipping stop escalation"),
                }
            }
        }

        true
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.borrow()
    }

    /// Receiver that observes every change of the running flag.
    pub fn subscribe_running(&self) -> watch::Receiver<bool> {
        self.shared.running.subscribe()
    }

    /// Receiver for text appended to the log buffer from now on.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<String> {
        self.shared.logs.subscribe()
    }

    /// Full log buffer contents.
    pub fn logs(&self) -> String {
        self.shared.logs.snapshot()
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.shared.active).as_ref().and_then(|run| run.pid)
    }

    /// Message of the most recent failed `start`, cleared by a successful one.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.last_error).clone()
    }

    pub fn status(&self) -> SupervisorStatus {
        let active = lock(&self.shared.active);
        SupervisorStatus {
            running: active.is_some(),
            pid: active.as_ref().and_then(|run| run.pid),
            last_error: self.last_error(),
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if self.stop() {
            debug!("Supervisor dropped while running; termination requested");
        }
    }
}

/// Single writer of the log buffer and the only place that ends a run.
async fn aggregate(mut rx: mpsc::UnboundedReceiver<Delivery>, shared: Arc<Shared>) {
    while let Some(delivery) = rx.recv().await {
        match delivery {
            Delivery::Append(message) => shared.logs.push_line(&message),
            Delivery::Terminated { run_id, report } => shared.finish_run(run_id, &report),
        }
    }
    debug!("Log aggregator stopped");
}

/// Force the run out if it is still alive after `grace`.
async fn escalate(shared: Arc<Shared>, log: LogWriter, run_id: u64, grace: Duration) {
    tokio::time::sleep(grace).await;

    let mut active = lock(&shared.active);
    if let Some(run) = active.as_mut().filter(|run| run.run_id == run_id) {
        warn!("Proxy still running {:?} after stop request; killing it", grace);
        log.append(format!(
            "Server did not stop within {:.1}s; forcing it to exit...",
            grace.as_secs_f64()
        ));
        run.force();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn supervisor_without_candidates(temp_dir: &TempDir) -> ProcessSupervisor {
        ProcessSupervisor::new(
            SupervisorOptions::default()
                .with_search_locations(vec![temp_dir.path().join("litellm")]),
        )
    }

    async fn settle(supervisor: &ProcessSupervisor, needle: &str) {
        for _ in 0..200 {
            if supervisor.logs().contains(needle) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("log never contained {:?}: {:?}", needle, supervisor.logs());
    }

    #[tokio::test]
    async fn test_resolution_failure_leaves_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = supervisor_without_candidates(&temp_dir);
        let config = LaunchConfig::default().with_custom_path("/nope/litellm");

        let err = supervisor.start(&config).unwrap_err();

        assert!(matches!(err, crate::SupervisorError::ResolutionFailed { .. }));
        assert!(!supervisor.is_running());
        assert!(supervisor.pid().is_none());
        assert_eq!(supervisor.last_error(), Some(err.to_string()));

        settle(&supervisor, "Could not find 'litellm'").await;
        let logs = supervisor.logs();
        assert!(logs.contains("Warning: Custom path '/nope/litellm' does not exist."));
        assert!(!logs.contains("Starting litellm"));
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_a_noop() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = supervisor_without_candidates(&temp_dir);

        assert!(!supervisor.stop());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!supervisor.logs().contains("Stopping"));
    }

    #[tokio::test]
    async fn test_status_snapshot_when_idle() {
        let supervisor = ProcessSupervisor::new(
            SupervisorOptions::default().with_search_locations(vec![PathBuf::from("/nope")]),
        );
        assert_eq!(
            supervisor.status(),
            SupervisorStatus {
                running: false,
                pid: None,
                last_error: None,
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_report_after_restart_keeps_running() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("litellm");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        crate::platform::set_executable(&script).unwrap();
        let supervisor = ProcessSupervisor::new(
            SupervisorOptions::default()
                .with_search_locations(vec![script])
                .with_extra_path_dirs(vec![]),
        );
        let mut running = supervisor.subscribe_running();

        supervisor.start(&LaunchConfig::default()).unwrap();
        supervisor.stop();
        tokio::time::timeout(Duration::from_secs(10), running.wait_for(|running| !*running))
            .await
            .unwrap()
            .unwrap();
        supervisor.start(&LaunchConfig::default()).unwrap();
        let _ = running.borrow_and_update();

        // A late report for run 1 lands while run 2 is live.
        supervisor
            .log
            .terminated(1, "Process terminated with status: 0".to_string());
        supervisor.log.append("after-stale-report");
        settle(&supervisor, "after-stale-report").await;

        assert!(supervisor.is_running());
        assert!(!running.has_changed().unwrap());
        assert_eq!(
            supervisor
                .logs()
                .lines()
                .filter(|line| line.starts_with("Process terminated"))
                .count(),
            1
        );

        supervisor.stop();
        tokio::time::timeout(Duration::from_secs(10), running.wait_for(|running| !*running))
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_finish_run_ignores_stale_run() {
        let (running, _) = watch::channel(true);
        let shared = Shared {
            logs: LogBuffer::new(4),
            running,
            active: Mutex::new(Some(ActiveRun {
                run_id: 2,
                pid: Some(1),
                force_tx: None,
                escalation_armed: false,
            })),
            last_error: Mutex::new(None),
        };

        shared.finish_run(1, "Process terminated with status: 0");
        assert!(*shared.running.borrow());
        assert_eq!(shared.logs.snapshot(), "");

        shared.finish_run(2, "Process terminated with status: 0");
        assert!(!*shared.running.borrow());
        assert!(lock(&shared.active).is_none());
        assert_eq!(shared.logs.snapshot(), "Process terminated with status: 0\n");
    }
}
