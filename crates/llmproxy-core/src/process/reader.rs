//! Output streaming and exit detection.
//!
//! Each child stream gets its own reader task. Readers never touch the log
//! buffer: they push chunks onto a `LogWriter` queue, and the supervisor's
//! aggregator task is the only code that appends. The same queue carries the
//! termination report, so it always lands after everything queued before it.

use crate::config::SupervisorConfig;
use crate::platform;
use std::fmt;
use std::future::Future;
use std::process::ExitStatus;
use std::sync::RwLock;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Which child stream a reader drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Message on the single delivery queue.
#[derive(Debug)]
pub(crate) enum Delivery {
    /// Text to append, without the trailing newline.
    Append(String),
    /// The child of `run_id` has exited; `report` is the final status line.
    Terminated { run_id: u64, report: String },
}

/// Sending half of the delivery queue.
#[derive(Debug, Clone)]
pub struct LogWriter {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl LogWriter {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a line for the log buffer.
    pub fn append(&self, message: impl Into<String>) {
        if self.tx.send(Delivery::Append(message.into())).is_err() {
            debug!("Log aggregator gone; dropping message");
        }
    }

    pub(crate) fn terminated(&self, run_id: u64, report: String) {
        if self.tx.send(Delivery::Terminated { run_id, report }).is_err() {
            warn!("Log aggregator gone; termination of run {} not recorded", run_id);
        }
    }
}

/// Append-only text shared with subscribers.
///
/// Every append is mirrored to a broadcast channel, so a subscriber that
/// concatenates what it receives rebuilds the buffer from the point it
/// subscribed.
#[derive(Debug)]
pub struct LogBuffer {
    text: RwLock<String>,
    updates: broadcast::Sender<String>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        Self {
            text: RwLock::new(String::new()),
            updates,
        }
    }

    /// Append `message` plus a newline. Only the aggregator calls this.
    pub(crate) fn push_line(&self, message: &str) {
        let mut line = String::with_capacity(message.len() + 1);
        line.push_str(message);
        line.push('\n');

        self.text
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_str(&line);
        // No subscribers is fine.
        let _ = self.updates.send(line);
    }

    /// Current contents.
    pub fn snapshot(&self) -> String {
        self.text
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.updates.subscribe()
    }
}

/// Forward everything readable on `stream` to `log`, one chunk per read.
///
/// Chunks that are not valid UTF-8 are dropped; a read error ends the stream
/// the same way EOF does.
pub async fn pump_stream<R>(mut stream: R, kind: StreamKind, log: LogWriter)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; SupervisorConfig::READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => match std::str::from_utf8(&buf[..n]) {
                Ok(text) => log.append(text),
                Err(e) => debug!("Dropping {} undecodable bytes from {}: {}", n, kind, e),
            },
            Err(e) => {
                warn!("Error reading child {}: {}", kind, e);
                break;
            }
        }
    }
    debug!("Child {} closed", kind);
}

/// Wait for `child` to exit, let the readers finish, then report termination.
///
/// A message on `force_rx` kills the child's whole process group. Readers
/// still open after `drain_timeout` (a grandchild holding the pipe) are
/// aborted.
pub(crate) fn watch_exit(
    mut child: Child,
    mut readers: Vec<JoinHandle<()>>,
    mut force_rx: oneshot::Receiver<()>,
    drain_timeout: Duration,
    run_id: u64,
    log: LogWriter,
) -> impl Future<Output = ()> + Send {
    // Armed before the first poll, so an unpolled task still cleans up.
    let mut group = GroupKillGuard { pid: child.id() };

    async move {
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            Ok(()) = &mut force_rx => None,
        };
        let status = match exited {
            Some(status) => status,
            None => {
                warn!("Forcing child process {:?} to exit", child.id());
                if !group.kill() {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill child process: {}", e);
                    }
                }
                child.wait().await
            }
        };
        // Reaped: the pid may be reused from here on.
        group.disarm();

        let drain = async {
            for reader in readers.iter_mut() {
                let _ = reader.await;
            }
        };
        if tokio::time::timeout(drain_timeout, drain).await.is_err() {
            debug!("Child output still open {:?} after exit; abandoning readers", drain_timeout);
            for reader in &readers {
                reader.abort();
            }
        }

        let report = describe_exit(&status);
        info!("Run {}: {}", run_id, report);
        log.terminated(run_id, report);
    }
}

/// Kills the child's process group if the lifecycle task goes away before
/// the child has been reaped.
struct GroupKillGuard {
    pid: Option<u32>,
}

impl GroupKillGuard {
    /// SIGKILL the whole group. `false` when nothing was signalled.
    fn kill(&mut self) -> bool {
        let Some(pid) = self.pid else {
            return false;
        };
        match platform::force_termination(pid, true) {
            Ok(sent) => sent,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for GroupKillGuard {
    fn drop(&mut self) {
        if self.pid.is_some() {
            debug!("Lifecycle task dropped early; killing process group {:?}", self.pid);
            self.kill();
        }
    }
}

/// Human-readable final status line.
pub fn describe_exit(status: &std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => match (status.code(), exit_signal(status)) {
            (Some(code), _) => format!("Process terminated with status: {}", code),
            (None, Some(signal)) => format!("Process terminated by signal {}", signal),
            (None, None) => format!("Process terminated with status: {}", status),
        },
        Err(e) => format!("Process terminated with status: unknown ({})", e),
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    /// Drain everything queued so far into plain strings.
    fn drain_appends(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(delivery) = rx.try_recv() {
            if let Delivery::Append(text) = delivery {
                out.push(text);
            }
        }
        out
    }

    #[test]
    fn test_push_line_and_snapshot() {
        let buffer = LogBuffer::new(8);
        let mut updates = buffer.subscribe();

        buffer.push_line("first");
        buffer.push_line("second");

        assert_eq!(buffer.snapshot(), "first\nsecond\n");
        assert_eq!(updates.try_recv().unwrap(), "first\n");
        assert_eq!(updates.try_recv().unwrap(), "second\n");
    }

    #[tokio::test]
    async fn test_pump_preserves_chunk_order() {
        let (log, mut rx) = LogWriter::channel();
        let (mut writer, reader) = tokio::io::duplex(64);

        let pump = tokio::spawn(pump_stream(reader, StreamKind::Stdout, log));
        for chunk in ["A", "B", "C"] {
            writer.write_all(chunk.as_bytes()).await.unwrap();
            writer.flush().await.unwrap();
            tokio::task::yield_now().await;
        }
        drop(writer);
        pump.await.unwrap();

        let joined: String = drain_appends(&mut rx).concat();
        assert_eq!(joined, "ABC");
    }

    #[tokio::test]
    async fn test_pump_drops_undecodable_chunks() {
        let (log, mut rx) = LogWriter::channel();
        let (mut writer, reader) = tokio::io::duplex(64);

        let pump = tokio::spawn(pump_stream(reader, StreamKind::Stderr, log));
        writer.write_all(&[0xff, 0xfe, 0xfd]).await.unwrap();
        writer.flush().await.unwrap();
        // Give the reader a chance to consume the bad chunk on its own.
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.write_all(b"ok").await.unwrap();
        drop(writer);
        pump.await.unwrap();

        assert_eq!(drain_appends(&mut rx), vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn test_pump_empty_stream() {
        let (log, mut rx) = LogWriter::channel();
        pump_stream(tokio::io::empty(), StreamKind::Stdout, log).await;
        assert!(drain_appends(&mut rx).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_describe_exit() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(
            describe_exit(&Ok(ExitStatus::from_raw(0))),
            "Process terminated with status: 0"
        );
        assert_eq!(
            describe_exit(&Ok(ExitStatus::from_raw(3 << 8))),
            "Process terminated with status: 3"
        );
        assert_eq!(
            describe_exit(&Ok(ExitStatus::from_raw(15))),
            "Process terminated by signal 15"
        );
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(
            describe_exit(&Err(err)),
            "Process terminated with status: unknown (boom)"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_watch_exit_reports_after_output() {
        let (log, mut rx) = LogWriter::channel();
        let mut child = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg("echo hello; exit 2")
            .stdout(std::process::Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        let readers = vec![tokio::spawn(pump_stream(stdout, StreamKind::Stdout, log.clone()))];
        let (_force_tx, force_rx) = oneshot::channel();

        watch_exit(child, readers, force_rx, Duration::from_secs(5), 7, log).await;

        match rx.recv().await.unwrap() {
            Delivery::Append(text) => assert_eq!(text, "hello\n"),
            other => panic!("expected output first, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            Delivery::Terminated { run_id, report } => {
                assert_eq!(run_id, 7);
                assert_eq!(report, "Process terminated with status: 2");
            }
            other => panic!("expected termination, got {:?}", other),
        }
    }

    /// True while `pid` exists and is not a zombie.
    #[cfg(unix)]
    fn alive(pid: i32) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
            && !std::fs::read_to_string(format!("/proc/{}/stat", pid)).is_ok_and(|stat| {
                stat.rsplit(')')
                    .next()
                    .is_some_and(|state| state.trim_start().starts_with('Z'))
            })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_lifecycle_kills_process_group() {
        use tokio::io::AsyncBufReadExt;

        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.arg("-c")
            .arg("sleep 30 & echo $!; wait")
            .stdout(std::process::Stdio::piped());
        platform::detach_session(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let mut lines = tokio::io::BufReader::new(child.stdout.take().unwrap()).lines();
        let worker: i32 = lines.next_line().await.unwrap().unwrap().trim().parse().unwrap();
        let (log, _rx) = LogWriter::channel();
        let (_force_tx, force_rx) = oneshot::channel();

        let watcher = tokio::spawn(watch_exit(
            child,
            Vec::new(),
            force_rx,
            Duration::from_millis(100),
            1,
            log,
        ));
        watcher.abort();
        let _ = watcher.await;

        for _ in 0..200 {
            if !alive(worker) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("worker {} outlived its process group", worker);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_watch_exit_force_kill() {
        let (log, mut rx) = LogWriter::channel();
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let (force_tx, force_rx) = oneshot::channel();

        let watcher = tokio::spawn(watch_exit(
            child,
            Vec::new(),
            force_rx,
            Duration::from_millis(100),
            1,
            log,
        ));
        force_tx.send(()).unwrap();
        watcher.await.unwrap();

        match rx.recv().await.unwrap() {
            Delivery::Terminated { report, .. } => {
                assert_eq!(report, "Process terminated by signal 9")
            }
            other => panic!("expected termination, got {:?}", other),
        }
    }
}
