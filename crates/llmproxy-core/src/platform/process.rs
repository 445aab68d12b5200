//! Process sessions and termination signals.
//!
//! A supervised child leads its own session, so its process group id equals
//! its pid and a group signal reaches a shell together with whatever it
//! started.

use crate::error::{Result, SupervisorError};
use tracing::debug;

/// Start the child as the leader of a new session.
///
/// The new session has no controlling terminal, so an interactive shell
/// cannot stop itself on terminal access or take the terminal from the
/// supervisor. The session's process group is the one signalled on stop.
///
/// # Platform Behavior
/// - **Linux/macOS**: `setsid()` in the child before exec
/// - **Windows**: no-op
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn detach_session(cmd: &mut tokio::process::Command) {
    // SAFETY: setsid() is async-signal-safe and the closure neither
    // allocates nor touches locks shared with the parent.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(std::io::Error::from)
        });
    }
}

#[cfg(not(unix))]
pub fn detach_session(_cmd: &mut tokio::process::Command) {}

/// Ask a process (or its whole process group) to terminate gracefully.
///
/// Returns `Ok(true)` if a signal was delivered and `Ok(false)` if there was
/// nothing to signal or the platform has no graceful signal.
///
/// # Platform Behavior
/// - **Linux/macOS**: sends SIGTERM; with `group`, to every member of the
///   process group led by `pid`
/// - **Windows**: no graceful equivalent; always `Ok(false)`
pub fn request_termination(pid: u32, group: bool) -> Result<bool> {
    #[cfg(unix)]
    {
        send(pid, group, nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    {
        debug!("No graceful termination signal for process {} on this platform", pid);
        let _ = group;
        Ok(false)
    }
}

/// Kill a process (or its whole process group) outright.
///
/// Same return convention as [`request_termination`]. On Windows this is
/// `Ok(false)` and the caller falls back to killing its own child handle.
pub fn force_termination(pid: u32, group: bool) -> Result<bool> {
    #[cfg(unix)]
    {
        send(pid, group, nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(not(unix))]
    {
        debug!("No group kill for process {} on this platform", pid);
        let _ = group;
        Ok(false)
    }
}

#[cfg(unix)]
fn send(pid: u32, group: bool, signal: nix::sys::signal::Signal) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    let nix_pid = Pid::from_raw(pid as i32);
    let sent = if group {
        debug!("Sending {:?} to process group {}", signal, pid);
        killpg(nix_pid, signal)
    } else {
        debug!("Sending {:?} to process {}", signal, pid);
        kill(nix_pid, signal)
    };

    match sent {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => {
            debug!("Process {} already gone", pid);
            Ok(false)
        }
        Err(e) => Err(SupervisorError::Signal {
            pid,
            message: e.to_string(),
        }),
    }
}
