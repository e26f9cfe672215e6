//! Process-group signalling
//!
//! Children are spawned as leaders of their own group, so the group id equals
//! the child pid and stays valid for signalling after the leader is reaped.
//! Termination is two-phase: SIGTERM to the whole group, a bounded grace
//! period, then SIGKILL. Every step treats "no such process" as success, so
//! terminating an already-exited group is a no-op.
//!
//! On non-Unix platforms only the direct child is killed.

use std::io;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
impl Signal {
    fn as_libc(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// How a termination request completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Nothing was running any more
    AlreadyExited,
    /// The group exited within the grace period
    Graceful,
    /// The group had to be killed
    Forced,
}

/// Send `signal` to every process in the group; a vanished group is not an error
#[cfg(unix)]
pub fn signal_group(pgid: u32, signal: Signal) -> io::Result<()> {
    let result = unsafe { libc::killpg(pgid as libc::pid_t, signal.as_libc()) };
    if result == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn signal_group(_pgid: u32, _signal: Signal) -> io::Result<()> {
    Ok(())
}

/// Whether any process of the group still exists
#[cfg(unix)]
pub fn group_alive(pgid: u32) -> bool {
    let result = unsafe { libc::killpg(pgid as libc::pid_t, 0) };
    if result == 0 {
        return true;
    }
    // EPERM: exists but belongs to someone else
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn group_alive(_pgid: u32) -> bool {
    false
}

fn child_exited(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(Some(_)))
}

/// Wait until both the child and its group are gone, or the deadline passes
async fn wait_for_exit(child: &mut Child, pgid: Option<u32>, deadline: Instant) -> bool {
    loop {
        let leader_done = child_exited(child);
        let group_done = pgid.is_none_or(|g| !group_alive(g));
        if leader_done && group_done {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Terminate the child's process group: SIGTERM, wait `grace`, then SIGKILL
///
/// The child is always reaped before returning.
pub async fn terminate(child: &mut Child, pgid: Option<u32>, grace: Duration) -> Termination {
    let group_running = pgid.is_some_and(group_alive);
    if child_exited(child) && !group_running {
        return Termination::AlreadyExited;
    }

    match pgid {
        Some(pgid) => {
            if let Err(e) = signal_group(pgid, Signal::Term) {
                tracing::debug!(pgid, error = %e, "SIGTERM to process group failed");
            }
        }
        None => {
            let _ = child.start_kill();
        }
    }

    if wait_for_exit(child, pgid, Instant::now() + grace).await {
        return Termination::Graceful;
    }

    tracing::warn!(?pgid, grace_secs = grace.as_secs_f64(), "process group ignored SIGTERM, killing");
    if let Some(pgid) = pgid {
        if let Err(e) = signal_group(pgid, Signal::Kill) {
            tracing::warn!(pgid, error = %e, "SIGKILL to process group failed");
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
    Termination::Forced
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn_group(script: &str) -> (Child, u32) {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        (child, pid)
    }

    #[tokio::test]
    async fn test_terminates_sleeping_group() {
        let (mut child, pgid) = spawn_group("exec sleep 30");
        assert!(group_alive(pgid));

        let outcome = terminate(&mut child, Some(pgid), Duration::from_secs(2)).await;

        assert_eq!(outcome, Termination::Graceful);
        assert!(!group_alive(pgid));
    }

    #[tokio::test]
    async fn test_escalates_to_kill() {
        let (mut child, pgid) = spawn_group("trap '' TERM; while :; do sleep 0.05; done");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let outcome = terminate(&mut child, Some(pgid), Duration::from_millis(300)).await;

        assert_eq!(outcome, Termination::Forced);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_idempotent_after_exit() {
        let (mut child, pgid) = spawn_group("exit 0");
        child.wait().await.unwrap();

        let first = terminate(&mut child, Some(pgid), Duration::from_millis(100)).await;
        let second = terminate(&mut child, Some(pgid), Duration::from_millis(100)).await;

        assert_eq!(first, Termination::AlreadyExited);
        assert_eq!(second, Termination::AlreadyExited);
        assert!(signal_group(pgid, Signal::Term).is_ok());
    }
}
