//! Spawn, probe, and terminate the OS subprocesses that run a simulation:
//! the per-experiment server and the per-client drivers. Both kinds go
//! through the same handle; only the command line differs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// What a subprocess is for. Carried on the handle so logs and status
/// listings can tell a server apart from a client driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessKind {
    Server,
    Client,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Server => "server",
            ProcessKind::Client => "client",
        }
    }
}

/// Everything needed to launch one subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnSpec {
    pub kind: ProcessKind,
    pub command: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl SpawnSpec {
    pub fn new(kind: ProcessKind, command: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("working directory does not exist: {0}")]
    WorkingDir(PathBuf),
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("spawned process has no pid: {0}")]
    NoPid(String),
}

/// A live (or once-live) subprocess. The pid is the durable part: callers
/// persist it so liveness can still be checked after their own restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub kind: ProcessKind,
    pub pid: u32,
    pub started_at: SystemTime,
}

/// Outcome of a terminate call. Terminating an already-dead pid is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    AlreadyDead,
    Graceful,
    Killed,
}

/// Launch a detached subprocess in its own session.
///
/// The child gets its own process group (`setsid`) so `terminate` can signal
/// the whole tree, and it deliberately does NOT die with this process: the
/// caller records the pid and may pick the child back up after a restart.
pub fn spawn(spec: &SpawnSpec) -> Result<ProcessHandle, ProcessError> {
    if let Some(dir) = &spec.working_dir {
        if !dir.is_dir() {
            return Err(ProcessError::WorkingDir(dir.clone()));
        }
    }

    let mut cmd = tokio::process::Command::new(&spec.command);
    cmd.args(&spec.args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    for (k, v) in &spec.env {
        cmd.env(k, v);
    }
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    #[cfg(unix)]
    {
        unsafe {
            cmd.pre_exec(|| {
                // New session so the whole process tree can be signalled.
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        command: spec.command.display().to_string(),
        source,
    })?;

    let pid = child
        .id()
        .ok_or_else(|| ProcessError::NoPid(spec.command.display().to_string()))?;

    let kind = spec.kind;
    tokio::spawn(async move {
        // Reap the child so it never lingers as a zombie while we run.
        match child.wait().await {
            Ok(status) => {
                tracing::debug!(kind = kind.as_str(), pid, exit = ?status.code(), "process exited")
            }
            Err(err) => tracing::warn!(kind = kind.as_str(), pid, %err, "wait failed"),
        }
    });

    tracing::info!(
        kind = kind.as_str(),
        pid,
        command = %spec.command.display(),
        "spawned process"
    );

    Ok(ProcessHandle {
        kind,
        pid,
        started_at: SystemTime::now(),
    })
}

/// OS-level liveness. A pid that no longer exists, or that is a zombie
/// waiting to be reaped, reads as dead. Never errors.
pub fn is_alive(pid: u32) -> bool {
    // pid 0 and anything that would wrap negative address process groups,
    // not processes.
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    #[cfg(unix)]
    {
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if rc != 0 {
            return false;
        }
        !is_zombie(pid)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // /proc/<pid>/stat: "pid (comm) state ..."; comm may contain spaces,
    // so scan from the closing paren.
    let Ok(s) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    let Some(end) = s.rfind(')') else {
        return false;
    };
    matches!(s[end + 1..].trim_start().chars().next(), Some('Z'))
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn signal_group(pid: u32, sig: libc::c_int) {
    // spawn() put the child in its own session, so pgid == pid.
    unsafe {
        libc::kill(-(pid as libc::pid_t), sig);
    }
}

/// Graceful-then-forceful stop: SIGTERM to the process group, poll liveness
/// until `graceful_timeout`, then SIGKILL. Idempotent on dead pids.
pub async fn terminate(pid: u32, graceful_timeout: Duration) -> TerminateOutcome {
    if !is_alive(pid) {
        return TerminateOutcome::AlreadyDead;
    }

    #[cfg(unix)]
    signal_group(pid, libc::SIGTERM);

    let deadline = tokio::time::Instant::now() + graceful_timeout;
    loop {
        if !is_alive(pid) {
            return TerminateOutcome::Graceful;
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[cfg(unix)]
    signal_group(pid, libc::SIGKILL);

    // SIGKILL is not ignorable; give the kernel a moment to tear down.
    for _ in 0..50 {
        if !is_alive(pid) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tracing::warn!(pid, "process killed after graceful timeout");
    TerminateOutcome::Killed
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(kind: ProcessKind, script: &str) -> SpawnSpec {
        SpawnSpec::new(kind, "/bin/sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn spawn_and_terminate_gracefully() {
        let handle = spawn(&sh(ProcessKind::Server, "sleep 30")).unwrap();
        assert!(is_alive(handle.pid));

        let outcome = terminate(handle.pid, Duration::from_secs(2)).await;
        assert_eq!(outcome, TerminateOutcome::Graceful);
        assert!(!is_alive(handle.pid));
    }

    #[tokio::test]
    async fn terminate_escalates_to_kill_when_term_is_ignored() {
        let handle = spawn(&sh(ProcessKind::Client, "trap '' TERM; sleep 60")).unwrap();
        // Let the shell install the trap before we signal.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        let outcome = terminate(handle.pid, Duration::from_secs(2)).await;
        assert_eq!(outcome, TerminateOutcome::Killed);
        assert!(!is_alive(handle.pid));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn terminate_dead_pid_is_noop() {
        let handle = spawn(&sh(ProcessKind::Client, "true")).unwrap();
        // Wait for natural exit.
        for _ in 0..100 {
            if !is_alive(handle.pid) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!is_alive(handle.pid));
        let outcome = terminate(handle.pid, Duration::from_secs(1)).await;
        assert_eq!(outcome, TerminateOutcome::AlreadyDead);
    }

    #[tokio::test]
    async fn is_alive_false_for_unknown_pid() {
        // Above any configurable pid_max on Linux.
        assert!(!is_alive(i32::MAX as u32));
        assert!(!is_alive(0));
    }

    #[tokio::test]
    async fn spawn_missing_executable_fails() {
        let spec = SpawnSpec::new(ProcessKind::Server, "/nonexistent/simulator");
        let err = spawn(&spec).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn spawn_bad_working_dir_fails() {
        let spec = sh(ProcessKind::Server, "true").working_dir("/nonexistent/workdir");
        let err = spawn(&spec).unwrap_err();
        assert!(matches!(err, ProcessError::WorkingDir(_)));
    }
}
