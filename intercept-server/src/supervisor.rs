//! Child process supervision.
//!
//! Every external tool runs under one of three I/O styles:
//!
//! - **pipe**: plain stdout/stderr pipes (JSON-emitting tools),
//! - **pty**: stdout+stderr on a pseudoterminal slave, so C stdio in
//!   the child sees a TTY and disables line buffering (multimon-ng,
//!   DSC decoders, SatDump),
//! - **tcp daemon**: backgrounded tools that publish on a TCP listener
//!   (AIS-catcher); the caller connects a client socket afterwards.
//!
//! All children are placed in their own process group so termination
//! signals reach a whole pipeline stage, and every child is tracked in
//! a global registry for shutdown sweeps.

use log::{debug, info, warn};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::io::Read;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Tool not found: {0}")]
    ToolMissing(String),
    #[error("Failed to spawn {0}: {1}")]
    Io(String, std::io::Error),
    #[error("{0} exited during startup: {1}")]
    EarlyExit(String, String),
    #[error("Failed to allocate pty: {0}")]
    Pty(nix::errno::Errno),
}

/// Global registry of live children, pid -> argv[0].
static PROCESS_REGISTRY: Lazy<Mutex<HashMap<i32, String>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Number of currently registered children.
pub fn registered_count() -> usize {
    PROCESS_REGISTRY.lock().unwrap().len()
}

fn register(pid: i32, name: &str) {
    PROCESS_REGISTRY.lock().unwrap().insert(pid, name.to_string());
}

/// One spawned child. Terminate-then-kill is idempotent; the PTY master
/// (when present) is closed on the same path.
#[derive(Debug)]
pub struct ChildHandle {
    pub pid: i32,
    pub name: String,
    child: Mutex<Child>,
    pty_master: Mutex<Option<OwnedFd>>,
    terminated: AtomicBool,
    registered: AtomicBool,
}

impl ChildHandle {
    /// Non-blocking liveness check.
    pub fn is_running(&self) -> bool {
        matches!(self.child.lock().unwrap().try_wait(), Ok(None))
    }

    /// Exit code if the child has exited.
    pub fn exit_code(&self) -> Option<i32> {
        match self.child.lock().unwrap().try_wait() {
            Ok(Some(status)) => status.code(),
            _ => None,
        }
    }

    /// Remove this child from the global registry. Idempotent.
    pub fn unregister(&self) {
        if self.registered.swap(false, Ordering::SeqCst) {
            PROCESS_REGISTRY.lock().unwrap().remove(&self.pid);
        }
    }

    /// SIGTERM the process group, wait `grace`, SIGKILL stragglers.
    /// Closes the PTY master fd. Never re-entrant on the same handle.
    pub fn safe_terminate(&self, grace: Duration) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let pgid = Pid::from_raw(self.pid);
        if let Err(e) = killpg(pgid, Signal::SIGTERM) {
            debug!("SIGTERM {} ({}): {}", self.name, self.pid, e);
        }

        let deadline = std::time::Instant::now() + grace;
        loop {
            match self.child.lock().unwrap().try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {
                    if std::time::Instant::now() >= deadline {
                        warn!("{} ({}) survived SIGTERM, sending SIGKILL", self.name, self.pid);
                        let _ = killpg(pgid, Signal::SIGKILL);
                        let _ = self.child.lock().unwrap().wait();
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(e) => {
                    debug!("wait {} ({}): {}", self.name, self.pid, e);
                    break;
                }
            }
        }

        // Closing the master drops our end of the terminal.
        self.pty_master.lock().unwrap().take();
        self.unregister();
    }

    /// Read remaining stderr for diagnostics, trimmed to ~200 bytes.
    fn drain_stderr(stderr: Option<&mut ChildStderr>) -> String {
        let Some(stderr) = stderr else {
            return String::new();
        };
        let mut buf = Vec::new();
        let _ = stderr.take(4096).read_to_end(&mut buf);
        let text = String::from_utf8_lossy(&buf);
        let trimmed: String = text.chars().take(200).collect();
        trimmed.trim().to_string()
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        // Best-effort: a dropped handle must not leave a registry entry.
        self.unregister();
    }
}

/// What the child's stdin is connected to.
pub enum StdinConfig {
    Null,
    Piped,
    From(Stdio),
}

/// Everything a controller gets back from a spawn.
#[derive(Debug)]
pub struct Spawned {
    pub handle: Arc<ChildHandle>,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    /// Read side of the PTY (a dup of the master fd).
    pub pty_master: Option<std::fs::File>,
}

fn build_command(argv: &[String]) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    // Own process group so killpg reaches the whole stage.
    cmd.process_group(0);
    cmd
}

fn finish_spawn(
    argv: &[String],
    mut cmd: Command,
    pty: Option<(OwnedFd, OwnedFd)>,
) -> Result<Spawned, SpawnError> {
    let name = argv[0].clone();
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SpawnError::ToolMissing(name.clone())
        } else {
            SpawnError::Io(name.clone(), e)
        }
    })?;
    // The slave fd stays open in the child only.
    let master = pty.map(|(master, slave)| {
        drop(slave);
        master
    });

    let pid = child.id() as i32;
    register(pid, &name);
    info!("Spawned {} (pid {})", shell_line(argv), pid);

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let pty_file = match &master {
        Some(fd) => match fd.try_clone() {
            Ok(dup) => Some(std::fs::File::from(dup)),
            Err(e) => {
                // A half-started child must not outlive a failed spawn.
                let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
                let _ = child.wait();
                PROCESS_REGISTRY.lock().unwrap().remove(&pid);
                return Err(SpawnError::Io(name, e));
            }
        },
        None => None,
    };

    Ok(Spawned {
        handle: Arc::new(ChildHandle {
            pid,
            name,
            child: Mutex::new(child),
            pty_master: Mutex::new(master),
            terminated: AtomicBool::new(false),
            registered: AtomicBool::new(true),
        }),
        stdin,
        stdout,
        stderr,
        pty_master: pty_file,
    })
}

/// Spawn with plain pipes. `stdout_piped: false` discards stdout
/// (file-writing tools like `hackrf_transfer -r <file>`).
pub fn spawn_pipe(
    argv: &[String],
    stdin: StdinConfig,
    stdout_piped: bool,
) -> Result<Spawned, SpawnError> {
    let mut cmd = build_command(argv);
    cmd.stdin(match stdin {
        StdinConfig::Null => Stdio::null(),
        StdinConfig::Piped => Stdio::piped(),
        StdinConfig::From(stdio) => stdio,
    });
    cmd.stdout(if stdout_piped { Stdio::piped() } else { Stdio::null() });
    cmd.stderr(Stdio::piped());
    finish_spawn(argv, cmd, None)
}

/// Spawn with stdout and stderr on a fresh pseudoterminal, so the
/// child's stdio is unbuffered. The parent reads the master side.
pub fn spawn_pty(argv: &[String], stdin: StdinConfig) -> Result<Spawned, SpawnError> {
    let pty = nix::pty::openpty(None, None).map_err(SpawnError::Pty)?;
    let master = pty.master;
    let slave = pty.slave;

    let mut cmd = build_command(argv);
    cmd.stdin(match stdin {
        StdinConfig::Null => Stdio::null(),
        StdinConfig::Piped => Stdio::piped(),
        StdinConfig::From(stdio) => stdio,
    });
    let slave_out = slave.try_clone().map_err(|e| SpawnError::Io(argv[0].clone(), e.into()))?;
    let slave_err = slave.try_clone().map_err(|e| SpawnError::Io(argv[0].clone(), e.into()))?;
    cmd.stdout(Stdio::from(slave_out));
    cmd.stderr(Stdio::from(slave_err));
    finish_spawn(argv, cmd, Some((master, slave)))
}

/// Spawn a tool that serves on a TCP port (AIS-catcher). The caller
/// connects a client socket after a warm-up delay.
pub fn spawn_tcp_daemon(argv: &[String]) -> Result<Spawned, SpawnError> {
    spawn_pipe(argv, StdinConfig::Null, false)
}

/// Post-spawn readiness gate: a child that dies within `start_wait` is
/// a start failure. Its stderr is drained into the error and the child
/// is fully cleaned up, so no half-started process leaks.
pub async fn ensure_started(spawned: &mut Spawned, start_wait: Duration) -> Result<(), SpawnError> {
    tokio::time::sleep(start_wait).await;
    if spawned.handle.is_running() {
        return Ok(());
    }
    let diagnostics = ChildHandle::drain_stderr(spawned.stderr.as_mut());
    let name = spawned.handle.name.clone();
    spawned.handle.safe_terminate(Duration::from_millis(100));
    Err(SpawnError::EarlyExit(
        name,
        if diagnostics.is_empty() {
            "no output".to_string()
        } else {
            diagnostics
        },
    ))
}

/// Render an argv for logs.
pub fn shell_line(argv: &[String]) -> String {
    argv.join(" ")
}

/// Is `tool` on PATH?
pub fn tool_available(tool: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| {
        let candidate = dir.join(tool);
        candidate.is_file()
            && std::fs::metadata(&candidate)
                .map(|m| std::os::unix::fs::MetadataExt::mode(&m) & 0o111 != 0)
                .unwrap_or(false)
    })
}

/// Emergency cleanup: signal every registered child whose name contains
/// `pattern`, then ask the OS to catch unregistered orphans.
pub fn kill_all_matching(pattern: &str) -> Vec<String> {
    let mut killed = Vec::new();
    let entries: Vec<(i32, String)> = PROCESS_REGISTRY
        .lock()
        .unwrap()
        .iter()
        .map(|(pid, name)| (*pid, name.clone()))
        .collect();
    for (pid, name) in entries {
        if name.contains(pattern) {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGTERM);
            killed.push(name);
        }
    }
    // Orphans from previous runs are not in the registry.
    if let Ok(status) = Command::new("pkill").args(["-f", pattern]).status() {
        if status.success() && killed.is_empty() {
            killed.push(pattern.to_string());
        }
    }
    killed.sort();
    killed.dedup();
    killed
}

/// Terminate every registered child. Called on service shutdown.
pub fn shutdown_all(grace: Duration) {
    let entries: Vec<(i32, String)> = PROCESS_REGISTRY
        .lock()
        .unwrap()
        .iter()
        .map(|(pid, name)| (*pid, name.clone()))
        .collect();
    if entries.is_empty() {
        return;
    }
    info!("Shutting down {} child process(es)", entries.len());
    for (pid, name) in &entries {
        debug!("SIGTERM {} ({})", name, pid);
        let _ = killpg(Pid::from_raw(*pid), Signal::SIGTERM);
    }
    std::thread::sleep(grace);
    for (pid, _) in &entries {
        let _ = killpg(Pid::from_raw(*pid), Signal::SIGKILL);
    }
    PROCESS_REGISTRY.lock().unwrap().clear();
}

/// A blocking source of decoder output lines, either pipe- or
/// pty-backed. PTY reads turn `EIO` (child gone, slave closed) into
/// end-of-stream.
pub trait LineSource: Send {
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

pub struct PipeSource<R: Read + Send>(pub R);

impl<R: Read + Send> LineSource for PipeSource<R> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

pub struct PtySource(pub std::fs::File);

impl LineSource for PtySource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.0.read(buf) {
            Ok(n) => Ok(n),
            // Linux reports EIO on the master once the slave side is
            // fully closed; treat it as EOF.
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

/// Incremental line splitter over a [`LineSource`].
pub struct LineReader<S: LineSource> {
    source: S,
    buffer: Vec<u8>,
    eof: bool,
}

impl<S: LineSource> LineReader<S> {
    pub fn new(source: S) -> Self {
        LineReader {
            source,
            buffer: Vec::new(),
            eof: false,
        }
    }

    /// Next complete line (without the terminator), or `None` at EOF.
    /// Blocks until a full line is available.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
            if self.eof {
                if self.buffer.is_empty() {
                    return None;
                }
                let rest = String::from_utf8_lossy(&self.buffer).into_owned();
                self.buffer.clear();
                return Some(rest);
            }
            let mut chunk = [0u8; 4096];
            match self.source.read_chunk(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(_) => self.eof = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Registry-count assertions share global state; serialise them.
    static REGISTRY_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn line_reader_splits_crlf_and_partial_lines() {
        struct Feed(Vec<Vec<u8>>);
        impl LineSource for Feed {
            fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.0.is_empty() {
                    return Ok(0);
                }
                let chunk = self.0.remove(0);
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
        }
        let feed = Feed(vec![
            b"first li".to_vec(),
            b"ne\r\nsecond\nta".to_vec(),
            b"il".to_vec(),
        ]);
        let mut reader = LineReader::new(feed);
        assert_eq!(reader.next_line().as_deref(), Some("first line"));
        assert_eq!(reader.next_line().as_deref(), Some("second"));
        assert_eq!(reader.next_line().as_deref(), Some("tail"));
        assert_eq!(reader.next_line(), None);
    }

    #[tokio::test]
    async fn spawn_and_terminate_returns_registry_to_baseline() {
        let _guard = REGISTRY_TEST_LOCK.lock().unwrap();
        let baseline = registered_count();
        let mut spawned =
            spawn_pipe(&argv(&["sleep", "5"]), StdinConfig::Null, true).expect("spawn sleep");
        assert_eq!(registered_count(), baseline + 1);
        ensure_started(&mut spawned, Duration::from_millis(50))
            .await
            .expect("sleep should still be running");
        spawned.handle.safe_terminate(Duration::from_secs(1));
        assert_eq!(registered_count(), baseline);
        assert!(!spawned.handle.is_running());
    }

    #[tokio::test]
    async fn early_exit_is_a_start_failure() {
        let _guard = REGISTRY_TEST_LOCK.lock().unwrap();
        let baseline = registered_count();
        let mut spawned = spawn_pipe(
            &argv(&["sh", "-c", "echo boom >&2; exit 3"]),
            StdinConfig::Null,
            true,
        )
        .expect("spawn sh");
        let err = ensure_started(&mut spawned, Duration::from_millis(300))
            .await
            .expect_err("child exited immediately");
        match err {
            SpawnError::EarlyExit(name, diagnostics) => {
                assert_eq!(name, "sh");
                assert!(diagnostics.contains("boom"), "diagnostics: {diagnostics}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(registered_count(), baseline);
    }

    #[test]
    fn missing_tool_is_reported_by_name() {
        let err = spawn_pipe(
            &argv(&["definitely-not-a-real-tool-xyz"]),
            StdinConfig::Null,
            true,
        )
        .expect_err("tool should be missing");
        assert!(matches!(err, SpawnError::ToolMissing(name) if name.contains("xyz")));
    }

    #[test]
    fn safe_terminate_is_idempotent() {
        let _guard = REGISTRY_TEST_LOCK.lock().unwrap();
        let spawned = spawn_pipe(&argv(&["sleep", "5"]), StdinConfig::Null, true).unwrap();
        spawned.handle.safe_terminate(Duration::from_secs(1));
        spawned.handle.safe_terminate(Duration::from_secs(1));
        assert!(!spawned.handle.is_running());
    }

    #[test]
    fn pty_spawn_produces_unbuffered_lines() {
        let _guard = REGISTRY_TEST_LOCK.lock().unwrap();
        let spawned = spawn_pty(&argv(&["sh", "-c", "echo hello-pty"]), StdinConfig::Null);
        let spawned = match spawned {
            Ok(s) => s,
            Err(e) => panic!("pty spawn failed: {e}"),
        };
        let master = spawned.pty_master.expect("pty master");
        let mut reader = LineReader::new(PtySource(master));
        assert_eq!(reader.next_line().as_deref(), Some("hello-pty"));
        spawned.handle.safe_terminate(Duration::from_secs(1));
    }

    #[test]
    fn tool_available_finds_sh() {
        assert!(tool_available("sh"));
        assert!(!tool_available("definitely-not-a-real-tool-xyz"));
    }
}
