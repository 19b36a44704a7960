//! External command execution with captured output and forced cancellation.
//!
//! Every child is spawned with stdout and stderr piped and drained by two
//! independent tasks, so a child that fills one pipe while the other is idle
//! cannot stall. The runner joins process exit *and* both drains before it
//! reads the exit status.
//!
//! At most one child is active at a time. Its pid is published in an
//! [`ActiveChild`] handle shared with the interrupt handler, which can kill
//! the child together with everything it spawned.

use crate::error::{InstallError, Result};
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Timeout for capability probes such as `espeak-ng --version`.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// ActiveChild
// ---------------------------------------------------------------------------

/// Lock-guarded handle to the currently running child process.
///
/// Cloned into the [`ProcessRunner`] (which writes it) and into the interrupt
/// handler (which reads it and kills).
#[derive(Debug, Clone, Default)]
pub struct ActiveChild {
    pid: Arc<Mutex<Option<u32>>>,
}

impl ActiveChild {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pid of the tracked child, if one is running.
    pub fn current(&self) -> Option<u32> {
        self.pid.lock().ok().and_then(|g| *g)
    }

    fn set(&self, pid: Option<u32>) {
        if let Ok(mut guard) = self.pid.lock() {
            *guard = pid;
        }
    }

    /// Forcibly kill the tracked child and its descendants.
    ///
    /// Returns true if there was a child to kill. Best-effort: the child may
    /// exit between the check and the kill.
    pub fn kill_active(&self) -> bool {
        let Ok(guard) = self.pid.lock() else {
            return false;
        };
        match *guard {
            Some(pid) => {
                kill_tree(pid);
                true
            }
            None => false,
        }
    }
}

#[cfg(unix)]
fn kill_tree(pid: u32) {
    // Children are spawned as process-group leaders, so the group id is the
    // pid and a negative target signals the whole group.
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(windows)]
fn kill_tree(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

// ---------------------------------------------------------------------------
// CommandSpec / ProcessResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Plain(OsString),
    /// Passed to the Windows command line without quoting.
    Raw(OsString),
}

/// One external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<Arg>,
    cwd: Option<PathBuf>,
    env: BTreeMap<OsString, OsString>,
    silent: bool,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            silent: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(Arg::Plain(arg.as_ref().to_os_string()));
        self
    }

    /// Append an argument verbatim on Windows, where tools like `msiexec`
    /// need `PROPERTY="value"` quoting. Elsewhere it is a plain argument.
    pub fn raw_arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(Arg::Raw(arg.as_ref().to_os_string()));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| Arg::Plain(a.as_ref().to_os_string())));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Override one variable for this invocation only. The runner's own
    /// environment is never modified.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .insert(key.as_ref().to_os_string(), value.as_ref().to_os_string());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (k, v) in vars {
            self = self.env(k, v);
        }
        self
    }

    /// Capture output without echoing it to the log.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    fn display_args(&self) -> String {
        self.args
            .iter()
            .map(|a| match a {
                Arg::Plain(a) | Arg::Raw(a) => a.to_string_lossy(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// Exit code, or -1 when the child was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr, falling back to stdout when stderr is blank.
    pub fn diagnostics(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessRunner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    active: ActiveChild,
}

impl ProcessRunner {
    pub fn new(active: ActiveChild) -> Self {
        Self { active }
    }

    pub fn active(&self) -> &ActiveChild {
        &self.active
    }

    /// Run a command and fail with [`InstallError::ProcessExecution`] on a
    /// nonzero exit.
    pub async fn run(&self, spec: &CommandSpec) -> Result<ProcessResult> {
        let result = self.run_with_result(spec).await?;
        if !result.success() {
            return Err(InstallError::ProcessExecution {
                program: spec.program_name(),
                code: (result.exit_code != -1).then_some(result.exit_code),
                output: result.diagnostics().trim_end().to_string(),
            });
        }
        Ok(result)
    }

    /// Run a command and return its result regardless of exit code.
    pub async fn run_with_result(&self, spec: &CommandSpec) -> Result<ProcessResult> {
        let mut cmd = Command::new(&spec.program);
        for arg in &spec.args {
            match arg {
                Arg::Plain(a) => cmd.arg(a),
                #[cfg(windows)]
                Arg::Raw(a) => cmd.raw_arg(a),
                #[cfg(not(windows))]
                Arg::Raw(a) => cmd.arg(a),
            };
        }
        cmd.envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        tracing::debug!(program = %spec.program_name(), args = %spec.display_args(), "spawning");

        let mut child = cmd.spawn().map_err(|source| InstallError::Spawn {
            program: spec.program_name(),
            source,
        })?;
        self.active.set(child.id());

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            self.active.set(None);
            return Err(InstallError::Io(std::io::Error::other(
                "child output was not captured",
            )));
        };

        let echo = !spec.silent;
        let stdout_task = tokio::spawn(drain(stdout, echo));
        let stderr_task = tokio::spawn(drain(stderr, echo));

        // Exit alone does not mean the pipes are empty; wait for both
        // end-of-stream markers too.
        let (status, stdout, stderr) = tokio::join!(child.wait(), stdout_task, stderr_task);
        self.active.set(None);

        let status = status?;
        let stdout = stdout.map_err(std::io::Error::other)?;
        let stderr = stderr.map_err(std::io::Error::other)?;

        Ok(ProcessResult {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

/// Read a stream to its end. The captured text is the exact byte stream,
/// decoded once with invalid UTF-8 replaced; echoing is per line.
async fn drain<R>(reader: R, echo: bool) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    loop {
        let start = raw.len();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                if echo {
                    let line = String::from_utf8_lossy(&raw[start..]);
                    tracing::info!("    {}", line.trim_end_matches(|c: char| c == '\r' || c == '\n'));
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "output stream closed with error");
                break;
            }
        }
    }
    String::from_utf8_lossy(&raw).into_owned()
}

// ---------------------------------------------------------------------------
// Capability probe
// ---------------------------------------------------------------------------

/// True if `program` starts and exits 0 within `timeout`. The child is killed
/// when the timeout expires.
pub async fn probe(program: &str, args: &[&str], timeout: Duration) -> bool {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let Ok(mut child) = cmd.spawn() else {
        return false;
    };
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(_)) => false,
        Err(_) => {
            let _ = child.kill().await;
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script]).silent()
    }

    #[tokio::test]
    async fn captured_output_is_byte_exact() {
        let runner = ProcessRunner::default();
        let result = runner.run(&sh("printf 'a\\r\\nb'")).await.unwrap();
        assert_eq!(result.stdout, "a\r\nb");
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let runner = ProcessRunner::default();
        let result = runner.run(&sh("echo hello")).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello\n");
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn large_stderr_with_no_stdout_does_not_hang() {
        let runner = ProcessRunner::default();
        let spec = sh("head -c 200000 /dev/zero | tr '\\0' x >&2; exit 0");
        let result = tokio::time::timeout(Duration::from_secs(30), runner.run_with_result(&spec))
            .await
            .expect("executor hung on a full stderr pipe")
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.is_empty());
        assert_eq!(result.stderr.trim_end().len(), 200_000);
    }

    #[tokio::test]
    async fn interleaved_streams_are_both_complete() {
        let runner = ProcessRunner::default();
        let spec = sh("for i in $(seq 1 2000); do echo out-$i; echo err-$i >&2; done");
        let result = runner.run_with_result(&spec).await.unwrap();
        assert_eq!(result.stdout.lines().count(), 2000);
        assert_eq!(result.stderr.lines().count(), 2000);
        assert_eq!(result.stderr.lines().last(), Some("err-2000"));
    }

    #[tokio::test]
    async fn nonzero_exit_reports_stderr() {
        let runner = ProcessRunner::default();
        let err = runner
            .run(&sh("echo partial; echo boom >&2; exit 3"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessExecution);
        let msg = err.to_string();
        assert!(msg.contains("code 3"), "{msg}");
        assert!(msg.contains("boom"), "{msg}");
        assert!(!msg.contains("partial"), "{msg}");
    }

    #[tokio::test]
    async fn nonzero_exit_falls_back_to_stdout() {
        let runner = ProcessRunner::default();
        let err = runner.run(&sh("echo only-stdout; exit 1")).await.unwrap_err();
        assert!(err.to_string().contains("only-stdout"));
    }

    #[tokio::test]
    async fn run_with_result_does_not_raise() {
        let runner = ProcessRunner::default();
        let result = runner.run_with_result(&sh("exit 7")).await.unwrap();
        assert_eq!(result.exit_code, 7);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn env_override_and_cwd_apply_to_child_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = ProcessRunner::default();
        let spec = sh("echo $HONK_TEST_VAR; pwd")
            .env("HONK_TEST_VAR", "from-override")
            .current_dir(dir.path());
        let result = runner.run(&spec).await.unwrap();
        let mut lines = result.stdout.lines();
        assert_eq!(lines.next(), Some("from-override"));
        let cwd = std::path::PathBuf::from(lines.next().unwrap());
        assert_eq!(
            cwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        assert!(std::env::var_os("HONK_TEST_VAR").is_none());
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let runner = ProcessRunner::default();
        let err = runner
            .run(&CommandSpec::new("__honk_no_such_binary__"))
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Spawn { .. }));
        assert!(err.to_string().contains("__honk_no_such_binary__"));
    }

    #[tokio::test]
    async fn active_child_is_cleared_after_run() {
        let runner = ProcessRunner::default();
        runner.run(&sh("true")).await.unwrap();
        assert!(runner.active().current().is_none());
        assert!(!runner.active().kill_active());
    }

    #[tokio::test]
    async fn kill_active_terminates_child_and_descendants() {
        let active = ActiveChild::new();
        let runner = ProcessRunner::new(active.clone());

        // The backgrounded sleep inherits the pipes; if only `sh` died the
        // drains would never see end-of-stream.
        let task = tokio::spawn(async move {
            runner
                .run_with_result(&sh("sleep 30 & sleep 30; wait"))
                .await
        });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while active.current().is_none() {
            assert!(tokio::time::Instant::now() < deadline, "child never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(active.kill_active());

        let result = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("killed child did not finish")
            .unwrap()
            .unwrap();
        assert_eq!(result.exit_code, -1);
        assert!(active.current().is_none());
    }

    #[tokio::test]
    async fn probe_reports_presence_and_timeout() {
        assert!(probe("sh", &["-c", "exit 0"], PROBE_TIMEOUT).await);
        assert!(!probe("sh", &["-c", "exit 1"], PROBE_TIMEOUT).await);
        assert!(!probe("__honk_no_such_binary__", &[], PROBE_TIMEOUT).await);
        assert!(!probe("sleep", &["10"], Duration::from_millis(100)).await);
    }
}
