//! Command execution
//!
//! Runs one shell command per call in its own process group, bounded by a
//! timeout, an external cancellation token and an output ceiling. A sampler
//! task records peak memory and CPU of the group leader while it runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, System};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ExecutionConfig;
use crate::process_group;
use crate::shell;

/// Appended to output cut at the byte ceiling
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

pub const TIMEOUT_EXIT_CODE: i32 = -1;
pub const INTERRUPTED_EXIT_CODE: i32 = -2;

/// How long to wait for output pipes after the process is gone
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 8192;

/// One command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub command: String,
    pub timeout: Duration,
    /// Defaults to the current directory
    pub working_directory: Option<PathBuf>,
    /// Overlaid on the inherited environment
    pub env: BTreeMap<String, String>,
    /// When false the child writes straight to our stdout/stderr
    pub capture_output: bool,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            working_directory: None,
            env: BTreeMap::new(),
            capture_output: true,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn capture(mut self, capture_output: bool) -> Self {
        self.capture_output = capture_output;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Timeout,
    Interrupted,
    Error,
}

/// Peak usage observed by the sampler
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub peak_memory_mb: f64,
    pub peak_cpu_percent: f32,
    pub wall_time: Duration,
}

/// Outcome of a single execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub command: String,
    /// Whether the command exited with code 0
    pub success: bool,
    pub exit_code: i32,
    /// Standard output, possibly truncated
    pub stdout: String,
    /// Standard error, possibly truncated
    pub stderr: String,
    pub execution_time: Duration,
    pub status: ExecutionStatus,
    pub process_id: Option<u32>,
    pub resource_usage: Option<ResourceUsage>,
    pub error_message: Option<String>,
    /// Whether either stream hit the output ceiling
    pub truncated: bool,
}

impl ExecutionResult {
    fn engine_error(command: &str, message: String, elapsed: Duration) -> Self {
        Self {
            command: command.to_string(),
            success: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: message.clone(),
            execution_time: elapsed,
            status: ExecutionStatus::Error,
            process_id: None,
            resource_usage: None,
            error_message: Some(message),
            truncated: false,
        }
    }
}

/// Where a command resolves on `PATH`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    pub program: String,
    pub path: Option<PathBuf>,
    pub args: Vec<String>,
}

#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    overflowed: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Peaks {
    memory_mb: f64,
    cpu_percent: f32,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Interrupted,
}

/// Cancels the sampler when the execution scope ends, however it ends
struct SamplerGuard(CancellationToken);

impl Drop for SamplerGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Executes shell commands under time, output and cancellation bounds
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: String,
    /// Used by `request`
    default_timeout: Duration,
    /// Maximum bytes kept per stream
    max_output_bytes: usize,
    grace_period: Duration,
    sample_interval: Duration,
    /// Advisory ceilings, logged when exceeded
    max_memory_mb: u64,
    max_cpu_percent: f32,
    env: BTreeMap<String, String>,
}

impl CommandExecutor {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            shell: config.resolved_shell(),
            default_timeout: config.timeout(),
            max_output_bytes: config.max_output_bytes,
            grace_period: config.grace_period(),
            sample_interval: config.sample_interval(),
            max_memory_mb: config.max_memory_mb,
            max_cpu_percent: config.max_cpu_percent,
            env: config.env.clone(),
        }
    }

    /// Create a CommandExecutor with custom limits (for testing)
    #[cfg(test)]
    pub fn with_limits(max_output_bytes: usize, timeout: Duration) -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            default_timeout: timeout,
            max_output_bytes,
            grace_period: Duration::from_secs(1),
            sample_interval: Duration::from_millis(100),
            max_memory_mb: 1024,
            max_cpu_percent: 100.0,
            env: BTreeMap::new(),
        }
    }

    /// A request with this executor's default timeout
    pub fn request(&self, command: impl Into<String>) -> ExecutionRequest {
        ExecutionRequest::new(command, self.default_timeout)
    }

    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        self.run(request, None, cancel).await
    }

    /// Execute with `input` written to the child's stdin
    pub async fn execute_with_input(
        &self,
        request: &ExecutionRequest,
        input: &str,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        self.run(request, Some(input.to_string()), cancel).await
    }

    /// Validate syntax without spawning anything
    pub fn execute_dry_run(&self, command: &str) -> ExecutionResult {
        let started = Instant::now();
        if let Err(e) = shell::validate_syntax(command) {
            return ExecutionResult::engine_error(command, e.to_string(), started.elapsed());
        }
        ExecutionResult {
            command: command.to_string(),
            success: true,
            exit_code: 0,
            stdout: format!("[dry run] would execute: {command}"),
            stderr: String::new(),
            execution_time: started.elapsed(),
            status: ExecutionStatus::Success,
            process_id: None,
            resource_usage: None,
            error_message: None,
            truncated: false,
        }
    }

    async fn run(
        &self,
        request: &ExecutionRequest,
        input: Option<String>,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        let command = request.command.as_str();

        let piped = |enabled: bool| if enabled { Stdio::piped() } else { Stdio::inherit() };
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .envs(&self.env)
            .envs(&request.env)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(piped(request.capture_output))
            .stderr(piped(request.capture_output))
            .kill_on_drop(true);
        if let Some(dir) = &request.working_directory {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(command, error = %e, "failed to spawn command");
                return ExecutionResult::engine_error(
                    command,
                    format!("Failed to execute command: {e}"),
                    started.elapsed(),
                );
            }
        };

        let pid = child.id();
        let pgid = if cfg!(unix) { pid } else { None };
        tracing::info!(command, ?pid, "executing command");

        if let (Some(mut stdin), Some(input)) = (child.stdin.take(), input) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!(error = %e, "stdin closed early");
                }
            });
        }

        let stdout = Arc::new(Mutex::new(Capture::default()));
        let stderr = Arc::new(Mutex::new(Capture::default()));
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(self.spawn_reader(out, Arc::clone(&stdout)));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(self.spawn_reader(err, Arc::clone(&stderr)));
        }

        let sampler_token = CancellationToken::new();
        let guard = SamplerGuard(sampler_token.clone());
        let sampler = pid.map(|pid| {
            tokio::spawn(sample_resources(
                pid,
                self.sample_interval,
                self.max_memory_mb,
                self.max_cpu_percent,
                sampler_token,
            ))
        });

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(request.timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Interrupted,
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            process_group::terminate(&mut child, pgid, self.grace_period).await;
        }

        drop(guard);
        let peaks = match sampler {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Peaks::default(),
        };
        for mut reader in readers {
            if !drain_reader(&mut reader, PIPE_DRAIN_TIMEOUT).await {
                tracing::debug!(command, "output pipe still open, keeping partial output");
            }
        }

        let elapsed = started.elapsed();
        let (stdout, stdout_truncated) = self.finish_capture(&stdout.lock());
        let (mut stderr, stderr_truncated) = self.finish_capture(&stderr.lock());
        let resource_usage = pid.map(|_| ResourceUsage {
            peak_memory_mb: peaks.memory_mb,
            peak_cpu_percent: peaks.cpu_percent,
            wall_time: elapsed,
        });

        let (status, exit_code, error_message) = match outcome {
            Outcome::Exited(Ok(status)) => {
                let code = exit_code_of(status);
                let status = if code == 0 {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::Failed
                };
                (status, code, None)
            }
            Outcome::Exited(Err(e)) => {
                let message = format!("Failed to wait for command: {e}");
                (ExecutionStatus::Error, -1, Some(message))
            }
            Outcome::TimedOut => {
                let message = format!(
                    "Command timed out after {} seconds",
                    request.timeout.as_secs_f64()
                );
                tracing::warn!(command, timeout_secs = request.timeout.as_secs_f64(), "command timed out");
                (ExecutionStatus::Timeout, TIMEOUT_EXIT_CODE, Some(message))
            }
            Outcome::Interrupted => {
                tracing::warn!(command, "command interrupted");
                let message = "Command interrupted".to_string();
                (ExecutionStatus::Interrupted, INTERRUPTED_EXIT_CODE, Some(message))
            }
        };

        if let Some(message) = &error_message {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(message);
        }

        tracing::info!(
            command,
            exit_code,
            status = ?status,
            elapsed_ms = elapsed.as_millis() as u64,
            "command finished"
        );

        ExecutionResult {
            command: command.to_string(),
            success: status == ExecutionStatus::Success,
            exit_code,
            stdout,
            stderr,
            execution_time: elapsed,
            status,
            process_id: pid,
            resource_usage,
            error_message,
            truncated: stdout_truncated || stderr_truncated,
        }
    }

    fn spawn_reader<R>(&self, reader: R, sink: Arc<Mutex<Capture>>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(read_capped(reader, self.max_output_bytes, sink))
    }

    fn finish_capture(&self, capture: &Capture) -> (String, bool) {
        let text = String::from_utf8_lossy(&capture.bytes).into_owned();
        let (mut text, truncated) = self.truncate_output(text);
        if capture.overflowed && !truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        (text, truncated || capture.overflowed)
    }

    /// Truncate output to the byte ceiling at a char boundary
    ///
    /// Returns (truncated_output, was_truncated)
    pub fn truncate_output(&self, output: String) -> (String, bool) {
        if output.len() <= self.max_output_bytes {
            return (output, false);
        }
        let mut byte_limit = self.max_output_bytes;
        while byte_limit > 0 && !output.is_char_boundary(byte_limit) {
            byte_limit -= 1;
        }
        let mut result = output[..byte_limit].to_string();
        result.push_str(TRUNCATION_MARKER);
        (result, true)
    }

    /// Resolve the program of `command` on `PATH`
    pub fn command_info(&self, command: &str) -> Option<CommandInfo> {
        let mut words = shell::words(command)?.into_iter();
        let program = words.next()?;
        let path = if program.contains('/') {
            let candidate = PathBuf::from(&program);
            is_executable(&candidate).then_some(candidate)
        } else {
            std::env::var_os("PATH").and_then(|paths| {
                std::env::split_paths(&paths)
                    .map(|dir| dir.join(&program))
                    .find(|candidate| is_executable(candidate))
            })
        };
        Some(CommandInfo {
            program,
            path,
            args: words.collect(),
        })
    }
}

/// Wait for a reader to hit EOF, aborting it once `limit` passes
///
/// A background grandchild can hold the pipe open long after the command
/// itself is gone.
async fn drain_reader(reader: &mut JoinHandle<()>, limit: Duration) -> bool {
    if tokio::time::timeout(limit, &mut *reader).await.is_ok() {
        return true;
    }
    reader.abort();
    false
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize, sink: Arc<Mutex<Capture>>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                // keep draining past the ceiling so the child never blocks on a full pipe
                let mut capture = sink.lock();
                let room = limit.saturating_sub(capture.bytes.len());
                let take = n.min(room);
                capture.bytes.extend_from_slice(&buf[..take]);
                if take < n {
                    capture.overflowed = true;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "output reader stopped");
                break;
            }
        }
    }
}

async fn sample_resources(
    pid: u32,
    interval: Duration,
    max_memory_mb: u64,
    max_cpu_percent: f32,
    token: CancellationToken,
) -> Peaks {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    let mut peaks = Peaks::default();
    let mut warned_memory = false;
    let mut warned_cpu = false;

    loop {
        if !sys.refresh_process(pid) {
            tracing::debug!(%pid, "process gone, sampler stopping");
            break;
        }
        if let Some(process) = sys.process(pid) {
            let memory_mb = process.memory() as f64 / (1024.0 * 1024.0);
            let cpu = process.cpu_usage();
            peaks.memory_mb = peaks.memory_mb.max(memory_mb);
            peaks.cpu_percent = peaks.cpu_percent.max(cpu);

            if !warned_memory && memory_mb > max_memory_mb as f64 {
                tracing::warn!(%pid, memory_mb, max_memory_mb, "process exceeds memory limit");
                warned_memory = true;
            }
            if !warned_cpu && cpu > max_cpu_percent {
                tracing::warn!(%pid, cpu, max_cpu_percent, "process exceeds CPU limit");
                warned_cpu = true;
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    peaks
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn executor() -> CommandExecutor {
        CommandExecutor::with_limits(50 * 1024, Duration::from_secs(10))
    }

    async fn run(executor: &CommandExecutor, command: &str) -> ExecutionResult {
        executor
            .execute(&executor.request(command), &CancellationToken::new())
            .await
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let result = run(&executor(), "echo out && echo err >&2").await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(result.process_id.is_some());
        assert!(result.error_message.is_none());
    }

    #[tokio::test]
    async fn test_stuck_reader_is_aborted() {
        let mut reader = tokio::spawn(std::future::pending::<()>());

        assert!(!drain_reader(&mut reader, Duration::from_millis(50)).await);
        assert!(reader.await.unwrap_err().is_cancelled());

        let mut done = tokio::spawn(async {});
        assert!(drain_reader(&mut done, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_background_grandchild_does_not_hold_result() {
        let result = run(&executor(), "sleep 5 & echo done").await;

        assert!(result.success);
        assert_eq!(result.stdout, "done\n");
        assert!(result.execution_time < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_command_with_no_output() {
        let result = run(&executor(), "true").await;

        assert!(result.success);
        assert!(result.stdout.is_empty());
        assert!(result.stderr.is_empty());
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_failed_command() {
        let result = run(&executor(), "nonexistent_command_12345").await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(!result.success);
        assert_eq!(result.exit_code, 127);
        assert!(!result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_engine_error() {
        let mut executor = executor();
        executor.shell = "/nonexistent/shell".to_string();

        let result = run(&executor, "echo hi").await;

        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.exit_code, -1);
        assert!(result.process_id.is_none());
        assert!(result.error_message.unwrap().contains("Failed to execute command"));
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let executor = executor();
        let request = ExecutionRequest::new("echo started; exec sleep 30", Duration::from_millis(300));

        let started = Instant::now();
        let result = executor.execute(&request, &CancellationToken::new()).await;

        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(!result.success);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(result.stdout, "started\n");
        assert!(result.stderr.contains("timed out"));

        let pgid = result.process_id.unwrap();
        assert!(!process_group::group_alive(pgid));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts() {
        let executor = executor();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let result = executor.execute(&executor.request("exec sleep 30"), &cancel).await;

        assert_eq!(result.status, ExecutionStatus::Interrupted);
        assert_eq!(result.exit_code, INTERRUPTED_EXIT_CODE);
        assert_eq!(result.error_message.as_deref(), Some("Command interrupted"));
        assert!(!process_group::group_alive(result.process_id.unwrap()));
    }

    #[tokio::test]
    async fn test_large_output_is_truncated() {
        let executor = CommandExecutor::with_limits(100, Duration::from_secs(10));
        let result = run(&executor, "seq 1 10000").await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert!(result.truncated);
        assert!(result.stdout.ends_with(TRUNCATION_MARKER));
        assert!(result.stdout.len() <= 100 + TRUNCATION_MARKER.len());
        assert!(result.stdout.starts_with("1\n2\n3\n"));
    }

    #[tokio::test]
    async fn test_working_directory_and_env() {
        let dir = TempDir::new().unwrap();
        let executor = executor();
        let request = executor
            .request("pwd; echo \"$AISH_TEST_VALUE\"")
            .in_dir(dir.path())
            .with_env("AISH_TEST_VALUE", "hello");

        let result = executor.execute(&request, &CancellationToken::new()).await;

        let expected_dir = dir.path().canonicalize().unwrap();
        let mut lines = result.stdout.lines();
        assert_eq!(
            PathBuf::from(lines.next().unwrap()).canonicalize().unwrap(),
            expected_dir
        );
        assert_eq!(lines.next(), Some("hello"));
    }

    #[tokio::test]
    async fn test_execute_with_input() {
        let executor = executor();
        let result = executor
            .execute_with_input(&executor.request("tr a-z A-Z"), "hello", &CancellationToken::new())
            .await;

        assert!(result.success);
        assert_eq!(result.stdout, "HELLO");
    }

    #[tokio::test]
    async fn test_resource_usage_recorded() {
        let result = run(&executor(), "sleep 0.3").await;

        let usage = result.resource_usage.unwrap();
        assert!(usage.wall_time >= Duration::from_millis(300));
        assert!(usage.peak_memory_mb >= 0.0);
    }

    #[test]
    fn test_dry_run_does_not_spawn() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("created");
        let executor = executor();

        let result = executor.execute_dry_run(&format!("touch {}", marker.display()));

        assert!(result.success);
        assert_eq!(result.status, ExecutionStatus::Success);
        assert!(result.process_id.is_none());
        assert!(!marker.exists());

        let result = executor.execute_dry_run("echo 'unclosed");
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.error_message.is_some());
    }

    #[test]
    fn test_command_info() {
        let executor = executor();

        let info = executor.command_info("sh -c true").unwrap();
        assert_eq!(info.program, "sh");
        assert!(info.path.is_some());
        assert_eq!(info.args, vec!["-c", "true"]);

        let info = executor.command_info("no_such_program_98765 --flag").unwrap();
        assert!(info.path.is_none());
        assert!(executor.command_info("").is_none());
    }

    #[test]
    fn test_truncation_marker_appended() {
        let executor = CommandExecutor::with_limits(10, Duration::from_secs(1));
        let (output, truncated) = executor.truncate_output("x".repeat(100));

        assert!(truncated);
        assert_eq!(output, format!("{}{}", "x".repeat(10), TRUNCATION_MARKER));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_truncation_bounded(len in 0usize..200, max_bytes in 1usize..100) {
            let executor = CommandExecutor::with_limits(max_bytes, Duration::from_secs(1));
            let content = "x".repeat(len);

            let (output, truncated) = executor.truncate_output(content.clone());

            prop_assert_eq!(truncated, len > max_bytes);
            if truncated {
                prop_assert!(output.ends_with(TRUNCATION_MARKER));
                prop_assert!(output.len() <= max_bytes + TRUNCATION_MARKER.len());
            } else {
                prop_assert_eq!(output, content);
            }
        }

        #[test]
        fn prop_truncation_keeps_char_boundaries(char_count in 10usize..100) {
            let executor = CommandExecutor::with_limits(50, Duration::from_secs(1));
            let (output, truncated) = executor.truncate_output("🎉".repeat(char_count));

            // 4-byte chars, so at most 12 fit under the ceiling
            prop_assert_eq!(truncated, char_count * 4 > 50);
            let body = output.strip_suffix(TRUNCATION_MARKER).unwrap_or(&output);
            prop_assert!(body.chars().all(|c| c == '🎉'));
            prop_assert!(body.len() <= 50);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_exit_code_classification(exit_code in 0i32..128) {
            let executor = executor();
            let result = block_on(run(&executor, &format!("exit {exit_code}")));

            prop_assert_eq!(result.exit_code, exit_code);
            prop_assert_eq!(result.success, exit_code == 0);
            let expected = if exit_code == 0 { ExecutionStatus::Success } else { ExecutionStatus::Failed };
            prop_assert_eq!(result.status, expected);
        }
    }
}
