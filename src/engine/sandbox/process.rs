//! Process sandbox
//!
//! Runs each submission in a fresh interpreter process:
//! - private temporary workspace as cwd, removed on drop
//! - cleared environment, stdin closed
//! - own process group, SIGKILLed as a whole at the time limit
//! - rlimits for CPU time, address space, file size and core dumps
//! - when the host allows it, a namespace jail (see `namespace`): no network,
//!   a private `/tmp`, and a PID namespace that takes every descendant down
//!   with the run
//!
//! Without the jail, HOME and TMPDIR point at the workspace and cleanup relies
//! on the process group only. Use the isolate backend for a full OS-level box.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::libc::rlim_t;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::namespace::{namespaces_available, NamespaceJail};
use crate::core::config::{EngineConfig, NamespaceMode};
use crate::core::error::SandboxLaunchError;
use crate::engine::executer::{ExecutionRequest, ExecutionResult, ExecutionStatus, Sandbox};

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
/// Private tmpfs inside the jail
const JAILED_TMP: &str = "/tmp";
/// Largest file a program may write inside its workspace
const FILE_SIZE_LIMIT_BYTES: u64 = 16 * 1024 * 1024;
/// How long to wait for the pipes to close once the group is dead
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Sandbox backed by a fresh child process per run
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    interpreter: Vec<String>,
    source_file: String,
    memory_limit_mb: u32,
    max_output_bytes: usize,
    namespaces: NamespaceMode,
}

impl ProcessSandbox {
    pub fn new(interpreter: Vec<String>, source_file: impl Into<String>) -> Self {
        Self {
            interpreter,
            source_file: source_file.into(),
            memory_limit_mb: 512,
            max_output_bytes: 64 * 1024,
            namespaces: NamespaceMode::Auto,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.interpreter.clone(), config.source_file.clone())
            .with_memory_limit_mb(config.memory_limit_mb)
            .with_max_output_bytes(config.max_output_bytes)
            .with_namespaces(config.namespaces)
    }

    pub fn with_namespaces(mut self, namespaces: NamespaceMode) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Resolve the namespace mode against what the host supports
    pub async fn jailed(&self) -> Result<bool, SandboxLaunchError> {
        match self.namespaces {
            NamespaceMode::Off => Ok(false),
            NamespaceMode::Auto => Ok(namespaces_available().await),
            NamespaceMode::Required if namespaces_available().await => Ok(true),
            NamespaceMode::Required => Err(SandboxLaunchError::NamespacesUnavailable),
        }
    }

    pub fn with_memory_limit_mb(mut self, memory_limit_mb: u32) -> Self {
        self.memory_limit_mb = memory_limit_mb;
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    async fn try_run(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, SandboxLaunchError> {
        let (program, args) = self
            .interpreter
            .split_first()
            .ok_or(SandboxLaunchError::EmptyCommand)?;
        let jailed = self.jailed().await?;

        let workspace = tempfile::Builder::new()
            .prefix("tutor-run-")
            .tempdir()
            .map_err(SandboxLaunchError::Workspace)?;
        let source_path = workspace.path().join(&self.source_file);
        tokio::fs::write(&source_path, &request.source)
            .await
            .map_err(|source| SandboxLaunchError::WriteSource {
                path: source_path.clone(),
                source,
            })?;

        // The jail's tmpfs hides the host /tmp, workspace path included;
        // the cwd stays valid because it is entered before the mount
        let scratch = if jailed {
            std::path::Path::new(JAILED_TMP)
        } else {
            workspace.path()
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&self.source_file)
            .current_dir(workspace.path())
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .env("HOME", scratch)
            .env("TMPDIR", scratch)
            .env("LANG", "C.UTF-8")
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        let rlimits = RlimitPlan::new(request.time_limit, self.memory_limit_mb);
        let jail = jailed.then(NamespaceJail::new);
        // SAFETY: setrlimit(2) and the jail's calls are async-signal-safe.
        unsafe {
            cmd.pre_exec(move || {
                rlimits.apply()?;
                match &jail {
                    Some(jail) => jail.enter(),
                    None => Ok(()),
                }
            });
        }

        debug!(jailed, "spawning sandboxed process");
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| SandboxLaunchError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        let stdout_task = spawn_capture(child.stdout.take(), self.max_output_bytes);
        let stderr_task = spawn_capture(child.stderr.take(), self.max_output_bytes);

        let status = match tokio::time::timeout(request.time_limit, child.wait()).await {
            Ok(Ok(exit)) => classify_exit(exit),
            Ok(Err(e)) => {
                kill_group(pid);
                return Err(SandboxLaunchError::Wait(e));
            }
            Err(_) => {
                debug!(pid = ?pid, "time limit reached, killing process group");
                kill_group(pid);
                if let Err(e) = child.kill().await {
                    warn!(pid = ?pid, error = %e, "failed to reap timed-out process");
                }
                ExecutionStatus::timed_out(request.time_limit)
            }
        };
        let duration = started.elapsed();

        // Background children must not outlive the run. Inside the jail the
        // namespace init is in this group too, and its death takes down
        // processes that left the group.
        kill_group(pid);

        let (stdout, stdout_truncated) = finish_capture(stdout_task).await;
        let (stderr, stderr_truncated) = finish_capture(stderr_task).await;

        if let Err(e) = workspace.close() {
            warn!(error = %e, "failed to remove execution workspace");
        }

        Ok(ExecutionResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            status,
            duration,
            output_truncated: stdout_truncated || stderr_truncated,
        })
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        match self.try_run(request).await {
            Ok(result) => result,
            Err(e) => ExecutionResult::launch_failure(e.to_string()),
        }
    }
}

/// Resource limits applied in the child between fork and exec
#[derive(Debug, Clone, Copy)]
struct RlimitPlan {
    cpu_secs: rlim_t,
    address_space_bytes: rlim_t,
}

impl RlimitPlan {
    fn new(time_limit: Duration, memory_limit_mb: u32) -> Self {
        // CPU limit sits above the wall limit so the wall clock always wins
        let cpu_secs = time_limit.as_secs() + 2;
        Self {
            cpu_secs: cpu_secs as rlim_t,
            address_space_bytes: (memory_limit_mb as u64 * 1024 * 1024) as rlim_t,
        }
    }

    fn apply(&self) -> std::io::Result<()> {
        setrlimit(Resource::RLIMIT_CPU, self.cpu_secs, self.cpu_secs)?;
        setrlimit(
            Resource::RLIMIT_AS,
            self.address_space_bytes,
            self.address_space_bytes,
        )?;
        setrlimit(
            Resource::RLIMIT_FSIZE,
            FILE_SIZE_LIMIT_BYTES as rlim_t,
            FILE_SIZE_LIMIT_BYTES as rlim_t,
        )?;
        setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
        Ok(())
    }
}

fn classify_exit(exit: ExitStatus) -> ExecutionStatus {
    match (exit.code(), exit.signal()) {
        (Some(0), _) => ExecutionStatus::Success,
        (Some(code), _) => ExecutionStatus::NonZero { code },
        (None, Some(signal)) => ExecutionStatus::Signaled { signal },
        (None, None) => ExecutionStatus::Signaled { signal: 0 },
    }
}

/// SIGKILL the whole process group led by `pid`
fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "failed to kill process group"),
    }
}

type CaptureTask = Option<JoinHandle<std::io::Result<(Vec<u8>, bool)>>>;

fn spawn_capture<R>(reader: Option<R>, max_bytes: usize) -> CaptureTask
where
    R: AsyncRead + Unpin + Send + 'static,
{
    reader.map(|r| tokio::spawn(capture(r, max_bytes)))
}

/// Read a stream to EOF, keeping at most `max_bytes` and draining the rest
async fn capture<R: AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = max_bytes.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..n.min(room)]);
        if n > room {
            truncated = true;
        }
    }

    Ok((buf, truncated))
}

async fn finish_capture(task: CaptureTask) -> (Vec<u8>, bool) {
    let Some(mut handle) = task else {
        return (Vec::new(), false);
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut handle).await {
        Ok(Ok(Ok(captured))) => captured,
        Ok(Ok(Err(e))) => {
            warn!(error = %e, "failed to read program output");
            (Vec::new(), false)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "output capture task failed");
            (Vec::new(), false)
        }
        Err(_) => {
            // Something outside the process group still holds the pipe
            handle.abort();
            warn!("output pipe still open after kill; discarding");
            (Vec::new(), true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executer::execute;

    fn shell() -> ProcessSandbox {
        ProcessSandbox::new(vec!["sh".to_string()], "main.sh")
    }

    fn request(source: &str, limit_ms: u64) -> ExecutionRequest {
        ExecutionRequest::new(source).with_time_limit(Duration::from_millis(limit_ms))
    }

    /// Host directory outside `/tmp`, so jailed runs can still reach it
    fn marker_dir() -> tempfile::TempDir {
        tempfile::tempdir_in(env!("CARGO_MANIFEST_DIR")).unwrap()
    }

    #[tokio::test]
    async fn test_captures_streams_separately() {
        let result = execute(&shell(), &request("echo out\necho err >&2\n", 5000)).await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(!result.output_truncated);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let result = shell().run(&request("echo boom >&2\nexit 3\n", 5000)).await;

        assert_eq!(result.status, ExecutionStatus::NonZero { code: 3 });
        assert_eq!(result.stderr, "boom\n");
    }

    #[tokio::test]
    async fn test_signal_death() {
        let result = shell().run(&request("kill -SEGV $$\n", 5000)).await;

        assert_eq!(result.status, ExecutionStatus::Signaled { signal: 11 });
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reports_timed_out() {
        let markers = marker_dir();
        let marker = markers.path().join("late");
        let script = format!(
            "(sleep 1; echo late > {})&\necho almost done\nsleep 30\n",
            marker.display()
        );

        let started = Instant::now();
        let result = shell().run(&request(&script, 300)).await;

        assert_eq!(
            result.status,
            ExecutionStatus::TimedOut { limit_ms: 300 }
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(result.duration >= Duration::from_millis(300));
        assert_eq!(result.stdout, "almost done\n");

        // Nothing from the run is left to write the marker
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_busy_loop_times_out() {
        let result = shell().run(&request("while :; do :; done\n", 400)).await;
        assert_eq!(
            result.status,
            ExecutionStatus::TimedOut { limit_ms: 400 }
        );
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let sandbox = shell().with_max_output_bytes(16);
        let result = sandbox
            .run(&request("i=0\nwhile [ $i -lt 100 ]; do echo line$i; i=$((i+1)); done\n", 5000))
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.stdout.len(), 16);
        assert!(result.output_truncated);
    }

    #[tokio::test]
    async fn test_environment_is_cleared_and_stdin_closed() {
        std::env::set_var("TUTOR_JUDGE_SECRET", "leak");
        let result = shell()
            .run(&request(
                "echo \"[$TUTOR_JUDGE_SECRET]\"\nread line || echo no-stdin\n",
                5000,
            ))
            .await;

        assert_eq!(result.stdout, "[]\nno-stdin\n");
    }

    #[tokio::test]
    async fn test_workspace_is_removed() {
        let result = shell().run(&request("pwd\n", 5000)).await;
        let workspace = std::path::PathBuf::from(result.stdout.trim());

        assert!(workspace.file_name().unwrap().to_string_lossy().starts_with("tutor-run-"));
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn test_workspace_is_removed_after_timeout() {
        let result = shell().run(&request("pwd\nsleep 30\n", 300)).await;
        let workspace = std::path::PathBuf::from(result.stdout.trim());

        assert!(matches!(result.status, ExecutionStatus::TimedOut { .. }));
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_share_artifacts() {
        let sandbox = shell();
        let script = |tag: &str| {
            format!(
                "echo {tag} > scratch.txt\necho {tag} > \"$TMPDIR/shared.tmp\"\nsleep 0.3\ncat scratch.txt \"$TMPDIR/shared.tmp\"\n"
            )
        };
        let a = request(&script("alpha"), 5000);
        let b = request(&script("beta"), 5000);

        let (ra, rb) = tokio::join!(sandbox.run(&a), sandbox.run(&b));

        assert_eq!(ra.stdout, "alpha\nalpha\n");
        assert_eq!(rb.stdout, "beta\nbeta\n");
    }

    #[tokio::test]
    async fn test_concurrent_runs_get_private_tmp() {
        if !namespaces_available().await {
            eprintln!("namespace isolation unavailable; skipping");
            return;
        }
        let sandbox = shell();
        let script = |tag: &str| {
            format!("echo {tag} > /tmp/tutor_shared.txt\nsleep 0.3\ncat /tmp/tutor_shared.txt\n")
        };
        let a = request(&script("alpha"), 5000);
        let b = request(&script("beta"), 5000);

        let (ra, rb) = tokio::join!(sandbox.run(&a), sandbox.run(&b));

        assert_eq!(ra.stdout, "alpha\n");
        assert_eq!(rb.stdout, "beta\n");
        assert!(!std::path::Path::new("/tmp/tutor_shared.txt").exists());
    }

    #[tokio::test]
    async fn test_jailed_run_has_no_network() {
        if !namespaces_available().await {
            eprintln!("namespace isolation unavailable; skipping");
            return;
        }
        // Interface lines in the run's own network namespace: loopback only
        let result = shell().run(&request("grep -c : /proc/net/dev\n", 5000)).await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.stdout.trim(), "1");
    }

    #[tokio::test]
    async fn test_detached_session_dies_with_the_run() {
        if !namespaces_available().await {
            eprintln!("namespace isolation unavailable; skipping");
            return;
        }
        let markers = marker_dir();
        let marker = markers.path().join("escaped");
        let script = format!(
            "setsid sh -c 'sleep 1; echo alive > {}' >/dev/null 2>&1 </dev/null &\necho started\n",
            marker.display()
        );

        let result = shell().run(&request(&script, 1000)).await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.stdout, "started\n");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_jail_keeps_exit_codes_and_signals() {
        let sandbox = shell().with_namespaces(NamespaceMode::Auto);

        let result = sandbox.run(&request("exit 7\n", 5000)).await;
        assert_eq!(result.status, ExecutionStatus::NonZero { code: 7 });

        let result = sandbox.run(&request("kill -TERM $$\n", 5000)).await;
        assert_eq!(result.status, ExecutionStatus::Signaled { signal: 15 });
    }

    #[tokio::test]
    async fn test_unjailed_mode_still_runs() {
        let result = shell()
            .with_namespaces(NamespaceMode::Off)
            .run(&request("echo \"$TMPDIR\"\n", 5000))
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert!(result.stdout.contains("tutor-run-"));
    }

    #[tokio::test]
    async fn test_required_jail_without_support_is_launch_failure() {
        if namespaces_available().await {
            return;
        }
        let result = shell()
            .with_namespaces(NamespaceMode::Required)
            .run(&request("echo hi\n", 5000))
            .await;

        assert!(matches!(
            result.status,
            ExecutionStatus::LaunchFailure { .. }
        ));
    }

    #[tokio::test]
    async fn test_padded_answer_past_the_cap_is_not_graded_correct() {
        use crate::core::catalog::ExerciseDefinition;
        use crate::core::verdict::VerdictKind;
        use crate::engine::grader::grade;

        let exercise = ExerciseDefinition {
            id: 1,
            title: "One".to_string(),
            prompt: "Print 1".to_string(),
            context: String::new(),
            starter_code: String::new(),
            expected_output: "1\n".to_string(),
            hints: Vec::new(),
        };
        let script = "printf '1'\nhead -c 70000 /dev/zero | tr '\\0' ' '\necho GARBAGE\n";

        let result = shell().run(&request(script, 5000)).await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert!(result.output_truncated);

        let verdict = grade(&result, &exercise);
        assert!(!verdict.correct);
        assert_eq!(verdict.kind, VerdictKind::WrongOutput);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_launch_failure() {
        let sandbox = ProcessSandbox::new(
            vec!["/nonexistent/interpreter".to_string()],
            "main.py",
        );
        let result = sandbox.run(&request("print(1)", 5000)).await;

        match result.status {
            ExecutionStatus::LaunchFailure { reason } => {
                assert!(reason.contains("/nonexistent/interpreter"));
            }
            other => panic!("expected launch failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_interpreter_is_launch_failure() {
        let sandbox = ProcessSandbox::new(vec![], "main.py");
        let result = sandbox.run(&request("print(1)", 5000)).await;
        assert!(matches!(
            result.status,
            ExecutionStatus::LaunchFailure { .. }
        ));
    }
}
