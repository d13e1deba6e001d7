//! Isolate sandbox
//!
//! Runs each submission in a fresh IOI isolate box: init, copy the source in,
//! run with separate stdout/stderr files and a meta file, then cleanup.
//! Box ids come from the per-worker `BoxIdAllocator`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::config::BoxIdAllocator;
use super::meta::IsolateMeta;
use crate::core::config::EngineConfig;
use crate::core::error::SandboxLaunchError;
use crate::engine::executer::{ExecutionRequest, ExecutionResult, Sandbox};

const STDOUT_FILE: &str = "stdout.txt";
const STDERR_FILE: &str = "stderr.txt";
const MAX_PROCESSES: u32 = 64;
const OPEN_FILES: u32 = 64;
const FSIZE_KB: u32 = 16 * 1024;

static USE_CGROUPS: OnceLock<bool> = OnceLock::new();

/// Check (once) whether isolate can create cgroup boxes on this host.
///
/// `box_id` must belong to the calling worker so the check's cleanup can
/// never tear down another worker's live box.
pub async fn is_cgroups_available(box_id: u32) -> bool {
    if let Some(value) = USE_CGROUPS.get() {
        return *value;
    }

    let check = isolate_cmd(box_id).arg("--init").output().await;
    let _ = isolate_cmd(box_id).arg("--cleanup").output().await;

    let available = matches!(check, Ok(ref out) if out.status.success());
    let _ = USE_CGROUPS.set(available);
    available
}

/// One initialized isolate box. Call `cleanup` when done.
struct IsolateBox {
    box_id: u32,
    box_path: PathBuf,
}

impl IsolateBox {
    async fn init(box_id: u32) -> Result<Self, SandboxLaunchError> {
        // Leftovers from a crashed worker
        let _ = isolate_cmd(box_id).arg("--cleanup").output().await;

        let output = isolate_cmd(box_id)
            .arg("--init")
            .output()
            .await
            .map_err(|source| SandboxLaunchError::Spawn {
                program: "isolate".to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(SandboxLaunchError::Isolate(format!(
                "box {} init failed: {}",
                box_id,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let box_path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        debug!(box_id, path = ?box_path, "initialized isolate box");
        Ok(Self { box_id, box_path })
    }

    fn work_dir(&self) -> PathBuf {
        self.box_path.join("box")
    }

    async fn cleanup(self) {
        match isolate_cmd(self.box_id).arg("--cleanup").output().await {
            Ok(out) if out.status.success() => {}
            Ok(out) => warn!(
                box_id = self.box_id,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "isolate cleanup failed"
            ),
            Err(e) => warn!(box_id = self.box_id, error = %e, "isolate cleanup failed"),
        }
    }
}

fn isolate_cmd(box_id: u32) -> Command {
    let mut cmd = Command::new("isolate");
    cmd.arg("--box-id").arg(box_id.to_string()).arg("--cg");
    cmd
}

/// Sandbox backed by IOI isolate with cgroups
#[derive(Debug)]
pub struct IsolateSandbox {
    interpreter: Vec<String>,
    source_file: String,
    memory_limit_mb: u32,
    max_output_bytes: usize,
    boxes: BoxIdAllocator,
}

impl IsolateSandbox {
    /// Fails when isolate or its cgroup support is missing
    pub async fn from_config(
        config: &EngineConfig,
        worker_id: u32,
    ) -> Result<Self, SandboxLaunchError> {
        if config.interpreter.is_empty() {
            return Err(SandboxLaunchError::EmptyCommand);
        }
        let boxes = BoxIdAllocator::new(worker_id);
        if !is_cgroups_available(boxes.first_box_id()).await {
            return Err(SandboxLaunchError::Isolate(
                "isolate with cgroup support is required but not available".to_string(),
            ));
        }
        info!(worker_id, "using isolate sandbox");

        Ok(Self {
            interpreter: config.interpreter.clone(),
            source_file: config.source_file.clone(),
            memory_limit_mb: config.memory_limit_mb,
            max_output_bytes: config.max_output_bytes,
            boxes,
        })
    }

    fn run_args(&self, request: &ExecutionRequest, meta_path: &Path) -> Vec<String> {
        let limit_secs = request.time_limit.as_secs_f64();

        let mut args = vec![
            format!("--cg-mem={}", self.memory_limit_mb * 1024),
            format!("--time={}", limit_secs),
            format!("--wall-time={}", limit_secs),
            format!("--meta={}", meta_path.display()),
            format!("--stdout={}", STDOUT_FILE),
            format!("--stderr={}", STDERR_FILE),
            format!("--processes={}", MAX_PROCESSES),
            format!("--open-files={}", OPEN_FILES),
            format!("--fsize={}", FSIZE_KB),
            "--dir=/usr".to_string(),
            "--dir=/lib".to_string(),
            "--dir=/lib64:maybe".to_string(),
            "--dir=/etc:noexec".to_string(),
            "--env=PATH=/usr/local/bin:/usr/bin:/bin".to_string(),
            "--env=HOME=/box".to_string(),
            "--env=LANG=C.UTF-8".to_string(),
            "--env=PYTHONIOENCODING=utf-8".to_string(),
            "--run".to_string(),
            "--".to_string(),
        ];

        let mut command = self.interpreter.iter();
        if let Some(program) = command.next() {
            if program.starts_with('/') {
                args.push(program.clone());
            } else {
                args.push(format!("/usr/bin/{}", program));
            }
            args.extend(command.cloned());
        }
        args.push(self.source_file.clone());
        args
    }

    async fn run_in_box(
        &self,
        sandbox_box: &IsolateBox,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, SandboxLaunchError> {
        let source_path = sandbox_box.work_dir().join(&self.source_file);
        fs::write(&source_path, &request.source)
            .await
            .map_err(|source| SandboxLaunchError::WriteSource {
                path: source_path.clone(),
                source,
            })?;

        let meta_file = tempfile::Builder::new()
            .prefix("tutor-isolate-meta-")
            .tempfile()
            .map_err(SandboxLaunchError::Workspace)?;

        let args = self.run_args(request, meta_file.path());
        debug!(box_id = sandbox_box.box_id, "running isolate");

        let started = Instant::now();
        let output = isolate_cmd(sandbox_box.box_id)
            .args(&args)
            .output()
            .await
            .map_err(|source| SandboxLaunchError::Spawn {
                program: "isolate".to_string(),
                source,
            })?;
        let elapsed = started.elapsed();

        let meta_content = fs::read_to_string(meta_file.path())
            .await
            .unwrap_or_default();
        if meta_content.is_empty() {
            return Err(SandboxLaunchError::Isolate(format!(
                "no meta file written: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let meta = IsolateMeta::parse(&meta_content);
        debug!(
            box_id = sandbox_box.box_id,
            status = ?meta.status,
            wall_time_ms = meta.wall_time_ms,
            memory_kb = meta.memory_kb,
            "isolate run finished"
        );

        let work_dir = sandbox_box.work_dir();
        let (stdout, stdout_truncated) =
            read_capped(&work_dir.join(STDOUT_FILE), self.max_output_bytes).await;
        let (stderr, stderr_truncated) =
            read_capped(&work_dir.join(STDERR_FILE), self.max_output_bytes).await;

        let duration = if meta.wall_time_ms > 0 {
            meta.wall_time()
        } else {
            elapsed
        };

        Ok(ExecutionResult {
            stdout,
            stderr,
            status: meta.to_status(request.time_limit),
            duration,
            output_truncated: stdout_truncated || stderr_truncated,
        })
    }
}

#[async_trait]
impl Sandbox for IsolateSandbox {
    fn name(&self) -> &'static str {
        "isolate"
    }

    async fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        let box_id = self.boxes.next_box_id();
        let sandbox_box = match IsolateBox::init(box_id).await {
            Ok(b) => b,
            Err(e) => return ExecutionResult::launch_failure(e.to_string()),
        };

        let result = self.run_in_box(&sandbox_box, request).await;
        sandbox_box.cleanup().await;

        match result {
            Ok(result) => result,
            Err(e) => ExecutionResult::launch_failure(e.to_string()),
        }
    }
}

/// Read an output file, keeping at most `max_bytes`
async fn read_capped(path: &Path, max_bytes: usize) -> (String, bool) {
    let mut bytes = fs::read(path).await.unwrap_or_default();
    let truncated = bytes.len() > max_bytes;
    bytes.truncate(max_bytes);
    (String::from_utf8_lossy(&bytes).into_owned(), truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sandbox() -> IsolateSandbox {
        IsolateSandbox {
            interpreter: vec!["python3".to_string(), "-I".to_string()],
            source_file: "main.py".to_string(),
            memory_limit_mb: 256,
            max_output_bytes: 8,
            boxes: BoxIdAllocator::new(1),
        }
    }

    #[test]
    fn test_run_args() {
        let request = ExecutionRequest::new("print(1)").with_time_limit(Duration::from_millis(1500));
        let args = sandbox().run_args(&request, Path::new("/tmp/meta.txt"));

        assert!(args.contains(&"--cg-mem=262144".to_string()));
        assert!(args.contains(&"--time=1.5".to_string()));
        assert!(args.contains(&"--wall-time=1.5".to_string()));
        assert!(args.contains(&"--meta=/tmp/meta.txt".to_string()));
        assert!(args.contains(&"--stderr=stderr.txt".to_string()));
        assert_eq!(
            &args[args.len() - 3..],
            &["/usr/bin/python3", "-I", "main.py"]
        );
    }

    #[tokio::test]
    async fn test_read_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "0123456789").unwrap();

        assert_eq!(read_capped(&path, 8).await, ("01234567".to_string(), true));
        assert_eq!(read_capped(&path, 64).await, ("0123456789".to_string(), false));
        assert_eq!(
            read_capped(&dir.path().join("missing"), 8).await,
            (String::new(), false)
        );
    }
}
