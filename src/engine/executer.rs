//! Execution contract shared by every sandbox backend
//!
//! A sandbox turns an `ExecutionRequest` into exactly one `ExecutionResult`.
//! Failing programs, timeouts and even launch failures are all reported as
//! data; nothing here returns an error to the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::core::utils::source_digest;

/// Default wall-clock limit for one run
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(5);

/// One submission to run
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Exercise the run belongs to (for logging only)
    pub exercise_id: Option<u32>,
    pub source: String,
    pub time_limit: Duration,
}

impl ExecutionRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            exercise_id: None,
            source: source.into(),
            time_limit: DEFAULT_TIME_LIMIT,
        }
    }

    pub fn with_exercise(mut self, exercise_id: u32) -> Self {
        self.exercise_id = Some(exercise_id);
        self
    }

    /// A zero limit falls back to the default
    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = if time_limit.is_zero() {
            DEFAULT_TIME_LIMIT
        } else {
            time_limit
        };
        self
    }
}

/// How the program ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Exited with code 0
    Success,
    /// Exited with a non-zero code
    NonZero { code: i32 },
    /// Killed by a signal (crash or resource limit)
    Signaled { signal: i32 },
    /// Hit the wall-clock limit and was killed
    TimedOut { limit_ms: u64 },
    /// The execution unit could not be created
    LaunchFailure { reason: String },
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }

    pub fn timed_out(limit: Duration) -> Self {
        ExecutionStatus::TimedOut {
            limit_ms: limit.as_millis() as u64,
        }
    }
}

/// Everything observed about one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    #[serde(flatten)]
    pub status: ExecutionStatus,
    /// Wall-clock time from spawn to exit or kill
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// True when either stream exceeded the capture cap
    #[serde(default)]
    pub output_truncated: bool,
}

impl ExecutionResult {
    pub fn launch_failure(reason: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            status: ExecutionStatus::LaunchFailure {
                reason: reason.into(),
            },
            duration: Duration::ZERO,
            output_truncated: false,
        }
    }
}

/// Isolation mechanism: run untrusted source once, in a fresh unit.
///
/// Implementations must remove every artifact they create before returning,
/// must forcibly kill the program at the time limit, and must be safe to call
/// concurrently.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    async fn run(&self, request: &ExecutionRequest) -> ExecutionResult;
}

/// Run a request on the given sandbox with uniform logging
pub async fn execute(sandbox: &dyn Sandbox, request: &ExecutionRequest) -> ExecutionResult {
    let digest = source_digest(&request.source);
    debug!(
        backend = sandbox.name(),
        exercise_id = ?request.exercise_id,
        source = %digest,
        time_limit_ms = request.time_limit.as_millis() as u64,
        "executing submission"
    );

    let result = sandbox.run(request).await;

    match &result.status {
        ExecutionStatus::LaunchFailure { reason } => {
            error!(
                backend = sandbox.name(),
                exercise_id = ?request.exercise_id,
                source = %digest,
                reason = %reason,
                "sandbox launch failed"
            );
        }
        status => {
            debug!(
                backend = sandbox.name(),
                exercise_id = ?request.exercise_id,
                source = %digest,
                status = ?status,
                duration_ms = result.duration.as_millis() as u64,
                stdout_bytes = result.stdout.len(),
                stderr_bytes = result.stderr.len(),
                "execution finished"
            );
        }
    }

    result
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_time_limit_uses_default() {
        let request = ExecutionRequest::new("print(1)").with_time_limit(Duration::ZERO);
        assert_eq!(request.time_limit, DEFAULT_TIME_LIMIT);

        let request = ExecutionRequest::new("print(1)").with_time_limit(Duration::from_millis(250));
        assert_eq!(request.time_limit, Duration::from_millis(250));
    }

    #[test]
    fn test_result_serializes_flat_status() {
        let result = ExecutionResult {
            stdout: "hi\n".into(),
            stderr: String::new(),
            status: ExecutionStatus::timed_out(Duration::from_secs(5)),
            duration: Duration::from_millis(5003),
            output_truncated: false,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "timed_out");
        assert_eq!(json["limit_ms"], 5000);
        assert_eq!(json["duration"], 5003);

        let back: ExecutionResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
