//! Scripted sandbox for engine tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::engine::executer::{ExecutionRequest, ExecutionResult, ExecutionStatus, Sandbox};

/// Plays back queued results; once the script runs out, echoes success with
/// the source as stdout.
#[derive(Default)]
pub struct FakeSandbox {
    script: Mutex<VecDeque<ExecutionResult>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, result: ExecutionResult) -> &Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn success(stdout: &str) -> ExecutionResult {
    outcome(stdout, "", ExecutionStatus::Success)
}

pub fn outcome(stdout: &str, stderr: &str, status: ExecutionStatus) -> ExecutionResult {
    ExecutionResult {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        status,
        duration: Duration::from_millis(3),
        output_truncated: false,
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| success(&request.source))
    }
}
