pub mod catalog;
pub mod progress;
pub mod submit;

use std::collections::HashMap;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::core::error::ValidationError;
use crate::engine::tracker::LearnerId;
use crate::platform::Platform;
use crate::jobs::catalog::{GetExerciseJob, ListExercisesJob};
use crate::jobs::progress::{ProgressJob, ResetJob};
use crate::jobs::submit::{PreviewJob, SubmitJob};

/// Worker job enum - represents different types of jobs the worker can process
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum WorkerJob {
    /// Grade and record a learner's submission
    #[serde(rename = "submit")]
    Submit(SubmitJob),
    /// Grade without recording
    #[serde(rename = "preview")]
    Preview(PreviewJob),
    #[serde(rename = "list_exercises")]
    ListExercises(ListExercisesJob),
    #[serde(rename = "get_exercise")]
    GetExercise(GetExerciseJob),
    #[serde(rename = "progress")]
    Progress(ProgressJob),
    #[serde(rename = "reset")]
    Reset(ResetJob),
}

/// Where a job's reply goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Stored under a result key and published on the results channel
    Stored,
    /// Pushed onto a per-request reply list for a blocking client
    Reply,
}

impl WorkerJob {
    pub fn request_id(&self) -> &str {
        match self {
            WorkerJob::Submit(job) => &job.request_id,
            WorkerJob::Preview(job) => &job.request_id,
            WorkerJob::ListExercises(job) => &job.request_id,
            WorkerJob::GetExercise(job) => &job.request_id,
            WorkerJob::Progress(job) => &job.request_id,
            WorkerJob::Reset(job) => &job.request_id,
        }
    }

    pub fn job_type(&self) -> &'static str {
        match self {
            WorkerJob::Submit(_) => "submit",
            WorkerJob::Preview(_) => "preview",
            WorkerJob::ListExercises(_) => "list_exercises",
            WorkerJob::GetExercise(_) => "get_exercise",
            WorkerJob::Progress(_) => "progress",
            WorkerJob::Reset(_) => "reset",
        }
    }

    /// Learner whose state the job reads or writes
    pub fn learner(&self) -> Option<&LearnerId> {
        match self {
            WorkerJob::Submit(job) => Some(&job.learner_id),
            WorkerJob::ListExercises(job) => Some(&job.learner_id),
            WorkerJob::Progress(job) => Some(&job.learner_id),
            WorkerJob::Reset(job) => Some(&job.learner_id),
            WorkerJob::Preview(_) | WorkerJob::GetExercise(_) => None,
        }
    }

    /// Whether the job runs untrusted code
    pub fn needs_sandbox(&self) -> bool {
        matches!(self, WorkerJob::Submit(_) | WorkerJob::Preview(_))
    }

    pub fn delivery(&self) -> Delivery {
        if self.needs_sandbox() {
            Delivery::Stored
        } else {
            Delivery::Reply
        }
    }

    pub async fn process(&self, platform: &Platform) -> serde_json::Result<serde_json::Value> {
        match self {
            WorkerJob::Submit(job) => serde_json::to_value(job.run(platform).await),
            WorkerJob::Preview(job) => serde_json::to_value(job.run(platform).await),
            WorkerJob::ListExercises(job) => serde_json::to_value(job.run(platform).await),
            WorkerJob::GetExercise(job) => serde_json::to_value(job.run(platform)),
            WorkerJob::Progress(job) => serde_json::to_value(job.run(platform).await),
            WorkerJob::Reset(job) => serde_json::to_value(job.run(platform).await),
        }
    }
}

/// Client-facing error body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

impl From<&ValidationError> for JobError {
    fn from(e: &ValidationError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// Reply envelope: exactly one of `result` or `error` is present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReply<T> {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl<T> JobReply<T> {
    pub fn ok(request_id: &str, result: T) -> Self {
        Self {
            request_id: request_id.to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(request_id: &str, error: &ValidationError) -> Self {
        Self {
            request_id: request_id.to_string(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn from_result(request_id: &str, result: Result<T, ValidationError>) -> Self {
        match result {
            Ok(value) => Self::ok(request_id, value),
            Err(e) => Self::err(request_id, &e),
        }
    }
}

/// Runs jobs concurrently while keeping each learner's jobs in queue order.
///
/// A learner's newest job task waits for that learner's previous task before
/// starting, so arrival order holds without blocking the pop loop.
#[derive(Default)]
pub struct JobSequencer {
    last: HashMap<LearnerId, JoinHandle<()>>,
}

impl JobSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, learner: Option<LearnerId>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.last.retain(|_, handle| !handle.is_finished());

        let Some(learner) = learner else {
            tokio::spawn(task);
            return;
        };

        let previous = self.last.remove(&learner);
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            task.await;
        });
        self.last.insert(learner, handle);
    }

    pub fn pending_learners(&self) -> usize {
        self.last.len()
    }
}
