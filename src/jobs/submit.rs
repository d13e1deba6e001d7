use serde::{Deserialize, Serialize};

use super::JobReply;
use crate::core::error::ValidationError;
use crate::engine::tracker::LearnerId;
use crate::platform::{Platform, PreviewReport, SubmissionReport};

/// Graded submission that updates the learner's progress
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJob {
    pub request_id: String,
    pub learner_id: LearnerId,
    pub exercise_id: Option<u32>,
    pub source: Option<String>,
}

impl SubmitJob {
    pub async fn run(&self, platform: &Platform) -> JobReply<SubmissionReport> {
        let result = match required_fields(self.exercise_id, self.source.as_deref()) {
            Ok((exercise_id, source)) => platform.submit(&self.learner_id, exercise_id, source).await,
            Err(e) => Err(e),
        };
        JobReply::from_result(&self.request_id, result)
    }
}

/// Dry run: graded, nothing recorded
#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewJob {
    pub request_id: String,
    pub exercise_id: Option<u32>,
    pub source: Option<String>,
}

impl PreviewJob {
    pub async fn run(&self, platform: &Platform) -> JobReply<PreviewReport> {
        let result = match required_fields(self.exercise_id, self.source.as_deref()) {
            Ok((exercise_id, source)) => platform.preview(exercise_id, source).await,
            Err(e) => Err(e),
        };
        JobReply::from_result(&self.request_id, result)
    }
}

fn required_fields(
    exercise_id: Option<u32>,
    source: Option<&str>,
) -> Result<(u32, &str), ValidationError> {
    let exercise_id = exercise_id.ok_or(ValidationError::MissingExerciseId)?;
    let source = source.ok_or(ValidationError::MissingSource)?;
    Ok((exercise_id, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::test_catalog;
    use crate::engine::sandbox::fake::FakeSandbox;
    use std::sync::Arc;

    fn platform() -> (Platform, Arc<FakeSandbox>) {
        let sandbox = Arc::new(FakeSandbox::new());
        (Platform::new(Arc::new(test_catalog(3)), sandbox.clone()), sandbox)
    }

    #[tokio::test]
    async fn test_submit_job_reply() {
        let (platform, _) = platform();
        let job = SubmitJob {
            request_id: "r1".into(),
            learner_id: "alice".into(),
            exercise_id: Some(1),
            source: Some("1\n".into()),
        };

        let reply = job.run(&platform).await;

        assert_eq!(reply.request_id, "r1");
        assert!(reply.error.is_none());
        let report = reply.result.unwrap();
        assert!(report.correct);
        assert_eq!(report.newly_unlocked, Some(2));
    }

    #[tokio::test]
    async fn test_missing_fields_never_execute() {
        let (platform, sandbox) = platform();
        let job = SubmitJob {
            request_id: "r2".into(),
            learner_id: "alice".into(),
            exercise_id: None,
            source: Some("1\n".into()),
        };
        let reply = job.run(&platform).await;
        assert_eq!(reply.error.unwrap().code, "missing_exercise_id");

        let job = PreviewJob {
            request_id: "r3".into(),
            exercise_id: Some(1),
            source: None,
        };
        let reply = job.run(&platform).await;
        assert_eq!(reply.error.unwrap().code, "missing_source");
        assert_eq!(sandbox.calls(), 0);
    }

    #[tokio::test]
    async fn test_locked_submit_reply() {
        let (platform, sandbox) = platform();
        let job = SubmitJob {
            request_id: "r4".into(),
            learner_id: "alice".into(),
            exercise_id: Some(3),
            source: Some("3\n".into()),
        };

        let reply = job.run(&platform).await;

        assert!(reply.result.is_none());
        assert_eq!(reply.error.unwrap().code, "locked");
        assert_eq!(sandbox.calls(), 0);
    }
}
