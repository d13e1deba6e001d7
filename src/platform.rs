//! Transport-facing facade
//!
//! Wires catalog, sandbox, grader and tracker together. Validation failures
//! are returned as `ValidationError` before anything is executed; everything
//! that happens once the program runs comes back inside the report.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::catalog::{Catalog, ExerciseDefinition};
use crate::core::config::EngineConfig;
use crate::core::error::ValidationError;
use crate::core::utils::source_digest;
use crate::core::verdict::{Verdict, VerdictKind};
use crate::engine::executer::{execute, ExecutionRequest, ExecutionResult, Sandbox};
use crate::engine::grader::grade;
use crate::engine::progress::{Badge, ProgressSnapshot};
use crate::engine::tracker::{LearnerId, ProgressTracker};

/// Outcome of a graded submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub correct: bool,
    pub kind: VerdictKind,
    pub message: String,
    pub captured_output: Option<String>,
    pub captured_error: Option<String>,
    pub expected_output: String,
    pub learner_streak: u32,
    /// In completion order
    pub completed_ids: Vec<u32>,
    pub newly_unlocked: Option<u32>,
    pub new_badges: Vec<Badge>,
    pub duration_ms: u64,
}

/// Dry-run grading result; learner state is untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewReport {
    pub correct: bool,
    pub kind: VerdictKind,
    pub message: String,
    pub captured_output: Option<String>,
    pub captured_error: Option<String>,
    pub expected_output: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseSummary {
    pub id: u32,
    pub title: String,
    pub completed: bool,
    pub unlocked: bool,
}

pub struct Platform {
    catalog: Arc<Catalog>,
    sandbox: Arc<dyn Sandbox>,
    tracker: ProgressTracker,
    time_limit: Duration,
    max_source_bytes: usize,
}

impl Platform {
    pub fn new(catalog: Arc<Catalog>, sandbox: Arc<dyn Sandbox>) -> Self {
        let defaults = EngineConfig::default();
        Self {
            catalog,
            sandbox,
            tracker: ProgressTracker::new(),
            time_limit: defaults.time_limit,
            max_source_bytes: defaults.max_source_bytes,
        }
    }

    pub fn from_config(
        config: &EngineConfig,
        catalog: Arc<Catalog>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Self {
        Self::new(catalog, sandbox)
            .with_time_limit(config.time_limit)
            .with_max_source_bytes(config.max_source_bytes)
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_max_source_bytes(mut self, max_source_bytes: usize) -> Self {
        self.max_source_bytes = max_source_bytes;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Run, grade and record one submission.
    ///
    /// The learner's lock is held from the unlock check until the verdict is
    /// applied, so submissions from one learner are applied in arrival order.
    pub async fn submit(
        &self,
        learner: &LearnerId,
        exercise_id: u32,
        source: &str,
    ) -> Result<SubmissionReport, ValidationError> {
        let exercise = self.validate(exercise_id, source)?;

        let mut progress = self.tracker.lock(learner).await;
        if !progress.is_unlocked(exercise_id) {
            debug!(learner = %learner, exercise_id, "rejected submission to locked exercise");
            return Err(ValidationError::ExerciseLocked(exercise_id));
        }

        let result = self.run(&exercise, source).await;
        let verdict = grade(&result, &exercise);
        let update = progress.apply_verdict(&self.catalog, exercise_id, &verdict);

        info!(
            learner = %learner,
            exercise_id,
            source = %source_digest(source),
            verdict = %verdict.kind,
            streak = update.streak,
            newly_unlocked = ?update.newly_unlocked,
            duration_ms = result.duration.as_millis() as u64,
            "submission graded"
        );

        Ok(SubmissionReport {
            correct: verdict.correct,
            kind: verdict.kind,
            message: verdict.message,
            captured_output: verdict.output,
            captured_error: verdict.error,
            expected_output: exercise.expected_output.clone(),
            learner_streak: update.streak,
            completed_ids: progress.completion_order().to_vec(),
            newly_unlocked: update.newly_unlocked,
            new_badges: update.new_badges,
            duration_ms: result.duration.as_millis() as u64,
        })
    }

    /// Grade without recording anything; lock state is not consulted
    pub async fn preview(
        &self,
        exercise_id: u32,
        source: &str,
    ) -> Result<PreviewReport, ValidationError> {
        let exercise = self.validate(exercise_id, source)?;
        let result = self.run(&exercise, source).await;
        let Verdict {
            correct,
            kind,
            message,
            output,
            error,
        } = grade(&result, &exercise);

        debug!(exercise_id, verdict = %kind, "preview graded");

        Ok(PreviewReport {
            correct,
            kind,
            message,
            captured_output: output,
            captured_error: error,
            expected_output: exercise.expected_output.clone(),
            duration_ms: result.duration.as_millis() as u64,
        })
    }

    pub fn get_exercise(&self, exercise_id: u32) -> Option<Arc<ExerciseDefinition>> {
        self.catalog.get(exercise_id).cloned()
    }

    pub async fn list_exercises(&self, learner: &LearnerId) -> Vec<ExerciseSummary> {
        let progress = self.tracker.get(learner).await;
        self.catalog
            .iter()
            .map(|exercise| ExerciseSummary {
                id: exercise.id,
                title: exercise.title.clone(),
                completed: progress.is_completed(exercise.id),
                unlocked: progress.is_unlocked(exercise.id),
            })
            .collect()
    }

    pub async fn progress(&self, learner: &LearnerId) -> ProgressSnapshot {
        self.tracker.get(learner).await.snapshot(&self.catalog)
    }

    pub async fn reset_progress(&self, learner: &LearnerId) -> ProgressSnapshot {
        self.tracker.reset(learner).await;
        info!(learner = %learner, "progress reset");
        self.progress(learner).await
    }

    fn validate(
        &self,
        exercise_id: u32,
        source: &str,
    ) -> Result<Arc<ExerciseDefinition>, ValidationError> {
        if source.trim().is_empty() {
            return Err(ValidationError::MissingSource);
        }
        if source.len() > self.max_source_bytes {
            return Err(ValidationError::SourceTooLarge {
                len: source.len(),
                max: self.max_source_bytes,
            });
        }
        self.catalog
            .get(exercise_id)
            .cloned()
            .ok_or(ValidationError::UnknownExercise(exercise_id))
    }

    async fn run(&self, exercise: &ExerciseDefinition, source: &str) -> ExecutionResult {
        let request = ExecutionRequest::new(source)
            .with_exercise(exercise.id)
            .with_time_limit(self.time_limit);
        execute(self.sandbox.as_ref(), &request).await
    }
}
