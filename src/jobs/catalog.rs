use serde::{Deserialize, Serialize};

use super::JobReply;
use crate::core::catalog::ExerciseDefinition;
use crate::core::error::ValidationError;
use crate::engine::tracker::LearnerId;
use crate::platform::{ExerciseSummary, Platform};

#[derive(Debug, Serialize, Deserialize)]
pub struct ListExercisesJob {
    pub request_id: String,
    pub learner_id: LearnerId,
}

impl ListExercisesJob {
    pub async fn run(&self, platform: &Platform) -> JobReply<Vec<ExerciseSummary>> {
        JobReply::ok(&self.request_id, platform.list_exercises(&self.learner_id).await)
    }
}

/// Fetch one exercise definition; lock state is not checked
#[derive(Debug, Serialize, Deserialize)]
pub struct GetExerciseJob {
    pub request_id: String,
    pub exercise_id: Option<u32>,
}

impl GetExerciseJob {
    pub fn run(&self, platform: &Platform) -> JobReply<ExerciseDefinition> {
        let result = self
            .exercise_id
            .ok_or(ValidationError::MissingExerciseId)
            .and_then(|id| {
                platform
                    .get_exercise(id)
                    .map(|exercise| exercise.as_ref().clone())
                    .ok_or(ValidationError::UnknownExercise(id))
            });
        JobReply::from_result(&self.request_id, result)
    }
}
