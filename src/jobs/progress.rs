use serde::{Deserialize, Serialize};

use super::JobReply;
use crate::engine::progress::ProgressSnapshot;
use crate::engine::tracker::LearnerId;
use crate::platform::Platform;

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressJob {
    pub request_id: String,
    pub learner_id: LearnerId,
}

impl ProgressJob {
    pub async fn run(&self, platform: &Platform) -> JobReply<ProgressSnapshot> {
        JobReply::ok(&self.request_id, platform.progress(&self.learner_id).await)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetJob {
    pub request_id: String,
    pub learner_id: LearnerId,
}

impl ResetJob {
    pub async fn run(&self, platform: &Platform) -> JobReply<ProgressSnapshot> {
        JobReply::ok(&self.request_id, platform.reset_progress(&self.learner_id).await)
    }
}
