//! Per-learner progress registry
//!
//! One async mutex per learner. The registry lock is held only long enough
//! to find or create a learner's entry; submissions then hold that learner's
//! lock across execute, grade and apply. Tokio's mutex is fair, so a
//! learner's submissions are applied in arrival order while different
//! learners never wait on each other.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::progress::LearnerProgress;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearnerId(String);

impl LearnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LearnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LearnerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

type Slot = Arc<AsyncMutex<LearnerProgress>>;

#[derive(Debug, Default)]
pub struct ProgressTracker {
    learners: Mutex<HashMap<LearnerId, Slot>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, learner: &LearnerId) -> Slot {
        let mut learners = self.learners.lock().unwrap_or_else(PoisonError::into_inner);
        learners
            .entry(learner.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(LearnerProgress::new())))
            .clone()
    }

    /// Exclusive access to one learner's progress, created on first use
    pub async fn lock(&self, learner: &LearnerId) -> OwnedMutexGuard<LearnerProgress> {
        self.slot(learner).lock_owned().await
    }

    /// Copy of the current state; waits for in-flight submissions
    pub async fn get(&self, learner: &LearnerId) -> LearnerProgress {
        self.lock(learner).await.clone()
    }

    pub async fn reset(&self, learner: &LearnerId) {
        self.lock(learner).await.reset();
    }

    pub fn learner_count(&self) -> usize {
        self.learners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
