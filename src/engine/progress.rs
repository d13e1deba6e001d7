//! Per-learner progression state machine
//!
//! `LearnerProgress` changes only through `apply_verdict` and `reset`, so the
//! unlock invariant holds after every call: exercise 1 is always unlocked, and
//! any other id is unlocked iff the preceding id is completed.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::catalog::Catalog;
use crate::core::verdict::Verdict;

const STREAK_MASTER_THRESHOLD: u32 = 3;

/// Achievements, each awarded at most once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    FirstStep,
    HalfwayThere,
    PythonProdigy,
    StreakMaster,
}

impl Badge {
    pub const ALL: [Badge; 4] = [
        Badge::FirstStep,
        Badge::HalfwayThere,
        Badge::PythonProdigy,
        Badge::StreakMaster,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Badge::FirstStep => "First Step",
            Badge::HalfwayThere => "Halfway There",
            Badge::PythonProdigy => "Python Prodigy",
            Badge::StreakMaster => "Streak Master",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Badge::FirstStep => "Completed the very first exercise.",
            Badge::HalfwayThere => "Completed half of the exercises.",
            Badge::PythonProdigy => "Completed every exercise.",
            Badge::StreakMaster => "Achieved a streak of 3 consecutive correct submissions.",
        }
    }

    fn earned(&self, progress: &LearnerProgress, total: usize) -> bool {
        let completed = progress.completed.len();
        match self {
            Badge::FirstStep => progress.completed.contains(&1),
            Badge::HalfwayThere => total > 0 && completed >= total.div_ceil(2),
            Badge::PythonProdigy => total > 0 && completed == total,
            Badge::StreakMaster => progress.streak >= STREAK_MASTER_THRESHOLD,
        }
    }
}

/// What one graded submission changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    /// Set only on the first completion of the exercise
    pub newly_completed: Option<u32>,
    pub newly_unlocked: Option<u32>,
    pub new_badges: Vec<Badge>,
    pub streak: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnerProgress {
    current_exercise: u32,
    completed: BTreeSet<u32>,
    completion_order: Vec<u32>,
    unlocked: BTreeSet<u32>,
    streak: u32,
    best_streak: u32,
    attempts: BTreeMap<u32, u32>,
    badges: Vec<Badge>,
}

impl Default for LearnerProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl LearnerProgress {
    /// Exercise 1 unlocked, nothing else
    pub fn new() -> Self {
        Self {
            current_exercise: 1,
            completed: BTreeSet::new(),
            completion_order: Vec::new(),
            unlocked: BTreeSet::from([1]),
            streak: 0,
            best_streak: 0,
            attempts: BTreeMap::new(),
            badges: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn current_exercise(&self) -> u32 {
        self.current_exercise
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn best_streak(&self) -> u32 {
        self.best_streak
    }

    pub fn is_unlocked(&self, exercise_id: u32) -> bool {
        exercise_id == 1 || self.unlocked.contains(&exercise_id)
    }

    pub fn is_completed(&self, exercise_id: u32) -> bool {
        self.completed.contains(&exercise_id)
    }

    /// Completed ids in the order they were first completed
    pub fn completion_order(&self) -> &[u32] {
        &self.completion_order
    }

    pub fn unlocked(&self) -> impl Iterator<Item = u32> + '_ {
        self.unlocked.iter().copied()
    }

    pub fn attempts(&self, exercise_id: u32) -> u32 {
        self.attempts.get(&exercise_id).copied().unwrap_or(0)
    }

    pub fn badges(&self) -> &[Badge] {
        &self.badges
    }

    /// Rounded share of the catalog completed, 0-100
    pub fn completion_percentage(&self, total: usize) -> u32 {
        if total == 0 {
            return 0;
        }
        ((self.completed.len() as f64 / total as f64) * 100.0).round() as u32
    }

    /// Fold one graded submission into the state.
    ///
    /// The caller is responsible for rejecting locked exercises beforehand.
    pub fn apply_verdict(
        &mut self,
        catalog: &Catalog,
        exercise_id: u32,
        verdict: &Verdict,
    ) -> ProgressUpdate {
        *self.attempts.entry(exercise_id).or_insert(0) += 1;

        if !verdict.correct {
            self.streak = 0;
            return ProgressUpdate::default();
        }

        let mut update = ProgressUpdate::default();

        if self.completed.insert(exercise_id) {
            self.completion_order.push(exercise_id);
            update.newly_completed = Some(exercise_id);

            let next = exercise_id + 1;
            if catalog.contains(next) {
                if self.unlocked.insert(next) {
                    update.newly_unlocked = Some(next);
                }
                self.current_exercise = self.current_exercise.max(next);
            }
        }

        self.streak += 1;
        self.best_streak = self.best_streak.max(self.streak);
        update.streak = self.streak;

        for badge in Badge::ALL {
            if !self.badges.contains(&badge) && badge.earned(self, catalog.len()) {
                self.badges.push(badge);
                update.new_badges.push(badge);
            }
        }

        update
    }

    pub fn snapshot(&self, catalog: &Catalog) -> ProgressSnapshot {
        ProgressSnapshot {
            current_exercise: self.current_exercise,
            completed_ids: self.completion_order.clone(),
            unlocked_ids: self.unlocked.iter().copied().collect(),
            streak: self.streak,
            best_streak: self.best_streak,
            attempts: self.attempts.clone(),
            badges: self.badges.clone(),
            completion_percentage: self.completion_percentage(catalog.len()),
        }
    }
}

/// Serializable view of a learner's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub current_exercise: u32,
    pub completed_ids: Vec<u32>,
    pub unlocked_ids: Vec<u32>,
    pub streak: u32,
    pub best_streak: u32,
    pub attempts: BTreeMap<u32, u32>,
    pub badges: Vec<Badge>,
    pub completion_percentage: u32,
}
