//! Sandboxed execution and grading engine for a guided coding curriculum.
//!
//! Submissions run in a `Sandbox`, are graded against the exercise catalog,
//! and drive each learner's unlock/streak state. The binary serves all of it
//! over a Redis job queue.

pub mod core;
pub mod engine;
pub mod jobs;
pub mod platform;
pub mod redis_manager;
