//! Execution and grading engine
//!
//! - executer: `Sandbox` contract and run wrapper
//! - sandbox: process and isolate backends
//! - grader: pure verdict decision
//! - progress / tracker: learner state machine and per-learner locking

pub mod executer;
pub mod grader;
pub mod progress;
pub mod sandbox;
pub mod tracker;

pub use executer::{execute, ExecutionRequest, ExecutionResult, ExecutionStatus, Sandbox};
pub use grader::grade;
pub use progress::{Badge, LearnerProgress, ProgressSnapshot, ProgressUpdate};
pub use sandbox::build_sandbox;
pub use tracker::{LearnerId, ProgressTracker};
