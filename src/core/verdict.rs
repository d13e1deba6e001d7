use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a graded submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Passed,
    WrongOutput,
    RuntimeFault,
    TimedOut,
    LaunchFailed,
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerdictKind::Passed => "passed",
            VerdictKind::WrongOutput => "wrong_output",
            VerdictKind::RuntimeFault => "runtime_fault",
            VerdictKind::TimedOut => "timed_out",
            VerdictKind::LaunchFailed => "launch_failed",
        };
        write!(f, "{}", s)
    }
}

/// Result of grading one execution against one exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub correct: bool,
    pub kind: VerdictKind,
    /// Feedback shown to the learner
    pub message: String,
    /// Captured stdout, absent when the run produced no usable output
    pub output: Option<String>,
    /// Diagnostic text (stderr, timeout or launch message)
    pub error: Option<String>,
}
