//! Grading: ExecutionResult + ExerciseDefinition -> Verdict
//!
//! Pure functions only. Nothing here touches learner state, so grading is
//! also safe for dry-run previews.

use crate::core::catalog::ExerciseDefinition;
use crate::core::verdict::{Verdict, VerdictKind};
use crate::engine::executer::{ExecutionResult, ExecutionStatus};

pub const SUCCESS_MESSAGE: &str = "Correct! Well done.";
pub const LAUNCH_FAILURE_MESSAGE: &str =
    "Execution failed: the code could not be run. Please try again later.";
const NO_DIAGNOSTIC: &str = "Execution failed with no specific error message.";
pub const OUTPUT_LIMIT_MESSAGE: &str =
    "Output limit exceeded: your program printed more output than can be checked.";

/// Largest edit distance still reported as "close"
const CLOSE_DISTANCE: u32 = 3;

/// Strip leading and trailing whitespace only
pub fn normalize(text: &str) -> &str {
    text.trim()
}

pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize(actual) == normalize(expected)
}

pub fn grade(result: &ExecutionResult, exercise: &ExerciseDefinition) -> Verdict {
    match &result.status {
        // A capped stream was never seen in full, so it cannot be compared
        ExecutionStatus::Success if result.output_truncated => Verdict {
            correct: false,
            kind: VerdictKind::WrongOutput,
            message: OUTPUT_LIMIT_MESSAGE.to_string(),
            output: Some(result.stdout.clone()),
            error: None,
        },
        ExecutionStatus::Success if normalize(&result.stderr).is_empty() => {
            if outputs_match(&result.stdout, &exercise.expected_output) {
                Verdict {
                    correct: true,
                    kind: VerdictKind::Passed,
                    message: SUCCESS_MESSAGE.to_string(),
                    output: Some(result.stdout.clone()),
                    error: None,
                }
            } else {
                Verdict {
                    correct: false,
                    kind: VerdictKind::WrongOutput,
                    message: wrong_output_feedback(&result.stdout, &exercise.expected_output),
                    output: Some(result.stdout.clone()),
                    error: None,
                }
            }
        }
        ExecutionStatus::Success
        | ExecutionStatus::NonZero { .. }
        | ExecutionStatus::Signaled { .. } => runtime_fault(result),
        ExecutionStatus::TimedOut { limit_ms } => {
            let message = format!(
                "Execution timed out after {} seconds.",
                format_seconds(*limit_ms)
            );
            Verdict {
                correct: false,
                kind: VerdictKind::TimedOut,
                message: message.clone(),
                output: None,
                error: Some(message),
            }
        }
        ExecutionStatus::LaunchFailure { .. } => Verdict {
            correct: false,
            kind: VerdictKind::LaunchFailed,
            message: LAUNCH_FAILURE_MESSAGE.to_string(),
            output: None,
            error: Some(LAUNCH_FAILURE_MESSAGE.to_string()),
        },
    }
}

fn runtime_fault(result: &ExecutionResult) -> Verdict {
    let stderr = normalize(&result.stderr);
    let stdout = normalize(&result.stdout);

    // `error` keeps the raw text; only the markdown message is trimmed
    let (shown, error, from_stdout) = if !stderr.is_empty() {
        (stderr.to_string(), result.stderr.clone(), false)
    } else if let ExecutionStatus::Signaled { signal } = result.status {
        let text = format!("Process terminated by signal {}.", signal);
        (text.clone(), text, false)
    } else if !stdout.is_empty() {
        (stdout.to_string(), result.stdout.clone(), true)
    } else {
        (NO_DIAGNOSTIC.to_string(), NO_DIAGNOSTIC.to_string(), false)
    };

    let mut message = format!("Execution Error:\n```\n{}\n```", shown);
    if !from_stdout && !stdout.is_empty() {
        message.push_str(&format!("\n\nYour output before error:\n```\n{}\n```", stdout));
    }

    Verdict {
        correct: false,
        kind: VerdictKind::RuntimeFault,
        message,
        output: Some(result.stdout.clone()),
        error: Some(error),
    }
}

fn wrong_output_feedback(actual: &str, expected: &str) -> String {
    let actual = normalize(actual);
    let expected = normalize(expected);
    let shown = if actual.is_empty() { "<no output>" } else { actual };

    let mut message = format!(
        "Incorrect.\nYour output:\n```\n{}\n```\n\nExpected output:\n```\n{}\n```",
        shown, expected
    );
    if let Some(diff) = first_difference(actual, expected) {
        message.push_str("\n\n");
        message.push_str(&diff);
    }
    if let Some(hint) = closeness_hint(actual, expected) {
        message.push_str("\n\n");
        message.push_str(&hint);
    }
    message
}

/// Describe the first line where the outputs diverge
pub fn first_difference(actual: &str, expected: &str) -> Option<String> {
    let mut actual_lines = actual.lines();
    let mut expected_lines = expected.lines();
    let mut line_no = 1;

    loop {
        match (actual_lines.next(), expected_lines.next()) {
            (None, None) => return None,
            (Some(a), Some(e)) if a == e => line_no += 1,
            (Some(a), Some(e)) => {
                return Some(format!(
                    "First difference on line {}: expected `{}`, got `{}`.",
                    line_no, e, a
                ))
            }
            (None, Some(e)) => {
                return Some(format!(
                    "Your output ends early: line {} should be `{}`.",
                    line_no, e
                ))
            }
            (Some(a), None) => {
                return Some(format!(
                    "Your output has extra lines starting at line {}: `{}`.",
                    line_no, a
                ))
            }
        }
    }
}

/// Nudge for near misses: case-only differences or a small edit distance
pub fn closeness_hint(actual: &str, expected: &str) -> Option<String> {
    if actual.is_empty() || actual == expected {
        return None;
    }
    if actual.to_lowercase() == expected.to_lowercase() {
        return Some("Hint: your output differs only in capitalization.".to_string());
    }

    let distance = triple_accel::levenshtein(actual.as_bytes(), expected.as_bytes());
    if distance <= CLOSE_DISTANCE {
        let unit = if distance == 1 { "character" } else { "characters" };
        Some(format!(
            "Hint: you are {} {} away from the expected output.",
            distance, unit
        ))
    } else {
        None
    }
}

fn format_seconds(ms: u64) -> String {
    if ms % 1000 == 0 {
        (ms / 1000).to_string()
    } else {
        format!("{:.1}", ms as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sandbox::fake::{outcome, success};
    use std::time::Duration;

    fn exercise(expected: &str) -> ExerciseDefinition {
        ExerciseDefinition {
            id: 1,
            title: "Hello, World!".to_string(),
            prompt: "Print it".to_string(),
            context: String::new(),
            starter_code: String::new(),
            expected_output: expected.to_string(),
            hints: Vec::new(),
        }
    }

    #[test]
    fn test_outputs_match_trailing_newlines() {
        assert!(outputs_match("hello\nworld\n", "hello\nworld"));
        assert!(outputs_match("hello\nworld\n\n\n", "hello\nworld\n"));
        assert!(outputs_match("  hello\n", "hello"));
    }

    #[test]
    fn test_outputs_match_internal_whitespace_is_exact() {
        assert!(!outputs_match("hello  \nworld\n", "hello\nworld\n"));
        assert!(!outputs_match("hello  world", "hello world"));
        assert!(!outputs_match("hello\nworld\n", "hello\nearth\n"));
    }

    #[test]
    fn test_normalization_round_trip() {
        for expected in ["Hello, World!\n", "a\nb\n", "4.0", "\n\nx\n\n", ""] {
            assert!(outputs_match(expected, expected));
            for suffix in ["", "\n", "\n\n", " \n"] {
                assert!(outputs_match(&format!("{}{}", expected, suffix), expected));
            }
        }
    }

    #[test]
    fn test_grade_passed() {
        let verdict = grade(&success("Hello, World!\n"), &exercise("Hello, World!\n"));

        assert!(verdict.correct);
        assert_eq!(verdict.kind, VerdictKind::Passed);
        assert_eq!(verdict.message, SUCCESS_MESSAGE);
        assert_eq!(verdict.output.as_deref(), Some("Hello, World!\n"));
        assert_eq!(verdict.error, None);
    }

    #[test]
    fn test_grade_wrong_output_shows_both_verbatim() {
        let verdict = grade(&success("hello world\n"), &exercise("Hello, World!\n"));

        assert!(!verdict.correct);
        assert_eq!(verdict.kind, VerdictKind::WrongOutput);
        assert!(verdict
            .message
            .starts_with("Incorrect.\nYour output:\n```\nhello world\n```\n\nExpected output:\n```\nHello, World!\n```"));
        assert!(verdict
            .message
            .contains("First difference on line 1: expected `Hello, World!`, got `hello world`."));
    }

    #[test]
    fn test_grade_wrong_output_empty() {
        let verdict = grade(&success(""), &exercise("Hello, World!\n"));
        assert_eq!(verdict.kind, VerdictKind::WrongOutput);
        assert!(verdict.message.contains("```\n<no output>\n```"));
        assert!(verdict.message.contains("Your output ends early"));
    }

    #[test]
    fn test_closeness_hints() {
        assert_eq!(
            closeness_hint("hello, world!", "Hello, World!").as_deref(),
            Some("Hint: your output differs only in capitalization.")
        );
        assert_eq!(
            closeness_hint("Hello World!", "Hello, World!").as_deref(),
            Some("Hint: you are 1 character away from the expected output.")
        );
        assert_eq!(closeness_hint("something else", "Hello, World!"), None);
        assert_eq!(closeness_hint("", "Hello, World!"), None);
    }

    #[test]
    fn test_first_difference_extra_lines() {
        assert_eq!(
            first_difference("a\nb\nc", "a\nb").as_deref(),
            Some("Your output has extra lines starting at line 3: `c`.")
        );
        assert_eq!(first_difference("a\nb", "a\nb"), None);
    }

    #[test]
    fn test_grade_stderr_on_success_is_runtime_fault() {
        let result = outcome(
            "Hello, World!\n",
            "DeprecationWarning: x\n",
            ExecutionStatus::Success,
        );
        let verdict = grade(&result, &exercise("Hello, World!\n"));

        assert!(!verdict.correct);
        assert_eq!(verdict.kind, VerdictKind::RuntimeFault);
        assert_eq!(verdict.error.as_deref(), Some("DeprecationWarning: x\n"));
        assert!(verdict
            .message
            .ends_with("Your output before error:\n```\nHello, World!\n```"));
    }

    #[test]
    fn test_grade_whitespace_only_stderr_is_ignored() {
        let result = outcome("Hello, World!\n", " \n", ExecutionStatus::Success);
        assert!(grade(&result, &exercise("Hello, World!\n")).correct);
    }

    #[test]
    fn test_grade_non_zero_exit_shows_traceback() {
        let traceback = "Traceback (most recent call last):\n  File \"main.py\", line 1, in <module>\n    1/0\nZeroDivisionError: division by zero\n";
        let result = outcome("", traceback, ExecutionStatus::NonZero { code: 1 });
        let verdict = grade(&result, &exercise("x"));

        assert_eq!(verdict.kind, VerdictKind::RuntimeFault);
        assert_eq!(verdict.error.as_deref(), Some(traceback));
        assert_eq!(
            verdict.message,
            format!("Execution Error:\n```\n{}\n```", traceback.trim())
        );
    }

    #[test]
    fn test_grade_non_zero_exit_without_stderr() {
        let result = outcome("", "", ExecutionStatus::NonZero { code: 3 });
        let verdict = grade(&result, &exercise("x"));
        assert_eq!(verdict.error.as_deref(), Some(NO_DIAGNOSTIC));

        let result = outcome("partial\n", "", ExecutionStatus::NonZero { code: 3 });
        let verdict = grade(&result, &exercise("x"));
        assert_eq!(verdict.error.as_deref(), Some("partial\n"));
        assert!(!verdict.message.contains("Your output before error"));
    }

    #[test]
    fn test_grade_keeps_stderr_verbatim() {
        let stderr = "  File \"main.py\", line 1\n    print(\n         ^\nSyntaxError: '(' was never closed\n";
        let result = outcome("", stderr, ExecutionStatus::NonZero { code: 1 });
        let verdict = grade(&result, &exercise("x"));

        assert_eq!(verdict.error.as_deref(), Some(stderr));
        assert!(verdict
            .message
            .starts_with("Execution Error:\n```\nFile \"main.py\", line 1"));
    }

    #[test]
    fn test_grade_truncated_output_never_passes() {
        let mut padded = String::from("1");
        padded.push_str(&" ".repeat(64 * 1024));
        let mut result = success(&padded);
        result.output_truncated = true;

        let verdict = grade(&result, &exercise("1\n"));

        assert!(!verdict.correct);
        assert_eq!(verdict.kind, VerdictKind::WrongOutput);
        assert_eq!(verdict.message, OUTPUT_LIMIT_MESSAGE);
        assert_eq!(verdict.output.as_deref(), Some(padded.as_str()));
    }

    #[test]
    fn test_grade_truncated_failure_is_still_runtime_fault() {
        let mut result = outcome("", "Traceback\n", ExecutionStatus::NonZero { code: 1 });
        result.output_truncated = true;

        assert_eq!(grade(&result, &exercise("x")).kind, VerdictKind::RuntimeFault);
    }

    #[test]
    fn test_grade_signaled() {
        let result = outcome("", "", ExecutionStatus::Signaled { signal: 9 });
        let verdict = grade(&result, &exercise("x"));
        assert_eq!(verdict.kind, VerdictKind::RuntimeFault);
        assert_eq!(verdict.error.as_deref(), Some("Process terminated by signal 9."));
    }

    #[test]
    fn test_grade_timeout_ignores_printed_output() {
        let result = outcome(
            "Hello, World!\n",
            "",
            ExecutionStatus::timed_out(Duration::from_secs(5)),
        );
        let verdict = grade(&result, &exercise("Hello, World!\n"));

        assert!(!verdict.correct);
        assert_eq!(verdict.kind, VerdictKind::TimedOut);
        assert_eq!(verdict.message, "Execution timed out after 5 seconds.");
        assert_eq!(verdict.output, None);
    }

    #[test]
    fn test_grade_launch_failure_is_generic() {
        let result = ExecutionResult::launch_failure("failed to spawn `python3`: No such file");
        let verdict = grade(&result, &exercise("x"));

        assert_eq!(verdict.kind, VerdictKind::LaunchFailed);
        assert_eq!(verdict.message, LAUNCH_FAILURE_MESSAGE);
        assert!(!verdict.message.contains("python3"));
        assert_eq!(verdict.output, None);
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(5000), "5");
        assert_eq!(format_seconds(1500), "1.5");
    }
}
