//! Isolate meta file parser
//!
//! Turns the `--meta` file written by isolate into an `ExecutionStatus`.

use std::time::Duration;

use crate::engine::executer::ExecutionStatus;

/// Raw status code reported by isolate
#[derive(Debug, Clone, PartialEq)]
pub enum IsolateStatus {
    /// No status line: program exited on its own
    Exited,
    /// `TO`: time or wall-time limit hit
    TimeOut,
    /// `SG`: killed by a signal
    Signal,
    /// `RE`: non-zero exit
    RuntimeError,
    /// `XX`: isolate itself failed
    InternalError,
}

/// Parsed isolate meta file contents
#[derive(Debug, Clone, PartialEq)]
pub struct IsolateMeta {
    pub status: IsolateStatus,
    pub exit_code: i32,
    pub exit_signal: Option<i32>,
    /// Wall clock time in milliseconds
    pub wall_time_ms: u64,
    /// Peak memory in KB (cg-mem or max-rss)
    pub memory_kb: u32,
    /// Isolate's own explanation, if any
    pub message: Option<String>,
}

impl Default for IsolateMeta {
    fn default() -> Self {
        Self {
            status: IsolateStatus::Exited,
            exit_code: 0,
            exit_signal: None,
            wall_time_ms: 0,
            memory_kb: 0,
            message: None,
        }
    }
}

impl IsolateMeta {
    pub fn parse(content: &str) -> Self {
        let mut meta = IsolateMeta::default();

        for line in content.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "time-wall" => {
                    if let Ok(t) = value.parse::<f64>() {
                        meta.wall_time_ms = (t * 1000.0) as u64;
                    }
                }
                "cg-mem" | "max-rss" => {
                    if let Ok(m) = value.parse::<u32>() {
                        meta.memory_kb = meta.memory_kb.max(m);
                    }
                }
                "exitcode" => meta.exit_code = value.parse().unwrap_or(0),
                "exitsig" => meta.exit_signal = value.parse().ok(),
                "message" => meta.message = Some(value.to_string()),
                "status" => {
                    meta.status = match value {
                        "TO" => IsolateStatus::TimeOut,
                        "SG" => IsolateStatus::Signal,
                        "RE" => IsolateStatus::RuntimeError,
                        "XX" => IsolateStatus::InternalError,
                        _ => IsolateStatus::RuntimeError,
                    };
                }
                _ => {}
            }
        }

        meta
    }

    pub fn wall_time(&self) -> Duration {
        Duration::from_millis(self.wall_time_ms)
    }

    /// Map onto the backend-independent status
    pub fn to_status(&self, time_limit: Duration) -> ExecutionStatus {
        match self.status {
            IsolateStatus::TimeOut => ExecutionStatus::timed_out(time_limit),
            IsolateStatus::Signal => ExecutionStatus::Signaled {
                signal: self.exit_signal.unwrap_or(0),
            },
            IsolateStatus::InternalError => ExecutionStatus::LaunchFailure {
                reason: self
                    .message
                    .clone()
                    .unwrap_or_else(|| "isolate internal error".to_string()),
            },
            IsolateStatus::RuntimeError if self.exit_code != 0 => ExecutionStatus::NonZero {
                code: self.exit_code,
            },
            // `RE` without an exit code means isolate killed it for another reason
            IsolateStatus::RuntimeError => ExecutionStatus::Signaled {
                signal: self.exit_signal.unwrap_or(0),
            },
            IsolateStatus::Exited if self.exit_code == 0 => ExecutionStatus::Success,
            IsolateStatus::Exited => ExecutionStatus::NonZero {
                code: self.exit_code,
            },
        }
    }
}
