//! Engine configuration
//!
//! Loaded from environment variables (after `dotenvy`), with defaults for
//! everything.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::core::error::ConfigError;

/// Which isolation mechanism runs submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SandboxBackend {
    /// Fresh interpreter process with rlimits, own process group and temp dir
    #[default]
    Process,
    /// IOI isolate boxes (requires the `isolate` binary with cgroups)
    Isolate,
}

impl FromStr for SandboxBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "process" => Ok(SandboxBackend::Process),
            "isolate" => Ok(SandboxBackend::Isolate),
            _ => Err(()),
        }
    }
}

/// Whether the process backend jails runs in fresh namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamespaceMode {
    /// Jail when the host allows it, otherwise warn and run unjailed
    #[default]
    Auto,
    /// Refuse to run without the jail
    Required,
    Off,
}

impl FromStr for NamespaceMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(NamespaceMode::Auto),
            "required" => Ok(NamespaceMode::Required),
            "off" => Ok(NamespaceMode::Off),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interpreter command; the source file name is appended
    pub interpreter: Vec<String>,
    /// File name the submission is written to inside the workspace
    pub source_file: String,
    pub time_limit: Duration,
    pub memory_limit_mb: u32,
    /// Per-stream capture cap
    pub max_output_bytes: usize,
    pub max_source_bytes: usize,
    pub backend: SandboxBackend,
    pub namespaces: NamespaceMode,
    /// External catalog file; the embedded catalog is used when unset
    pub exercises_path: Option<PathBuf>,
    pub max_concurrent_runs: usize,
    pub redis_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interpreter: into_command("python3 -I -B"),
            source_file: "main.py".to_string(),
            time_limit: Duration::from_secs(5),
            memory_limit_mb: 512,
            max_output_bytes: 64 * 1024,
            max_source_bytes: 64 * 1024,
            backend: SandboxBackend::Process,
            namespaces: NamespaceMode::Auto,
            exercises_path: None,
            max_concurrent_runs: 4,
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(cmd) = lookup("INTERPRETER") {
            let cmd = into_command(&cmd);
            if cmd.is_empty() {
                return Err(ConfigError::Invalid {
                    key: "INTERPRETER",
                    value: String::new(),
                });
            }
            config.interpreter = cmd;
        }
        if let Some(file) = lookup("SOURCE_FILE") {
            if file.is_empty() || file.contains('/') {
                return Err(ConfigError::Invalid {
                    key: "SOURCE_FILE",
                    value: file,
                });
            }
            config.source_file = file;
        }
        if let Some(ms) = parse_positive::<u64, _>(&lookup, "TIME_LIMIT_MS")? {
            config.time_limit = Duration::from_millis(ms);
        }
        if let Some(mb) = parse_positive::<u32, _>(&lookup, "MEMORY_LIMIT_MB")? {
            config.memory_limit_mb = mb;
        }
        if let Some(n) = parse_positive::<usize, _>(&lookup, "MAX_OUTPUT_BYTES")? {
            config.max_output_bytes = n;
        }
        if let Some(n) = parse_positive::<usize, _>(&lookup, "MAX_SOURCE_BYTES")? {
            config.max_source_bytes = n;
        }
        if let Some(n) = parse_positive::<usize, _>(&lookup, "MAX_CONCURRENT_RUNS")? {
            config.max_concurrent_runs = n;
        }
        if let Some(backend) = lookup("SANDBOX_BACKEND") {
            config.backend = backend.parse().map_err(|_| ConfigError::Invalid {
                key: "SANDBOX_BACKEND",
                value: backend.clone(),
            })?;
        }
        if let Some(mode) = lookup("SANDBOX_NAMESPACES") {
            config.namespaces = mode.parse().map_err(|_| ConfigError::Invalid {
                key: "SANDBOX_NAMESPACES",
                value: mode.clone(),
            })?;
        }
        if let Some(path) = lookup("EXERCISES_PATH").filter(|p| !p.is_empty()) {
            config.exercises_path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("REDIS_URL") {
            config.redis_url = url;
        }

        Ok(config)
    }
}

fn parse_positive<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(Some(value)),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}
