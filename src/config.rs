//! Run configuration threaded through every component.
//!
//! Nothing here is process-wide: two runs with different configs can share a
//! process without observing each other's job count or timeout.
use crate::error::{ReduceError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when `--reduce-bin` is not given.
pub const REDUCER_ENV: &str = "CXXREDUCE_REDUCER";
/// Upper bound on reduce/preprocess cycles when none is configured.
pub const DEFAULT_MAX_CYCLES: usize = 16;

/// Settings shared by every step of one reduction run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Parallel interestingness tests the external reducer may run.
    pub jobs: usize,
    /// Per-command timeout inside the interestingness test.
    pub timeout_secs: Option<u64>,
    /// Whether a timed-out command counts as reproducing the bug.
    pub timeout_is_interesting: bool,
    /// Run the preprocessing stage between reducer passes.
    pub preprocess: bool,
    /// Bound on reduce/preprocess cycles.
    pub max_cycles: usize,
    /// Case-insensitive pattern required in the combined test output.
    pub grep: Option<String>,
    /// Case-insensitive pattern the candidate file must keep.
    pub grep_file: Option<String>,
    pub reducer: ReducerConfig,
}

impl RunConfig {
    pub fn new(reducer: ReducerConfig) -> Self {
        Self {
            jobs: default_jobs(),
            timeout_secs: None,
            timeout_is_interesting: false,
            preprocess: true,
            max_cycles: DEFAULT_MAX_CYCLES,
            grep: None,
            grep_file: None,
            reducer,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Number of hardware threads, used as the default reducer job count.
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}

/// Flavors of external reducer with tool-specific flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReducerKind {
    Cvise,
    Creduce,
    Other,
}

impl ReducerKind {
    /// Infer the flavor from the executable name.
    pub fn detect(binary: &Path) -> Self {
        let name = binary
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.contains("cvise") {
            ReducerKind::Cvise
        } else if name.contains("creduce") {
            ReducerKind::Creduce
        } else {
            ReducerKind::Other
        }
    }
}

/// The external reducer executable.
#[derive(Debug, Clone)]
pub struct ReducerConfig {
    pub binary: PathBuf,
    pub kind: ReducerKind,
}

impl ReducerConfig {
    pub fn new(binary: PathBuf) -> Self {
        let kind = ReducerKind::detect(&binary);
        Self { binary, kind }
    }

    /// Resolve the reducer: explicit value, then `CXXREDUCE_REDUCER`, then
    /// `cvise` or `creduce` on `PATH`.
    pub fn resolve(explicit: Option<&str>) -> Result<Self> {
        let requested = explicit
            .map(|value| value.to_string())
            .or_else(|| std::env::var(REDUCER_ENV).ok())
            .filter(|value| !value.trim().is_empty());
        if let Some(requested) = requested {
            let binary = which::which(&requested)
                .map_err(|_| ReduceError::ToolNotFound(requested.clone()))?;
            return Ok(Self::new(binary));
        }
        for candidate in ["cvise", "creduce"] {
            if let Ok(binary) = which::which(candidate) {
                return Ok(Self::new(binary));
            }
        }
        Err(ReduceError::ToolNotFound("cvise or creduce".to_string()))
    }
}
