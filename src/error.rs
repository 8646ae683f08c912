//! Error taxonomy for a reduction run.
//!
//! Setup errors stop a run before anything is reduced. Tool failures stop a
//! run that is already in progress; in both cases the workspace stays on disk.
use std::path::PathBuf;
use thiserror::Error;

/// Errors that terminate a reduction run.
#[derive(Debug, Error)]
pub enum ReduceError {
    /// No compile-command entry names the requested source file.
    #[error("no compile command for {} in {}", source_file.display(), database.display())]
    ConfigNotFound {
        source_file: PathBuf,
        database: PathBuf,
    },

    /// Several entries name the source file and their flags disagree.
    #[error("{count} conflicting compile commands for {}", source_file.display())]
    ConfigAmbiguous { source_file: PathBuf, count: usize },

    /// The compile-command database could not be read or parsed.
    #[error("invalid compile command database {}: {reason}", path.display())]
    ConfigDatabase { path: PathBuf, reason: String },

    /// The interestingness test could not be constructed.
    #[error("cannot build interestingness test: {0}")]
    TestBuildFailed(String),

    /// An existing workspace does not have the expected layout.
    #[error("workspace {} is corrupt: {reason}", path.display())]
    WorkspaceCorrupt { path: PathBuf, reason: String },

    /// A required executable is not installed.
    #[error("{0} not found on PATH")]
    ToolNotFound(String),

    /// The external reducer exited abnormally.
    #[error("reducer {tool} failed with {status}")]
    ReducerToolFailed { tool: String, status: String },

    /// The run was interrupted by a signal.
    #[error("reduction cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ReduceError {
    /// Wrap an I/O error with a short description of the failed operation.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ReduceError::Io {
            context: context.into(),
            source,
        }
    }

    /// Setup errors are raised before the first reducer invocation.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            ReduceError::ConfigNotFound { .. }
                | ReduceError::ConfigAmbiguous { .. }
                | ReduceError::ConfigDatabase { .. }
                | ReduceError::TestBuildFailed(_)
                | ReduceError::WorkspaceCorrupt { .. }
                | ReduceError::ToolNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReduceError>;

/// Attach context to `std::io::Result` values, mirroring `anyhow::Context`.
pub trait IoContext<T> {
    fn io_context<F, C>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, C>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|source| ReduceError::io(context(), source))
    }
}
