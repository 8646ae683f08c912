//! Bug-class strategies.
//!
//! A driver decides which auxiliary files a workspace needs and which stages
//! make up the interestingness test for its class of defect.
mod command;
mod compiler_crash;
mod tidy;

pub use command::CommandDriver;
pub use compiler_crash::CompilerCrashDriver;
pub use tidy::{find_tidy_config, TidyDriver, TidyMode, TIDY_CONFIG};

use crate::config::RunConfig;
use crate::error::Result;
use crate::interesting::InterestingnessSpec;
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    CompilerCrash,
    Tidy,
    Command,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverKind::CompilerCrash => "compiler-crash",
            DriverKind::Tidy => "tidy",
            DriverKind::Command => "command",
        };
        f.write_str(name)
    }
}

pub trait Driver {
    fn kind(&self) -> DriverKind;

    /// Files copied next to the candidate, such as analyzer configuration.
    fn aux_files(&self, _source_file: &Path, _build_dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    /// Prepare the workspace and describe the interestingness test.
    fn build_test(&mut self, workspace: &mut Workspace, config: &RunConfig)
        -> Result<InterestingnessSpec>;
}
