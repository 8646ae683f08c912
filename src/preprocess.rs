//! Preprocessing stage.
//!
//! Expands macros and includes with the verifying compiler and keeps the
//! result only while the candidate stays interesting.
use crate::compile_db::CompileEntry;
use crate::error::{IoContext, Result};
use crate::interesting::InterestingnessTest;
use crate::process::{self, Output};
use crate::workspace::Workspace;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Suffix of the copy kept while a preprocessed candidate is tested.
pub const BACKUP_SUFFIX: &str = "bckp";
/// Suffix of the raw preprocessor output.
pub const PREPROCESSED_SUFFIX: &str = "pp";

/// Result of one preprocessing attempt. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreprocessOutcome {
    /// The preprocessed source replaced the candidate.
    Accepted { before: u64, after: u64 },
    /// The candidate is unchanged.
    Rejected(String),
}

impl PreprocessOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PreprocessOutcome::Accepted { .. })
    }
}

pub struct PreprocessStage<'a> {
    entry: &'a CompileEntry,
    timeout: Option<Duration>,
    /// Reject output that is not smaller than the candidate.
    shrink_only: bool,
}

impl<'a> PreprocessStage<'a> {
    /// `entry` is the workspace-relocated compile command.
    pub fn new(entry: &'a CompileEntry, timeout: Option<Duration>) -> Self {
        Self {
            entry,
            timeout,
            shrink_only: false,
        }
    }

    /// Keep preprocessed output only when it is smaller than the candidate.
    pub fn shrink_only(mut self) -> Self {
        self.shrink_only = true;
        self
    }

    /// Preprocess the workspace candidate and keep it if still interesting.
    pub fn run(&self, workspace: &Workspace, test: &InterestingnessTest) -> Result<PreprocessOutcome> {
        let candidate = workspace.candidate_path();
        let name = workspace.source_name();
        let backup = sibling(workspace, name, BACKUP_SUFFIX);
        let output_name = format!("{name}.{PREPROCESSED_SUFFIX}");
        let output = workspace.root().join(&output_name);

        let argv = self.entry.preprocess_arguments(&output_name);
        tracing::debug!(command = %shell_words::join(&argv), "preprocessing candidate");
        let (program, args) = match argv.split_first() {
            Some(split) => split,
            None => return Ok(PreprocessOutcome::Rejected("empty compile command".to_string())),
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workspace.root());
        let result = process::run(&mut cmd, self.timeout, Output::Capture)?;
        if !result.success() {
            let _ = fs::remove_file(&output);
            return Ok(reject(format!("preprocessor failed: {}", result.describe())));
        }

        let before_text = fs::read(&candidate).io_context(|| format!("read {}", candidate.display()))?;
        let after_text = fs::read(&output).io_context(|| format!("read {}", output.display()))?;
        if after_text == before_text {
            fs::remove_file(&output).io_context(|| format!("remove {}", output.display()))?;
            return Ok(reject("preprocessing produced no change".to_string()));
        }
        if self.shrink_only && after_text.len() >= before_text.len() {
            fs::remove_file(&output).io_context(|| format!("remove {}", output.display()))?;
            return Ok(reject(format!(
                "preprocessed candidate is not smaller ({} >= {} bytes)",
                after_text.len(),
                before_text.len()
            )));
        }

        fs::copy(&candidate, &backup).io_context(|| format!("back up {}", candidate.display()))?;
        fs::rename(&output, &candidate)
            .io_context(|| format!("replace {}", candidate.display()))?;

        let verdict = match test.run(workspace.root()) {
            Ok(verdict) => verdict,
            Err(err) => {
                fs::rename(&backup, &candidate)
                    .io_context(|| format!("restore {}", candidate.display()))?;
                return Err(err);
            }
        };
        if verdict.is_interesting() {
            fs::remove_file(&backup).io_context(|| format!("remove {}", backup.display()))?;
            let outcome = PreprocessOutcome::Accepted {
                before: before_text.len() as u64,
                after: after_text.len() as u64,
            };
            tracing::info!(
                before = before_text.len(),
                after = after_text.len(),
                "accepted preprocessed candidate"
            );
            return Ok(outcome);
        }

        fs::rename(&backup, &candidate)
            .io_context(|| format!("restore {}", candidate.display()))?;
        Ok(reject(
            "preprocessed candidate is not interesting".to_string(),
        ))
    }
}

fn sibling(workspace: &Workspace, name: &str, suffix: &str) -> PathBuf {
    workspace.root().join(format!("{name}.{suffix}"))
}

fn reject(reason: String) -> PreprocessOutcome {
    tracing::info!(reason = %reason, "preprocessing rejected");
    PreprocessOutcome::Rejected(reason)
}
