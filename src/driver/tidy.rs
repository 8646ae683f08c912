//! clang-tidy driver.
//!
//! Captures the project's `.clang-tidy`, narrows the enabled checks to the
//! one behind the defect when it can, and builds a test for one of three
//! defect shapes: an analyzer crash, a diagnostic, or a fix that breaks the
//! build.
use super::{Driver, DriverKind};
use crate::checks::{
    checks_argument, parse_enabled_checks, CheckIsolator, Isolation, IsolationOutcome,
};
use crate::compile_db::FILE_PLACEHOLDER;
use crate::config::RunConfig;
use crate::error::{IoContext, ReduceError, Result};
use crate::interesting::{ExitExpectation, InterestingnessSpec, InterestingnessTestBuilder};
use crate::process::{self, Output};
use crate::workspace::Workspace;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

pub const TIDY_CONFIG: &str = ".clang-tidy";
/// Prefix of the scratch copy the analyzer applies fixes to.
pub const FIX_PREFIX: &str = "broken_fix_";
/// Limit for the analyzer runs made while preparing the test.
const PROBE_TIMEOUT: Duration = Duration::from_secs(300);

/// What "the bug is still present" means for the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TidyMode {
    /// The analyzer exits nonzero.
    Crash,
    /// The analyzer output matches `--grep`; its exit status is ignored.
    Diagnostic,
    /// Applying the analyzer's fixes produces code that no longer compiles.
    BrokenFix,
}

#[derive(Debug, Clone)]
pub struct TidyDriver {
    binary: String,
    /// Full analyzer invocation overriding the generated one.
    invocation: Option<String>,
    check: Option<String>,
    mode: TidyMode,
    isolate: bool,
    isolation: Option<Isolation>,
}

impl TidyDriver {
    pub fn new(
        binary: String,
        invocation: Option<String>,
        check: Option<String>,
        mode: TidyMode,
        isolate: bool,
    ) -> Self {
        Self {
            binary,
            invocation,
            check,
            mode,
            isolate,
            isolation: None,
        }
    }

    /// Isolation result from the last [`Driver::build_test`], if one ran.
    pub fn isolation(&self) -> Option<&Isolation> {
        self.isolation.as_ref()
    }

    /// Analyzer command line for `file`, optionally restricted to `checks`.
    fn analyzer_argv(
        &self,
        workspace: &Workspace,
        file: &str,
        checks: Option<&[String]>,
        fix: bool,
    ) -> Result<Vec<String>> {
        let mut argv = match &self.invocation {
            Some(invocation) => {
                let rewritten = workspace.rewrite_command(invocation)?;
                let argv = shell_words::split(&rewritten).map_err(|err| {
                    ReduceError::TestBuildFailed(format!("invalid analyzer invocation: {err}"))
                })?;
                argv.into_iter()
                    .map(|arg| arg.replace(FILE_PLACEHOLDER, file))
                    .collect()
            }
            None => {
                let mut argv = vec![self.binary.clone()];
                let config = workspace.root().join(TIDY_CONFIG);
                if config.is_file() {
                    argv.push(format!("--config-file={}", config.display()));
                }
                argv.push(file.to_string());
                argv.push("--".to_string());
                argv.extend(workspace.entry.analyzer_flags());
                argv
            }
        };
        if argv.is_empty() {
            return Err(ReduceError::TestBuildFailed(
                "analyzer invocation is empty".to_string(),
            ));
        }
        let mut options = Vec::new();
        if let Some(checks) = checks {
            options.push(checks_argument(checks));
        }
        if fix {
            options.push("--fix-errors".to_string());
        }
        let tail = argv.split_off(1);
        argv.extend(options);
        argv.extend(tail);
        Ok(argv)
    }

    fn spec(
        &self,
        workspace: &Workspace,
        config: &RunConfig,
        checks: Option<&[String]>,
    ) -> Result<InterestingnessSpec> {
        let compile = workspace.entry.argument_template();
        let builder = InterestingnessTestBuilder::new(workspace.source_name(), config)
            .stage("candidate compiles", compile.clone(), ExitExpectation::Success);
        let builder = match self.mode {
            TidyMode::Crash => builder.stage(
                "analyzer crashes",
                self.analyzer_argv(workspace, FILE_PLACEHOLDER, checks, false)?,
                ExitExpectation::Failure,
            ),
            TidyMode::Diagnostic => {
                if config.grep.is_none() {
                    return Err(ReduceError::TestBuildFailed(
                        "diagnostic mode needs a --grep pattern".to_string(),
                    ));
                }
                builder.stage(
                    "analyzer reports",
                    self.analyzer_argv(workspace, FILE_PLACEHOLDER, checks, false)?,
                    ExitExpectation::Any,
                )
            }
            TidyMode::BrokenFix => {
                let scratch = format!("{FIX_PREFIX}{FILE_PLACEHOLDER}");
                let recompile = compile
                    .iter()
                    .map(|arg| {
                        if arg == FILE_PLACEHOLDER {
                            scratch.clone()
                        } else {
                            arg.clone()
                        }
                    })
                    .collect();
                builder
                    .stage(
                        "copy candidate for fixes",
                        vec!["cp".to_string(), FILE_PLACEHOLDER.to_string(), scratch.clone()],
                        ExitExpectation::Success,
                    )
                    .stage(
                        "analyzer applies fixes",
                        self.analyzer_argv(workspace, &scratch, checks, true)?,
                        ExitExpectation::Any,
                    )
                    .stage("fixed candidate fails to compile", recompile, ExitExpectation::Failure)
            }
        };
        builder.build()
    }

    /// Replace the copied configuration with the analyzer's flattened view.
    fn flatten_config(&self, workspace: &Workspace) -> Result<()> {
        let config = workspace.root().join(TIDY_CONFIG);
        if !config.is_file() {
            return Ok(());
        }
        let mut cmd = Command::new(&self.binary);
        cmd.arg(format!("--config-file={}", config.display()))
            .arg("--dump-config")
            .current_dir(workspace.root());
        let output = match process::run(&mut cmd, Some(PROBE_TIMEOUT), Output::Capture) {
            Ok(output) => output,
            Err(ReduceError::Io { context, source }) => {
                tracing::warn!(%context, error = %source, "cannot flatten analyzer config");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        if !output.success() || output.stdout.trim().is_empty() {
            tracing::warn!(status = %output.describe(), "analyzer config not flattened; keeping copy");
            return Ok(());
        }
        fs::write(&config, &output.stdout).io_context(|| format!("write {}", config.display()))?;
        tracing::info!(config = %config.display(), "flattened analyzer config");
        Ok(())
    }

    /// Run the analyzer with `extra` inserted after the program name.
    fn run_analyzer(&self, workspace: &Workspace, extra: &[&str]) -> Result<process::ProcessOutput> {
        let mut argv = self.analyzer_argv(workspace, workspace.source_name(), None, false)?;
        let tail = argv.split_off(1);
        argv.extend(extra.iter().map(|arg| arg.to_string()));
        argv.extend(tail);
        tracing::debug!(command = %shell_words::join(&argv), "running analyzer");
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).current_dir(workspace.root());
        process::run(&mut cmd, Some(PROBE_TIMEOUT), Output::Capture)
    }

    fn isolate_checks(
        &self,
        workspace: &Workspace,
        config: &RunConfig,
    ) -> Result<Option<Isolation>> {
        let listing = self.run_analyzer(workspace, &["--list-checks"])?;
        let enabled = parse_enabled_checks(&listing.stdout);
        if enabled.is_empty() {
            tracing::warn!("analyzer lists no enabled checks; skipping isolation");
            return Ok(None);
        }
        let full = self.run_analyzer(workspace, &[])?;
        if self.mode == TidyMode::Crash && full.success() {
            tracing::warn!("analyzer does not crash on the candidate; skipping isolation");
            return Ok(None);
        }
        tracing::info!(enabled = enabled.len(), "isolating responsible check");

        let probe_path = workspace.paths().probe_script_path();
        let probe = |checks: &[String]| -> Result<bool> {
            let test = self.spec(workspace, config, Some(checks))?.write_to(workspace, &probe_path)?;
            Ok(test.run(workspace.root())?.is_interesting())
        };
        let isolation = CheckIsolator::new(probe).isolate(&enabled, &full.combined())?;
        Ok(Some(isolation))
    }
}

impl Driver for TidyDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Tidy
    }

    fn aux_files(&self, source_file: &Path, build_dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(find_tidy_config(source_file, build_dir).into_iter().collect())
    }

    fn build_test(
        &mut self,
        workspace: &mut Workspace,
        config: &RunConfig,
    ) -> Result<InterestingnessSpec> {
        if self.invocation.is_none() {
            self.flatten_config(workspace)?;
        }

        let checks = if let Some(check) = &self.check {
            Some(vec![check.clone()])
        } else if self.isolate {
            self.isolation = self.isolate_checks(workspace, config)?;
            match self.isolation.as_ref().map(|isolation| &isolation.outcome) {
                Some(IsolationOutcome::Isolated(checks)) => Some(checks.clone()),
                _ => None,
            }
        } else {
            None
        };
        if let Some(checks) = &checks {
            tracing::info!(checks = %checks.join(","), "restricting analyzer checks");
        }
        self.spec(workspace, config, checks.as_deref())
    }
}

/// Nearest `.clang-tidy` above the source file, then above the build tree.
pub fn find_tidy_config(source_file: &Path, build_dir: &Path) -> Option<PathBuf> {
    let source_dir = source_file.parent().unwrap_or(source_file);
    source_dir
        .ancestors()
        .chain(build_dir.ancestors())
        .map(|dir| dir.join(TIDY_CONFIG))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
#[path = "tidy_tests.rs"]
mod tests;
