//! Interestingness test synthesis and evaluation.
//!
//! A test is an ordered list of stages rendered into a POSIX shell script.
//! The script exits 0 exactly when the candidate still reproduces the bug.
//! It references the candidate by bare file name and never changes
//! directory, because the external reducer runs it from scratch copies.
use crate::compile_db::FILE_PLACEHOLDER;
use crate::config::RunConfig;
use crate::error::{ReduceError, Result};
use crate::process::{self, Output};
use crate::workspace::{Workspace, LOG_FILE};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Exit status GNU `timeout` reports when it had to stop the command.
const TIMEOUT_STATUS: i32 = 124;
/// Grace period before `timeout` escalates to SIGKILL.
const KILL_AFTER_SECS: u64 = 2;
/// Slack added on top of the per-stage budget when we run the script ourselves.
const SCRIPT_SLACK: Duration = Duration::from_secs(5);

/// Exit status a stage must produce for the candidate to stay interesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitExpectation {
    Success,
    Failure,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageCommand {
    /// Program and arguments; `$FILE` is replaced by the candidate name.
    Argv(Vec<String>),
    /// A user command line run through `sh -c`.
    Shell(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub label: String,
    pub command: StageCommand,
    pub expect: ExitExpectation,
}

/// A fully specified interestingness test, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterestingnessSpec {
    pub file_name: String,
    pub stages: Vec<Stage>,
    /// Case-insensitive text required in the combined output of all stages.
    pub grep: Option<String>,
    /// Case-insensitive text the candidate file itself must contain.
    pub grep_file: Option<String>,
    pub timeout: Option<Duration>,
    pub timeout_is_interesting: bool,
}

/// Outcome of one test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Interesting,
    NotInteresting,
}

impl Verdict {
    pub fn is_interesting(self) -> bool {
        matches!(self, Verdict::Interesting)
    }
}

/// Collects stages and checks that every tool they need exists.
#[derive(Debug, Clone)]
pub struct InterestingnessTestBuilder {
    file_name: String,
    stages: Vec<Stage>,
    grep: Option<String>,
    grep_file: Option<String>,
    timeout: Option<Duration>,
    timeout_is_interesting: bool,
}

impl InterestingnessTestBuilder {
    pub fn new(file_name: &str, config: &RunConfig) -> Self {
        Self {
            file_name: file_name.to_string(),
            stages: Vec::new(),
            grep: config.grep.clone(),
            grep_file: config.grep_file.clone(),
            timeout: config.timeout(),
            timeout_is_interesting: config.timeout_is_interesting,
        }
    }

    /// Add an argument-vector stage.
    pub fn stage(mut self, label: &str, argv: Vec<String>, expect: ExitExpectation) -> Self {
        self.stages.push(Stage {
            label: label.to_string(),
            command: StageCommand::Argv(argv),
            expect,
        });
        self
    }

    /// Add a shell command stage.
    pub fn shell_stage(mut self, label: &str, command: &str, expect: ExitExpectation) -> Self {
        self.stages.push(Stage {
            label: label.to_string(),
            command: StageCommand::Shell(command.to_string()),
            expect,
        });
        self
    }

    /// Validate the stages and produce the spec.
    ///
    /// Problems found here are setup errors; they never become a
    /// "not interesting" verdict.
    pub fn build(self) -> Result<InterestingnessSpec> {
        if self.stages.is_empty() {
            return Err(ReduceError::TestBuildFailed(
                "interestingness test has no stages".to_string(),
            ));
        }
        for stage in &self.stages {
            match &stage.command {
                StageCommand::Argv(argv) => {
                    let program = argv.first().ok_or_else(|| {
                        ReduceError::TestBuildFailed(format!("stage {} has no program", stage.label))
                    })?;
                    which::which(program).map_err(|_| {
                        ReduceError::TestBuildFailed(format!(
                            "stage {}: {program} not found",
                            stage.label
                        ))
                    })?;
                }
                StageCommand::Shell(command) => {
                    if command.trim().is_empty() {
                        return Err(ReduceError::TestBuildFailed(format!(
                            "stage {} has an empty command",
                            stage.label
                        )));
                    }
                }
            }
        }
        if let Some(pattern) = &self.grep {
            if pattern.is_empty() {
                return Err(ReduceError::TestBuildFailed(
                    "grep pattern is empty".to_string(),
                ));
            }
        }
        if self.grep_file.as_deref() == Some("") {
            return Err(ReduceError::TestBuildFailed(
                "file grep pattern is empty".to_string(),
            ));
        }
        if self.timeout.is_some() && which::which("timeout").is_err() {
            return Err(ReduceError::ToolNotFound("timeout".to_string()));
        }
        Ok(InterestingnessSpec {
            file_name: self.file_name,
            stages: self.stages,
            grep: self.grep,
            grep_file: self.grep_file,
            timeout: self.timeout,
            timeout_is_interesting: self.timeout_is_interesting,
        })
    }
}

impl InterestingnessSpec {
    /// Render the POSIX shell script.
    pub fn render(&self) -> String {
        let mut script = String::new();
        script.push_str("#!/bin/sh\n");
        script.push_str(&format!(
            "# Interestingness test for {}: exit 0 keeps the candidate.\n",
            self.file_name
        ));
        script.push_str(&format!(": > {LOG_FILE}\n"));

        for (index, stage) in self.stages.iter().enumerate() {
            script.push_str(&format!("\n# {}: {}\n", index + 1, stage.label));
            script.push_str(&format!(
                "{}{} >> {LOG_FILE} 2>&1\n",
                self.timeout_prefix(),
                self.render_command(&stage.command)
            ));
            script.push_str("status=$?\n");
            if self.timeout.is_some() {
                let on_timeout = if self.timeout_is_interesting { 0 } else { 1 };
                script.push_str(&format!(
                    "[ \"$status\" -eq {TIMEOUT_STATUS} ] && exit {on_timeout}\n"
                ));
            }
            match stage.expect {
                ExitExpectation::Success => script.push_str("[ \"$status\" -eq 0 ] || exit 1\n"),
                ExitExpectation::Failure => script.push_str("[ \"$status\" -ne 0 ] || exit 1\n"),
                ExitExpectation::Any => {}
            }
        }

        if let Some(pattern) = &self.grep {
            script.push_str(&format!(
                "\ngrep -qiF -e {} {LOG_FILE} || exit 1\n",
                shell_words::quote(pattern)
            ));
        }
        if let Some(pattern) = &self.grep_file {
            script.push_str(&format!(
                "grep -qiF -e {} {} || exit 1\n",
                shell_words::quote(pattern),
                shell_words::quote(&self.file_name)
            ));
        }
        script.push_str("exit 0\n");
        script
    }

    fn timeout_prefix(&self) -> String {
        match self.timeout {
            Some(timeout) => format!("timeout -k {KILL_AFTER_SECS} {} ", timeout.as_secs().max(1)),
            None => String::new(),
        }
    }

    fn render_command(&self, command: &StageCommand) -> String {
        match command {
            StageCommand::Argv(argv) => shell_words::join(
                argv.iter().map(|arg| arg.replace(FILE_PLACEHOLDER, &self.file_name)),
            ),
            StageCommand::Shell(command) => {
                let command = command.replace(FILE_PLACEHOLDER, &self.file_name);
                format!("sh -c {}", shell_words::quote(&command))
            }
        }
    }

    /// Write the script to `path` inside the workspace.
    pub fn write_to(&self, workspace: &Workspace, path: &Path) -> Result<InterestingnessTest> {
        workspace.write_script(path, &self.render())?;
        tracing::debug!(script = %path.display(), stages = self.stages.len(), "wrote script");
        Ok(InterestingnessTest {
            script: path.to_path_buf(),
            deadline: script_deadline(self.timeout, self.stages.len()),
            timeout_is_interesting: self.timeout_is_interesting,
            shell: PathBuf::from("sh"),
        })
    }

    /// Install as the workspace `test.sh` and record its stage count.
    pub fn install(&self, workspace: &mut Workspace) -> Result<InterestingnessTest> {
        let path = workspace.paths().test_script_path();
        let test = self.write_to(workspace, &path)?;
        workspace.manifest.test_stages = self.stages.len();
        workspace.write_manifest()?;
        tracing::info!(
            script = %path.display(),
            stages = self.stages.len(),
            grep = self.grep.as_deref().unwrap_or(""),
            "wrote interestingness test"
        );
        Ok(test)
    }
}

/// Upper bound for one whole script run, if stages are time-limited.
pub fn script_deadline(timeout: Option<Duration>, stages: usize) -> Option<Duration> {
    timeout.map(|timeout| {
        let per_stage = timeout + Duration::from_secs(KILL_AFTER_SECS);
        per_stage * stages.max(1) as u32 + SCRIPT_SLACK
    })
}

/// An installed script that can be executed against the workspace.
#[derive(Debug, Clone)]
pub struct InterestingnessTest {
    script: PathBuf,
    deadline: Option<Duration>,
    timeout_is_interesting: bool,
    shell: PathBuf,
}

impl InterestingnessTest {
    /// The test installed in `workspace`, as recorded in its manifest.
    pub fn for_workspace(workspace: &Workspace, config: &RunConfig) -> Self {
        Self {
            script: workspace.paths().test_script_path(),
            deadline: script_deadline(config.timeout(), workspace.manifest.test_stages),
            timeout_is_interesting: config.timeout_is_interesting,
            shell: PathBuf::from("sh"),
        }
    }

    /// Interpreter used to run the script.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Run the script from `cwd`, where the candidate lives.
    pub fn run(&self, cwd: &Path) -> Result<Verdict> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg(&self.script).current_dir(cwd);
        let output = process::run(&mut cmd, self.deadline, Output::Discard)?;
        let verdict = if output.timed_out {
            if self.timeout_is_interesting {
                Verdict::Interesting
            } else {
                Verdict::NotInteresting
            }
        } else if output.success() {
            Verdict::Interesting
        } else {
            Verdict::NotInteresting
        };
        tracing::debug!(
            script = %self.script.display(),
            status = %output.describe(),
            duration_ms = output.duration_ms,
            ?verdict,
            "ran interestingness test"
        );
        Ok(verdict)
    }
}

#[cfg(test)]
#[path = "interesting_tests.rs"]
mod tests;
