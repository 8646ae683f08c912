//! External reducer invocation and the reduce/preprocess convergence loop.
use crate::config::{ReducerKind, RunConfig};
use crate::error::{ReduceError, Result};
use crate::interesting::{script_deadline, InterestingnessTest};
use crate::preprocess::{PreprocessOutcome, PreprocessStage};
use crate::process::{self, Output};
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Standard passed to cvise when nothing better is known.
pub const DEFAULT_CLANG_DELTA_STD: &str = "c++20";
const HELP_TIMEOUT: Duration = Duration::from_secs(30);

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Reducing,
    Preprocessing,
    Converged,
    Failed,
}

impl LoopState {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::Reducing => "reducing",
            LoopState::Preprocessing => "preprocessing",
            LoopState::Converged => "converged",
            LoopState::Failed => "failed",
        }
    }
}

/// Mutable state of one reduction run, owned by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReductionRunState {
    pub state: LoopState,
    /// Reducer invocations so far.
    pub cycles: usize,
    pub initial_size: u64,
    /// Candidate size after the previous reducer pass.
    pub previous_size: u64,
    pub current_size: u64,
    pub converged: bool,
}

/// Builds the command line for the external reducer.
#[derive(Debug, Clone)]
pub struct ExternalReducer<'a> {
    config: &'a RunConfig,
    clang_delta_std: Option<String>,
    /// Bound the reducer puts on one whole test script run.
    timeout: Option<Duration>,
}

impl<'a> ExternalReducer<'a> {
    /// Prepare the reducer for a candidate compiled with `language_std`,
    /// tested by a script of `test_stages` time-limited stages.
    pub fn new(
        config: &'a RunConfig,
        language_std: Option<&str>,
        test_stages: usize,
    ) -> Result<Self> {
        let clang_delta_std = match config.reducer.kind {
            ReducerKind::Cvise => {
                let help = cvise_help(&config.reducer.binary)?;
                Some(clang_delta_std(language_std, &help))
            }
            ReducerKind::Creduce | ReducerKind::Other => None,
        };
        Ok(Self {
            config,
            clang_delta_std,
            timeout: script_deadline(config.timeout(), test_stages),
        })
    }

    pub fn arguments(&self, script: &Path, file_name: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(std) = &self.clang_delta_std {
            args.push(format!("--clang-delta-std={std}"));
            args.push("--to-utf8".to_string());
        }
        args.push(format!("--n={}", self.config.jobs.max(1)));
        if let Some(timeout) = self.timeout {
            args.push(format!("--timeout={}", timeout.as_secs()));
        }
        args.push(script.display().to_string());
        args.push(file_name.to_string());
        args
    }

    /// Run the reducer to completion against the workspace candidate.
    pub fn run(&self, workspace: &Workspace) -> Result<()> {
        let binary = &self.config.reducer.binary;
        let args = self.arguments(&workspace.paths().test_script_path(), workspace.source_name());
        let mut argv = vec![binary.display().to_string()];
        argv.extend(args.iter().cloned());
        tracing::info!(command = %shell_words::join(&argv), "running reducer");

        let mut cmd = Command::new(binary);
        cmd.args(&args).current_dir(workspace.root());
        let output = process::run(&mut cmd, None, Output::Inherit)?;
        if !output.success() {
            return Err(ReduceError::ReducerToolFailed {
                tool: binary.display().to_string(),
                status: output.describe(),
            });
        }
        tracing::info!(duration_ms = output.duration_ms, "reducer finished");
        Ok(())
    }
}

fn cvise_help(binary: &Path) -> Result<String> {
    let mut cmd = Command::new(binary);
    cmd.arg("--help");
    let output = process::run(&mut cmd, Some(HELP_TIMEOUT), Output::Capture)?;
    Ok(output.combined())
}

/// Map a compiler `-std=` value onto a `--clang-delta-std` choice.
///
/// GNU dialects map to their ISO counterpart. An unsupported standard falls
/// back to the newest value the installed cvise lists, then to c++20.
pub fn clang_delta_std(language_std: Option<&str>, help: &str) -> String {
    let advertised = advertised_standards(help);
    let wanted = language_std.map(|std| match std.strip_prefix("gnu++") {
        Some(version) => format!("c++{version}"),
        None => std.to_string(),
    });
    if let Some(wanted) = wanted {
        if advertised.iter().any(|std| *std == wanted) {
            return wanted;
        }
    }
    advertised
        .last()
        .cloned()
        .unwrap_or_else(|| DEFAULT_CLANG_DELTA_STD.to_string())
}

fn advertised_standards(help: &str) -> Vec<String> {
    const FLAG: &str = "--clang-delta-std {";
    let Some(start) = help.find(FLAG).map(|index| index + FLAG.len()) else {
        return Vec::new();
    };
    let Some(len) = help[start..].find('}') else {
        return Vec::new();
    };
    help[start..start + len]
        .split(',')
        .map(str::trim)
        .filter(|std| !std.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drives the reducer and the preprocessing stage to a fixed point.
pub struct ReductionLoopController<'a> {
    workspace: &'a mut Workspace,
    config: &'a RunConfig,
    test: &'a InterestingnessTest,
    state: LoopState,
}

impl<'a> ReductionLoopController<'a> {
    pub fn new(
        workspace: &'a mut Workspace,
        config: &'a RunConfig,
        test: &'a InterestingnessTest,
    ) -> Self {
        Self {
            workspace,
            config,
            test,
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until converged. Any error leaves the controller in `Failed` and
    /// is recorded in the workspace manifest before it propagates.
    pub fn run(&mut self) -> Result<ReductionRunState> {
        let reducer = ExternalReducer::new(
            self.config,
            self.workspace.entry.language_standard(),
            self.workspace.manifest.test_stages,
        )?;
        let initial_size = self.workspace.candidate_size()?;
        let mut run_state = ReductionRunState {
            state: LoopState::Idle,
            cycles: 0,
            initial_size,
            previous_size: initial_size,
            current_size: initial_size,
            converged: false,
        };

        let result = self.cycle(&reducer, &mut run_state);
        run_state.state = self.state;
        self.workspace.manifest.cycles = run_state.cycles;
        self.workspace.manifest.final_state = Some(self.state.as_str().to_string());
        self.workspace.write_manifest()?;
        result.map(|()| run_state)
    }

    fn cycle(&mut self, reducer: &ExternalReducer<'_>, run_state: &mut ReductionRunState) -> Result<()> {
        loop {
            if process::cancel_requested() {
                self.state = LoopState::Failed;
                return Err(ReduceError::Cancelled);
            }
            if run_state.cycles >= self.config.max_cycles {
                tracing::warn!(cycles = run_state.cycles, "cycle limit reached");
                self.converge(run_state);
                return Ok(());
            }

            self.state = LoopState::Reducing;
            run_state.cycles += 1;
            let cycle = run_state.cycles;
            let size = match self.reduce_once(reducer, cycle) {
                Ok(size) => size,
                Err(err) => {
                    self.state = LoopState::Failed;
                    return Err(err);
                }
            };
            tracing::info!(cycle, size, previous = run_state.previous_size, "reduced candidate");
            run_state.current_size = size;

            if size >= run_state.previous_size {
                self.converge(run_state);
                return Ok(());
            }
            run_state.previous_size = size;

            if self.config.preprocess {
                self.state = LoopState::Preprocessing;
                let stage =
                    PreprocessStage::new(&self.workspace.entry, self.config.timeout()).shrink_only();
                match stage.run(self.workspace, self.test) {
                    Ok(PreprocessOutcome::Accepted { after, .. }) => {
                        run_state.current_size = after;
                        run_state.previous_size = after;
                    }
                    Ok(PreprocessOutcome::Rejected(_)) => {}
                    Err(err) => {
                        self.state = LoopState::Failed;
                        return Err(err);
                    }
                }
            }
        }
    }

    fn reduce_once(&self, reducer: &ExternalReducer<'_>, cycle: usize) -> Result<u64> {
        self.workspace.snapshot(cycle)?;
        reducer.run(self.workspace)?;
        self.workspace.candidate_size()
    }

    fn converge(&mut self, run_state: &mut ReductionRunState) {
        self.state = LoopState::Converged;
        run_state.converged = true;
        tracing::info!(
            cycles = run_state.cycles,
            initial = run_state.initial_size,
            size = run_state.current_size,
            "reduction converged"
        );
    }
}

#[cfg(test)]
#[path = "reduce_tests.rs"]
mod tests;
