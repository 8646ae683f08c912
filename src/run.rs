//! Top-level pipeline: a new run, or the loop rerun on an existing workspace.
use crate::compile_db;
use crate::config::RunConfig;
use crate::driver::Driver;
use crate::error::ReduceError;
use crate::interesting::InterestingnessTest;
use crate::preprocess::{PreprocessOutcome, PreprocessStage};
use crate::reduce::{ReductionLoopController, ReductionRunState};
use crate::util::{display_path, normalize_lexically, truncate_string};
use crate::workspace::Workspace;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Bytes of `log.txt` quoted when the original candidate is not interesting.
const LOG_EXCERPT_BYTES: usize = 2000;

/// Where a finished run left its result.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub workspace: PathBuf,
    pub candidate: PathBuf,
    pub state: ReductionRunState,
}

impl RunReport {
    /// One-line summary printed on stdout.
    pub fn summary(&self) -> String {
        format!(
            "{} ({} -> {} bytes, {} cycles)",
            self.candidate.display(),
            self.state.initial_size,
            self.state.current_size,
            self.state.cycles
        )
    }
}

/// Isolate `source` from `build_dir` into a fresh workspace and reduce it.
pub fn run_new(
    driver: &mut dyn Driver,
    source: &Path,
    build_dir: &Path,
    config: &RunConfig,
) -> Result<RunReport> {
    let cwd = std::env::current_dir().context("read current directory")?;
    let build_dir = build_dir
        .canonicalize()
        .with_context(|| format!("resolve build directory {}", build_dir.display()))?;
    if !source.is_file() {
        return Err(anyhow!("source file {} does not exist", source.display()));
    }
    let source = normalize_lexically(source, &cwd);

    let entry = compile_db::resolve(&build_dir, &source)?;
    let aux_files = driver.aux_files(&source, &build_dir)?;
    let mut workspace = Workspace::create(&build_dir, &entry, &source, &aux_files, driver.kind())?;
    tracing::info!(
        driver = %driver.kind(),
        workspace = %display_path(workspace.root(), Some(build_dir.as_path())),
        "isolated candidate"
    );

    let result = prepare(driver, &mut workspace, config)
        .and_then(|test| reduce(&mut workspace, config, &test));
    finish(&workspace, result)
}

/// Run the reduction loop again on a workspace from an earlier run.
pub fn run_rerun(path: &Path, config: &RunConfig) -> Result<RunReport> {
    let mut workspace = Workspace::reopen(path)?;
    let test = InterestingnessTest::for_workspace(&workspace, config);
    let result = reduce(&mut workspace, config, &test);
    finish(&workspace, result)
}

fn prepare(
    driver: &mut dyn Driver,
    workspace: &mut Workspace,
    config: &RunConfig,
) -> Result<InterestingnessTest> {
    let spec = driver
        .build_test(workspace, config)
        .with_context(|| format!("build {} interestingness test", driver.kind()))?;
    let test = spec.install(workspace)?;
    ensure_interesting(workspace, &test)?;
    Ok(test)
}

/// The untouched candidate must reproduce, or the reducer has nothing to keep.
fn ensure_interesting(workspace: &Workspace, test: &InterestingnessTest) -> Result<()> {
    if test.run(workspace.root())?.is_interesting() {
        tracing::info!("original candidate is interesting");
        return Ok(());
    }
    let log = fs::read_to_string(workspace.paths().log_path()).unwrap_or_default();
    let excerpt = truncate_string(log.trim(), LOG_EXCERPT_BYTES);
    Err(ReduceError::TestBuildFailed(format!(
        "the original candidate does not pass {}; test output:\n{excerpt}",
        test.script().display()
    ))
    .into())
}

fn reduce(
    workspace: &mut Workspace,
    config: &RunConfig,
    test: &InterestingnessTest,
) -> Result<ReductionRunState> {
    if config.preprocess {
        let stage = PreprocessStage::new(&workspace.entry, config.timeout());
        match stage.run(workspace, test)? {
            PreprocessOutcome::Accepted { before, after } => {
                tracing::info!(before, after, "preprocessed candidate before reducing")
            }
            PreprocessOutcome::Rejected(reason) => {
                tracing::info!(%reason, "kept candidate unpreprocessed")
            }
        }
    }
    let state = ReductionLoopController::new(workspace, config, test).run()?;
    Ok(state)
}

fn finish(workspace: &Workspace, result: Result<ReductionRunState>) -> Result<RunReport> {
    match result {
        Ok(state) => {
            let candidate = workspace.candidate_path();
            tracing::info!(
                workspace = %workspace.root().display(),
                size = state.current_size,
                cycles = state.cycles,
                "reduction finished"
            );
            Ok(RunReport {
                workspace: workspace.root().to_path_buf(),
                candidate,
                state,
            })
        }
        Err(err) => {
            tracing::error!(
                workspace = %workspace.root().display(),
                error = %err,
                "reduction stopped; workspace kept for inspection"
            );
            Err(err.context(format!("workspace {}", workspace.root().display())))
        }
    }
}
