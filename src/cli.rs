//! CLI argument parsing for reduction runs.
//!
//! Each subcommand selects a driver; the shared flags become a `RunConfig`.
use crate::config::{default_jobs, ReducerConfig, RunConfig, DEFAULT_MAX_CYCLES};
use crate::driver::TidyMode;
use crate::error::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "cxxreduce",
    version,
    about = "Isolate a C++ compiler or analyzer defect and drive an external reducer",
    after_help = "Examples:\n  cxxreduce compiler-crash src/ice.cpp --build-dir build --verifying-compiler g++\n  cxxreduce tidy src/a.cpp --build-dir build --mode crash\n  cxxreduce command src/a.cpp --build-dir build --interesting-command './check.sh'\n  cxxreduce rerun build/reducer/<id>",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    CompilerCrash(CompilerCrashArgs),
    Tidy(TidyArgs),
    Command(CommandArgs),
    Rerun(RerunArgs),
}

/// Source selection shared by every new run.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Source file to reduce
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// Build directory containing compile_commands.json
    #[arg(long, value_name = "DIR")]
    pub build_dir: PathBuf,
}

/// Flags that shape the interestingness test and the reducer.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Reducer executable (default: $CXXREDUCE_REDUCER, then cvise, then creduce)
    #[arg(long, value_name = "BIN")]
    pub reduce_bin: Option<String>,

    /// Parallel interestingness tests for the reducer (default: CPU count)
    #[arg(long, short, value_name = "N")]
    pub jobs: Option<usize>,

    /// Kill each test command after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Treat a timed-out command as reproducing the bug
    #[arg(long, requires = "timeout")]
    pub timeout_is_interesting: bool,

    /// Case-insensitive text the test output must contain
    #[arg(long, value_name = "PATTERN")]
    pub grep: Option<String>,

    /// Case-insensitive text the candidate file itself must contain
    #[arg(long, value_name = "PATTERN")]
    pub grep_file: Option<String>,

    /// Skip the preprocessing stage
    #[arg(long)]
    pub no_preprocess: bool,

    /// Upper bound on reduce/preprocess cycles
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_CYCLES)]
    pub max_cycles: usize,
}

impl CommonArgs {
    /// Resolve the reducer and build the run configuration.
    pub fn run_config(&self) -> Result<RunConfig> {
        let reducer = ReducerConfig::resolve(self.reduce_bin.as_deref())?;
        let mut config = RunConfig::new(reducer);
        config.jobs = self.jobs.unwrap_or_else(default_jobs).max(1);
        config.timeout_secs = self.timeout;
        config.timeout_is_interesting = self.timeout_is_interesting;
        config.grep = self.grep.clone();
        config.grep_file = self.grep_file.clone();
        config.preprocess = !self.no_preprocess;
        config.max_cycles = self.max_cycles.max(1);
        Ok(config)
    }
}

/// Reduce a compiler crash against a verifying compiler.
#[derive(Parser, Debug)]
#[command(about = "Reduce a compiler crash (a verifying compiler must accept the candidate)")]
pub struct CompilerCrashArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Compiler that must still accept the reduced code
    #[arg(long, value_name = "BIN")]
    pub verifying_compiler: String,

    /// Arguments for the verifying compiler instead of the project's ($FILE is the candidate)
    #[arg(long, value_name = "ARGS", allow_hyphen_values = true)]
    pub verifying_compiler_args: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Reduce a clang-tidy defect.
#[derive(Parser, Debug)]
#[command(about = "Reduce a clang-tidy crash, diagnostic or broken fix")]
pub struct TidyArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// The clang-tidy binary
    #[arg(long, value_name = "BIN", default_value = "clang-tidy")]
    pub clang_tidy_binary: String,

    /// Full clang-tidy invocation to use instead of the generated one ($FILE is the candidate)
    #[arg(long, value_name = "CMD", allow_hyphen_values = true)]
    pub clang_tidy_invocation: Option<String>,

    /// The check known to cause the problem (skips isolation)
    #[arg(long, value_name = "CHECK")]
    pub clang_tidy_check: Option<String>,

    /// What counts as the bug still being present
    #[arg(long, value_enum, default_value_t = TidyMode::Crash)]
    pub mode: TidyMode,

    /// Keep every enabled check instead of isolating the responsible one
    #[arg(long)]
    pub no_isolate: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Reduce against a custom interestingness command.
#[derive(Parser, Debug)]
#[command(about = "Reduce with a custom interestingness command")]
pub struct CommandArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Command that exits 0 while the bug is present; paths into the build
    /// directory and to the source are rewritten into the workspace
    #[arg(long, value_name = "CMD", allow_hyphen_values = true)]
    pub interesting_command: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Rerun the reduction loop on an existing workspace.
#[derive(Parser, Debug)]
#[command(about = "Rerun the reduction loop on an existing workspace")]
pub struct RerunArgs {
    /// Workspace directory created by an earlier run
    #[arg(value_name = "WORKSPACE")]
    pub workspace: PathBuf,

    #[command(flatten)]
    pub common: CommonArgs,
}
