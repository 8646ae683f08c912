use anyhow::Result;
use clap::Parser;
use cxxreduce::cli::{Command, RootArgs};
use cxxreduce::driver::{CommandDriver, CompilerCrashDriver, TidyDriver};
use cxxreduce::process;
use cxxreduce::run::{self, RunReport};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_logging(args.verbose);
    process::install_cancel_handler();

    let report = match args.command {
        Command::CompilerCrash(args) => {
            let config = args.common.run_config()?;
            let mut driver =
                CompilerCrashDriver::new(args.verifying_compiler, args.verifying_compiler_args);
            run::run_new(&mut driver, &args.source.source, &args.source.build_dir, &config)?
        }
        Command::Tidy(args) => {
            let config = args.common.run_config()?;
            let mut driver = TidyDriver::new(
                args.clang_tidy_binary,
                args.clang_tidy_invocation,
                args.clang_tidy_check,
                args.mode,
                !args.no_isolate,
            );
            let report =
                run::run_new(&mut driver, &args.source.source, &args.source.build_dir, &config)?;
            if let Some(isolation) = driver.isolation() {
                tracing::info!(
                    method = ?isolation.method,
                    runs = isolation.runs,
                    checks = %isolation.outcome.checks().join(","),
                    "check isolation"
                );
            }
            report
        }
        Command::Command(args) => {
            let config = args.common.run_config()?;
            let mut driver = CommandDriver::new(args.interesting_command);
            run::run_new(&mut driver, &args.source.source, &args.source.build_dir, &config)?
        }
        Command::Rerun(args) => {
            let config = args.common.run_config()?;
            run::run_rerun(&args.workspace, &config)?
        }
    };
    print_report(&report);
    Ok(())
}

/// `info` by default, `debug` with `--verbose`; `RUST_LOG` wins over both.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_report(report: &RunReport) {
    println!("{}", report.summary());
}
