//! End-to-end runs of the reduction pipeline against fake tools.

mod common;

use common::{Project, ACCEPTING_CC, CRASHING_CC, FAILING_REDUCER, LINE_REDUCER};
use cxxreduce::config::{ReducerConfig, RunConfig};
use cxxreduce::driver::{CommandDriver, CompilerCrashDriver};
use cxxreduce::reduce::LoopState;
use cxxreduce::run::{run_new, run_rerun};
use cxxreduce::workspace::{WorkspaceManifest, MANIFEST_FILE, TEST_SCRIPT};
use cxxreduce::ReduceError;
use std::fs;
use std::path::Path;

const BUGGY_SOURCE: &str = "#include <vector>\nint keep_me();\nint CRASH;\nint also_gone();\n";

fn config(reducer: &Path) -> RunConfig {
    let mut config = RunConfig::new(ReducerConfig::new(reducer.to_path_buf()));
    config.jobs = 2;
    config
}

fn manifest(workspace: &Path) -> WorkspaceManifest {
    let text = fs::read_to_string(workspace.join(MANIFEST_FILE)).expect("read manifest");
    serde_json::from_str(&text).expect("parse manifest")
}

#[test]
fn command_driver_reduces_to_the_needle() {
    let project = Project::new();
    let cc = project.tool("fake-cc", ACCEPTING_CC);
    let reducer = project.tool("fake-reducer", LINE_REDUCER);
    let source = project.source("bug.cpp", BUGGY_SOURCE);
    project.compile_db(&cc, &source);

    let command = format!("grep -q CRASH {}", source.display());
    let mut driver = CommandDriver::new(command);
    let report =
        run_new(&mut driver, &source, &project.build_dir(), &config(&reducer)).expect("run");

    assert!(report.state.converged);
    assert_eq!(report.state.state, LoopState::Converged);
    assert_eq!(report.state.cycles, 2);
    assert_eq!(
        fs::read_to_string(&report.candidate).expect("read candidate"),
        "int CRASH;\n"
    );
    // The original tree is never touched.
    assert_eq!(fs::read_to_string(&source).expect("read source"), BUGGY_SOURCE);

    let workspace = project.only_workspace();
    assert_eq!(report.workspace, workspace);
    let script = fs::read_to_string(workspace.join(TEST_SCRIPT)).expect("read script");
    assert!(script.contains("grep -q CRASH bug.cpp"), "{script}");
    assert!(!script.contains(&source.display().to_string()), "{script}");

    let args = fs::read_to_string(workspace.join("reducer-args")).expect("reducer args");
    let first = args.lines().next().expect("one invocation");
    assert!(first.starts_with("--n=2 "), "{first}");
    assert!(first.ends_with(&format!("{} bug.cpp", workspace.join(TEST_SCRIPT).display())));

    let manifest = manifest(&workspace);
    assert_eq!(manifest.final_state.as_deref(), Some("converged"));
    assert_eq!(manifest.cycles, 2);
    assert_eq!(manifest.test_stages, 2);
    assert_eq!(manifest.source_name, "bug.cpp");
}

#[test]
fn compiler_crash_keeps_the_crashing_declaration() {
    let project = Project::new();
    let crashing = project.tool("crashing-cc", CRASHING_CC);
    let verifying = project.tool("verifying-cc", ACCEPTING_CC);
    let reducer = project.tool("fake-reducer", LINE_REDUCER);
    let source = project.source("ice.cpp", BUGGY_SOURCE);
    project.compile_db(&crashing, &source);

    let mut config = config(&reducer);
    config.preprocess = false;
    let mut driver = CompilerCrashDriver::new(verifying.display().to_string(), None);
    let report = run_new(&mut driver, &source, &project.build_dir(), &config).expect("run");

    let reduced = fs::read_to_string(&report.candidate).expect("read candidate");
    assert_eq!(reduced, "int CRASH;\n");
    assert!(report.state.current_size < report.state.initial_size);
}

#[test]
fn uninteresting_original_is_a_setup_error() {
    let project = Project::new();
    let cc = project.tool("fake-cc", ACCEPTING_CC);
    let reducer = project.tool("fake-reducer", LINE_REDUCER);
    let source = project.source("bug.cpp", "int fine();\n");
    project.compile_db(&cc, &source);

    let mut driver = CommandDriver::new(format!("grep -q CRASH {}", source.display()));
    let err = run_new(&mut driver, &source, &project.build_dir(), &config(&reducer))
        .expect_err("nothing to reproduce");
    let reduce_err = err.downcast_ref::<ReduceError>().expect("typed error");
    assert!(matches!(reduce_err, ReduceError::TestBuildFailed(_)), "{err:#}");
    assert!(reduce_err.is_setup());

    // The workspace stays for inspection; the reducer never ran.
    let workspace = project.only_workspace();
    assert!(workspace.join(TEST_SCRIPT).is_file());
    assert!(!workspace.join("reducer-args").exists());
}

#[test]
fn reducer_failure_stops_the_run() {
    let project = Project::new();
    let cc = project.tool("fake-cc", ACCEPTING_CC);
    let reducer = project.tool("fake-reducer", FAILING_REDUCER);
    let source = project.source("bug.cpp", BUGGY_SOURCE);
    project.compile_db(&cc, &source);

    let mut driver = CommandDriver::new(format!("grep -q CRASH {}", source.display()));
    let err = run_new(&mut driver, &source, &project.build_dir(), &config(&reducer))
        .expect_err("reducer fails");
    match err.downcast_ref::<ReduceError>() {
        Some(ReduceError::ReducerToolFailed { status, .. }) => {
            assert_eq!(status, "exit status 7")
        }
        other => panic!("unexpected error {other:?}: {err:#}"),
    }

    let workspace = project.only_workspace();
    assert_eq!(manifest(&workspace).final_state.as_deref(), Some("failed"));
    assert!(workspace.join("bug.cpp").is_file());
}

#[test]
fn source_outside_the_database_is_not_found() {
    let project = Project::new();
    let cc = project.tool("fake-cc", ACCEPTING_CC);
    let reducer = project.tool("fake-reducer", LINE_REDUCER);
    let listed = project.source("listed.cpp", "int a;\n");
    let other = project.source("other.cpp", "int CRASH;\n");
    project.compile_db(&cc, &listed);

    let mut driver = CommandDriver::new("true".to_string());
    let err = run_new(&mut driver, &other, &project.build_dir(), &config(&reducer))
        .expect_err("not in database");
    assert!(matches!(
        err.downcast_ref::<ReduceError>(),
        Some(ReduceError::ConfigNotFound { .. })
    ));
    assert!(!project.build_dir().join("reducer").exists());
}

#[test]
fn rerun_continues_an_existing_workspace() {
    let project = Project::new();
    let cc = project.tool("fake-cc", ACCEPTING_CC);
    let reducer = project.tool("fake-reducer", LINE_REDUCER);
    let source = project.source("bug.cpp", BUGGY_SOURCE);
    project.compile_db(&cc, &source);

    let mut driver = CommandDriver::new(format!("grep -q CRASH {}", source.display()));
    let first = run_new(&mut driver, &source, &project.build_dir(), &config(&reducer))
        .expect("first run");

    // Grow the candidate again, as if someone edited it by hand.
    fs::write(&first.candidate, "int extra();\nint CRASH;\nint more();\n").expect("edit");
    let second = run_rerun(&first.workspace, &config(&reducer)).expect("rerun");

    assert_eq!(second.workspace, first.workspace);
    assert_eq!(
        fs::read_to_string(&second.candidate).expect("read candidate"),
        "int CRASH;\n"
    );
    assert_eq!(manifest(&second.workspace).final_state.as_deref(), Some("converged"));
}

#[test]
fn rerun_rejects_a_plain_directory() {
    let project = Project::new();
    let reducer = project.tool("fake-reducer", LINE_REDUCER);
    let err = run_rerun(&project.build_dir(), &config(&reducer)).expect_err("not a workspace");
    assert!(matches!(
        err.downcast_ref::<ReduceError>(),
        Some(ReduceError::WorkspaceCorrupt { .. })
    ));
}

/// A real compiler removes dead code while the program still exits nonzero.
#[test]
fn real_compiler_drops_dead_statements() {
    let Ok(cxx) = which::which("c++") else {
        eprintln!("Skipping: no c++ on PATH");
        return;
    };
    let project = Project::new();
    let reducer = project.tool("fake-reducer", LINE_REDUCER);
    let source = project.source(
        "main.cpp",
        "int main() {\n  int x = 1 + 0;\n  int unused = 42;\n  return x;\n}\n",
    );
    project.compile_db(&cxx, &source);

    let command = format!(
        "{} -o prog {} && {{ ./prog; [ $? -ne 0 ]; }}",
        cxx.display(),
        source.display()
    );
    let mut config = config(&reducer);
    config.preprocess = false;
    let mut driver = CommandDriver::new(command);
    let report = run_new(&mut driver, &source, &project.build_dir(), &config).expect("run");

    let reduced = fs::read_to_string(&report.candidate).expect("read candidate");
    assert!(!reduced.contains("unused"), "{reduced}");
    assert!(reduced.contains("return x;"), "{reduced}");
    assert!(report.state.converged);
}
