use super::{Driver, DriverKind};
use crate::compile_db::FILE_PLACEHOLDER;
use crate::config::RunConfig;
use crate::error::{ReduceError, Result};
use crate::interesting::{ExitExpectation, InterestingnessSpec, InterestingnessTestBuilder};
use crate::workspace::Workspace;

/// Reduces a compiler crash: a verifying compiler must accept the candidate
/// and the original compile command must still fail.
#[derive(Debug, Clone)]
pub struct CompilerCrashDriver {
    verifying_compiler: String,
    /// Replacement arguments for the verifying compiler, `$FILE` included.
    verifying_args: Option<String>,
}

impl CompilerCrashDriver {
    pub fn new(verifying_compiler: String, verifying_args: Option<String>) -> Self {
        Self {
            verifying_compiler,
            verifying_args,
        }
    }

    fn verify_argv(&self, workspace: &Workspace) -> Result<Vec<String>> {
        let mut argv = vec![self.verifying_compiler.clone()];
        match &self.verifying_args {
            Some(args) => {
                let rewritten = workspace.rewrite_command(args)?;
                let mut split = shell_words::split(&rewritten).map_err(|err| {
                    ReduceError::TestBuildFailed(format!("invalid verifying compiler args: {err}"))
                })?;
                if !split.iter().any(|arg| arg.contains(FILE_PLACEHOLDER)) {
                    split.push(FILE_PLACEHOLDER.to_string());
                }
                argv.extend(split);
            }
            None => argv.extend(workspace.entry.argument_template().into_iter().skip(1)),
        }
        Ok(argv)
    }
}

impl Driver for CompilerCrashDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::CompilerCrash
    }

    fn build_test(
        &mut self,
        workspace: &mut Workspace,
        config: &RunConfig,
    ) -> Result<InterestingnessSpec> {
        let verify = self.verify_argv(workspace)?;
        InterestingnessTestBuilder::new(workspace.source_name(), config)
            .stage("verifying compiler accepts", verify, ExitExpectation::Success)
            .stage(
                "crashing compiler fails",
                workspace.entry.argument_template(),
                ExitExpectation::Failure,
            )
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_db::CompileEntry;
    use crate::config::ReducerConfig;
    use crate::interesting::StageCommand;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn workspace(dir: &TempDir) -> Workspace {
        let root = dir.path().canonicalize().expect("canonical");
        fs::create_dir_all(root.join("build")).expect("build dir");
        let file = root.join("ice.cpp");
        fs::write(&file, "template <class T> void f();\n").expect("write source");
        let entry = CompileEntry {
            directory: root.join("build"),
            file: file.clone(),
            arguments: vec![
                "sh".to_string(),
                "-std=c++20".to_string(),
                "-c".to_string(),
                file.display().to_string(),
            ],
            output: None,
        };
        Workspace::create(&root.join("build"), &entry, &file, &[], DriverKind::CompilerCrash)
            .expect("workspace")
    }

    fn config() -> RunConfig {
        RunConfig::new(ReducerConfig::new(PathBuf::from("cvise")))
    }

    #[test]
    fn verifying_compiler_runs_before_crashing_compiler() {
        let dir = TempDir::new().expect("temp dir");
        let mut workspace = workspace(&dir);
        let mut driver = CompilerCrashDriver::new("sh".to_string(), None);
        let spec = driver.build_test(&mut workspace, &config()).expect("spec");

        assert_eq!(spec.stages.len(), 2);
        assert_eq!(spec.stages[0].expect, ExitExpectation::Success);
        assert_eq!(spec.stages[1].expect, ExitExpectation::Failure);
        let StageCommand::Argv(verify) = &spec.stages[0].command else {
            panic!("argv stage expected");
        };
        assert_eq!(verify[0], "sh");
        assert!(verify.contains(&FILE_PLACEHOLDER.to_string()));
        assert!(verify.contains(&"-std=c++20".to_string()));
        assert!(spec.render().contains(" ice.cpp "));
    }

    #[test]
    fn overridden_arguments_get_the_candidate() {
        let dir = TempDir::new().expect("temp dir");
        let mut workspace = workspace(&dir);
        let mut driver =
            CompilerCrashDriver::new("sh".to_string(), Some("-fsyntax-only -std=c++17".to_string()));
        let spec = driver.build_test(&mut workspace, &config()).expect("spec");
        let StageCommand::Argv(verify) = &spec.stages[0].command else {
            panic!("argv stage expected");
        };
        assert_eq!(verify, &vec!["sh", "-fsyntax-only", "-std=c++17", FILE_PLACEHOLDER]);
    }

    #[test]
    fn missing_verifying_compiler_is_a_setup_error() {
        let dir = TempDir::new().expect("temp dir");
        let mut workspace = workspace(&dir);
        let mut driver = CompilerCrashDriver::new("/nonexistent/g++-verify".to_string(), None);
        let err = driver
            .build_test(&mut workspace, &config())
            .expect_err("missing compiler");
        assert!(matches!(err, ReduceError::TestBuildFailed(_)), "{err}");
    }
}
