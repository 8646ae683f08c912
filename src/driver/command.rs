use super::{Driver, DriverKind};
use crate::config::RunConfig;
use crate::error::Result;
use crate::interesting::{ExitExpectation, InterestingnessSpec, InterestingnessTestBuilder};
use crate::workspace::Workspace;

/// Reduces against a user-supplied interestingness command run after the
/// candidate compiles.
#[derive(Debug, Clone)]
pub struct CommandDriver {
    command: String,
}

impl CommandDriver {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

impl Driver for CommandDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Command
    }

    fn build_test(
        &mut self,
        workspace: &mut Workspace,
        config: &RunConfig,
    ) -> Result<InterestingnessSpec> {
        let command = workspace.rewrite_command(&self.command)?;
        tracing::info!(command = %command, "rewrote interestingness command");
        InterestingnessTestBuilder::new(workspace.source_name(), config)
            .stage(
                "candidate compiles",
                workspace.entry.argument_template(),
                ExitExpectation::Success,
            )
            .shell_stage("interestingness command", &command, ExitExpectation::Success)
            .build()
    }
}
