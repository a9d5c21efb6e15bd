//! Arbitrary shell commands.

use super::Converge;
use crate::converge::report::Report;
use crate::converge::{Context, Outcome};
use crate::transport::Transport;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellAction {
    Run,
}

impl ShellAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShellAction::Run => "run",
        }
    }
}

/// A command run verbatim by the remote user's shell.
///
/// Shell resources have no state to check, so they run on every convergence. They are the usual
/// building block for guards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shell {
    pub action: ShellAction,
    pub command: String,
}

impl Converge for Shell {
    fn converge<T: Transport, R: Report>(
        &self,
        ctx: &mut Context<'_, T, R>,
    ) -> anyhow::Result<Outcome> {
        let ShellAction::Run = self.action;
        let quiet = ctx.is_guard();
        Ok(Outcome::from_status(ctx.run(&self.command, quiet)?.status))
    }
}
