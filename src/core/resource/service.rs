//! System services, managed with the `service` command.

use super::Converge;
use crate::converge::report::Report;
use crate::converge::{Context, Outcome};
use crate::transport::{quote, Transport};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Restart,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Restart => "restart",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    pub action: ServiceAction,
    pub service: String,
}

impl Converge for Service {
    /// Restarts the service unconditionally; there is no state to check first.
    fn converge<T: Transport, R: Report>(
        &self,
        ctx: &mut Context<'_, T, R>,
    ) -> anyhow::Result<Outcome> {
        let ServiceAction::Restart = self.action;
        let command = format!("service {} restart", quote(&self.service)?);
        let quiet = ctx.is_guard();
        Ok(Outcome::from_status(ctx.run(&command, quiet)?.status))
    }
}
