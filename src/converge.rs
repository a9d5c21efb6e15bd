//! The convergence engine: walks the resource tree, evaluates guards, and brings each resource
//! into its desired state.

pub mod report;

use crate::core::resource::{Converge, Resource, Scope};
use crate::transport::{CommandOutput, Transport};
use anyhow::Context as _;
use indexmap::IndexMap;
use report::Report;
use std::fmt::Display;
use thiserror::Error;
use tracing::{debug, info_span};

/// What converging a single resource amounted to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The resource's action ran and succeeded.
    Applied,

    /// Nothing needed doing, for the given reason.
    Skipped(String),

    /// The resource's action ran and exited with the given non-zero status.
    Failed(i32),
}

impl Outcome {
    /// Maps an exit status to [Outcome::Applied] or [Outcome::Failed].
    pub fn from_status(status: i32) -> Self {
        match status {
            0 => Outcome::Applied,
            status => Outcome::Failed(status),
        }
    }

    /// The equivalent exit status: zero unless [Outcome::Failed].
    pub fn status(&self) -> i32 {
        match self {
            Outcome::Applied | Outcome::Skipped(_) => 0,
            Outcome::Failed(status) => *status,
        }
    }

    pub fn success(&self) -> bool {
        self.status() == 0
    }
}

/// Reasons a run stops before every resource has converged.
#[derive(Debug, Error)]
pub enum Error {
    /// A resource outside a guard exited with a non-zero status.
    #[error("resource failed to converge: {name} (exit status {status})")]
    Failed { name: String, status: i32 },

    /// The managed host could not be inspected or changed, or progress could not be reported.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Everything a resource needs while it converges: the transport to the managed host, the
/// reporter, and the resource itself (for its name, scope and environment).
pub struct Context<'a, T, R> {
    transport: &'a mut T,
    reporter: &'a mut R,
    resource: &'a Resource,
}

impl<'a, T: Transport, R: Report> Context<'a, T, R> {
    pub fn new(transport: &'a mut T, reporter: &'a mut R, resource: &'a Resource) -> Self {
        Context {
            transport,
            reporter,
            resource,
        }
    }

    pub fn resource(&self) -> &Resource {
        self.resource
    }

    /// Whether the resource is a guard, i.e. was declared under `not_if`.
    pub fn is_guard(&self) -> bool {
        self.resource.scope() == Scope::NotIf
    }

    pub fn transport(&mut self) -> &mut T {
        self.transport
    }

    /// Runs a command that does the resource's work, with the resource's environment exported.
    ///
    /// Unless `quiet`, the command and its output are reported.
    pub fn run(&mut self, command: &str, quiet: bool) -> anyhow::Result<CommandOutput> {
        let output = self.transport.run(command, self.resource.env())?;
        if !quiet {
            self.reporter.command(command, &output)?;
        }
        Ok(output)
    }

    /// Runs a command that only inspects the managed host. Probes run without the resource's
    /// environment, and are never reported.
    pub fn probe(&mut self, command: &str) -> anyhow::Result<CommandOutput> {
        let output = self.transport.run(command, &IndexMap::new())?;
        debug!(%command, status = output.status, "probe finished");
        Ok(output)
    }

    /// Reports a step taken while converging the resource.
    pub fn note(&mut self, message: impl Display) -> anyhow::Result<()> {
        Ok(self.reporter.note(&message.to_string())?)
    }

    /// Reports that the resource needs no work, and returns the matching [Outcome].
    pub fn skip(&mut self, reason: impl Into<String>) -> anyhow::Result<Outcome> {
        let reason = reason.into();
        self.reporter.skipped(self.resource.name(), &reason)?;
        Ok(Outcome::Skipped(reason))
    }
}

/// Converges a single resource, its guards, and its dependents.
///
/// Guards are evaluated first, all of them. If any guard succeeds, the resource and its
/// dependents are skipped. Otherwise the resource's own action runs, and if it succeeds, the
/// resource's `after` list is converged in order.
///
/// # Errors
///
/// Returns [Error::Failed] if the resource or any of its dependents exits with a non-zero status,
/// unless the resource is itself a guard, in which case the failure is returned as
/// [Outcome::Failed] instead. Returns [Error::Other] for any problem talking to the managed host,
/// regardless of scope.
pub fn converge<T: Transport, R: Report>(
    resource: &Resource,
    transport: &mut T,
    reporter: &mut R,
) -> Result<Outcome, Error> {
    let span = info_span!("converge", name = resource.name(), scope = %resource.scope());
    let _enter = span.enter();

    if resource.scope() != Scope::NotIf {
        reporter
            .converging(resource.name())
            .context("failed to report progress")?;
    }

    if !resource.not_if().is_empty() {
        let mut any_held = false;
        for guard in resource.not_if() {
            if converge(guard, transport, reporter)?.success() {
                any_held = true;
            }
        }
        if any_held {
            debug!("guard held; skipping");
            let mut ctx = Context::new(transport, reporter, resource);
            return Ok(ctx.skip("not_if")?);
        }
    }

    let outcome = {
        let mut ctx = Context::new(transport, reporter, resource);
        resource
            .kind()
            .converge(&mut ctx)
            .with_context(|| format!("failed to converge resource: {}", resource.name()))?
    };
    debug!(?outcome, "converged");

    if let Outcome::Failed(status) = outcome {
        if resource.scope() == Scope::NotIf {
            return Ok(outcome);
        }
        return Err(Error::Failed {
            name: resource.name().to_string(),
            status,
        });
    }

    for child in resource.after() {
        converge(child, transport, reporter)?;
    }
    Ok(outcome)
}

/// Converges a sequence of top-level resources in order, stopping at the first fatal error.
pub fn converge_all<T: Transport, R: Report>(
    resources: &[Resource],
    transport: &mut T,
    reporter: &mut R,
) -> Result<(), Error> {
    for resource in resources {
        converge(resource, transport, reporter)?;
    }
    Ok(())
}
