//! Reports convergence progress to the user.
//!
//! As elsewhere in pickup, the real [Reporter] locks stdout only for the duration of a single
//! report and hands the lock to a testable function that does the actual formatting. Tests can
//! call those functions with a `Vec<u8>` directly, or capture a whole run with [Transcript].

use crate::transport::CommandOutput;
use std::fmt::Display;
use std::io::{self, Write};
use std::ops::DerefMut;

/// Prints feedback about each resource as it converges, to keep the user informed.
pub trait Report {
    /// Reports that a resource is about to converge.
    fn converging(&mut self, name: &str) -> io::Result<()>;

    /// Reports that a resource was skipped, either because it is already in the desired state or
    /// because one of its guards held.
    fn skipped(&mut self, name: &str, reason: &str) -> io::Result<()>;

    /// Reports a step taken while converging a resource.
    fn note(&mut self, message: &str) -> io::Result<()>;

    /// Reports a command that ran on the managed host, and its output.
    fn command(&mut self, command: &str, output: &CommandOutput) -> io::Result<()>;
}

/// The real, production-ready [Report] implementation. Uses the real stdout.
#[derive(Clone, Debug, Default)]
pub struct Reporter;

impl Report for Reporter {
    fn converging(&mut self, name: &str) -> io::Result<()> {
        _converging(&mut io::stdout().lock(), name)
    }

    fn skipped(&mut self, name: &str, reason: &str) -> io::Result<()> {
        _skipped(&mut io::stdout().lock(), name, reason)
    }

    fn note(&mut self, message: &str) -> io::Result<()> {
        _note(&mut io::stdout().lock(), message)
    }

    fn command(&mut self, command: &str, output: &CommandOutput) -> io::Result<()> {
        _command(&mut io::stdout().lock(), command, output)
    }
}

/// A [Report] implementation that records everything it would have printed.
///
/// To enable integration testing, this struct is public but stripped from documentation.
#[doc(hidden)]
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    buffer: Vec<u8>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything reported so far.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

impl Report for Transcript {
    fn converging(&mut self, name: &str) -> io::Result<()> {
        _converging(&mut self.buffer, name)
    }

    fn skipped(&mut self, name: &str, reason: &str) -> io::Result<()> {
        _skipped(&mut self.buffer, name, reason)
    }

    fn note(&mut self, message: &str) -> io::Result<()> {
        _note(&mut self.buffer, message)
    }

    fn command(&mut self, command: &str, output: &CommandOutput) -> io::Result<()> {
        _command(&mut self.buffer, command, output)
    }
}

/// A testable function containing the logic for reporting that a resource is converging.
pub fn _converging<W: Write, O: DerefMut<Target = W>>(mut stdout: O, name: &str) -> io::Result<()> {
    let banner = format!("Converging resource: {name}");
    writeln!(stdout, "\n{banner}\n{}", "-".repeat(banner.chars().count()))
}

/// A testable function containing the logic for reporting a skipped resource.
pub fn _skipped<W: Write, O: DerefMut<Target = W>>(
    mut stdout: O,
    name: &str,
    reason: &str,
) -> io::Result<()> {
    match reason {
        "" => writeln!(stdout, "Skipped {name}"),
        reason => writeln!(stdout, "Skipped {name}: {reason}"),
    }
}

/// A testable function containing the logic for reporting a convergence step.
pub fn _note<W: Write, O: DerefMut<Target = W>>(mut stdout: O, message: &str) -> io::Result<()> {
    writeln!(stdout, "{message}")
}

/// A testable function containing the logic for reporting a remote command and its output.
pub fn _command<W: Write, O: DerefMut<Target = W>>(
    mut stdout: O,
    command: &str,
    output: &CommandOutput,
) -> io::Result<()> {
    fn write_indented(mut writer: impl Write, content: impl Display) -> io::Result<()> {
        for line in content.to_string().lines() {
            //                1234
            writeln!(writer, "    {line}")?;
        }
        Ok(())
    }

    writeln!(stdout, "{command}")?;
    write_indented(stdout.deref_mut(), &output.output)?;
    if !output.success() {
        writeln!(stdout, "Command exited with status {}", output.status)?;
    }
    Ok(())
}
