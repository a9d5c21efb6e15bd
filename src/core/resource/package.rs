//! Debian packages, managed with `dpkg-query` and `apt-get`.

use super::Converge;
use crate::converge::report::Report;
use crate::converge::{Context, Outcome};
use crate::transport::{quote, Transport};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageAction {
    Install,
    Remove,
}

impl PackageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageAction::Install => "install",
            PackageAction::Remove => "remove",
        }
    }
}

/// A package that should be installed or removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    pub action: PackageAction,
    pub package: String,
}

impl Package {
    /// Asks `dpkg` whether the package is installed.
    fn installed<T: Transport, R: Report>(
        &self,
        ctx: &mut Context<'_, T, R>,
    ) -> anyhow::Result<bool> {
        let command = format!(
            r"dpkg-query -W --showformat='${{Status}}\n' {} | grep 'install ok installed'",
            quote(&self.package)?,
        );
        Ok(ctx.probe(&command)?.success())
    }
}

impl Converge for Package {
    fn converge<T: Transport, R: Report>(
        &self,
        ctx: &mut Context<'_, T, R>,
    ) -> anyhow::Result<Outcome> {
        let installed = self.installed(ctx)?;
        let quiet = ctx.is_guard();
        let command = match (self.action, installed) {
            (PackageAction::Install, true) => return ctx.skip("package already installed"),
            (PackageAction::Remove, false) => return ctx.skip("package not installed"),
            (PackageAction::Install, false) => {
                format!("apt-get install -y {}", quote(&self.package)?)
            }
            (PackageAction::Remove, true) => {
                format!("apt-get --purge autoremove -y {}", quote(&self.package)?)
            }
        };
        Ok(Outcome::from_status(ctx.run(&command, quiet)?.status))
    }
}
