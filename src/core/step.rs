//! Types for representing configuration files.
//!
//! These types mirror the YAML document one-to-one and do only the validation serde can do:
//! unknown `type` and `action` values are rejected here. Everything else is checked when the
//! steps are built into [Resource]s.

use crate::core::resource::file::FileAction;
use crate::core::resource::package::PackageAction;
use crate::core::resource::service::ServiceAction;
use crate::core::resource::shell::ShellAction;
use crate::core::resource::{BuildError, Resource, Scope};
use anyhow::Context;
use indexmap::IndexMap;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;

/// Represents a configuration file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Document {
    /// The top-level steps, converged in order.
    pub steps: Vec<Step>,
}

impl Document {
    /// Reads and parses a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        Self::from_yaml(&yaml)
            .with_context(|| format!("failed to parse configuration file {}", path.display()))
    }

    /// Parses a configuration document from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Builds the top-level [Resource]s, each with scope [Scope::Steps].
    pub fn build(&self) -> Result<Vec<Resource>, BuildError> {
        self.steps
            .iter()
            .map(|step| Resource::from_step(step, Scope::Steps))
            .collect()
    }
}

/// One entry in a `steps`, `after`, or `not_if` list.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Step {
    /// Display name. Resources without one are named `scope.type.action`.
    #[serde(default)]
    pub name: Option<String>,

    /// Environment variables exported before any command this step runs.
    ///
    /// Order is preserved from the source file.
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Steps to converge after this one succeeds.
    #[serde(default)]
    pub after: Vec<Step>,

    /// Guard steps. If any of them succeeds, this step is skipped.
    #[serde(default)]
    pub not_if: Vec<Step>,

    /// The `type` tag, the `action`, and the type-specific fields.
    #[serde(flatten)]
    pub kind: StepKind,
}

/// The type-specific part of a [Step], selected by its `type` field.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum StepKind {
    /// A Debian package.
    #[serde(alias = "DebPackage")]
    Package {
        action: PackageAction,

        /// The package name. Falls back to the step's `name`.
        #[serde(default)]
        package: Option<String>,
    },

    /// A regular file.
    ///
    /// `create` uses `source`, `destination`, `owner`, `group` and `mode`; `delete` uses `file`.
    File {
        action: FileAction,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        destination: Option<String>,
        #[serde(default)]
        file: Option<String>,
        #[serde(default)]
        owner: Option<Scalar>,
        #[serde(default)]
        group: Option<Scalar>,
        #[serde(default)]
        mode: Option<Scalar>,
    },

    /// A system service.
    Service {
        action: ServiceAction,
        service: String,
    },

    /// An arbitrary shell command.
    Shell { action: ShellAction, command: String },
}

/// A YAML scalar that users may reasonably write either quoted or bare, e.g. `owner: 1000` or
/// `mode: "0644"`. File modes only accept [Scalar::Text].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Integer(u64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Integer(i) => write!(f, "{i}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}
