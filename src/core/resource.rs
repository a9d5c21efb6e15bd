//! Types for representing resources: the desired state of one thing on the managed host.

pub mod file;
pub mod package;
pub mod service;
pub mod shell;

use crate::converge::report::Report;
use crate::converge::{Context, Outcome};
use crate::core::step::{Step, StepKind};
use crate::transport::Transport;
use indexmap::IndexMap;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

#[doc(inline)]
pub use file::File;
#[doc(inline)]
pub use package::Package;
#[doc(inline)]
pub use service::Service;
#[doc(inline)]
pub use shell::Shell;

/// Where in the resource tree a [Resource] was declared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// A top-level step.
    Steps,

    /// A dependent, listed in another resource's `after`.
    After,

    /// A guard, listed in another resource's `not_if`.
    ///
    /// Guards print no banner, and their failure is not fatal: it simply means "proceed".
    NotIf,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Steps => "steps",
            Scope::After => "after",
            Scope::NotIf => "not_if",
        })
    }
}

/// Errors found while building [Resource]s from [Step]s.
///
/// Each variant names the resource (by its resolved display name) in which the problem was found.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("{resource}: missing required field `{field}`")]
    MissingField {
        resource: String,
        field: &'static str,
    },

    #[error(
        "{resource}: invalid file mode {mode:?}; expected three or four octal digits in a quoted \
        string, e.g. \"0644\""
    )]
    InvalidMode { resource: String, mode: String },

    #[error("{resource}: invalid environment variable name {name:?}")]
    InvalidEnvName { resource: String, name: String },
}

/// The closed set of resource types, each with its own attributes and action vocabulary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    Package(Package),
    File(File),
    Service(Service),
    Shell(Shell),
}

impl Kind {
    /// The canonical `type` name, e.g. `Package`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Kind::Package(_) => "Package",
            Kind::File(_) => "File",
            Kind::Service(_) => "Service",
            Kind::Shell(_) => "Shell",
        }
    }

    /// The action verb, e.g. `install`.
    pub fn action(&self) -> &'static str {
        match self {
            Kind::Package(package) => package.action.as_str(),
            Kind::File(file) => file.action(),
            Kind::Service(service) => service.action.as_str(),
            Kind::Shell(shell) => shell.action.as_str(),
        }
    }
}

impl Converge for Kind {
    fn converge<T: Transport, R: Report>(
        &self,
        ctx: &mut Context<'_, T, R>,
    ) -> anyhow::Result<Outcome> {
        match self {
            Kind::Package(package) => package.converge(ctx),
            Kind::File(file) => file.converge(ctx),
            Kind::Service(service) => service.converge(ctx),
            Kind::Shell(shell) => shell.converge(ctx),
        }
    }
}

/// The operation every resource type implements: bring the host in line with this resource's
/// action.
///
/// Implementations report idempotent no-ops through [Context::skip] and return the exit status of
/// whatever command did the work, if any, via [Outcome::from_status]. An [Err] means the host
/// could not be inspected or changed at all, e.g. because the connection dropped.
pub trait Converge {
    fn converge<T: Transport, R: Report>(
        &self,
        ctx: &mut Context<'_, T, R>,
    ) -> anyhow::Result<Outcome>;
}

/// A node in the resource tree.
///
/// A [Resource] is built once from a [Step] and never changes afterward. The tree it roots
/// mirrors the configuration document, so it is finite and acyclic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    name: String,
    scope: Scope,
    env: IndexMap<String, String>,
    after: Vec<Resource>,
    not_if: Vec<Resource>,
    kind: Kind,
}

impl Resource {
    /// Builds a [Resource], and recursively its guards and dependents, from a [Step].
    ///
    /// # Errors
    ///
    /// Returns the first [BuildError] found, checking guards and dependents before the step
    /// itself.
    pub fn from_step(step: &Step, scope: Scope) -> Result<Self, BuildError> {
        let after = step
            .after
            .iter()
            .map(|s| Resource::from_step(s, Scope::After))
            .collect::<Result<Vec<_>, _>>()?;
        let not_if = step
            .not_if
            .iter()
            .map(|s| Resource::from_step(s, Scope::NotIf))
            .collect::<Result<Vec<_>, _>>()?;

        let (type_name, action) = step.kind.type_and_action();
        let name = match &step.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{scope}.{type_name}.{action}"),
        };

        if let Some(invalid) = step.env.keys().find(|k| !env_name_pattern().is_match(k)) {
            return Err(BuildError::InvalidEnvName {
                resource: name,
                name: invalid.clone(),
            });
        }

        let kind = match &step.kind {
            StepKind::Package { action, package } => {
                // Fall back to the step's name, but not to a generated one.
                let package = package
                    .clone()
                    .or_else(|| step.name.clone().filter(|n| !n.is_empty()))
                    .ok_or_else(|| BuildError::MissingField {
                        resource: name.clone(),
                        field: "package",
                    })?;
                Kind::Package(Package {
                    action: *action,
                    package,
                })
            }
            StepKind::File {
                action,
                source,
                destination,
                file,
                owner,
                group,
                mode,
            } => Kind::File(File::new(
                &name,
                *action,
                file::Fields {
                    source,
                    destination,
                    file,
                    owner,
                    group,
                    mode,
                },
            )?),
            StepKind::Service { action, service } => Kind::Service(Service {
                action: *action,
                service: service.clone(),
            }),
            StepKind::Shell { action, command } => Kind::Shell(Shell {
                action: *action,
                command: command.clone(),
            }),
        };

        Ok(Resource {
            name,
            scope,
            env: step.env.clone(),
            after,
            not_if,
            kind,
        })
    }

    /// The display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Environment variables for commands this resource runs to do its work.
    pub fn env(&self) -> &IndexMap<String, String> {
        &self.env
    }

    /// Dependents, converged in order after this resource succeeds.
    pub fn after(&self) -> &[Resource] {
        &self.after
    }

    /// Guards, evaluated in order before this resource.
    pub fn not_if(&self) -> &[Resource] {
        &self.not_if
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// Shorthand for `self.kind().type_name()`.
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Shorthand for `self.kind().action()`.
    pub fn action(&self) -> &'static str {
        self.kind.action()
    }
}

impl StepKind {
    /// The canonical type name and the action verb of this step.
    fn type_and_action(&self) -> (&'static str, &'static str) {
        match self {
            StepKind::Package { action, .. } => ("Package", action.as_str()),
            StepKind::File { action, .. } => ("File", action.as_str()),
            StepKind::Service { action, .. } => ("Service", action.as_str()),
            StepKind::Shell { action, .. } => ("Shell", action.as_str()),
        }
    }
}

/// Matches names that are safe to `export` verbatim in a POSIX shell.
fn env_name_pattern() -> &'static Regex {
    static COMPUTED: OnceLock<Regex> = OnceLock::new();
    COMPUTED.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("BUG: invalid environment name pattern")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{resource, resources};
    use crate::core::Document;

    fn build_error(yaml: &str) -> BuildError {
        Document::from_yaml(yaml).unwrap().build().unwrap_err()
    }

    mod from_step {
        use super::*;

        #[test]
        fn default_name_is_scope_type_action() {
            let resource = resource(
                r#"
                steps:
                  - type: Shell
                    action: run
                    command: "true"
                    not_if:
                      - type: Shell
                        action: run
                        command: "false"
                    after:
                      - type: Service
                        action: restart
                        service: ssh
                "#,
            );
            assert_eq!("steps.Shell.run", resource.name());
            assert_eq!("not_if.Shell.run", resource.not_if()[0].name());
            assert_eq!("after.Service.restart", resource.after()[0].name());
        }

        #[test]
        fn empty_name_counts_as_unset() {
            let resource = resource("steps: [{name: '', type: Shell, action: run, command: ls}]");
            assert_eq!("steps.Shell.run", resource.name());
        }

        #[test]
        fn explicit_name_wins() {
            let resource = resource("steps: [{name: list, type: Shell, action: run, command: ls}]");
            assert_eq!("list", resource.name());
        }

        #[test]
        fn assigns_scopes_recursively() {
            let resource = resource(
                r#"
                steps:
                  - type: Shell
                    action: run
                    command: a
                    after:
                      - type: Shell
                        action: run
                        command: b
                        not_if:
                          - type: Shell
                            action: run
                            command: c
                "#,
            );
            assert_eq!(Scope::Steps, resource.scope());
            assert_eq!(Scope::After, resource.after()[0].scope());
            assert_eq!(Scope::NotIf, resource.after()[0].not_if()[0].scope());
        }

        #[test]
        fn deb_package_is_a_package() {
            let resource = resource("steps: [{type: DebPackage, action: install, package: git}]");
            assert_eq!("Package", resource.type_name());
            assert_eq!("install", resource.action());
            assert_eq!("steps.Package.install", resource.name());
        }

        #[test]
        fn package_falls_back_to_name() {
            let resource = resource("steps: [{type: Package, action: install, name: htop}]");
            assert_eq!(
                &Kind::Package(Package {
                    action: package::PackageAction::Install,
                    package: "htop".to_string(),
                }),
                resource.kind(),
            );
        }

        #[test]
        fn package_requires_package_or_name() {
            assert_eq!(
                BuildError::MissingField {
                    resource: "steps.Package.install".to_string(),
                    field: "package",
                },
                build_error("steps: [{type: Package, action: install}]"),
            );
        }

        #[test]
        fn rejects_bad_env_names() {
            assert_eq!(
                BuildError::InvalidEnvName {
                    resource: "steps.Shell.run".to_string(),
                    name: "BAD-NAME".to_string(),
                },
                build_error("steps: [{type: Shell, action: run, command: ls, env: {BAD-NAME: x}}]"),
            );
        }

        #[test]
        fn keeps_env_in_order() {
            let resource = resource(
                "steps: [{type: Shell, action: run, command: ls, env: {Z: '1', A: '2', M: '3'}}]",
            );
            assert_eq!(vec!["Z", "A", "M"], resource.env().keys().collect::<Vec<_>>());
        }

        #[test]
        fn reports_errors_in_nested_steps() {
            let error = build_error(
                r#"
                steps:
                  - type: Shell
                    action: run
                    command: ls
                    after:
                      - type: Package
                        action: remove
                "#,
            );
            assert_eq!(
                BuildError::MissingField {
                    resource: "after.Package.remove".to_string(),
                    field: "package",
                },
                error,
            );
        }
    }

    #[test]
    fn build_preserves_step_order() {
        let names: Vec<_> = resources(
            r#"
            steps:
              - {name: one, type: Shell, action: run, command: "true"}
              - {name: two, type: Shell, action: run, command: "true"}
              - {name: three, type: Shell, action: run, command: "true"}
            "#,
        )
        .iter()
        .map(|r| r.name().to_string())
        .collect();
        assert_eq!(vec!["one", "two", "three"], names);
    }

    #[test]
    fn scope_display() {
        assert_eq!("steps", Scope::Steps.to_string());
        assert_eq!("after", Scope::After.to_string());
        assert_eq!("not_if", Scope::NotIf.to_string());
    }
}
