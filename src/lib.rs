//! Simple desired-state configuration for a single remote host.
//!
//! # Configuration files
//!
//! A configuration file is a YAML document with a top-level `steps` list. Each step describes one
//! resource: a package, a file, a service, or a shell command. Steps may nest further steps under
//! `after` (run once the parent has converged) and `not_if` (guards that can skip the parent).
//!
//! ```yaml
//! steps:
//!   - type: Package
//!     action: install
//!     package: nginx
//!     after:
//!       - type: Service
//!         action: restart
//!         service: nginx
//! ```
//!
//! # Program flow
//!
//! 1. The `pickup` binary validates its single argument and parses the configuration file into a
//!    [Document](core::Document), then builds a tree of [Resource](core::Resource) values. Any
//!    problem here is reported before a connection is attempted.
//!
//! 2. It opens a [Transport](transport::Transport) to the host named by the `PICKUP_*`
//!    environment variables (see [config::Settings]).
//!
//! 3. [converge_all] walks the resource tree depth-first: guards, then the resource itself, then
//!    its dependents. The first failing resource outside a guard aborts the run.

pub mod config;
pub mod converge;
pub mod core;
pub mod transport;

#[doc(inline)]
pub use converge::{converge, converge_all};
