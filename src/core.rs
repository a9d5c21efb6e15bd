//! Provides types that represent the user's instructions: the configuration document and the
//! resource tree built from it.

pub mod resource;
pub mod step;

#[doc(inline)]
pub use resource::{BuildError, Kind, Resource, Scope};

#[doc(inline)]
pub use step::{Document, Step, StepKind};
