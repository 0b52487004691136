pub mod classifier;
pub mod router;
pub mod scope;

pub use classifier::{ClassificationTable, FailureKind};
pub use router::Router;
pub use scope::{Directive, Scope};
