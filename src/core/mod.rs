pub mod clock;
pub mod error;
pub mod types;

pub use clock::Clock;
pub use error::{DbError, DriverError, Result};
pub use types::{Operation, OperationKind, Role};
