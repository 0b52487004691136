use async_trait::async_trait;
use crate::connection::config::NodeConfig;
use crate::core::{Clock, DriverError, Operation, Role};

/// The database driver the router sits on top of.
///
/// The router never issues SQL of its own except through this trait, so any
/// client library (mysql_async, sqlx, a test double) can be plugged in by
/// implementing it. Errors are reported as [`DriverError`] so the router can
/// classify them against its connection-loss table.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Live transport to a single node.
    type Handle: Send + 'static;

    /// Whatever `execute` produces (rows, affected counts).
    type Output: Send + 'static;

    /// Open a new transport to the node described by `config`.
    async fn connect(&self, config: &NodeConfig) -> Result<Self::Handle, DriverError>;

    /// Re-establish the transport of an existing handle.
    async fn reconnect(&self, handle: &mut Self::Handle) -> Result<(), DriverError>;

    /// Liveness probe run after a reconnect.
    async fn is_alive(&self, handle: &mut Self::Handle) -> bool;

    /// Run one operation.
    async fn execute(
        &self,
        handle: &mut Self::Handle,
        operation: &Operation,
    ) -> Result<Self::Output, DriverError>;

    /// Replication position of the node.
    ///
    /// For the primary this is the position of its latest write, for a
    /// replica the primary position it has applied up to. `Ok(None)` means the
    /// node reports no position, e.g. a replica whose replication is stopped.
    async fn replication_clock(
        &self,
        handle: &mut Self::Handle,
        role: Role,
    ) -> Result<Option<Clock>, DriverError>;
}
