// ============================================================================
// replica-router Library
// ============================================================================

pub mod connection;
pub mod core;
pub mod interface;
pub mod routing;

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{Level, event};

// Re-export main types for convenience
pub use crate::core::{Clock, DbError, DriverError, Operation, OperationKind, Result, Role};
pub use crate::interface::Driver;

// Re-export connection API
pub use connection::{
    Connection, ConnectionId, ConnectionState,
    config::{NodeConfig, TopologyConfig, DEFAULT_RECONNECT_INTERVAL},
    inactive_queue::{InactiveQueue, QueueStatus},
    registry::{Registry, RegistryStats},
};

// Re-export routing API
pub use routing::{ClassificationTable, Directive, FailureKind, Router, Scope};

// ============================================================================
// High-level Client API
// ============================================================================

/// Replicated database client
///
/// Owns one connection per node of the topology and routes every statement:
/// writes to the primary, reads to a replica unless a scope says otherwise.
/// Nodes that stop answering are parked and retried in the background while
/// the rest of the topology keeps serving.
///
/// # Examples
///
/// ```
/// use replica_router::{Client, Driver, Result, Scope};
///
/// # async fn demo<D: Driver>(client: &Client<D>) -> Result<()> {
/// let scope = Scope::new();
///
/// // Reads go to a replica, writes to the primary
/// client.query(&scope, "SELECT * FROM users").await?;
/// client.execute(&scope, "UPDATE users SET age = 31 WHERE id = 1").await?;
///
/// // Reads that must see the primary's latest write
/// let clock = client.current_clock().await?;
/// let (rows, _) = client
///     .with_consistency(&scope, clock, |scope| async move {
///         client.query(&scope, "SELECT age FROM users WHERE id = 1").await
///     })
///     .await;
/// rows?;
///
/// client.close();
/// # Ok(())
/// # }
/// ```
pub struct Client<D: Driver> {
    router: Router<D>,
}

impl<D: Driver> Client<D> {
    /// Connect to every node of the topology and start background recovery.
    ///
    /// Nodes that cannot be reached now are not an error: they start out
    /// inactive and are connected by the recovery worker once they come up.
    /// Must be called inside a tokio runtime.
    ///
    /// # Examples
    ///
    /// ```
    /// # use replica_router::{Client, Driver, NodeConfig, Result, TopologyConfig};
    /// # use std::time::Duration;
    /// # async fn demo<D: Driver>(driver: D) -> Result<()> {
    /// let config = TopologyConfig::new(NodeConfig::new("db1"))
    ///     .replica(NodeConfig::new("db2"))
    ///     .replica(NodeConfig::new("db3"))
    ///     .reconnect_interval(Duration::from_secs(2));
    ///
    /// let client = Client::connect(driver, config).await?;
    /// println!("{}", client.stats());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(driver: D, config: TopologyConfig) -> Result<Self> {
        config.validate()?;
        let driver = Arc::new(driver);

        let primary = open(driver.as_ref(), Role::Primary, config.primary.clone()).await;
        let replicas = join_all(
            config
                .replicas
                .iter()
                .cloned()
                .map(|node| open(driver.as_ref(), Role::Replica, node)),
        )
        .await;

        let registry = Arc::new(Registry::new(primary, replicas));
        let queue = Arc::new(InactiveQueue::new(
            Arc::clone(&driver),
            Arc::clone(&registry),
            config.reconnect_interval,
        ));
        for conn in registry.connections().filter(|conn| !conn.is_active()) {
            queue.enqueue(Arc::clone(conn));
        }
        queue.start()?;

        let stats = registry.stats();
        event!(
            Level::INFO,
            primary = %registry.primary(),
            replicas = registry.replicas().len(),
            active = stats.active_connections,
            "client connected"
        );

        Ok(Self {
            router: Router::new(driver, registry, queue, config.classification),
        })
    }

    /// Run a read statement.
    pub async fn query(&self, scope: &Scope, sql: &str) -> Result<D::Output> {
        self.router.execute(scope, &Operation::read(sql)).await
    }

    /// Run a write statement on the primary.
    pub async fn execute(&self, scope: &Scope, sql: &str) -> Result<D::Output> {
        self.router.execute(scope, &Operation::write(sql)).await
    }

    pub async fn run(&self, scope: &Scope, operation: &Operation) -> Result<D::Output> {
        self.router.execute(scope, operation).await
    }

    /// Run `block` with reads pinned to the primary.
    ///
    /// # Examples
    ///
    /// ```
    /// # use replica_router::{Client, Driver, Result, Scope};
    /// # async fn demo<D: Driver>(client: &Client<D>) -> Result<()> {
    /// client
    ///     .with_primary(&Scope::new(), |scope| async move {
    ///         client.query(&scope, "SELECT balance FROM accounts WHERE id = 7").await
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_primary<F, Fut, T>(&self, scope: &Scope, block: F) -> T
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = T>,
    {
        self.router.with_primary(scope, block).await
    }

    /// Run `block` with reads pinned to a replica. Fails with
    /// `SlaveUnavailable` when no replica is active instead of reading from
    /// the primary.
    pub async fn with_replica<F, Fut, T>(&self, scope: &Scope, block: F) -> T
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = T>,
    {
        self.router.with_replica(scope, block).await
    }

    /// Run `block` reading only from nodes that have applied `clock`.
    ///
    /// The returned clock is what the next request should require.
    pub async fn with_consistency<F, Fut, T>(&self, scope: &Scope, clock: Clock, block: F) -> (T, Clock)
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = T>,
    {
        self.router.with_consistency(scope, clock, block).await
    }

    /// Replication position of the primary's latest write
    pub async fn current_clock(&self) -> Result<Clock> {
        self.router.current_clock().await
    }

    pub fn stats(&self) -> RegistryStats {
        self.router.registry().stats()
    }

    pub fn router(&self) -> &Router<D> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<Registry<D::Handle>> {
        self.router.registry()
    }

    pub fn queue(&self) -> &Arc<InactiveQueue<D>> {
        self.router.queue()
    }

    /// Stop background recovery. Parked connections return to the active
    /// set as they are.
    pub fn close(&self) {
        self.router.queue().stop();
    }
}

impl<D: Driver> Drop for Client<D> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn open<D: Driver>(driver: &D, role: Role, node: NodeConfig) -> Connection<D::Handle> {
    let handle = match tokio::time::timeout(node.connect_timeout, driver.connect(&node)).await {
        Ok(Ok(handle)) => Some(handle),
        Ok(Err(err)) => {
            event!(Level::WARN, role = %role, address = %node.address(), error = %err, "initial connect failed");
            None
        }
        Err(_) => {
            event!(Level::WARN, role = %role, address = %node.address(), "initial connect timed out");
            None
        }
    };
    Connection::new(role, node, handle)
}
