use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

use super::classifier::{ClassificationTable, FailureKind};
use super::scope::{Directive, Scope};
use crate::connection::Connection;
use crate::connection::inactive_queue::InactiveQueue;
use crate::connection::registry::Registry;
use crate::core::{Clock, DbError, DriverError, Operation, OperationKind, Result, Role};
use crate::interface::Driver;

type Conn<D> = Arc<Connection<<D as Driver>::Handle>>;

/// Picks the connection for each operation and executes it there
///
/// Writes always go to the primary. Reads follow the innermost scope
/// directive:
///
/// | directive                 | read target                                   |
/// |---------------------------|-----------------------------------------------|
/// | none                      | round-robin replica, primary if none active   |
/// | `ForcePrimary`            | primary, `MasterUnavailable` if it is down     |
/// | `ForceReplica`            | round-robin replica, `SlaveUnavailable` if none|
/// | `RequireConsistency(c)`   | first replica at or past `c`, else primary    |
///
/// A connection that loses its node while serving a call is quarantined
/// before the error reaches the caller.
pub struct Router<D: Driver> {
    driver: Arc<D>,
    registry: Arc<Registry<D::Handle>>,
    queue: Arc<InactiveQueue<D>>,
    classification: ClassificationTable,
}

impl<D: Driver> Router<D> {
    pub fn new(
        driver: Arc<D>,
        registry: Arc<Registry<D::Handle>>,
        queue: Arc<InactiveQueue<D>>,
        classification: ClassificationTable,
    ) -> Self {
        Self {
            driver,
            registry,
            queue,
            classification,
        }
    }

    pub fn registry(&self) -> &Arc<Registry<D::Handle>> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<InactiveQueue<D>> {
        &self.queue
    }

    pub fn classification(&self) -> &ClassificationTable {
        &self.classification
    }

    /// Select the connection an operation of `kind` runs on under `scope`.
    pub async fn route(&self, kind: OperationKind, scope: &Scope) -> Result<Conn<D>> {
        if kind == OperationKind::Write {
            return self.primary();
        }

        match scope.directive() {
            None => Ok(match self.registry.next_replica() {
                Some(replica) => replica,
                None => self.fallback_to_primary("no active replica")?,
            }),
            Some(Directive::ForcePrimary) => self.primary(),
            Some(Directive::ForceReplica) => self.replica(),
            Some(Directive::RequireConsistency(_)) if scope.has_written() => self.primary(),
            Some(Directive::RequireConsistency(required)) => {
                match self.consistent_replica(required).await {
                    Some(replica) => Ok(replica),
                    None => self.fallback_to_primary("no replica has caught up"),
                }
            }
        }
    }

    /// Route and run one operation.
    pub async fn execute(&self, scope: &Scope, operation: &Operation) -> Result<D::Output> {
        let conn = self.route(operation.kind, scope).await?;
        let span = info_span!(
            "router.execute",
            role = %conn.role(),
            address = conn.address(),
            kind = %operation.kind
        );

        let output = self.run_on(&conn, operation).instrument(span).await?;
        if operation.is_write() {
            scope.record_write();
        }
        Ok(output)
    }

    /// Current replication position of the primary.
    pub async fn current_clock(&self) -> Result<Clock> {
        let primary = self.primary()?;
        self.read_clock(&primary).await?.ok_or_else(|| {
            DbError::NoEligibleConnection(format!(
                "primary {} reports no replication position",
                primary.address()
            ))
        })
    }

    /// Position a replica has applied up to, `None` if it reports none.
    pub async fn replica_clock(&self, replica: &Conn<D>) -> Result<Option<Clock>> {
        self.read_clock(replica).await
    }

    /// Run `block` with reads forced onto the primary.
    pub async fn with_primary<F, Fut, T>(&self, scope: &Scope, block: F) -> T
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = T>,
    {
        block(scope.force_primary()).await
    }

    /// Run `block` with reads forced onto a replica.
    pub async fn with_replica<F, Fut, T>(&self, scope: &Scope, block: F) -> T
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = T>,
    {
        block(scope.force_replica()).await
    }

    /// Run `block` with reads bounded below by `clock`.
    ///
    /// Returns the block's result and the clock the next request should
    /// require: the primary's position if the block wrote anything, otherwise
    /// `clock` itself.
    pub async fn with_consistency<F, Fut, T>(&self, scope: &Scope, clock: Clock, block: F) -> (T, Clock)
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = T>,
    {
        let inner = scope.require_consistency(clock.clone());
        let output = block(inner.clone()).await;
        if !inner.has_written() {
            return (output, clock);
        }

        match self.current_clock().await {
            Ok(latest) => (output, latest.max(clock)),
            Err(err) => {
                event!(Level::WARN, error = %err, "could not read primary clock after write");
                (output, clock)
            }
        }
    }

    fn primary(&self) -> Result<Conn<D>> {
        self.registry.active_primary().ok_or_else(|| {
            DbError::MasterUnavailable(format!(
                "primary {} is not active",
                self.registry.primary().address()
            ))
        })
    }

    fn replica(&self) -> Result<Conn<D>> {
        if self.registry.replicas().is_empty() {
            return Err(DbError::NoEligibleConnection(
                "no replicas are configured".to_string(),
            ));
        }
        self.registry
            .next_replica()
            .ok_or_else(|| DbError::SlaveUnavailable("no active replica".to_string()))
    }

    fn fallback_to_primary(&self, reason: &str) -> Result<Conn<D>> {
        let primary = self.primary()?;
        if !self.registry.replicas().is_empty() {
            event!(Level::WARN, reason, "reading from primary");
        }
        Ok(primary)
    }

    async fn consistent_replica(&self, required: &Clock) -> Option<Conn<D>> {
        for replica in self.registry.replica_scan() {
            match self.read_clock(&replica).await {
                Ok(observed) if required.is_reached_by(observed.as_ref()) => return Some(replica),
                Ok(observed) => {
                    event!(
                        Level::DEBUG,
                        connection = %replica,
                        observed = ?observed,
                        required = %required,
                        "replica behind"
                    );
                }
                // a lost replica is already quarantined by read_clock
                Err(err) => {
                    event!(Level::DEBUG, connection = %replica, error = %err, "replica clock unreadable");
                }
            }
        }
        None
    }

    async fn read_clock(&self, conn: &Conn<D>) -> Result<Option<Clock>> {
        let result = {
            let mut slot = conn.handle().lock().await;
            if !conn.is_active() {
                return Err(unavailable(conn, "quarantined"));
            }
            match slot.as_mut() {
                Some(handle) => self.driver.replication_clock(handle, conn.role()).await,
                None => return Err(self.lost_transport(conn)),
            }
        };
        result.map_err(|err| self.fail(conn, err))
    }

    async fn run_on(&self, conn: &Conn<D>, operation: &Operation) -> Result<D::Output> {
        event!(Level::DEBUG, connection = %conn, sql = %operation.sql, "execute");

        let result = {
            let mut slot = conn.handle().lock().await;
            // quarantined while this call waited for the handle
            if !conn.is_active() {
                return Err(unavailable(conn, "quarantined"));
            }
            match slot.as_mut() {
                Some(handle) => self.driver.execute(handle, operation).await,
                None => return Err(self.lost_transport(conn)),
            }
        };
        result.map_err(|err| self.fail(conn, err))
    }

    /// Project a driver error for the caller, quarantining the connection if
    /// its node is gone.
    fn fail(&self, conn: &Conn<D>, err: DriverError) -> DbError {
        if self.classification.classify(&err) == FailureKind::ConnectionLost {
            self.quarantine(conn);
        }
        self.classification
            .to_caller_error(err, conn.role(), conn.address())
    }

    // An active connection without a handle was returned by a stopped queue
    // before it ever connected.
    fn lost_transport(&self, conn: &Conn<D>) -> DbError {
        self.quarantine(conn);
        unavailable(conn, "not connected")
    }

    /// Move a connection from the active set to the inactive queue.
    ///
    /// Only the caller that flips the state enqueues, so concurrent failures
    /// on one connection park it once.
    fn quarantine(&self, conn: &Conn<D>) {
        if self.registry.deactivate(conn) {
            self.queue.enqueue(Arc::clone(conn));
        }
    }
}

fn unavailable<H>(conn: &Connection<H>, reason: &str) -> DbError {
    let detail = format!("{}: {}", conn.address(), reason);
    match conn.role() {
        Role::Primary => DbError::MasterUnavailable(detail),
        Role::Replica => DbError::SlaveUnavailable(detail),
    }
}
