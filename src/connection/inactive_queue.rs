//! Background recovery of quarantined connections
//!
//! Connections that lost their node are parked here by the router. A single
//! worker task takes them one at a time, tries to reconnect, and either hands
//! them back to the registry or parks them again. The worker pauses for the
//! configured interval after every attempt, so with several parked
//! connections each one is retried roughly every `interval * len`. An attempt
//! that outlasts the node's `connect_timeout` counts as failed.

use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{Level, event};

use super::registry::Registry;
use super::{Connection, ConnectionId};
use crate::core::{DbError, DriverError, Result};
use crate::interface::Driver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Accepting connections, no worker yet
    Idle,
    Running,
    Stopped,
}

struct QueueState<H> {
    status: QueueStatus,
    pending: VecDeque<Arc<Connection<H>>>,
    /// Connections taken off `pending` whose attempt has not settled
    in_flight: Vec<Arc<Connection<H>>>,
    worker: Option<JoinHandle<()>>,
}

struct QueueInner<D: Driver> {
    driver: Arc<D>,
    registry: Arc<Registry<D::Handle>>,
    interval: Duration,
    state: Mutex<QueueState<D::Handle>>,
    wakeup: Notify,
    shutdown: watch::Sender<bool>,
}

pub struct InactiveQueue<D: Driver> {
    inner: Arc<QueueInner<D>>,
}

impl<D: Driver> InactiveQueue<D> {
    pub fn new(driver: Arc<D>, registry: Arc<Registry<D::Handle>>, interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(QueueInner {
                driver,
                registry,
                interval,
                state: Mutex::new(QueueState {
                    status: QueueStatus::Idle,
                    pending: VecDeque::new(),
                    in_flight: Vec::new(),
                    worker: None,
                }),
                wakeup: Notify::new(),
                shutdown,
            }),
        }
    }

    /// Park a connection that was taken out of the active set.
    ///
    /// After `stop` there is no worker left to recover it, so the connection
    /// goes straight back to the active set.
    pub fn enqueue(&self, conn: Arc<Connection<D::Handle>>) {
        let mut state = self.inner.lock_state();
        if state.status == QueueStatus::Stopped {
            self.inner.registry.activate(&conn);
            return;
        }
        if state.contains(conn.id()) {
            return;
        }
        event!(Level::DEBUG, connection = %conn, "connection queued for reconnect");
        state.pending.push_back(conn);
        drop(state);
        self.inner.wakeup.notify_one();
    }

    /// Spawn the recovery worker on the current tokio runtime.
    ///
    /// Does nothing unless the queue is idle.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DbError::ConfigError(format!("Inactive queue needs a tokio runtime: {}", e)))?;

        let mut state = self.inner.lock_state();
        if state.status != QueueStatus::Idle {
            return Ok(());
        }
        state.status = QueueStatus::Running;
        state.worker = Some(runtime.spawn(QueueInner::run(Arc::clone(&self.inner))));
        event!(
            Level::INFO,
            interval_ms = self.inner.interval.as_millis() as u64,
            "inactive queue started"
        );
        Ok(())
    }

    /// Stop the worker and return every parked connection to the active set.
    ///
    /// Does not wait for an attempt in progress; the connection being probed
    /// is handed back too, without checking that its node is reachable.
    /// Calling it again is a no-op.
    pub fn stop(&self) {
        let (drained, worker) = {
            let mut state = self.inner.lock_state();
            if state.status == QueueStatus::Stopped {
                return;
            }
            state.status = QueueStatus::Stopped;
            let mut drained: Vec<_> = state.in_flight.drain(..).collect();
            drained.extend(state.pending.drain(..));
            (drained, state.worker.take())
        };

        self.inner.shutdown.send_replace(true);
        // The worker exits at its next await point.
        drop(worker);

        for conn in &drained {
            self.inner.registry.activate(conn);
        }
        event!(Level::INFO, returned = drained.len(), "inactive queue stopped");
    }

    /// Run one recovery step by hand: wait for a parked connection, probe it,
    /// then hand it to the registry or park it again.
    ///
    /// Only an idle queue can be stepped; once the worker is started this
    /// returns immediately.
    pub async fn process_next(&self) {
        if self.status() != QueueStatus::Idle {
            return;
        }
        self.inner.process_next().await
    }

    pub fn status(&self) -> QueueStatus {
        self.inner.lock_state().status
    }

    /// Parked connections, including the one being probed
    pub fn len(&self) -> usize {
        let state = self.inner.lock_state();
        state.pending.len() + state.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.lock_state().contains(id)
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }
}

impl<D: Driver> Drop for InactiveQueue<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<H> QueueState<H> {
    fn contains(&self, id: ConnectionId) -> bool {
        self.in_flight.iter().any(|conn| conn.id() == id)
            || self.pending.iter().any(|conn| conn.id() == id)
    }
}

impl<D: Driver> QueueInner<D> {
    // A panic inside a reconnect attempt is caught before it can poison the
    // lock, so a poisoned state is still consistent.
    fn lock_state(&self) -> MutexGuard<'_, QueueState<D::Handle>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(inner: Arc<Self>) {
        let mut shutdown = inner.shutdown.subscribe();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stopped| *stopped) => break,
                _ = inner.process_next() => {}
            }
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stopped| *stopped) => break,
                _ = tokio::time::sleep(inner.interval) => {}
            }
        }
        event!(Level::DEBUG, "inactive queue worker exited");
    }

    async fn process_next(&self) {
        let conn = self.next_pending().await;
        let recovered = self.probe(&conn).await;
        self.settle(conn, recovered);
    }

    async fn next_pending(&self) -> Arc<Connection<D::Handle>> {
        loop {
            let notified = self.wakeup.notified();
            {
                let mut state = self.lock_state();
                if let Some(conn) = state.pending.pop_front() {
                    state.in_flight.push(Arc::clone(&conn));
                    return conn;
                }
            }
            notified.await;
        }
    }

    /// Reconnect and check liveness. Errors, panics and timeouts count as a
    /// failed attempt.
    async fn probe(&self, conn: &Connection<D::Handle>) -> bool {
        let limit = conn.config().connect_timeout;
        let attempt = tokio::time::timeout(limit, self.reconnect(conn));
        match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(Ok(Ok(alive))) => {
                if !alive {
                    event!(Level::WARN, connection = %conn, "reconnected but not alive");
                }
                alive
            }
            Ok(Ok(Err(err))) => {
                event!(Level::ERROR, connection = %conn, error = %err, "reconnect failed");
                false
            }
            Ok(Err(_)) => {
                event!(
                    Level::ERROR,
                    connection = %conn,
                    timeout_ms = limit.as_millis() as u64,
                    "reconnect timed out"
                );
                false
            }
            Err(_) => {
                event!(Level::ERROR, connection = %conn, "reconnect attempt panicked");
                false
            }
        }
    }

    async fn reconnect(&self, conn: &Connection<D::Handle>) -> std::result::Result<bool, DriverError> {
        let mut slot = conn.handle().lock().await;
        match slot.as_mut() {
            Some(handle) => self.driver.reconnect(handle).await?,
            None => {
                let handle = self.driver.connect(conn.config()).await?;
                *slot = Some(handle);
            }
        }

        Ok(match slot.as_mut() {
            Some(handle) => self.driver.is_alive(handle).await,
            None => false,
        })
    }

    fn settle(&self, conn: Arc<Connection<D::Handle>>, recovered: bool) {
        let mut state = self.lock_state();
        let Some(index) = state
            .in_flight
            .iter()
            .position(|current| current.id() == conn.id())
        else {
            // stop() already returned it to the registry
            return;
        };
        state.in_flight.swap_remove(index);

        if recovered {
            self.registry.activate(&conn);
        } else {
            state.pending.push_back(conn);
        }
    }
}
