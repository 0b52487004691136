use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{Level, event};

use super::{Connection, ConnectionId};

/// All connections of one topology plus the replica selection cursor
///
/// The active set is the set of connections whose state is `Active`; the
/// registry only flips states, so membership changes never need a lock held
/// by the caller. The primary stays addressable while inactive so write
/// routing can report it as unavailable instead of picking something else.
pub struct Registry<H> {
    primary: Arc<Connection<H>>,
    replicas: Vec<Arc<Connection<H>>>,
    cursor: AtomicUsize,
}

impl<H> Registry<H> {
    pub(crate) fn new(primary: Connection<H>, replicas: Vec<Connection<H>>) -> Self {
        Self {
            primary: Arc::new(primary),
            replicas: replicas.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn primary(&self) -> &Arc<Connection<H>> {
        &self.primary
    }

    /// Configured replicas, active or not, in topology order
    pub fn replicas(&self) -> &[Arc<Connection<H>>] {
        &self.replicas
    }

    pub fn connections(&self) -> impl Iterator<Item = &Arc<Connection<H>>> {
        std::iter::once(&self.primary).chain(self.replicas.iter())
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Arc<Connection<H>>> {
        self.connections().find(|conn| conn.id() == id)
    }

    pub fn is_active(&self, id: ConnectionId) -> bool {
        self.get(id).is_some_and(|conn| conn.is_active())
    }

    pub fn active_connections(&self) -> Vec<Arc<Connection<H>>> {
        self.connections()
            .filter(|conn| conn.is_active())
            .cloned()
            .collect()
    }

    pub fn active_primary(&self) -> Option<Arc<Connection<H>>> {
        self.primary.is_active().then(|| Arc::clone(&self.primary))
    }

    pub fn active_replicas(&self) -> Vec<Arc<Connection<H>>> {
        self.replicas
            .iter()
            .filter(|conn| conn.is_active())
            .cloned()
            .collect()
    }

    /// Next active replica in round-robin order
    pub fn next_replica(&self) -> Option<Arc<Connection<H>>> {
        let active = self.active_replicas();
        if active.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(Arc::clone(&active[index % active.len()]))
    }

    /// Active replicas starting at the round-robin cursor, each exactly once
    pub fn replica_scan(&self) -> Vec<Arc<Connection<H>>> {
        let mut active = self.active_replicas();
        if !active.is_empty() {
            let start = self.cursor.fetch_add(1, Ordering::Relaxed) % active.len();
            active.rotate_left(start);
        }
        active
    }

    /// Take a connection out of the active set.
    ///
    /// Returns `false` if it was already out, in which case someone else owns
    /// its recovery.
    pub(crate) fn deactivate(&self, conn: &Connection<H>) -> bool {
        let changed = conn.try_deactivate();
        if changed {
            event!(
                Level::WARN,
                connection = %conn,
                id = %conn.id(),
                "connection removed from active set"
            );
        }
        changed
    }

    /// Put a connection back into the active set.
    pub(crate) fn activate(&self, conn: &Connection<H>) -> bool {
        let changed = conn.try_activate();
        if changed {
            event!(Level::INFO, connection = %conn, id = %conn.id(), "connection active");
        }
        changed
    }

    pub fn stats(&self) -> RegistryStats {
        let total = 1 + self.replicas.len();
        let active = self.connections().filter(|conn| conn.is_active()).count();
        RegistryStats {
            total_connections: total,
            active_connections: active,
            inactive_connections: total - active,
            primary_active: self.primary.is_active(),
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub active_connections: usize,
    pub inactive_connections: usize,
    pub primary_active: bool,
}

impl fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Registry Stats: {}/{} active, {} inactive, primary {}",
            self.active_connections,
            self.total_connections,
            self.inactive_connections,
            if self.primary_active { "up" } else { "down" }
        )
    }
}
