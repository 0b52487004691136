pub mod config;
pub mod inactive_queue;
pub mod registry;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::Role;
use config::NodeConfig;

/// Stable identity of a connection, used for membership checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Offered to routing decisions
    Active,
    /// Quarantined, owned by the inactive queue
    Inactive,
}

const STATE_ACTIVE: u8 = 0;
const STATE_INACTIVE: u8 = 1;

/// Physical link to one database node
///
/// Holds the driver handle behind an async mutex so that a single operation
/// owns the transport while it runs. The handle is `None` for a node that
/// could not be reached when the topology was built; the inactive queue opens
/// it once the node comes up.
pub struct Connection<H> {
    id: ConnectionId,
    role: Role,
    config: NodeConfig,
    address: String,
    state: AtomicU8,
    handle: Mutex<Option<H>>,
}

impl<H> Connection<H> {
    pub(crate) fn new(role: Role, config: NodeConfig, handle: Option<H>) -> Self {
        let state = if handle.is_some() {
            STATE_ACTIVE
        } else {
            STATE_INACTIVE
        };
        Self {
            id: ConnectionId::new(),
            role,
            address: config.address(),
            config,
            state: AtomicU8::new(state),
            handle: Mutex::new(handle),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// `host:port` of the node
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            STATE_ACTIVE => ConnectionState::Active,
            _ => ConnectionState::Inactive,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Flip to inactive. Only the caller that wins the flip may enqueue the
    /// connection for recovery.
    pub(crate) fn try_deactivate(&self) -> bool {
        self.state
            .compare_exchange(STATE_ACTIVE, STATE_INACTIVE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn try_activate(&self) -> bool {
        self.state
            .compare_exchange(STATE_INACTIVE, STATE_ACTIVE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn handle(&self) -> &Mutex<Option<H>> {
        &self.handle
    }
}

impl<H> fmt::Debug for Connection<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}

impl<H> fmt::Display for Connection<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.role, self.address)
    }
}
