#![allow(dead_code)]

use async_trait::async_trait;
use replica_router::{Clock, Driver, DriverError, NodeConfig, Operation, Role};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Scripted behaviour of one node, keyed by `host:port`
#[derive(Debug, Clone)]
struct NodeScript {
    reachable: bool,
    clock: Option<Clock>,
    statement_error: Option<DriverError>,
    connects: usize,
    reconnects: usize,
    executed: Vec<String>,
}

impl Default for NodeScript {
    fn default() -> Self {
        Self {
            reachable: true,
            clock: None,
            statement_error: None,
            connects: 0,
            reconnects: 0,
            executed: Vec::new(),
        }
    }
}

/// In-memory driver for tests
///
/// Clones share state, so a test can keep one copy and hand the other to the
/// client.
#[derive(Debug, Clone, Default)]
pub struct StubDriver {
    nodes: Arc<Mutex<HashMap<String, NodeScript>>>,
}

#[derive(Debug)]
pub struct StubHandle {
    pub address: String,
}

/// What a statement returns: where it ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub address: String,
    pub sql: String,
}

impl StubDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_node<T>(&self, address: &str, f: impl FnOnce(&mut NodeScript) -> T) -> T {
        let mut nodes = self.nodes.lock().unwrap();
        f(nodes.entry(address.to_string()).or_default())
    }

    pub fn set_reachable(&self, address: &str, reachable: bool) {
        self.with_node(address, |node| node.reachable = reachable);
    }

    pub fn set_clock(&self, address: &str, clock: Option<Clock>) {
        self.with_node(address, |node| node.clock = clock);
    }

    pub fn fail_statements(&self, address: &str, error: DriverError) {
        self.with_node(address, |node| node.statement_error = Some(error));
    }

    pub fn executed_on(&self, address: &str) -> Vec<String> {
        self.with_node(address, |node| node.executed.clone())
    }

    pub fn connects(&self, address: &str) -> usize {
        self.with_node(address, |node| node.connects)
    }

    pub fn reconnects(&self, address: &str) -> usize {
        self.with_node(address, |node| node.reconnects)
    }
}

fn lost(address: &str) -> DriverError {
    DriverError::new(2013, format!("Lost connection to MySQL server at '{}'", address))
}

#[async_trait]
impl Driver for StubDriver {
    type Handle = StubHandle;
    type Output = Executed;

    async fn connect(&self, config: &NodeConfig) -> Result<StubHandle, DriverError> {
        let address = config.address();
        self.with_node(&address, |node| {
            node.connects += 1;
            if node.reachable {
                Ok(())
            } else {
                Err(DriverError::new(
                    2003,
                    format!("Can't connect to MySQL server on '{}'", address),
                ))
            }
        })?;
        Ok(StubHandle { address })
    }

    async fn reconnect(&self, handle: &mut StubHandle) -> Result<(), DriverError> {
        self.with_node(&handle.address, |node| {
            node.reconnects += 1;
            if node.reachable { Ok(()) } else { Err(lost(&handle.address)) }
        })
    }

    async fn is_alive(&self, handle: &mut StubHandle) -> bool {
        self.with_node(&handle.address, |node| node.reachable)
    }

    async fn execute(&self, handle: &mut StubHandle, operation: &Operation) -> Result<Executed, DriverError> {
        self.with_node(&handle.address, |node| {
            if !node.reachable {
                return Err(lost(&handle.address));
            }
            if let Some(error) = &node.statement_error {
                return Err(error.clone());
            }
            node.executed.push(operation.sql.clone());
            Ok(Executed {
                address: handle.address.clone(),
                sql: operation.sql.clone(),
            })
        })
    }

    async fn replication_clock(
        &self,
        handle: &mut StubHandle,
        _role: Role,
    ) -> Result<Option<Clock>, DriverError> {
        self.with_node(&handle.address, |node| {
            if node.reachable {
                Ok(node.clock.clone())
            } else {
                Err(DriverError::new(2006, "MySQL server has gone away"))
            }
        })
    }
}
