use std::fmt;

/// Replication role of a node in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Replica,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "master",
            Role::Replica => "slave",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Read => f.write_str("read"),
            OperationKind::Write => f.write_str("write"),
        }
    }
}

/// A statement handed to the driver, tagged with whether it reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    pub sql: String,
}

impl Operation {
    pub fn read(sql: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Read,
            sql: sql.into(),
        }
    }

    pub fn write(sql: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Write,
            sql: sql.into(),
        }
    }

    pub fn is_write(&self) -> bool {
        self.kind == OperationKind::Write
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_constructors() {
        let read = Operation::read("SELECT 1");
        assert_eq!(read.kind, OperationKind::Read);
        assert!(!read.is_write());

        let write = Operation::write("INSERT INTO t VALUES (1)");
        assert!(write.is_write());
        assert_eq!(write.sql, "INSERT INTO t VALUES (1)");
    }

    #[test]
    fn test_role_labels() {
        assert_eq!(Role::Primary.to_string(), "master");
        assert_eq!(Role::Replica.to_string(), "slave");
    }
}
