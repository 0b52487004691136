use thiserror::Error;

/// Error reported by the database driver collaborator.
///
/// Carries the vendor error number when the driver surfaces one, and the
/// textual message otherwise. The router never interprets the message beyond
/// matching it against the configured connection-loss patterns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", render_driver_error(.code, .message))]
pub struct DriverError {
    pub code: Option<i64>,
    pub message: String,
}

fn render_driver_error(code: &Option<i64>, message: &str) -> String {
    match code {
        Some(code) => format!("[{}] {}", code, message),
        None => message.to_string(),
    }
}

impl DriverError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Error without a structured code.
    pub fn without_code(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Master unavailable: {0}")]
    MasterUnavailable(String),

    #[error("Slave unavailable: {0}")]
    SlaveUnavailable(String),

    #[error("Statement error: {0}")]
    StatementError(#[source] DriverError),

    #[error("No eligible connection: {0}")]
    NoEligibleConnection(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DbError {
    /// True for the role projections of a lost connection.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::MasterUnavailable(_) | Self::SlaveUnavailable(_))
    }

    pub fn is_statement_error(&self) -> bool {
        matches!(self, Self::StatementError(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let with_code = DriverError::new(2006, "MySQL server has gone away");
        assert_eq!(with_code.to_string(), "[2006] MySQL server has gone away");

        let without_code = DriverError::without_code("closed MySQL connection");
        assert_eq!(without_code.to_string(), "closed MySQL connection");
    }

    #[test]
    fn test_statement_error_keeps_source() {
        use std::error::Error as _;

        let err = DbError::StatementError(DriverError::new(1062, "Duplicate entry '1'"));
        assert!(err.is_statement_error());
        assert!(!err.is_unavailable());
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("[1062] Duplicate entry '1'"));
    }

    #[test]
    fn test_unavailable_errors() {
        assert!(DbError::MasterUnavailable("db1:3306".into()).is_unavailable());
        assert!(DbError::SlaveUnavailable("db2:3306".into()).is_unavailable());
        assert!(!DbError::NoEligibleConnection("no replicas".into()).is_unavailable());
    }
}
