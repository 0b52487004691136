//! Failure classification
//!
//! Separates "the node is unreachable" from "the statement failed". Only the
//! former quarantines a connection; the latter is handed back to the caller
//! untouched.

use regex::RegexSet;
use std::collections::HashSet;

use crate::core::{DbError, DriverError, Result, Role};

/// MySQL client error numbers that mean the server cannot be reached.
const MYSQL_LOSS_CODES: [i64; 4] = [
    2002, // CR_CONNECTION_ERROR
    2003, // CR_CONN_HOST_ERROR
    2006, // CR_SERVER_GONE_ERROR
    2013, // CR_SERVER_LOST
];

/// Messages of connection losses that some MySQL drivers surface without an
/// error number.
const MYSQL_LOSS_MESSAGES: [&str; 4] = [
    "closed MySQL connection",
    "MySQL server has gone away",
    "Lost connection to MySQL server",
    "Can't connect to MySQL server",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ConnectionLost,
    StatementError,
}

/// Injectable table of driver errors that indicate a lost connection.
#[derive(Debug, Clone)]
pub struct ClassificationTable {
    codes: HashSet<i64>,
    messages: RegexSet,
}

impl ClassificationTable {
    /// Build a table from error codes and literal message substrings.
    pub fn new<S: AsRef<str>>(codes: impl IntoIterator<Item = i64>, messages: &[S]) -> Result<Self> {
        let patterns = messages.iter().map(|m| regex::escape(m.as_ref()));
        Self::from_patterns(codes, patterns)
    }

    /// Build a table whose message entries are regular expressions.
    pub fn from_patterns<S: AsRef<str>>(
        codes: impl IntoIterator<Item = i64>,
        patterns: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let messages = RegexSet::new(patterns)
            .map_err(|e| DbError::ConfigError(format!("Invalid connection-loss pattern: {}", e)))?;
        Ok(Self {
            codes: codes.into_iter().collect(),
            messages,
        })
    }

    /// Error numbers and messages of the MySQL client library.
    pub fn mysql() -> Self {
        Self {
            codes: MYSQL_LOSS_CODES.into_iter().collect(),
            messages: RegexSet::new(MYSQL_LOSS_MESSAGES.iter().map(|m| regex::escape(m)))
                .unwrap_or_else(|_| RegexSet::empty()),
        }
    }

    /// A table that classifies nothing as a connection loss.
    pub fn empty() -> Self {
        Self {
            codes: HashSet::new(),
            messages: RegexSet::empty(),
        }
    }

    pub fn is_connection_loss(&self, error: &DriverError) -> bool {
        error.code.is_some_and(|code| self.codes.contains(&code))
            || self.messages.is_match(&error.message)
    }

    pub fn classify(&self, error: &DriverError) -> FailureKind {
        if self.is_connection_loss(error) {
            FailureKind::ConnectionLost
        } else {
            FailureKind::StatementError
        }
    }

    /// Project a driver error into what the caller sees.
    ///
    /// Lost connections become `MasterUnavailable` or `SlaveUnavailable`
    /// depending on the role the statement ran against; everything else is a
    /// `StatementError` carrying the driver error verbatim.
    pub fn to_caller_error(&self, error: DriverError, origin: Role, address: &str) -> DbError {
        match (self.classify(&error), origin) {
            (FailureKind::ConnectionLost, Role::Primary) => {
                DbError::MasterUnavailable(format!("{}: {}", address, error))
            }
            (FailureKind::ConnectionLost, Role::Replica) => {
                DbError::SlaveUnavailable(format!("{}: {}", address, error))
            }
            (FailureKind::StatementError, _) => DbError::StatementError(error),
        }
    }
}

impl Default for ClassificationTable {
    fn default() -> Self {
        Self::mysql()
    }
}
