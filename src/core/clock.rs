//! Replication clock
//!
//! A clock is a position in the primary's binary log: the log file name plus
//! the byte offset inside it. Replicas report the position they have applied
//! up to; the primary reports the position of its latest write.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::{DbError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clock {
    file: String,
    position: u64,
}

impl Clock {
    pub fn new(file: impl Into<String>, position: u64) -> Self {
        Self {
            file: file.into(),
            position,
        }
    }

    /// The smallest clock. Every reported position satisfies it.
    pub fn zero() -> Self {
        Self::new("", 0)
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Parse the `file@position` form produced by `Display`.
    pub fn parse(value: &str) -> Result<Self> {
        let (file, position) = value.rsplit_once('@').ok_or_else(|| {
            DbError::ConfigError(format!("clock '{}' must have the form file@position", value))
        })?;
        let position = position
            .parse()
            .map_err(|_| DbError::ConfigError(format!("invalid clock position in '{}'", value)))?;
        Ok(Self::new(file, position))
    }

    /// Whether a node that reported `observed` has caught up with `self`.
    ///
    /// A node that reported nothing (replication stopped, position
    /// unreadable) never has.
    pub fn is_reached_by(&self, observed: Option<&Clock>) -> bool {
        observed.is_some_and(|observed| observed >= self)
    }

    /// Numeric extension of the log file (`mysql-bin.000042` -> 42).
    fn sequence(&self) -> Option<u64> {
        let (_, extension) = self.file.rsplit_once('.')?;
        extension.parse().ok()
    }
}

impl Ord for Clock {
    fn cmp(&self, other: &Self) -> Ordering {
        // Files without a numeric extension sort below every sequenced file.
        self.sequence()
            .cmp(&other.sequence())
            .then_with(|| self.file.cmp(&other.file))
            .then_with(|| self.position.cmp(&other.position))
    }
}

impl PartialOrd for Clock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.file, self.position)
    }
}

impl FromStr for Clock {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
