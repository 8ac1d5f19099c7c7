//! Error taxonomy shared by BLL and context operations.
//!
//! # Responsibility
//! - Distinguish missing rows, store failures and cascade resolution
//!   failures without losing the underlying cause.
//!
//! # Invariants
//! - Errors are logged at the operation boundary and re-raised unchanged.
//! - No variant is ever swallowed or retried inside this crate.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type BllResult<T> = Result<T, BllError>;

#[derive(Debug)]
pub enum BllError {
    /// A single-row lookup expected a match and found none.
    NotFound { table: &'static str, id: i64 },
    /// The backing store rejected a statement or commit.
    Persistence(DbError),
    /// Cascade save could not determine how to persist a related value,
    /// or change-tracking serialization failed.
    Resolution {
        entity: &'static str,
        reason: String,
    },
}

impl Display for BllError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { table, id } => {
                write!(f, "no {table} row with id {id}")
            }
            Self::Persistence(err) => write!(f, "{err}"),
            Self::Resolution { entity, reason } => {
                write!(f, "cannot resolve save for {entity}: {reason}")
            }
        }
    }
}

impl Error for BllError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persistence(err) => Some(err),
            Self::NotFound { .. } | Self::Resolution { .. } => None,
        }
    }
}

impl From<DbError> for BllError {
    fn from(value: DbError) -> Self {
        Self::Persistence(value)
    }
}

impl From<rusqlite::Error> for BllError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Persistence(DbError::Sqlite(value))
    }
}
