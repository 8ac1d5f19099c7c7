//! Manual-SQL unit of work over a raw connection.
//!
//! # Responsibility
//! - Pair an explicit transaction with a user identity for audit
//!   attribution, as an alternative to the tracked [`crate::Context`].
//!
//! # Invariants
//! - Dropping an unfinished unit of work rolls the transaction back.
//! - `commit`/`rollback` consume the unit of work; there is no half-open
//!   state.

use crate::db::DbResult;
use rusqlite::{Connection, Transaction};

/// Explicit transaction plus the user it is attributed to.
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
    user: String,
}

impl<'conn> UnitOfWork<'conn> {
    /// Begins a transaction on `conn` attributed to `user`.
    pub fn begin(conn: &'conn mut Connection, user: impl Into<String>) -> DbResult<Self> {
        let tx = conn.transaction()?;
        Ok(Self {
            tx,
            user: user.into(),
        })
    }

    /// The open transaction, for manual statements. Dereferences to the
    /// underlying connection.
    pub fn tx(&self) -> &Transaction<'conn> {
        &self.tx
    }

    /// User identity mutations through this unit of work are attributed to.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Makes every statement executed so far durable.
    pub fn commit(self) -> DbResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Discards every statement executed so far.
    pub fn rollback(self) -> DbResult<()> {
        self.tx.rollback()?;
        Ok(())
    }
}
