//! Entity table DDL generation.
//!
//! # Responsibility
//! - Translate an entity's static column spec into `CREATE TABLE` DDL.
//!
//! # Invariants
//! - `id` is always an autoincrement integer primary key.
//! - Audit columns are always appended after the declared data columns.
//! - Foreign-key columns reference the target table's `id`.

use super::DbResult;
use crate::entity::{ColumnType, Entity};
use rusqlite::Connection;
use std::fmt::Write;

/// Builds `CREATE TABLE IF NOT EXISTS` DDL for the entity's table.
pub fn create_table_sql<T: Entity>() -> String {
    let mut ddl = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    id INTEGER PRIMARY KEY AUTOINCREMENT",
        T::TABLE
    );

    for column in T::COLUMNS {
        let _ = write!(ddl, ",\n    {} {}", column.name, sql_type(column.ty));
        if let Some(table) = column.references {
            let _ = write!(ddl, " REFERENCES {table} (id)");
        }
    }

    ddl.push_str(
        ",\n    created_at INTEGER NOT NULL,\
         \n    modified_at INTEGER,\
         \n    created_by TEXT,\
         \n    modified_by TEXT\n);",
    );
    ddl
}

/// Creates the entity's table when it does not exist yet.
pub fn ensure_table<T: Entity>(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(&create_table_sql::<T>())?;
    Ok(())
}

const fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Integer => "INTEGER",
        ColumnType::Real => "REAL",
        ColumnType::Text => "TEXT",
        ColumnType::Blob => "BLOB",
    }
}
