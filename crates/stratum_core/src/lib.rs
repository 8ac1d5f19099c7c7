//! Generic business logic layer over SQLite.
//!
//! This crate is reusable scaffolding for CRUD-style data access: a
//! shared [`Context`] tracks entity state and accumulates staged changes,
//! a generic [`Bll`] provides uniform CRUD over any [`Entity`], and a
//! statically-built [`BllRegistry`] drives single-level cascade saves
//! across declared navigation relations.

pub mod bll;
pub mod context;
pub mod db;
pub mod entity;
pub mod error;
pub mod logging;
pub mod uow;

pub use bll::registry::{BllRegistry, RelatedSaver, StagedRef};
pub use bll::Bll;
pub use context::{CommitOutcome, Context, SlotId, TrackState};
pub use db::{create_table_sql, ensure_table, open_db, open_db_in_memory, DbError, DbResult};
pub use entity::{now_ms, AnyEntity, Column, ColumnType, Entity, EntityMeta, Relation};
pub use error::{BllError, BllResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use uow::UnitOfWork;

/// Returns the crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
