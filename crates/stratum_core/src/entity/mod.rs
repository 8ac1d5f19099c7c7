//! Entity model: audit metadata, column specs and navigation relations.
//!
//! # Responsibility
//! - Define the identity/audit shape shared by every persisted record.
//! - Define the static contract (`Entity`) a record type implements to
//!   participate in generic CRUD.
//! - Define statically-declared navigation edges used by cascade save.
//!
//! # Invariants
//! - `id == 0` means the entity has never been persisted.
//! - `created_at` is stamped once and never rewritten after first insert.
//! - `modified_at` stays unset until the first update.

use rusqlite::types::Value;
use rusqlite::Row;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

/// Identity and audit metadata embedded in every entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityMeta {
    /// Surrogate key. `0` until the store assigns one on insert.
    pub id: i64,
    /// Creation time in epoch milliseconds, stamped at construction.
    pub created_at: i64,
    /// Last update time in epoch milliseconds. Unset until first update.
    pub modified_at: Option<i64>,
    /// Actor recorded at insert, taken from the context.
    pub created_by: Option<String>,
    /// Actor recorded at the latest update, taken from the context.
    pub modified_by: Option<String>,
}

impl EntityMeta {
    /// Fresh metadata for a not-yet-persisted entity.
    pub fn new() -> Self {
        Self {
            id: 0,
            created_at: now_ms(),
            modified_at: None,
            created_by: None,
            modified_by: None,
        }
    }

    /// Whether the entity has never been persisted.
    pub fn is_new(&self) -> bool {
        self.id == 0
    }

    /// Reads the audit columns out of a full entity row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            created_at: row.get("created_at")?,
            modified_at: row.get("modified_at")?,
            created_by: row.get("created_by")?,
            modified_by: row.get("modified_by")?,
        })
    }
}

impl Default for EntityMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// SQLite storage class for a declared column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
}

/// Static description of one data column of an entity table.
///
/// Audit columns (`id`, `created_at`, `modified_at`, `created_by`,
/// `modified_by`) are implicit and must not be declared here.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    /// Referenced table for foreign-key columns.
    pub references: Option<&'static str>,
}

impl Column {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            references: None,
        }
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub const fn real(name: &'static str) -> Self {
        Self::new(name, ColumnType::Real)
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub const fn blob(name: &'static str) -> Self {
        Self::new(name, ColumnType::Blob)
    }

    /// Integer column referencing `references(id)`.
    pub const fn foreign_key(name: &'static str, references: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Integer,
            references: Some(references),
        }
    }
}

/// Statically-declared navigation edge from `T` to a related entity type.
///
/// One `Relation` replaces one reflection-discovered navigation property:
/// the child accessor and foreign-key setter are plain functions resolved
/// at compile time.
pub struct Relation<T> {
    /// Relation name used in diagnostics.
    pub name: &'static str,
    /// Column on `T`'s table holding the related row's identity.
    pub fk_column: &'static str,
    /// Type id of the related entity, used for registry lookup.
    pub target: fn() -> TypeId,
    /// Accessor for the in-memory related value, when present.
    pub child: fn(&mut T) -> Option<&mut dyn AnyEntity>,
    /// Writes the related row's identity onto `T`'s foreign-key field.
    pub set_fk: fn(&mut T, i64),
}

/// Contract a record type implements to participate in generic CRUD.
///
/// `TABLE` and `COLUMNS` drive SQL generation; `to_row`/`from_row` bind and
/// materialize the declared data columns in `COLUMNS` order. Audit columns
/// are handled by the persistence machinery.
pub trait Entity: Clone + Serialize + 'static {
    const TABLE: &'static str;
    const COLUMNS: &'static [Column];

    fn meta(&self) -> &EntityMeta;
    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// Binds the data columns, aligned with `COLUMNS`.
    fn to_row(&self) -> Vec<Value>;

    /// Materializes an entity from a full row (data plus audit columns).
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Navigation edges walked by cascade save. Empty by default.
    fn relations() -> &'static [Relation<Self>] {
        &[]
    }
}

/// Object-safe view of any entity, used by cascade save and tracking.
pub trait AnyEntity: Any {
    fn entity_meta(&self) -> &EntityMeta;
    fn entity_meta_mut(&mut self) -> &mut EntityMeta;
    fn table(&self) -> &'static str;
    /// Serialized scalar state used for change tracking.
    fn snapshot_json(&self) -> Result<String, serde_json::Error>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Entity> AnyEntity for T {
    fn entity_meta(&self) -> &EntityMeta {
        self.meta()
    }

    fn entity_meta_mut(&mut self) -> &mut EntityMeta {
        self.meta_mut()
    }

    fn table(&self) -> &'static str {
        T::TABLE
    }

    fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{Column, Entity, EntityMeta};
    use rusqlite::types::Value;
    use rusqlite::Row;
    use serde::Serialize;

    /// Minimal single-table entity for module-level tests.
    #[derive(Debug, Clone, Serialize)]
    pub(crate) struct Widget {
        #[serde(flatten)]
        pub meta: EntityMeta,
        pub label: Option<String>,
        pub weight: i64,
    }

    impl Widget {
        pub fn new(label: &str, weight: i64) -> Self {
            Self {
                meta: EntityMeta::new(),
                label: Some(label.to_string()),
                weight,
            }
        }
    }

    impl Entity for Widget {
        const TABLE: &'static str = "widgets";
        const COLUMNS: &'static [Column] =
            &[Column::text("label"), Column::integer("weight")];

        fn meta(&self) -> &EntityMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut EntityMeta {
            &mut self.meta
        }

        fn to_row(&self) -> Vec<Value> {
            let label = match &self.label {
                Some(text) => Value::Text(text.clone()),
                None => Value::Null,
            };
            vec![label, Value::Integer(self.weight)]
        }

        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                meta: EntityMeta::from_row(row)?,
                label: row.get("label")?,
                weight: row.get("weight")?,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{now_ms, Column, ColumnType, EntityMeta};

    #[test]
    fn new_meta_is_unpersisted_with_fresh_creation_time() {
        let before = now_ms();
        let meta = EntityMeta::new();
        let after = now_ms();

        assert!(meta.is_new());
        assert_eq!(meta.id, 0);
        assert!(meta.created_at >= before && meta.created_at <= after);
        assert_eq!(meta.modified_at, None);
        assert_eq!(meta.created_by, None);
        assert_eq!(meta.modified_by, None);
    }

    #[test]
    fn foreign_key_column_is_integer_with_reference() {
        let column = Column::foreign_key("first_entity_id", "first_entities");
        assert_eq!(column.ty, ColumnType::Integer);
        assert_eq!(column.references, Some("first_entities"));
    }

    #[test]
    fn plain_columns_carry_no_reference() {
        assert_eq!(Column::text("label").references, None);
        assert_eq!(Column::blob("payload").ty, ColumnType::Blob);
    }
}
