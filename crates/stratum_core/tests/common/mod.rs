#![allow(dead_code)]

use rusqlite::types::Value;
use rusqlite::Row;
use serde::Serialize;
use std::any::TypeId;
use stratum_core::{
    ensure_table, open_db_in_memory, AnyEntity, BllRegistry, Column, Context, Entity, EntityMeta,
    Relation,
};

/// Principal entity with no navigation properties.
#[derive(Debug, Clone, Serialize)]
pub struct FirstEntity {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub int_value: i64,
    pub string_value: Option<String>,
}

impl FirstEntity {
    pub fn new(int_value: i64, string_value: &str) -> Self {
        Self {
            meta: EntityMeta::new(),
            int_value,
            string_value: Some(string_value.to_string()),
        }
    }
}

impl Entity for FirstEntity {
    const TABLE: &'static str = "first_entities";
    const COLUMNS: &'static [Column] = &[
        Column::integer("int_value"),
        Column::text("string_value"),
    ];

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.int_value),
            text_or_null(&self.string_value),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta: EntityMeta::from_row(row)?,
            int_value: row.get("int_value")?,
            string_value: row.get("string_value")?,
        })
    }
}

/// Dependent entity navigating to [`FirstEntity`].
#[derive(Debug, Clone, Serialize)]
pub struct SecondEntity {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub int_value: i64,
    pub string_value: Option<String>,
    pub first_entity_id: Option<i64>,
    #[serde(skip)]
    pub first_entity: Option<FirstEntity>,
}

impl SecondEntity {
    pub fn new(int_value: i64, string_value: &str) -> Self {
        Self {
            meta: EntityMeta::new(),
            int_value,
            string_value: Some(string_value.to_string()),
            first_entity_id: None,
            first_entity: None,
        }
    }

    pub fn with_first(mut self, first: FirstEntity) -> Self {
        self.first_entity = Some(first);
        self
    }
}

fn first_entity_child(entity: &mut SecondEntity) -> Option<&mut dyn AnyEntity> {
    entity
        .first_entity
        .as_mut()
        .map(|child| child as &mut dyn AnyEntity)
}

fn set_first_entity_fk(entity: &mut SecondEntity, id: i64) {
    entity.first_entity_id = Some(id);
}

impl Entity for SecondEntity {
    const TABLE: &'static str = "second_entities";
    const COLUMNS: &'static [Column] = &[
        Column::integer("int_value"),
        Column::text("string_value"),
        Column::foreign_key("first_entity_id", "first_entities"),
    ];

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn to_row(&self) -> Vec<Value> {
        let first_entity_id = match self.first_entity_id {
            Some(id) => Value::Integer(id),
            None => Value::Null,
        };
        vec![
            Value::Integer(self.int_value),
            text_or_null(&self.string_value),
            first_entity_id,
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta: EntityMeta::from_row(row)?,
            int_value: row.get("int_value")?,
            string_value: row.get("string_value")?,
            first_entity_id: row.get("first_entity_id")?,
            first_entity: None,
        })
    }

    fn relations() -> &'static [Relation<Self>] {
        const RELATIONS: &[Relation<SecondEntity>] = &[Relation {
            name: "first_entity",
            fk_column: "first_entity_id",
            target: TypeId::of::<FirstEntity>,
            child: first_entity_child,
            set_fk: set_first_entity_fk,
        }];
        RELATIONS
    }
}

fn text_or_null(value: &Option<String>) -> Value {
    match value {
        Some(text) => Value::Text(text.clone()),
        None => Value::Null,
    }
}

/// In-memory context with both test tables created.
pub fn test_context() -> Context {
    let conn = open_db_in_memory().unwrap();
    ensure_table::<FirstEntity>(&conn).unwrap();
    ensure_table::<SecondEntity>(&conn).unwrap();
    Context::new(conn)
}

/// Registry covering both test entity types.
pub fn test_registry() -> BllRegistry {
    let mut registry = BllRegistry::new();
    registry.register::<FirstEntity>();
    registry.register::<SecondEntity>();
    registry
}
