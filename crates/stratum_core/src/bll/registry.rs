//! Explicit registry mapping entity types to cascade save handlers.
//!
//! # Responsibility
//! - Resolve which handler persists a navigation property's value.
//!
//! # Invariants
//! - The registry is built once at startup and passed by reference; there
//!   is no process-global state and no runtime type discovery.
//! - An unregistered navigation target is a `Resolution` error, never a
//!   silent fallback.

use crate::bll::save::{stage_entity_save, SaveMode};
use crate::context::{Context, SlotId};
use crate::entity::{AnyEntity, Entity};
use crate::error::{BllError, BllResult};
use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;

/// Outcome of staging one related entity during cascade save.
#[derive(Debug, Clone, Copy)]
pub enum StagedRef {
    /// The related row already carries an identity.
    Existing(i64),
    /// A new row was staged; its identity resolves at commit.
    Pending(SlotId),
}

/// Capability interface for persisting one related entity type.
///
/// The generic implementation installed by [`BllRegistry::register`]
/// covers the common case; custom implementations can replace it for
/// types with bespoke save behavior.
pub trait RelatedSaver {
    /// Table of the entity type this handler is responsible for.
    fn entity_table(&self) -> &'static str;

    /// Stages a save of `child` without committing and without cascading
    /// further.
    fn stage_save(&self, ctx: &Context, child: &mut dyn AnyEntity) -> BllResult<StagedRef>;
}

impl std::fmt::Debug for dyn RelatedSaver + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelatedSaver")
            .field("entity_table", &self.entity_table())
            .finish()
    }
}

struct TypedSaver<T: Entity> {
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> RelatedSaver for TypedSaver<T> {
    fn entity_table(&self) -> &'static str {
        T::TABLE
    }

    fn stage_save(&self, ctx: &Context, child: &mut dyn AnyEntity) -> BllResult<StagedRef> {
        let actual = child.table();
        let child = child
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| BllError::Resolution {
                entity: T::TABLE,
                reason: format!("related value has type `{actual}`, expected `{}`", T::TABLE),
            })?;

        // Cascade depth is one level: related saves do not recurse.
        let staged = stage_entity_save(ctx, None, child, SaveMode::Upsert)?;
        Ok(match staged.slot {
            Some(slot) => StagedRef::Pending(slot),
            None => StagedRef::Existing(child.meta().id),
        })
    }
}

/// Dispatch table from entity type to its cascade save handler.
pub struct BllRegistry {
    handlers: HashMap<TypeId, Box<dyn RelatedSaver>>,
}

impl BllRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Installs the generic handler for `T`.
    pub fn register<T: Entity>(&mut self) -> &mut Self {
        self.handlers.insert(
            TypeId::of::<T>(),
            Box::new(TypedSaver::<T> {
                _entity: PhantomData,
            }),
        );
        self
    }

    /// Installs a custom handler for `T`, replacing any earlier one.
    pub fn register_handler<T: Entity>(&mut self, handler: Box<dyn RelatedSaver>) -> &mut Self {
        self.handlers.insert(TypeId::of::<T>(), handler);
        self
    }

    pub fn is_registered<T: Entity>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<T>())
    }

    pub(crate) fn handler(
        &self,
        target: TypeId,
        entity: &'static str,
        relation: &'static str,
    ) -> BllResult<&dyn RelatedSaver> {
        self.handlers
            .get(&target)
            .map(|handler| handler.as_ref())
            .ok_or_else(|| BllError::Resolution {
                entity,
                reason: format!("no BLL registered for relation `{relation}`"),
            })
    }
}

impl Default for BllRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::BllRegistry;
    use crate::entity::testing::Widget;
    use crate::error::BllError;
    use std::any::TypeId;

    #[test]
    fn registered_type_resolves_to_its_handler() {
        let mut registry = BllRegistry::new();
        registry.register::<Widget>();

        assert!(registry.is_registered::<Widget>());
        let handler = registry
            .handler(TypeId::of::<Widget>(), "widgets", "self")
            .unwrap();
        assert_eq!(handler.entity_table(), "widgets");
    }

    #[test]
    fn unregistered_type_is_a_resolution_error() {
        let registry = BllRegistry::new();
        let err = registry
            .handler(TypeId::of::<Widget>(), "parents", "widget")
            .unwrap_err();
        assert!(matches!(err, BllError::Resolution { entity: "parents", .. }));
    }
}
