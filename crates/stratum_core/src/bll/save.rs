//! Save staging and cascade orchestration.
//!
//! # Responsibility
//! - Stamp audit fields and stage insert/update operations.
//! - Walk declared navigation relations and stage related saves through
//!   the registry, linking foreign keys to identities generated in the
//!   same commit.
//!
//! # Invariants
//! - Insert vs update is decided by identity alone: `id == 0` inserts,
//!   anything else updates.
//! - Related saves never cascade further and never commit on their own.
//! - Updates never rewrite `created_at`.

use crate::bll::registry::{BllRegistry, StagedRef};
use crate::context::{CommitOutcome, Context, FkLink, PendingOp, SlotId, TrackState};
use crate::entity::{now_ms, Entity};
use crate::error::{BllError, BllResult};
use rusqlite::OptionalExtension;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaveMode {
    /// Always stage a fresh row.
    Insert,
    /// `id == 0` stages an insert, anything else stages an update.
    Upsert,
}

/// Pending foreign-key/identity write-back applied after commit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FkPatch {
    pub relation: usize,
    pub slot: SlotId,
}

/// Record of what staging did for one root entity.
#[derive(Debug, Default)]
pub(crate) struct StagedSave {
    /// Batch slot of the staged insert; `None` when an update was staged.
    pub slot: Option<SlotId>,
    pub fk_patches: Vec<FkPatch>,
}

/// Stages a save of `entity`, cascading one level through its relations
/// when a registry is supplied.
pub(crate) fn stage_entity_save<T: Entity>(
    ctx: &Context,
    registry: Option<&BllRegistry>,
    entity: &mut T,
    mode: SaveMode,
) -> BllResult<StagedSave> {
    let mut fk_links: Vec<FkLink> = Vec::new();
    let mut fk_patches: Vec<FkPatch> = Vec::new();

    if let Some(registry) = registry {
        for (index, relation) in T::relations().iter().enumerate() {
            let staged = {
                let Some(child) = (relation.child)(entity) else {
                    continue;
                };
                let handler = registry.handler((relation.target)(), T::TABLE, relation.name)?;
                if ctx.state_of(&*child)? == TrackState::Unchanged {
                    StagedRef::Existing(child.entity_meta().id)
                } else {
                    handler.stage_save(ctx, child)?
                }
            };
            match staged {
                StagedRef::Existing(id) => (relation.set_fk)(entity, id),
                StagedRef::Pending(slot) => {
                    fk_links.push(FkLink {
                        column: relation.fk_column,
                        from_slot: slot,
                    });
                    fk_patches.push(FkPatch {
                        relation: index,
                        slot,
                    });
                }
            }
        }
    }

    let insert = match mode {
        SaveMode::Insert => true,
        SaveMode::Upsert => entity.meta().is_new(),
    };

    if insert {
        let created_by = ctx.actor().map(str::to_owned);
        {
            let meta = entity.meta_mut();
            meta.id = 0;
            meta.created_at = now_ms();
            meta.modified_at = None;
            meta.created_by = created_by;
            meta.modified_by = None;
        }
        let slot = ctx.stage(PendingOp::Insert {
            table: T::TABLE,
            columns: T::COLUMNS,
            values: entity.to_row(),
            created_at: entity.meta().created_at,
            created_by: entity.meta().created_by.clone(),
            fk_links,
        });
        Ok(StagedSave {
            slot: Some(slot),
            fk_patches,
        })
    } else {
        // A detached copy may arrive without its stored creation time.
        if entity.meta().created_at == 0 {
            let created_at = fetch_created_at::<T>(ctx, entity.meta().id)?;
            entity.meta_mut().created_at = created_at;
        }

        let stamp = now_ms();
        let modified_by = ctx.actor().map(str::to_owned);
        {
            let meta = entity.meta_mut();
            meta.modified_at = Some(stamp);
            meta.modified_by = modified_by;
        }
        ctx.stage(PendingOp::Update {
            table: T::TABLE,
            columns: T::COLUMNS,
            values: entity.to_row(),
            id: entity.meta().id,
            modified_at: stamp,
            modified_by: entity.meta().modified_by.clone(),
            fk_links,
        });
        Ok(StagedSave {
            slot: None,
            fk_patches,
        })
    }
}

/// Writes generated identities back onto the root and its children and
/// refreshes their clean snapshots.
pub(crate) fn apply_commit<T: Entity>(
    ctx: &Context,
    entity: &mut T,
    staged: &StagedSave,
    outcome: &CommitOutcome,
) -> BllResult<()> {
    if let Some(slot) = staged.slot {
        let id = outcome.generated_id(slot).ok_or_else(|| missing_identity::<T>())?;
        entity.meta_mut().id = id;
    }

    for patch in &staged.fk_patches {
        let relation = T::relations()
            .get(patch.relation)
            .ok_or_else(|| missing_identity::<T>())?;
        let id = outcome
            .generated_id(patch.slot)
            .ok_or_else(|| missing_identity::<T>())?;
        if let Some(child) = (relation.child)(entity) {
            child.entity_meta_mut().id = id;
        }
        (relation.set_fk)(entity, id);
    }

    for relation in T::relations() {
        if let Some(child) = (relation.child)(entity) {
            ctx.track(&*child)?;
        }
    }
    ctx.track(&*entity)?;
    Ok(())
}

fn missing_identity<T: Entity>() -> BllError {
    BllError::Resolution {
        entity: T::TABLE,
        reason: "commit did not produce an identity for a staged insert".to_string(),
    }
}

fn fetch_created_at<T: Entity>(ctx: &Context, id: i64) -> BllResult<i64> {
    let sql = format!("SELECT created_at FROM {} WHERE id = ?", T::TABLE);
    ctx.connection()
        .query_row(&sql, [id], |row| row.get::<_, i64>(0))
        .optional()?
        .ok_or(BllError::NotFound {
            table: T::TABLE,
            id,
        })
}
