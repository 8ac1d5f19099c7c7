mod common;

use common::{test_context, test_registry, FirstEntity};
use stratum_core::{Bll, BllError, TrackState};

#[test]
fn loaded_entities_move_through_tracking_states() {
    let ctx = test_context();
    let registry = test_registry();
    let bll: Bll<'_, FirstEntity> = Bll::new(&ctx, &registry);

    let mut entity = FirstEntity::new(1, "tracked");
    assert_eq!(ctx.state_of(&entity).unwrap(), TrackState::Added);

    let id = bll.insert(&mut entity, true).unwrap();
    assert_eq!(ctx.state_of(&entity).unwrap(), TrackState::Unchanged);

    let mut loaded = bll.get_by_id(id).unwrap().unwrap();
    assert_eq!(ctx.state_of(&loaded).unwrap(), TrackState::Unchanged);

    loaded.int_value = 2;
    assert_eq!(ctx.state_of(&loaded).unwrap(), TrackState::Modified);

    bll.save(&mut loaded, true).unwrap();
    assert_eq!(ctx.state_of(&loaded).unwrap(), TrackState::Unchanged);

    bll.delete_by_id(id, true).unwrap();
    assert_eq!(ctx.state_of(&loaded).unwrap(), TrackState::Detached);
}

#[test]
fn copy_from_another_context_is_detached() {
    let ctx_a = test_context();
    let ctx_b = test_context();
    let registry = test_registry();
    let bll_a: Bll<'_, FirstEntity> = Bll::new(&ctx_a, &registry);

    let mut entity = FirstEntity::new(1, "elsewhere");
    let id = bll_a.insert(&mut entity, true).unwrap();
    let loaded = bll_a.get_by_id(id).unwrap().unwrap();

    assert_eq!(ctx_a.state_of(&loaded).unwrap(), TrackState::Unchanged);
    assert_eq!(ctx_b.state_of(&loaded).unwrap(), TrackState::Detached);
}

#[test]
fn failed_commit_restores_the_pending_batch() {
    let ctx = test_context();
    let registry = test_registry();
    let bll: Bll<'_, FirstEntity> = Bll::new(&ctx, &registry);

    let mut good = FirstEntity::new(1, "good");
    bll.insert(&mut good, false).unwrap();

    let mut ghost = FirstEntity::new(2, "ghost");
    ghost.meta.id = 777;
    bll.save(&mut ghost, false).unwrap();
    assert_eq!(ctx.pending_count(), 2);

    let err = ctx.commit().unwrap_err();
    assert!(matches!(
        err,
        BllError::NotFound {
            table: "first_entities",
            id: 777
        }
    ));
    // Rolled back as a whole and kept for the caller to decide.
    assert_eq!(ctx.pending_count(), 2);
    assert!(bll.get_all().unwrap().is_empty());

    ctx.discard_pending();
    assert_eq!(ctx.pending_count(), 0);
    let outcome = ctx.commit().unwrap();
    assert_eq!(outcome.rows_affected, 0);
}

#[test]
fn discard_pending_drops_staged_work_without_touching_the_store() {
    let ctx = test_context();
    let registry = test_registry();
    let bll: Bll<'_, FirstEntity> = Bll::new(&ctx, &registry);

    let mut entity = FirstEntity::new(1, "staged");
    bll.insert(&mut entity, false).unwrap();
    assert_eq!(ctx.pending_count(), 1);

    ctx.discard_pending();
    assert_eq!(ctx.pending_count(), 0);
    assert!(bll.get_all().unwrap().is_empty());
}
