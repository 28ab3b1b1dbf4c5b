//! Basic allocation, reference and collection tests for tricolor-gc.

use std::sync::Arc;

use tricolor_gc::{
    CollectMode, Collector, Color, CyclePhase, GcConfig, GcError, NoopControl, RootRegistry,
};

fn setup() -> (Arc<Collector>, Arc<RootRegistry>) {
    let roots = Arc::new(RootRegistry::new());
    let gc = Collector::new(GcConfig::manual(), Arc::clone(&roots), NoopControl).unwrap();
    (gc, roots)
}

#[test]
fn test_basic_allocation() {
    let (gc, _roots) = setup();
    let a = gc.allocate_with_fields(2).unwrap();
    assert!(gc.is_live(a));
    assert_eq!(gc.len(), 1);
    assert_eq!(gc.color_of(a), Some(Color::White));
    assert_eq!(gc.references(a).unwrap(), Vec::new());
}

#[test]
fn test_allocate_with_refs() {
    let (gc, _roots) = setup();
    let b = gc.allocate(&[]).unwrap();
    let c = gc.allocate(&[]).unwrap();
    let a = gc.allocate(&[b, c]).unwrap();
    assert_eq!(gc.references(a).unwrap(), vec![b, c]);
    assert_eq!(gc.get_reference(a, 1).unwrap(), Some(c));
}

#[test]
fn test_set_reference_returns_previous() {
    let (gc, _roots) = setup();
    let a = gc.allocate_with_fields(1).unwrap();
    let b = gc.allocate_with_fields(0).unwrap();
    let c = gc.allocate_with_fields(0).unwrap();

    assert_eq!(gc.set_reference(a, 0, Some(b)).unwrap(), None);
    assert_eq!(gc.set_reference(a, 0, Some(c)).unwrap(), Some(b));
    assert_eq!(gc.set_reference(a, 0, None).unwrap(), Some(c));
    assert_eq!(gc.get_reference(a, 0).unwrap(), None);
}

#[test]
fn test_rooted_objects_survive() {
    let (gc, roots) = setup();
    let leaf = gc.allocate(&[]).unwrap();
    let root = gc.allocate(&[leaf]).unwrap();
    let _pin = roots.pin(root);
    let garbage = gc.allocate(&[]).unwrap();

    let outcome = gc.collect_now(CollectMode::Sync).unwrap();
    let metrics = outcome.metrics().unwrap();
    assert_eq!(metrics.objects_reclaimed, 1);
    assert_eq!(metrics.objects_surviving, 2);
    assert_eq!(metrics.roots, 1);

    assert!(gc.is_live(root));
    assert!(gc.is_live(leaf));
    assert!(!gc.is_live(garbage));
    assert_eq!(gc.phase(), CyclePhase::Idle);
}

#[test]
fn test_survivors_are_white_after_cycle() {
    let (gc, roots) = setup();
    let a = gc.allocate(&[]).unwrap();
    let _pin = roots.pin(a);
    gc.collect_now(CollectMode::Sync).unwrap();
    assert_eq!(gc.color_of(a), Some(Color::White));
}

#[test]
fn test_cycles_are_collected() {
    let (gc, roots) = setup();
    let a = gc.allocate_with_fields(1).unwrap();
    let b = gc.allocate(&[a]).unwrap();
    gc.set_reference(a, 0, Some(b)).unwrap();
    let pin = roots.pin(a);

    gc.collect_now(CollectMode::Sync).unwrap();
    assert!(gc.is_live(a) && gc.is_live(b));

    drop(pin);
    gc.collect_now(CollectMode::Sync).unwrap();
    assert!(!gc.is_live(a));
    assert!(!gc.is_live(b));
}

#[test]
fn test_stale_handle_rejected_after_slot_reuse() {
    let (gc, _roots) = setup();
    let old = gc.allocate_with_fields(1).unwrap();
    gc.collect_now(CollectMode::Sync).unwrap();
    assert!(!gc.is_live(old));

    let new = gc.allocate_with_fields(1).unwrap();
    assert_ne!(old, new);
    assert_eq!(gc.references(old), Err(GcError::DanglingReference(old)));
    assert_eq!(
        gc.set_reference(new, 0, Some(old)),
        Err(GcError::DanglingReference(old))
    );
    assert_eq!(gc.allocate(&[old]), Err(GcError::DanglingReference(old)));
    assert_eq!(gc.color_of(old), None);
}

#[test]
fn test_get_roots_reflects_registry() {
    let (gc, roots) = setup();
    let a = gc.allocate(&[]).unwrap();
    let b = gc.allocate(&[]).unwrap();
    let _pa = roots.pin(a);
    let pb = roots.pin(b);

    let set = gc.get_roots().unwrap();
    assert_eq!(set.len(), 2);
    assert!(set.contains(a) && set.contains(b));

    drop(pb);
    let set = gc.get_roots().unwrap();
    assert!(!set.contains(b));
}

#[test]
fn test_epoch_advances_per_cycle() {
    let (gc, _roots) = setup();
    assert_eq!(gc.epoch(), 0);
    gc.collect_now(CollectMode::Sync).unwrap();
    gc.collect_now(CollectMode::Sync).unwrap();
    assert_eq!(gc.epoch(), 2);
    assert_eq!(gc.completed_cycles(), 2);
}

#[test]
fn test_closure_root_enumerator() {
    let pinned = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let source = Arc::clone(&pinned);
    let gc = Collector::new(
        GcConfig::manual(),
        move |roots: &mut tricolor_gc::RootSet| -> Result<(), tricolor_gc::RootError> {
            roots.extend(source.lock().iter().copied());
            Ok(())
        },
        NoopControl,
    )
    .unwrap();

    let a = gc.allocate(&[]).unwrap();
    let b = gc.allocate(&[]).unwrap();
    pinned.lock().push(a);

    gc.collect_now(CollectMode::Sync).unwrap();
    assert!(gc.is_live(a));
    assert!(!gc.is_live(b));
}
