//! A store that skips the write barrier is caught before anything is swept.

use std::sync::Arc;

use tricolor_gc::test_util::store_unbarriered;
use tricolor_gc::{
    CollectMode, Collector, Color, CyclePhase, GcConfig, GcError, MarkSliceResult, NoopControl,
    RootRegistry,
};

fn setup(verify_marking: bool) -> (Arc<Collector>, Arc<RootRegistry>) {
    let roots = Arc::new(RootRegistry::new());
    let config = GcConfig {
        verify_marking,
        ..GcConfig::manual()
    };
    let gc = Collector::new(config, Arc::clone(&roots), NoopControl).unwrap();
    (gc, roots)
}

#[test]
fn test_black_to_white_edge_aborts_cycle() {
    let (gc, roots) = setup(true);
    let a = gc.allocate_with_fields(1).unwrap();
    let b = gc.allocate(&[]).unwrap();
    let _pin = roots.pin(a);

    gc.start_cycle().unwrap();
    while let MarkSliceResult::Pending { .. } = gc.mark_slice(8).unwrap() {}
    assert_eq!(gc.color_of(a), Some(Color::Black));
    assert_eq!(gc.color_of(b), Some(Color::White));

    store_unbarriered(&gc, a, 0, Some(b)).unwrap();
    assert_eq!(
        gc.terminate_marking(),
        Err(GcError::InvariantViolation { from: a, to: b })
    );

    assert_eq!(gc.phase(), CyclePhase::Idle);
    assert!(gc.is_live(b));
    assert_eq!(gc.color_of(a), Some(Color::White));
    assert_eq!(gc.color_of(b), Some(Color::White));
    assert_eq!(gc.global_metrics().total_aborted(), 1);
    assert_eq!(gc.completed_cycles(), 0);

    // The edge is ordinary once the next cycle starts from scratch.
    let outcome = gc.collect_now(CollectMode::Sync).unwrap();
    assert_eq!(outcome.metrics().unwrap().objects_reclaimed, 0);
    assert!(gc.is_live(b));
}

#[test]
fn test_verify_invariant_reports_edge_during_marking() {
    let (gc, roots) = setup(false);
    let a = gc.allocate_with_fields(1).unwrap();
    let b = gc.allocate(&[]).unwrap();
    let _pin = roots.pin(a);

    gc.start_cycle().unwrap();
    while let MarkSliceResult::Pending { .. } = gc.mark_slice(8).unwrap() {}
    assert_eq!(gc.verify_invariant(), Ok(()));

    store_unbarriered(&gc, a, 0, Some(b)).unwrap();
    assert_eq!(
        gc.verify_invariant(),
        Err(GcError::InvariantViolation { from: a, to: b })
    );
}

#[test]
fn test_barriered_store_keeps_invariant() {
    let (gc, roots) = setup(true);
    let a = gc.allocate_with_fields(1).unwrap();
    let b = gc.allocate(&[]).unwrap();
    let _pin = roots.pin(a);

    gc.start_cycle().unwrap();
    while let MarkSliceResult::Pending { .. } = gc.mark_slice(8).unwrap() {}
    gc.set_reference(a, 0, Some(b)).unwrap();
    assert_eq!(gc.color_of(b), Some(Color::Gray));

    loop {
        while let MarkSliceResult::Pending { .. } = gc.mark_slice(8).unwrap() {}
        if gc.terminate_marking().unwrap() {
            break;
        }
    }
    assert_eq!(gc.phase(), CyclePhase::Sweeping);
}
