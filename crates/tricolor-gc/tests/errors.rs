//! Error paths: failing root enumeration, heap exhaustion and handle misuse.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tricolor_gc::{
    CollectMode, Collector, Color, CyclePhase, GcConfig, GcError, MarkSliceResult, NoopControl,
    RootError, RootRegistry, RootSet, TriggerPolicy,
};

/// Root source that fails on the `fail_on`-th enumeration (1-based).
fn flaky_roots(
    registry: Arc<RootRegistry>,
    fail_on: usize,
) -> impl Fn(&mut RootSet) -> Result<(), RootError> + Send + Sync {
    let calls = AtomicUsize::new(0);
    move |roots: &mut RootSet| -> Result<(), RootError> {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == fail_on {
            return Err(RootError::new("thread list unavailable"));
        }
        tricolor_gc::RootEnumerator::enumerate(&registry, roots)
    }
}

#[test]
fn test_root_failure_at_snapshot_leaves_heap_untouched() {
    let registry = Arc::new(RootRegistry::new());
    let gc = Collector::new(
        GcConfig::manual(),
        flaky_roots(Arc::clone(&registry), 1),
        NoopControl,
    )
    .unwrap();
    let b = gc.allocate(&[]).unwrap();
    let a = gc.allocate(&[b]).unwrap();
    let garbage = gc.allocate(&[]).unwrap();
    let _pin = registry.pin(a);

    let err = gc.collect_now(CollectMode::Sync).unwrap_err();
    assert_eq!(
        err,
        GcError::RootEnumeration(RootError::new("thread list unavailable"))
    );
    assert_eq!(err.to_string(), "root enumeration failed: thread list unavailable");
    assert_eq!(gc.phase(), CyclePhase::Idle);
    assert_eq!(gc.len(), 3);
    for id in [a, b, garbage] {
        assert_eq!(gc.color_of(id), Some(Color::White));
    }
    assert_eq!(gc.global_metrics().total_aborted(), 1);
    assert_eq!(gc.completed_cycles(), 0);

    // The next cycle enumerates fine.
    gc.collect_now(CollectMode::Sync).unwrap();
    assert!(gc.is_live(a) && gc.is_live(b));
    assert!(!gc.is_live(garbage));
}

#[test]
fn test_root_failure_at_termination_aborts_without_sweeping() {
    let registry = Arc::new(RootRegistry::new());
    let gc = Collector::new(
        GcConfig::manual(),
        flaky_roots(Arc::clone(&registry), 2),
        NoopControl,
    )
    .unwrap();
    let a = gc.allocate(&[]).unwrap();
    let garbage = gc.allocate(&[]).unwrap();
    let _pin = registry.pin(a);

    gc.start_cycle().unwrap();
    while let MarkSliceResult::Pending { .. } = gc.mark_slice(4).unwrap() {}
    assert_eq!(gc.color_of(a), Some(Color::Black));

    assert!(matches!(
        gc.terminate_marking(),
        Err(GcError::RootEnumeration(_))
    ));
    assert_eq!(gc.phase(), CyclePhase::Idle);
    assert!(gc.is_live(garbage));
    assert_eq!(gc.color_of(a), Some(Color::White));
}

#[test]
fn test_out_of_memory_after_collection() {
    let registry = Arc::new(RootRegistry::new());
    let config = GcConfig {
        max_objects: Some(3),
        ..GcConfig::manual()
    };
    let gc = Collector::new(config, Arc::clone(&registry), NoopControl).unwrap();
    let pins: Vec<_> = (0..3)
        .map(|_| registry.pin(gc.allocate(&[]).unwrap()))
        .collect();

    assert_eq!(
        gc.allocate(&[]),
        Err(GcError::OutOfMemory { capacity: 3 })
    );
    assert_eq!(gc.completed_cycles(), 1);
    assert_eq!(gc.len(), 3);
    drop(pins);
}

#[test]
fn test_full_heap_collects_and_retries() {
    let registry = Arc::new(RootRegistry::new());
    let config = GcConfig {
        max_objects: Some(3),
        ..GcConfig::manual()
    };
    let gc = Collector::new(config, Arc::clone(&registry), NoopControl).unwrap();
    let kept = gc.allocate(&[]).unwrap();
    let _pin = registry.pin(kept);
    gc.allocate(&[]).unwrap();
    gc.allocate(&[]).unwrap();

    let fresh = gc.allocate(&[kept]).unwrap();
    assert!(gc.is_live(fresh));
    assert_eq!(gc.len(), 2);
    assert_eq!(gc.last_cycle_metrics().unwrap().objects_reclaimed, 2);
}

#[test]
fn test_raising_capacity_at_runtime() {
    let registry = Arc::new(RootRegistry::new());
    let config = GcConfig {
        max_objects: Some(1),
        ..GcConfig::manual()
    };
    let gc = Collector::new(config, Arc::clone(&registry), NoopControl).unwrap();
    let _pin = registry.pin(gc.allocate(&[]).unwrap());
    assert!(matches!(
        gc.allocate(&[]),
        Err(GcError::OutOfMemory { .. })
    ));

    gc.set_config(GcConfig {
        max_objects: Some(2),
        ..gc.config()
    })
    .unwrap();
    assert!(gc.allocate(&[]).is_ok());
}

#[test]
fn test_handle_misuse() {
    let gc = Collector::new(GcConfig::manual(), RootRegistry::new(), NoopControl).unwrap();
    let a = gc.allocate_with_fields(2).unwrap();

    assert_eq!(
        gc.set_reference(a, 2, None),
        Err(GcError::FieldOutOfBounds {
            object: a,
            field: 2,
            len: 2
        })
    );

    gc.collect_now(CollectMode::Sync).unwrap();
    assert_eq!(
        gc.set_reference(a, 0, None),
        Err(GcError::DanglingReference(a))
    );
    assert_eq!(gc.get_reference(a, 0), Err(GcError::DanglingReference(a)));
}

#[test]
fn test_invalid_config_rejected() {
    let config = GcConfig {
        sweep_batch: 0,
        ..GcConfig::default()
    };
    assert!(matches!(
        Collector::new(config, RootRegistry::new(), NoopControl),
        Err(GcError::InvalidConfig(_))
    ));

    let gc = Collector::new(GcConfig::manual(), RootRegistry::new(), NoopControl).unwrap();
    assert!(matches!(
        gc.configure(TriggerPolicy::HeapGrowth { threshold: 0 }),
        Err(GcError::InvalidConfig(_))
    ));
    assert_eq!(gc.config().trigger, TriggerPolicy::Manual);
}
