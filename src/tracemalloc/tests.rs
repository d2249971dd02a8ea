use super::*;
use crate::object::{FrameRef, SimpleRuntime};

fn tracker() -> AllocationTracker {
    AllocationTracker::new(true, true, 1 << 20)
}

#[test]
fn test_domain_lookup_is_stable() {
    let t = tracker();
    let a = t.find_or_create_domain(7);
    let b = t.find_or_create_domain(9);
    assert_ne!(a, b);
    assert_eq!(t.find_or_create_domain(7), a);
}

#[test]
fn test_track_untrack_roundtrip() {
    let rt = SimpleRuntime::new();
    let t = tracker();
    let before = t.pressure();

    t.track(&rt, 1, 0xabc0, 100).unwrap();
    assert_eq!(t.pressure(), before + 100);

    assert_eq!(t.untrack(1, 0xabc0), 100);
    assert_eq!(t.untrack(1, 0xabc0), 0);
    assert_eq!(t.pressure(), before);
}

#[test]
fn test_untrack_creates_unseen_domain() {
    let t = tracker();
    assert_eq!(t.untrack(42, 0x10), 0);
    assert_eq!(t.stats().len(), 1);
    assert_eq!(t.stats()[0].key, 42);
    assert_eq!(t.pressure(), 0);
}

#[test]
fn test_oversized_allocation_refused() {
    let rt = SimpleRuntime::new();
    let t = tracker();
    let err = t.track(&rt, 0, 0x80, u64::MAX).unwrap_err();
    assert!(matches!(err, BridgeError::AllocationTooLarge { ptr: 0x80, .. }));
    assert!(!err.is_invariant());
    assert_eq!(t.pressure(), 0);
    assert!(t.record(0, 0x80).is_none());
}

#[test]
fn test_domains_do_not_collide() {
    let rt = SimpleRuntime::new();
    let t = tracker();
    t.track(&rt, 1, 0x100, 8).unwrap();
    t.track(&rt, 2, 0x100, 16).unwrap();

    assert_eq!(t.untrack(2, 0x100), 16);
    assert_eq!(t.untrack(1, 0x100), 8);
}

#[test]
fn test_retrack_replaces_size() {
    let rt = SimpleRuntime::new();
    let t = tracker();
    t.track(&rt, 1, 0x100, 8).unwrap();
    t.track(&rt, 1, 0x100, 24).unwrap();
    assert_eq!(t.pressure(), 24);
    assert_eq!(t.stats()[0].allocations, 1);
}

#[test]
fn test_free_removes_record_and_keeps_site() {
    let rt = SimpleRuntime::new();
    rt.set_current_frame(Some(FrameRef::new(
        None,
        Some(FrameRef::located("mod.py", 3, "build", None)),
    )));
    let t = tracker();
    t.track(&rt, 5, 0x2000, 64).unwrap();

    let record = t.free(0x2000, 64).unwrap();
    assert_eq!(record.domain, 5);
    let site = record.site.unwrap();
    assert_eq!(site.first_located().unwrap().function, "build");

    assert_eq!(t.pressure(), 0);
    assert!(t.record(5, 0x2000).is_none());
}

#[test]
fn test_free_untracked_pointer_only_adjusts_pressure() {
    let t = tracker();
    assert!(t.free(0x3000, 32).is_none());
    assert_eq!(t.pressure(), -32);
}

#[test]
fn test_sites_not_recorded_without_call_tracing() {
    let rt = SimpleRuntime::new();
    rt.set_current_frame(Some(FrameRef::located("a.py", 1, "f", None)));
    let t = AllocationTracker::new(true, false, 1 << 20);
    t.track(&rt, 0, 0x40, 4).unwrap();
    assert!(t.record(0, 0x40).unwrap().site.is_none());
}

#[test]
fn test_threshold_requests_collection_once_per_crossing() {
    let rt = SimpleRuntime::new();
    let t = AllocationTracker::new(false, false, 100);

    t.track(&rt, 0, 0x1, 60).unwrap();
    assert_eq!(rt.collections_requested(), 0);
    t.track(&rt, 0, 0x2, 60).unwrap();
    assert_eq!(rt.collections_requested(), 1);
    t.track(&rt, 0, 0x3, 60).unwrap();
    assert_eq!(rt.collections_requested(), 1);

    t.untrack(0, 0x2);
    t.untrack(0, 0x3);
    t.track(&rt, 0, 0x4, 60).unwrap();
    assert_eq!(rt.collections_requested(), 2);
}

#[test]
fn test_container_tracking_is_idempotent_safe() {
    let t = tracker();
    assert!(t.untrack_container(0x500).is_none());

    let frame = FrameRef::located("c.py", 9, "make", None);
    t.track_container(0x500, Some(frame), "list");
    assert!(t.is_container_tracked(0x500));

    let record = t.untrack_container(0x500).unwrap();
    assert_eq!(record.class_name, "list");
    assert!(t.untrack_container(0x500).is_none());
}

#[test]
fn test_static_types_recorded() {
    let t = tracker();
    t.trace_static_memory(0x9000, "Spam");
    assert_eq!(t.static_type_name(0x9000).as_deref(), Some("Spam"));
}
