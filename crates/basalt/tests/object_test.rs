//! Instance lifecycle tests: creation, reference counting, clear, assign,
//! copy, ancestry and locking.

mod common;

use basalt::error::{ErrorSink, ErrorStack};
use basalt::{ClassDef, InstanceCore, InstanceHeader, InstanceRef, Object, Runtime};
use common::*;
use std::alloc::Layout;
use std::sync::Mutex;

#[test]
fn create_starts_with_one_reference() {
    let rt = test_runtime();
    let obj = scalar_new(&rt, 42, ErrorSink::ignore()).unwrap();
    assert_eq!(obj.refcount(), 1);
    assert_eq!(obj.class(), scalar_class(&rt));
    assert_eq!(scalar_value(&obj), 42);
}

#[test]
fn clone_and_drop_are_balanced() {
    let rt = test_runtime();
    let obj = scalar_new(&rt, 1, ErrorSink::ignore()).unwrap();
    assert_eq!(obj.refcount(), 1);

    let second = obj.clone();
    assert_eq!(obj.refcount(), 2);
    assert_eq!(second, obj);

    drop(second);
    assert_eq!(obj.refcount(), 1);
}

#[test]
fn create_works_without_thread_safety() {
    let rt = single_threaded_runtime();
    let obj = composite_new(&rt, 5, "plain", ErrorSink::ignore()).unwrap();
    assert_eq!(scalar_value(&obj), 5);
    assert_eq!(composite_label(&obj).as_deref(), Some("plain"));
}

#[test]
fn clear_resets_every_layer_and_is_idempotent() {
    let rt = test_runtime();
    let obj = composite_new(&rt, 9, "tagged", ErrorSink::ignore()).unwrap();
    let child = scalar_new(&rt, 7, ErrorSink::ignore()).unwrap();
    composite_set_child(&obj, Some(&child));
    assert_eq!(child.refcount(), 2);

    obj.clear();
    assert_eq!(scalar_value(&obj), 0);
    assert_eq!(composite_label(&obj), None);
    assert_eq!(composite_child(&obj), None);
    assert_eq!(child.refcount(), 1, "clear released the owned reference");

    // A second clear walks the same chain over already-empty fields.
    obj.clear();
    assert_eq!(scalar_value(&obj), 0);
    assert_eq!(composite_child(&obj), None);
}

#[test]
fn assign_overwrites_and_releases_prior_references() {
    let rt = test_runtime();
    let target = composite_new(&rt, 1, "old", ErrorSink::ignore()).unwrap();
    let old_child = scalar_new(&rt, 10, ErrorSink::ignore()).unwrap();
    composite_set_child(&target, Some(&old_child));

    let source = composite_new(&rt, 2, "new", ErrorSink::ignore()).unwrap();
    let new_child = scalar_new(&rt, 20, ErrorSink::ignore()).unwrap();
    composite_set_child(&source, Some(&new_child));

    let mut errors = ErrorStack::new();
    target.assign_from(&source, errors.sink());
    assert!(errors.is_empty());

    assert_eq!(scalar_value(&target), 2);
    assert_eq!(composite_label(&target).as_deref(), Some("new"));
    assert_eq!(old_child.refcount(), 1, "prior owned reference released");
    // Both composites now hold the new child, plus our handle.
    assert_eq!(new_child.refcount(), 3);
    assert_eq!(composite_child(&target).unwrap(), new_child);
}

#[test]
fn assign_between_different_classes_is_a_silent_no_op() {
    let rt = test_runtime();
    let scalar = scalar_new(&rt, 11, ErrorSink::ignore()).unwrap();
    let composite = composite_new(&rt, 22, "kept", ErrorSink::ignore()).unwrap();

    let mut errors = ErrorStack::new();
    composite.assign_from(&scalar, errors.sink());

    assert!(errors.is_empty(), "type mismatch is not a reported error");
    assert_eq!(scalar_value(&composite), 22);
    assert_eq!(composite_label(&composite).as_deref(), Some("kept"));
}

#[test]
fn copy_deep_copies_strings_and_shares_sub_instances() {
    let rt = test_runtime();
    let original = composite_new(&rt, 3, "shared", ErrorSink::ignore()).unwrap();
    let child = scalar_new(&rt, 30, ErrorSink::ignore()).unwrap();
    composite_set_child(&original, Some(&child));

    let copy = original.copy(ErrorSink::ignore()).unwrap();
    assert_ne!(copy, original, "copy is a distinct instance");
    assert_eq!(scalar_value(&copy), 3);
    assert_eq!(composite_label(&copy).as_deref(), Some("shared"));

    // The owned sub-instance is re-referenced, not duplicated.
    let copied_child = composite_child(&copy).unwrap();
    assert_eq!(copied_child, child);
    assert_eq!(child.refcount(), 4); // ours + original's + copy's + getter's

    // The string is an independent copy.
    composite_set_label(&copy, "changed");
    assert_eq!(composite_label(&original).as_deref(), Some("shared"));
}

#[test]
fn ancestry_and_checked_casts() {
    let rt = test_runtime();
    let composite = composite_new(&rt, 0, "", ErrorSink::ignore()).unwrap();
    let scalar = scalar_new(&rt, 0, ErrorSink::ignore()).unwrap();

    assert!(composite.is_a(composite_class(&rt)));
    assert!(composite.is_a(scalar_class(&rt)));
    assert!(composite.is_a(rt.object_class()));
    assert!(!scalar.is_a(composite_class(&rt)));

    let as_scalar = composite.cast(scalar_class(&rt)).unwrap();
    assert!(as_scalar.is_a(rt.object_class()));
    assert!(scalar.cast(composite_class(&rt)).is_none());

    assert!(scalar_class(&rt).is_subclass_of(rt.object_class()));
    assert!(!scalar_class(&rt).is_subclass_of(composite_class(&rt)));
}

#[test]
fn locks_are_reentrant_free_but_present_only_when_threadsafe() {
    let rt = test_runtime();
    let obj = scalar_new(&rt, 0, ErrorSink::ignore()).unwrap();
    {
        let _guard = obj.lock();
        assert!(obj.try_lock().is_none(), "second acquisition must fail");
    }
    assert!(obj.try_lock().is_some());

    let rt = single_threaded_runtime();
    let obj = scalar_new(&rt, 0, ErrorSink::ignore()).unwrap();
    let _guard = obj.lock();
    // No lock exists, so try_lock always succeeds.
    assert!(obj.try_lock().is_some());
}

unsafe fn scratch_init(obj: InstanceRef, _rt: &Runtime, _sink: ErrorSink<'_>) {
    // The instance's own regions already live in its arena.
    assert!(obj.arena().allocated_bytes() > 0);
    obj.arena()
        .alloc_zeroed(Layout::new::<[u8; 32]>())
        .expect("scratch allocation failed");
}

#[test]
fn init_steps_may_allocate_from_the_instance_arena() {
    let rt = test_runtime();
    let scratch = rt.register_class(&ClassDef {
        name: "Scratch",
        super_class: rt.object_class(),
        public_layout: Layout::new::<InstanceCore>(),
        private_layout: Layout::new::<InstanceHeader>(),
        init: Some(scratch_init),
        assign: None,
        clear: None,
        interfaces: &[],
    });
    let obj = Object::create(&rt, scratch, ErrorSink::ignore()).unwrap();
    drop(obj);
}

// ============================================================================
// Chain ordering
// ============================================================================

static ORDER_EVENTS: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

unsafe fn order_base_init(_obj: InstanceRef, _rt: &Runtime, _sink: ErrorSink<'_>) {
    ORDER_EVENTS.lock().unwrap().push("base-init");
}

unsafe fn order_base_clear(_obj: InstanceRef, _release_refs: bool) {
    ORDER_EVENTS.lock().unwrap().push("base-clear");
}

unsafe fn order_derived_init(_obj: InstanceRef, _rt: &Runtime, _sink: ErrorSink<'_>) {
    ORDER_EVENTS.lock().unwrap().push("derived-init");
}

unsafe fn order_derived_clear(_obj: InstanceRef, _release_refs: bool) {
    ORDER_EVENTS.lock().unwrap().push("derived-clear");
}

#[test]
fn init_runs_root_to_leaf_and_clear_leaf_to_root() {
    let rt = test_runtime();
    let base = rt.register_class(&ClassDef {
        name: "OrderBase",
        super_class: rt.object_class(),
        public_layout: Layout::new::<InstanceCore>(),
        private_layout: Layout::new::<InstanceHeader>(),
        init: Some(order_base_init),
        assign: None,
        clear: Some(order_base_clear),
        interfaces: &[],
    });
    let derived = rt.register_class(&ClassDef {
        name: "OrderDerived",
        super_class: base,
        public_layout: Layout::new::<InstanceCore>(),
        private_layout: Layout::new::<InstanceHeader>(),
        init: Some(order_derived_init),
        assign: None,
        clear: Some(order_derived_clear),
        interfaces: &[],
    });

    let obj = Object::create(&rt, derived, ErrorSink::ignore()).unwrap();
    assert_eq!(*ORDER_EVENTS.lock().unwrap(), ["base-init", "derived-init"]);

    drop(obj);
    assert_eq!(
        *ORDER_EVENTS.lock().unwrap(),
        ["base-init", "derived-init", "derived-clear", "base-clear"]
    );
}
