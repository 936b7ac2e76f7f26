// Shared fixtures for integration tests: two concrete classes built on the
// runtime's registration contract, plus an interface with a defaulting
// wrapper. These exercise the collaborator surface the way a consuming
// class library would.

#![allow(dead_code)]

use basalt::error::ErrorSink;
use basalt::{
    Class, ClassDef, InstanceCore, InstanceHeader, InstanceRef, InterfaceSpec, Object, Runtime,
    RuntimeOptions,
};
use std::alloc::Layout;
use std::ptr;

/// A threadsafe runtime with default options.
pub fn test_runtime() -> Runtime {
    Runtime::new(RuntimeOptions::default()).expect("runtime construction failed")
}

/// A runtime without instance locks.
pub fn single_threaded_runtime() -> Runtime {
    Runtime::new(RuntimeOptions { threadsafe: false, ..RuntimeOptions::default() })
        .expect("runtime construction failed")
}

// ============================================================================
// Scalar: one public integer field
// ============================================================================

#[repr(C)]
pub struct ScalarPublic {
    core: InstanceCore,
    value: i64,
}

pub fn scalar_class(rt: &Runtime) -> Class {
    rt.register_class(&ClassDef {
        name: "Scalar",
        super_class: rt.object_class(),
        public_layout: Layout::new::<ScalarPublic>(),
        private_layout: Layout::new::<InstanceHeader>(),
        init: None,
        assign: Some(scalar_assign),
        clear: Some(scalar_clear),
        interfaces: &[],
    })
}

pub fn scalar_new(rt: &Runtime, value: i64, mut sink: ErrorSink<'_>) -> Option<Object> {
    let obj = Object::create(rt, scalar_class(rt), sink.reborrow())?;
    scalar_set_value(&obj, value);
    Some(obj)
}

pub fn scalar_value(obj: &Object) -> i64 {
    // SAFETY: callers only pass Scalar instances (or subclasses).
    unsafe { (*obj.public_as::<ScalarPublic>()).value }
}

pub fn scalar_set_value(obj: &Object, value: i64) {
    // SAFETY: as scalar_value.
    unsafe { (*obj.public_as::<ScalarPublic>()).value = value };
}

unsafe fn scalar_assign(to: InstanceRef, from: InstanceRef, _sink: ErrorSink<'_>) {
    // SAFETY: both views are instances of this step's class.
    unsafe {
        (*to.public_as::<ScalarPublic>()).value = (*from.public_as::<ScalarPublic>()).value;
    }
}

unsafe fn scalar_clear(obj: InstanceRef, _release_refs: bool) {
    // SAFETY: the view is live for the duration of the chain.
    unsafe { (*obj.public_as::<ScalarPublic>()).value = 0 };
}

// ============================================================================
// Composite: extends Scalar with an owned string and an owned sub-instance
// ============================================================================

#[repr(C)]
pub struct CompositePrivate {
    header: InstanceHeader,
    label: Option<Box<str>>,
    child: Option<Object>,
}

/// Interface implemented by Composite: summarizes an instance as a number.
pub struct Describe {
    pub describe: fn(InstanceRef) -> i64,
}

pub const DESCRIBE_DEFAULT: i64 = -1;

static COMPOSITE_DESCRIBE: Describe = Describe { describe: composite_describe };

fn composite_describe(obj: InstanceRef) -> i64 {
    // SAFETY: the runtime only dispatches this vtable for Composite
    // instances.
    unsafe {
        let value = (*obj.public_as::<ScalarPublic>()).value;
        let label_len = (*obj.private_as::<CompositePrivate>())
            .label
            .as_deref()
            .map_or(0, str::len);
        value + label_len as i64
    }
}

pub fn composite_class(rt: &Runtime) -> Class {
    rt.register_class(&ClassDef {
        name: "Composite",
        super_class: scalar_class(rt),
        public_layout: Layout::new::<ScalarPublic>(),
        private_layout: Layout::new::<CompositePrivate>(),
        init: Some(composite_init),
        assign: Some(composite_assign),
        clear: Some(composite_clear),
        interfaces: &[InterfaceSpec { name: "Describe", vtable: &COMPOSITE_DESCRIBE }],
    })
}

pub fn composite_new(
    rt: &Runtime,
    value: i64,
    label: &str,
    mut sink: ErrorSink<'_>,
) -> Option<Object> {
    let obj = Object::create(rt, composite_class(rt), sink.reborrow())?;
    scalar_set_value(&obj, value);
    composite_set_label(&obj, label);
    Some(obj)
}

pub fn composite_label(obj: &Object) -> Option<String> {
    // SAFETY: callers only pass Composite instances.
    unsafe {
        (*obj.private_as::<CompositePrivate>())
            .label
            .as_deref()
            .map(str::to_owned)
    }
}

/// Owned-string setter: the previous value is released before the copy is
/// stored.
pub fn composite_set_label(obj: &Object, label: &str) {
    // SAFETY: as composite_label.
    unsafe { (*obj.private_as::<CompositePrivate>()).label = Some(label.into()) };
}

/// Owned-instance getter: returns a new strong reference.
pub fn composite_child(obj: &Object) -> Option<Object> {
    // SAFETY: as composite_label.
    unsafe { (*obj.private_as::<CompositePrivate>()).child.clone() }
}

/// Owned-instance setter: the old reference is released, the new one
/// retained.
pub fn composite_set_child(obj: &Object, child: Option<&Object>) {
    // SAFETY: as composite_label.
    unsafe { (*obj.private_as::<CompositePrivate>()).child = child.cloned() };
}

unsafe fn composite_init(obj: InstanceRef, _rt: &Runtime, _sink: ErrorSink<'_>) {
    // The regions start zero-filled, but neither field is guaranteed a
    // valid all-zero representation, so write the defaults explicitly.
    // SAFETY: this layer's fields are uninitialized until here.
    unsafe {
        let p = obj.private_as::<CompositePrivate>();
        (&raw mut (*p).label).write(None);
        (&raw mut (*p).child).write(None);
    }
}

unsafe fn composite_assign(to: InstanceRef, from: InstanceRef, _sink: ErrorSink<'_>) {
    // SAFETY: both views are Composite instances; the destination layer was
    // cleared before the chain ran.
    unsafe {
        let to_p = to.private_as::<CompositePrivate>();
        let from_p = &*from.private_as::<CompositePrivate>();
        (*to_p).label = from_p.label.clone();
        (*to_p).child = from_p.child.clone();
    }
}

unsafe fn composite_clear(obj: InstanceRef, release_refs: bool) {
    // SAFETY: the view is live for the duration of the chain.
    unsafe {
        let p = obj.private_as::<CompositePrivate>();
        drop(ptr::replace(&raw mut (*p).label, None));
        let child = ptr::replace(&raw mut (*p).child, None);
        if release_refs {
            drop(child);
        } else {
            std::mem::forget(child);
        }
    }
}

// ============================================================================
// Describe wrapper
// ============================================================================

/// Capability accessor for the Describe interface: dispatches through the
/// instance's vtable, or returns [`DESCRIBE_DEFAULT`] for classes that do
/// not implement it.
pub fn describe(obj: &Object) -> i64 {
    match obj.vtable_by_name::<Describe>("Describe") {
        Some(vt) => (vt.describe)(obj.view()),
        None => DESCRIBE_DEFAULT,
    }
}
