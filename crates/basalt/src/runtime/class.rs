//! Class descriptors and per-operation method chains.
//!
//! A class is described once per [`Runtime`](crate::runtime::Runtime) by a
//! [`ClassInner`] record: its name, its super link, the layouts of its two
//! instance regions, three method chains (init, assign, clear) and an
//! optional interface table. Descriptors are immutable after registration;
//! [`Class`] handles are plain copyable pointers into the registry, valid
//! for as long as the runtime lives.
//!
//! # Method chains
//!
//! Inheritance is expressed by chains rather than overriding: each class
//! contributes at most one step per operation, and a subclass's chain is
//! built by copying its superclass's chain and appending its own step. The
//! stored order is always ancestor-before-descendant; init and assign
//! consumers walk it forward, the clear consumer walks it backward. Chains
//! are never mutated or shared once their descriptor is published.
//!
//! # Layer regions
//!
//! Each chain step is scoped to one class layer. A layer declares
//! `#[repr(C)]` region structs that embed the parent layer's structs as
//! their first field, so reinterpreting the instance's region pointers
//! through any ancestor's types is valid at the same address. Steps receive
//! an [`InstanceRef`] and cast with
//! [`public_as`](InstanceRef::public_as)/[`private_as`](InstanceRef::private_as).
//!
//! A layer whose region structs are not valid as all-zero bytes must supply
//! an init step that writes its defaults before any accessor runs, and clear
//! steps must reset fields with a take-and-replace discipline so that
//! running the chain twice is harmless.

use crate::error::ErrorSink;
use crate::runtime::Runtime;
use crate::runtime::interface::{InterfaceSpec, InterfaceTable};
use crate::runtime::object::InstanceRef;
use basalt_mem::ArenaStr;
use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;

/// One class's initialization step, run root-to-leaf during creation.
///
/// # Safety
///
/// Implementations may only touch their own layer's fields, must leave the
/// layer in a cleared state before reporting a failure through the sink,
/// and must not assume anything about layers below their own.
pub type InitFn = unsafe fn(InstanceRef, &Runtime, ErrorSink<'_>);

/// One class's assignment step, run root-to-leaf after the destination has
/// been cleared. Copies that layer's fields from `from` to `to`: owned
/// strings are deep-copied, owned sub-instances re-referenced.
///
/// # Safety
///
/// As [`InitFn`]; both views are instances of the step's own class.
pub type AssignFn = unsafe fn(InstanceRef, InstanceRef, ErrorSink<'_>);

/// One class's clear step, run leaf-to-root. Resets that layer's fields to
/// empty defaults; owned references are released only when the flag is
/// true, and abandoned otherwise (the best-effort teardown mode).
///
/// # Safety
///
/// As [`InitFn`]; must be idempotent.
pub type ClearFn = unsafe fn(InstanceRef, bool);

/// A chain step paired with the descriptor that contributed it.
pub(crate) struct ChainEntry<F> {
    /// The layer this step belongs to.
    pub(crate) owner: NonNull<ClassInner>,
    pub(crate) exec: F,
}

impl<F> ChainEntry<F> {
    /// The contributing layer, as a handle.
    pub(crate) fn owner_class(&self) -> Class {
        Class { ptr: self.owner }
    }
}

impl<F: Copy> Clone for ChainEntry<F> {
    fn clone(&self) -> Self {
        ChainEntry { owner: self.owner, exec: self.exec }
    }
}

/// Ordered list of `(owner, step)` pairs for one operation.
pub(crate) struct MethodChain<F> {
    entries: Vec<ChainEntry<F>>,
}

impl<F: Copy> MethodChain<F> {
    pub(crate) fn new() -> MethodChain<F> {
        MethodChain { entries: Vec::new() }
    }

    /// Returns a new chain: a copy of this one with `(owner, exec)`
    /// appended. The receiver is left untouched.
    #[must_use]
    pub(crate) fn extend(&self, owner: NonNull<ClassInner>, exec: F) -> MethodChain<F> {
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.extend(self.entries.iter().cloned());
        entries.push(ChainEntry { owner, exec });
        MethodChain { entries }
    }

    pub(crate) fn entries(&self) -> &[ChainEntry<F>] {
        &self.entries
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<F: Copy> Clone for MethodChain<F> {
    fn clone(&self) -> Self {
        MethodChain { entries: self.entries.clone() }
    }
}

/// Descriptor record owned by the runtime's class registry.
pub(crate) struct ClassInner {
    /// Name bytes live in the runtime's global arena.
    pub(crate) name: ArenaStr,
    pub(crate) super_class: Option<NonNull<ClassInner>>,
    /// Layout of the public instance region (starts with `InstanceCore`).
    pub(crate) public_layout: Layout,
    /// Layout of the private instance region (starts with `InstanceHeader`).
    pub(crate) private_layout: Layout,
    pub(crate) init: MethodChain<InitFn>,
    pub(crate) assign: MethodChain<AssignFn>,
    pub(crate) clear: MethodChain<ClearFn>,
    /// Sparse vtable table, indexed by interface id. Inherited from the
    /// superclass and replaced wholesale when a definition packs its own.
    pub(crate) interfaces: Option<InterfaceTable>,
}

// SAFETY: ClassInner is immutable once published by the registry; the raw
// super pointer targets another registry-owned descriptor with the same
// lifetime, and chain function pointers carry no state.
unsafe impl Send for ClassInner {}
unsafe impl Sync for ClassInner {}

/// Handle to a registered class.
///
/// Cheap to copy and compare; valid while the owning runtime is alive.
/// Obtained from [`Runtime::register_class`](crate::runtime::Runtime::register_class)
/// or [`Runtime::object_class`](crate::runtime::Runtime::object_class).
#[derive(Clone, Copy)]
pub struct Class {
    pub(crate) ptr: NonNull<ClassInner>,
}

// SAFETY: a Class is a read-only pointer to an immutable, registry-owned
// descriptor; see ClassInner.
unsafe impl Send for Class {}
unsafe impl Sync for Class {}

impl Class {
    pub(crate) fn inner(&self) -> &ClassInner {
        // SAFETY: the registry never drops a published descriptor before
        // the runtime itself is dropped, and handles are documented not to
        // outlive the runtime.
        unsafe { self.ptr.as_ref() }
    }

    /// The class name.
    #[must_use]
    pub fn name(&self) -> &str {
        // SAFETY: the name was stored in the runtime's global arena, which
        // lives as long as the descriptor does.
        unsafe { self.inner().name.as_str() }
    }

    /// The superclass, or `None` for the root class.
    #[must_use]
    pub fn super_class(&self) -> Option<Class> {
        self.inner().super_class.map(|ptr| Class { ptr })
    }

    /// Layout of the public instance region.
    #[must_use]
    pub fn public_layout(&self) -> Layout {
        self.inner().public_layout
    }

    /// Layout of the private instance region.
    #[must_use]
    pub fn private_layout(&self) -> Layout {
        self.inner().private_layout
    }

    /// True if `self` is `ancestor` or derives from it.
    #[must_use]
    pub fn is_subclass_of(&self, ancestor: Class) -> bool {
        let mut current = Some(*self);
        while let Some(class) = current {
            if class == ancestor {
                return true;
            }
            current = class.super_class();
        }
        false
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for Class {}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name())
            .field("super", &self.super_class().map(|s| s.name().to_owned()))
            .finish()
    }
}

/// Everything a class supplies at registration time.
///
/// The two layouts must be at least as large and as aligned as the
/// superclass's: region structs embed the parent layer's structs first, so
/// a layer can only grow its regions. Steps are optional; a class with no
/// step for an operation simply inherits the superclass's chain unchanged.
pub struct ClassDef<'a> {
    /// Unique name within the runtime. Registration is idempotent by name.
    pub name: &'a str,
    /// The class to derive from; user classes ultimately derive from
    /// [`Runtime::object_class`](crate::runtime::Runtime::object_class).
    pub super_class: Class,
    /// Layout of this class's public region struct.
    pub public_layout: Layout,
    /// Layout of this class's private region struct.
    pub private_layout: Layout,
    /// Initialization step for this layer, if any.
    pub init: Option<InitFn>,
    /// Assignment step for this layer, if any.
    pub assign: Option<AssignFn>,
    /// Clear step for this layer, if any.
    pub clear: Option<ClearFn>,
    /// Interface implementations packed for this class. Empty means
    /// "inherit the superclass's table".
    pub interfaces: &'a [InterfaceSpec<'a>],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dangling() -> NonNull<ClassInner> {
        NonNull::dangling()
    }

    #[test]
    fn extend_copies_and_appends() {
        type Step = fn() -> u32;
        let empty: MethodChain<Step> = MethodChain::new();
        assert!(empty.is_empty());

        let one = empty.extend(dangling(), (|| 1) as Step);
        let two = one.extend(dangling(), (|| 2) as Step);

        // The shorter chain is untouched by the extension.
        assert_eq!(one.entries().len(), 1);
        assert_eq!(two.entries().len(), 2);
        assert_eq!((two.entries()[0].exec)(), 1);
        assert_eq!((two.entries()[1].exec)(), 2);
    }

    #[test]
    fn extend_preserves_order() {
        type Step = fn() -> u32;
        let mut chain: MethodChain<Step> = MethodChain::new();
        chain = chain.extend(dangling(), (|| 10) as Step);
        chain = chain.extend(dangling(), (|| 20) as Step);
        chain = chain.extend(dangling(), (|| 30) as Step);
        let values: Vec<u32> = chain.entries().iter().map(|e| (e.exec)()).collect();
        assert_eq!(values, [10, 20, 30]);
    }
}
