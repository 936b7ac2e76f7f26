//! Instance lifecycle: creation, reference counting, clear/assign/copy.
//!
//! An instance is two zero-initialized regions inside a private arena
//! acquired from the runtime. The public region begins with
//! [`InstanceCore`] (descriptor pointer + private-region pointer); the
//! private region begins with [`InstanceHeader`] (runtime back-link, owning
//! arena, optional mutex, refcount, cached weak reference, deleted flag).
//! Subclasses grow both regions by embedding the parent layer's structs
//! first.
//!
//! # Ownership
//!
//! [`Object`] is an owning handle: `Clone` increments the reference count
//! and `Drop` decrements it. The final decrement invalidates the cached
//! weak reference's target under the weak reference's lock, runs the clear
//! chain leaf-to-root, and returns the arena to the runtime. The deleted
//! flag makes destruction idempotent; once the count has reached zero no
//! path can resurrect the instance.
//!
//! # Lock order
//!
//! Wherever an instance has a weak reference, the weak reference's lock is
//! acquired before the instance's own lock and released after it. Both the
//! final release here and [`WeakRef::deref`](crate::runtime::weakref::WeakRef::deref)
//! follow this order, which makes dereference and destruction mutually
//! exclusive.

use crate::error::ErrorSink;
use crate::runtime::class::{Class, ClassInner};
use crate::runtime::weakref::{self, WeakRef};
use crate::runtime::{Runtime, RuntimeInner};
use basalt_mem::Arena;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Head of every public instance region.
///
/// A class's public region struct embeds this as its first field
/// (`#[repr(C)]`), then adds the class's own public fields.
#[repr(C)]
pub struct InstanceCore {
    pub(crate) class: NonNull<ClassInner>,
    pub(crate) private: NonNull<u8>,
}

/// Head of every private instance region.
///
/// A class's private region struct embeds its parent layer's private
/// struct first; at the root that is this header. All fields are managed
/// by the runtime.
#[repr(C)]
pub struct InstanceHeader {
    pub(crate) rt: Arc<RuntimeInner>,
    pub(crate) arena: Arena,
    /// Present only on threadsafe runtimes.
    pub(crate) mutex: Option<Mutex<()>>,
    pub(crate) refcount: AtomicU32,
    /// Lazily created, at most one per instance.
    pub(crate) weak: Option<Object>,
    pub(crate) deleted: AtomicBool,
}

/// Non-owning view of an instance, handed to chain steps and accessors.
///
/// The view neither extends nor checks the instance's lifetime; it is only
/// valid while a strong reference exists.
#[derive(Clone, Copy)]
pub struct InstanceRef {
    pub(crate) core: NonNull<InstanceCore>,
}

impl InstanceRef {
    /// The instance's class.
    #[must_use]
    pub fn class(&self) -> Class {
        // SAFETY: a view is only valid while the instance is live.
        Class { ptr: unsafe { (*self.core.as_ptr()).class } }
    }

    /// A handle to the runtime that created the instance.
    #[must_use]
    pub fn runtime(&self) -> Runtime {
        // SAFETY: as in `class`; the header's back-link is set at creation.
        let inner = unsafe { &(*header_of(self.core)).rt };
        Runtime::from_inner(Arc::clone(inner))
    }

    /// The instance's private arena, for layers that want region-lifetime
    /// allocations.
    #[must_use]
    pub fn arena(&self) -> &Arena {
        // SAFETY: as in `class`; the arena lives exactly as long as the
        // instance.
        unsafe { &(*header_of(self.core)).arena }
    }

    /// True if the instance's class is `class` or derives from it.
    #[must_use]
    pub fn is_a(&self, class: Class) -> bool {
        self.class().is_subclass_of(class)
    }

    /// Reinterprets the public region through one layer's region struct.
    ///
    /// # Safety
    ///
    /// `T` must be the public region struct of the instance's class or one
    /// of its ancestors, and writes must respect the layer discipline
    /// described in [`class`](crate::runtime::class).
    #[must_use]
    pub unsafe fn public_as<T>(&self) -> *mut T {
        self.core.as_ptr().cast::<T>()
    }

    /// Reinterprets the private region through one layer's region struct.
    ///
    /// # Safety
    ///
    /// As [`InstanceRef::public_as`], for the private region struct.
    #[must_use]
    pub unsafe fn private_as<T>(&self) -> *mut T {
        // SAFETY: the core is live per the view's validity contract.
        unsafe { (*self.core.as_ptr()).private.as_ptr().cast::<T>() }
    }
}

impl fmt::Debug for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRef")
            .field("class", &self.class().name())
            .finish()
    }
}

/// Returns the header pointer of a live instance.
pub(crate) fn header_of(core: NonNull<InstanceCore>) -> *mut InstanceHeader {
    // SAFETY: callers only pass cores of live instances.
    unsafe { (*core.as_ptr()).private.as_ptr().cast::<InstanceHeader>() }
}

/// Acquires the instance's lock, if it has one. The returned guard is
/// `None` exactly when the runtime is not threadsafe.
///
/// # Safety
///
/// `core` must refer to a live instance, and the header must outlive the
/// returned guard.
pub(crate) unsafe fn lock_guard<'a>(core: NonNull<InstanceCore>) -> Option<MutexGuard<'a, ()>> {
    // SAFETY: per the caller's contract.
    let header: &'a InstanceHeader = unsafe { &*header_of(core) };
    header.mutex.as_ref().map(|m| m.lock().unwrap())
}

/// Increments the reference count unless it has already reached zero.
/// Used under the weak reference's lock, where racing against the final
/// release is possible and must fail closed.
///
/// # Safety
///
/// The instance's storage must still be valid; the caller guarantees this
/// by holding the lock of a weak reference whose target is still set.
pub(crate) unsafe fn retain_if_live(core: NonNull<InstanceCore>) -> Option<Object> {
    // SAFETY: storage is valid per the caller's contract.
    let header = unsafe { &*header_of(core) };
    // SAFETY: same contract.
    let _guard = unsafe { lock_guard(core) };
    let mut count = header.refcount.load(Ordering::Acquire);
    loop {
        if count == 0 {
            return None;
        }
        match header.refcount.compare_exchange_weak(
            count,
            count + 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return Some(Object { core }),
            Err(current) => count = current,
        }
    }
}

/// Runs the clear chain leaf-to-root.
///
/// # Safety
///
/// `core` must refer to a live (or currently-being-destroyed) instance.
pub(crate) unsafe fn run_clear_chain(core: NonNull<InstanceCore>, release_refs: bool) {
    let view = InstanceRef { core };
    let class = view.class();
    for entry in class.inner().clear.entries().iter().rev() {
        // SAFETY: each step touches only its own layer, per ClearFn.
        unsafe { (entry.exec)(view, release_refs) };
    }
}

/// Root clear step for the built-in `Object` class: releases (or, in the
/// teardown mode, abandons) the cached weak reference.
pub(crate) unsafe fn object_clear_step(obj: InstanceRef, release_refs: bool) {
    // SAFETY: the view is live for the duration of the chain.
    unsafe {
        let header = header_of(obj.core);
        let weak = {
            let _guard = lock_guard(obj.core);
            ptr::replace(&raw mut (*header).weak, None)
        };
        if release_refs {
            drop(weak);
        } else {
            std::mem::forget(weak);
        }
    }
}

/// Decrements the reference count under the documented lock order and
/// destroys the instance when it reaches zero.
unsafe fn release_strong(core: NonNull<InstanceCore>) {
    // SAFETY guide for this function: the caller owned a strong reference,
    // so the instance is live on entry and its header readable.
    unsafe {
        let header = header_of(core);
        let mut dead = false;
        loop {
            // The cached weak reference may appear (weak_ref) or vanish
            // (clear) between the unlocked peek and the locked section, so
            // re-check once the locks are held and retry on a change.
            let observed = {
                let _guard = lock_guard(core);
                (*header).weak.as_ref().map(|w| w.core)
            };
            let _weak_guard = match observed {
                Some(w) => lock_guard(w),
                None => None,
            };
            let _self_guard = lock_guard(core);
            let current = (*header).weak.as_ref().map(|w| w.core);
            if current != observed {
                continue;
            }
            if (*header).refcount.load(Ordering::Acquire) > 0 {
                dead = (*header).refcount.fetch_sub(1, Ordering::AcqRel) == 1;
                if dead {
                    if let Some(weak_core) = observed {
                        // Still inside the weak reference's critical
                        // section: no deref can observe the target between
                        // here and the storage release.
                        weakref::invalidate_target(weak_core);
                    }
                }
            }
            break;
        }
        if dead {
            destroy_instance(core);
        }
    }
}

/// Tears the instance down: clear chain, deleted flag, arena release.
/// Idempotent; reached only after the reference count hit zero.
pub(crate) unsafe fn destroy_instance(core: NonNull<InstanceCore>) {
    // SAFETY: the final release guarantees exclusive access here.
    unsafe {
        let header = header_of(core);
        if (*header).deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        run_clear_chain(core, true);
        let rt = ptr::read(&raw const (*header).rt);
        let arena = ptr::read(&raw const (*header).arena);
        rt.release_object_arena(arena);
    }
}

/// Owning handle to a runtime instance.
///
/// `Clone` takes a new strong reference; `Drop` releases one. Equality is
/// identity: two handles are equal when they refer to the same instance.
pub struct Object {
    pub(crate) core: NonNull<InstanceCore>,
}

// SAFETY: the reference count and deleted flag are atomic, mutation of the
// weak cache happens under the instance lock, and layer fields are governed
// by each class's own discipline. Sharing instances across threads is only
// meaningful on a threadsafe runtime, where the per-instance mutex exists.
unsafe impl Send for Object {}
unsafe impl Sync for Object {}

impl Object {
    /// Creates an instance of `class` with a reference count of one.
    ///
    /// Acquires a private arena from the runtime (reusing a recycled one
    /// when available), zero-fills both regions, writes the core and
    /// header, and runs the init chain root-to-leaf. A failure reported
    /// through the sink by an init step aborts construction and releases
    /// the arena; arena exhaustion is fatal to the call and reported only
    /// in the log, never through the sink.
    pub fn create(rt: &Runtime, class: Class, mut sink: ErrorSink<'_>) -> Option<Object> {
        let arena = match rt.inner.acquire_object_arena() {
            Ok(arena) => arena,
            Err(e) => {
                basalt_log::error!("no arena for {} instance: {e}", class.name());
                return None;
            }
        };
        let inner = class.inner();
        let public = match arena.alloc_zeroed(inner.public_layout) {
            Ok(p) => p,
            Err(e) => {
                basalt_log::error!("{} public region allocation failed: {e}", class.name());
                rt.inner.release_object_arena(arena);
                return None;
            }
        };
        let private = match arena.alloc_zeroed(inner.private_layout) {
            Ok(p) => p,
            Err(e) => {
                basalt_log::error!("{} private region allocation failed: {e}", class.name());
                rt.inner.release_object_arena(arena);
                return None;
            }
        };

        let core = public.cast::<InstanceCore>();
        // SAFETY: both regions were just allocated with the class's layouts,
        // which registration guarantees to cover InstanceCore and
        // InstanceHeader respectively.
        unsafe {
            core.as_ptr().write(InstanceCore { class: class.ptr, private });
            private.as_ptr().cast::<InstanceHeader>().write(InstanceHeader {
                rt: Arc::clone(&rt.inner),
                arena,
                mutex: rt.inner.threadsafe.then(|| Mutex::new(())),
                refcount: AtomicU32::new(1),
                weak: None,
                deleted: AtomicBool::new(false),
            });
        }

        let view = InstanceRef { core };
        for entry in inner.init.entries() {
            // SAFETY: the instance is fully formed up to this layer; each
            // step touches only its own layer, per InitFn.
            unsafe { (entry.exec)(view, rt, sink.reborrow()) };
            if sink.failed() {
                basalt_log::debug!(
                    "{} init step failed; aborting {} construction",
                    entry.owner_class().name(),
                    class.name()
                );
                // SAFETY: no handle escaped; reclaim the header's owned
                // state and give the arena back.
                unsafe {
                    let header = header_of(core);
                    let rt_link = ptr::read(&raw const (*header).rt);
                    let arena = ptr::read(&raw const (*header).arena);
                    rt_link.release_object_arena(arena);
                }
                return None;
            }
        }
        Some(Object { core })
    }

    /// The instance's class.
    #[must_use]
    pub fn class(&self) -> Class {
        self.view().class()
    }

    /// A handle to the runtime that created the instance.
    #[must_use]
    pub fn runtime(&self) -> Runtime {
        self.view().runtime()
    }

    /// The current reference count. Mainly useful in tests; under
    /// concurrency the value may be stale as soon as it is read.
    #[must_use]
    pub fn refcount(&self) -> u32 {
        // SAFETY: self holds a strong reference.
        unsafe { (*header_of(self.core)).refcount.load(Ordering::Acquire) }
    }

    /// A non-owning view of the instance.
    #[must_use]
    pub fn view(&self) -> InstanceRef {
        InstanceRef { core: self.core }
    }

    /// True if the instance's class is `class` or derives from it.
    #[must_use]
    pub fn is_a(&self, class: Class) -> bool {
        self.class().is_subclass_of(class)
    }

    /// Checked view conversion: the instance seen as `class`, or `None`
    /// if the instance is not one.
    #[must_use]
    pub fn cast(&self, class: Class) -> Option<InstanceRef> {
        self.is_a(class).then(|| self.view())
    }

    /// Runs the clear chain leaf-to-root, releasing owned references.
    /// Every layer's fields are reset to empty defaults; clearing twice is
    /// harmless. Must not be called while holding the instance's lock.
    pub fn clear(&self) {
        // SAFETY: self holds a strong reference.
        unsafe { run_clear_chain(self.core, true) };
    }

    /// Overwrites this instance's fields with `from`'s.
    ///
    /// A silent no-op unless both instances have exactly the same class
    /// and that class has an assign chain. Otherwise the destination is
    /// cleared (releasing its owned references) and the assign chain runs
    /// root-to-leaf, stopping at the first step that reports a failure.
    pub fn assign_from(&self, from: &Object, mut sink: ErrorSink<'_>) {
        let class = self.class();
        if class != from.class() {
            return;
        }
        let inner = class.inner();
        if inner.assign.is_empty() {
            return;
        }
        // SAFETY: both handles hold strong references.
        unsafe {
            run_clear_chain(self.core, true);
            let to = self.view();
            let source = from.view();
            for entry in inner.assign.entries() {
                (entry.exec)(to, source, sink.reborrow());
                if sink.failed() {
                    break;
                }
            }
        }
    }

    /// Creates a new instance of the same class and assigns this one's
    /// contents to it. Returns `None` (releasing the partial instance) if
    /// creation or any assign step reports a failure.
    pub fn copy(&self, mut sink: ErrorSink<'_>) -> Option<Object> {
        let rt = self.runtime();
        let duplicate = Object::create(&rt, self.class(), sink.reborrow())?;
        duplicate.assign_from(self, sink.reborrow());
        if sink.failed() {
            return None;
        }
        Some(duplicate)
    }

    /// Lazily creates (at most once) and returns a weak reference to this
    /// instance. `None` only if the weak reference itself could not be
    /// allocated.
    #[must_use]
    pub fn weak_ref(&self) -> Option<WeakRef> {
        weakref::weak_ref_of(self)
    }

    /// Acquires the instance's lock, blocking until available. On a
    /// runtime that is not threadsafe this is a no-op guard.
    ///
    /// Do not hold the guard while releasing the last strong reference:
    /// the final release takes the same lock.
    #[must_use]
    pub fn lock(&self) -> InstanceGuard<'_> {
        // SAFETY: self holds a strong reference; the guard's lifetime is
        // tied to &self.
        InstanceGuard { _guard: unsafe { lock_guard(self.core) } }
    }

    /// Attempts to acquire the instance's lock without blocking. Always
    /// succeeds on a runtime that is not threadsafe.
    #[must_use]
    pub fn try_lock(&self) -> Option<InstanceGuard<'_>> {
        // SAFETY: self holds a strong reference.
        let header = unsafe { &*header_of(self.core) };
        match &header.mutex {
            None => Some(InstanceGuard { _guard: None }),
            Some(m) => m.try_lock().ok().map(|g| InstanceGuard { _guard: Some(g) }),
        }
    }

    /// See [`InstanceRef::public_as`].
    ///
    /// # Safety
    ///
    /// As [`InstanceRef::public_as`].
    #[must_use]
    pub unsafe fn public_as<T>(&self) -> *mut T {
        // SAFETY: forwarded contract.
        unsafe { self.view().public_as::<T>() }
    }

    /// See [`InstanceRef::private_as`].
    ///
    /// # Safety
    ///
    /// As [`InstanceRef::private_as`].
    #[must_use]
    pub unsafe fn private_as<T>(&self) -> *mut T {
        // SAFETY: forwarded contract.
        unsafe { self.view().private_as::<T>() }
    }
}

impl Clone for Object {
    fn clone(&self) -> Object {
        // SAFETY: self holds a strong reference, so the count is at least
        // one and the instance cannot be destroyed concurrently.
        let header = unsafe { &*header_of(self.core) };
        let old = header.refcount.fetch_add(1, Ordering::AcqRel);
        assert!(old != u32::MAX, "instance reference count overflow");
        Object { core: self.core }
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        // SAFETY: this handle owned one strong reference.
        unsafe { release_strong(self.core) };
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.core == other.core
    }
}

impl Eq for Object {}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class().name())
            .field("refcount", &self.refcount())
            .finish()
    }
}

/// RAII guard for an instance's lock. No-op when the runtime is not
/// threadsafe.
pub struct InstanceGuard<'a> {
    _guard: Option<MutexGuard<'a, ()>>,
}
