//! Weak references: non-owning, invalidation-safe liveness observation.
//!
//! A weak reference is itself a managed instance of the built-in `WeakRef`
//! class. Its private region holds a raw, deliberately unreferenced pointer
//! to the target instance. The pointer transitions from set to unset
//! exactly once (inside the target's final release, under the weak
//! reference's own lock, before the target's storage is returned to the
//! runtime) and never back.
//!
//! Because [`WeakRef::deref`] holds the weak reference's lock for the whole
//! read-and-retain sequence, and the target's final release holds the same
//! lock across decrement and invalidation, a successful deref always yields
//! a live, reference-counted handle and can never observe freed storage.

use crate::error::ErrorSink;
use crate::runtime::Runtime;
use crate::runtime::object::{
    self, InstanceCore, InstanceHeader, InstanceRef, Object, header_of, lock_guard,
};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Private region of the built-in `WeakRef` class.
#[repr(C)]
pub(crate) struct WeakPrivate {
    pub(crate) header: InstanceHeader,
    /// The observed instance. Not reference-counted; protected by this
    /// weak reference's own lock.
    pub(crate) target: Option<NonNull<InstanceCore>>,
}

/// Owning handle to a weak-reference instance.
///
/// Obtained from [`Object::weak_ref`]; cloning shares the same underlying
/// weak-reference instance.
#[derive(Clone)]
pub struct WeakRef {
    obj: Object,
}

impl WeakRef {
    /// Attempts to upgrade to a strong reference.
    ///
    /// Returns a live handle if the target still exists, or `None` if the
    /// target was unset or its reference count reached zero concurrently.
    #[must_use]
    pub fn deref(&self) -> Option<Object> {
        // SAFETY: self.obj keeps the weak-reference instance alive; the
        // weak lock is held across the target read and the retain attempt,
        // which excludes the target's final release.
        unsafe {
            let _weak_guard = lock_guard(self.obj.core);
            let target = (*self.obj.private_as::<WeakPrivate>()).target?;
            object::retain_if_live(target)
        }
    }

    /// True while the target has not been destroyed.
    #[must_use]
    pub fn is_set(&self) -> bool {
        // SAFETY: self.obj keeps the weak-reference instance alive.
        unsafe {
            let _weak_guard = lock_guard(self.obj.core);
            (*self.obj.private_as::<WeakPrivate>()).target.is_some()
        }
    }

    /// The weak reference as a plain managed instance.
    #[must_use]
    pub fn as_object(&self) -> &Object {
        &self.obj
    }
}

impl fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef").field("set", &self.is_set()).finish()
    }
}

/// Lazily creates the instance's weak reference and returns a retained
/// handle to it. Creation happens at most once per instance,
/// double-checked under the instance's lock; later calls reuse the cached
/// weak reference.
pub(crate) fn weak_ref_of(target: &Object) -> Option<WeakRef> {
    // SAFETY: target holds a strong reference, so the final release cannot
    // run concurrently with this creation.
    unsafe {
        let header = header_of(target.core);
        let _guard = lock_guard(target.core);
        if (*header).weak.is_none() {
            let rt = Runtime::from_inner(Arc::clone(&(*header).rt));
            let class = rt.weakref_class();
            let weak = Object::create(&rt, class, ErrorSink::ignore())?;
            (*weak.private_as::<WeakPrivate>()).target = Some(target.core);
            (*header).weak = Some(weak);
        }
        let shared = (*header).weak.clone();
        shared.map(|obj| WeakRef { obj })
    }
}

/// Unsets the weak reference's target. Called from the target's final
/// release while the weak reference's lock is held; the transition happens
/// at most once.
///
/// # Safety
///
/// `weak_core` must be a live `WeakRef` instance and its lock must be held
/// by the caller.
pub(crate) unsafe fn invalidate_target(weak_core: NonNull<InstanceCore>) {
    // SAFETY: per the caller's contract.
    unsafe {
        let private = (*weak_core.as_ptr()).private.as_ptr().cast::<WeakPrivate>();
        (*private).target = None;
    }
}

/// Clear step of the built-in `WeakRef` class: unsets the target. The
/// target is the one deliberately unreferenced field in the system, so
/// nothing is released regardless of the mode flag.
pub(crate) unsafe fn weakref_clear_step(obj: InstanceRef, _release_refs: bool) {
    // SAFETY: the view is live for the duration of the chain.
    unsafe {
        let _guard = lock_guard(obj.core);
        (*obj.private_as::<WeakPrivate>()).target = None;
    }
}
