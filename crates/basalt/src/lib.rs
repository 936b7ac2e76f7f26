//! Basalt: a reference-counted object runtime.
//!
//! Basalt supplies what a language without native object orientation needs
//! to build class hierarchies at runtime:
//!
//! - **Classes** registered per [`Runtime`], with single inheritance and
//!   per-operation method chains (init, assign, clear)
//! - **Instances** with manual reference counting, per-instance locks and
//!   arena-backed storage recycled through a bounded ring
//! - **Weak references** that observe an instance's liveness without
//!   extending it, and can never dangle
//! - **Interfaces**: named capabilities resolved through sparse vtables,
//!   orthogonal to the inheritance chain
//! - **Error chains** threading optional failure records through every
//!   fallible operation
//!
//! # Architecture
//!
//! The runtime is explicit: no global state. Each [`Runtime`] owns its
//! arenas and registries; descriptors and interface ids are lazily
//! registered, published once, and immutable afterwards. Instances hold a
//! back-link to the runtime, so shared state lives until the last instance
//! is gone.
//!
//! # Example
//!
//! ```
//! use basalt::error::ErrorSink;
//! use basalt::{Object, Runtime, RuntimeOptions};
//!
//! let rt = Runtime::new(RuntimeOptions::default()).unwrap();
//! let obj = Object::create(&rt, rt.object_class(), ErrorSink::ignore()).unwrap();
//!
//! let handle = obj.clone();
//! assert_eq!(obj.refcount(), 2);
//!
//! let weak = obj.weak_ref().unwrap();
//! drop(handle);
//! drop(obj);
//! assert!(!weak.is_set());
//! assert!(weak.deref().is_none());
//! ```

pub mod error;
pub mod runtime;

// Re-export commonly used types
pub use basalt_mem::{Arena, ArenaStr, MemError};
pub use error::{ErrorRecord, ErrorSink, ErrorStack};
pub use runtime::{
    AssignFn, Class, ClassDef, ClearFn, InitFn, InstanceCore, InstanceGuard, InstanceHeader,
    InstanceRef, InterfaceId, InterfaceSpec, Object, Runtime, RuntimeOptions, WeakRef,
};
