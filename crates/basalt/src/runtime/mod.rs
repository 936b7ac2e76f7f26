//! The Basalt runtime: arenas, registries, and instance-arena recycling.
//!
//! A [`Runtime`] is an explicit, cloneable handle; there is no global
//! runtime. It owns:
//!
//! - a **global arena** for long-lived metadata (class names),
//! - an **objects arena** serving as the template for per-instance arenas,
//! - an optional bounded **recycle ring** of cleared instance arenas,
//! - the **class registry** (name → descriptor, lazily populated), and
//! - the **interface-id registry** (name → small stable id).
//!
//! Registries only grow: a published descriptor or id is never removed or
//! mutated, so reads after the first registration are cheap shared-lock
//! hits. Every instance keeps a back-link to the runtime, so the shared
//! state outlives all instances; arenas supplied by the caller at
//! construction outlive the runtime itself through the caller's own `Arc`.
//!
//! # Example
//!
//! ```
//! use basalt::error::ErrorSink;
//! use basalt::{Object, Runtime, RuntimeOptions};
//!
//! let rt = Runtime::new(RuntimeOptions::default()).unwrap();
//! let obj = Object::create(&rt, rt.object_class(), ErrorSink::ignore()).unwrap();
//! assert!(obj.is_a(rt.object_class()));
//! assert_eq!(obj.refcount(), 1);
//! ```

pub mod class;
pub mod interface;
pub mod object;
pub mod weakref;

pub use class::{AssignFn, Class, ClassDef, ClearFn, InitFn};
pub use interface::{InterfaceId, InterfaceSpec, InterfaceTable};
pub use object::{InstanceCore, InstanceGuard, InstanceHeader, InstanceRef, Object};
pub use weakref::WeakRef;

use crate::runtime::class::{ClassInner, MethodChain};
use basalt_mem::{Arena, MemError};
use fxhash::FxHashMap;
use std::alloc::Layout;
use std::collections::VecDeque;
use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

/// Default capacity of the instance-arena recycle ring.
pub const DEFAULT_RECYCLE_CAPACITY: usize = 16;

/// Construction parameters for a [`Runtime`].
pub struct RuntimeOptions {
    /// Arena for long-lived metadata. Supplying one keeps it alive past
    /// the runtime's shutdown; `None` creates a private arena that dies
    /// with the runtime.
    pub global_arena: Option<Arc<Arena>>,
    /// Template arena for per-instance arenas (its chunk size is
    /// inherited). Same ownership rule as `global_arena`.
    pub objects_arena: Option<Arc<Arena>>,
    /// Capacity of the recycle ring; zero disables recycling entirely.
    pub recycle_capacity: usize,
    /// Whether instances carry locks and registries expect cross-thread
    /// use. When false, all instance locking degrades to no-ops.
    pub threadsafe: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            global_arena: None,
            objects_arena: None,
            recycle_capacity: DEFAULT_RECYCLE_CAPACITY,
            threadsafe: true,
        }
    }
}

/// Bounded LIFO of cleared arenas awaiting reuse.
struct ArenaRing {
    slots: VecDeque<Arena>,
    capacity: usize,
}

pub(crate) struct RuntimeInner {
    pub(crate) threadsafe: bool,
    classes: RwLock<FxHashMap<String, Box<ClassInner>>>,
    interface_ids: RwLock<FxHashMap<String, u32>>,
    object_class: OnceLock<Class>,
    weakref_class: OnceLock<Class>,
    // Declaration order fixes teardown order: recycled arenas, then the
    // objects arena, then the global arena.
    ring: Mutex<ArenaRing>,
    objects: Arc<Arena>,
    global: Arc<Arena>,
}

impl RuntimeInner {
    /// Hands out a per-instance arena: the most recently recycled one when
    /// the ring has any, else a fresh subscope of the objects arena.
    pub(crate) fn acquire_object_arena(&self) -> Result<Arena, MemError> {
        {
            let mut ring = self.ring.lock().unwrap();
            if let Some(arena) = ring.slots.pop_back() {
                return Ok(arena);
            }
        }
        self.objects.subscope()
    }

    /// Takes an instance arena back: clears it in place and pushes it onto
    /// the ring, destroying the displaced oldest entry when the ring is
    /// full. With recycling disabled the arena is destroyed directly.
    pub(crate) fn release_object_arena(&self, mut arena: Arena) {
        arena.clear();
        let mut ring = self.ring.lock().unwrap();
        if ring.capacity == 0 {
            return; // arena dropped here
        }
        if ring.slots.len() == ring.capacity {
            let evicted = ring.slots.pop_front();
            drop(evicted);
        }
        ring.slots.push_back(arena);
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        let recycled = self.ring.get_mut().unwrap().slots.len();
        basalt_log::debug!("runtime shut down ({recycled} recycled arenas released)");
    }
}

/// Handle to a Basalt runtime. Cloning shares the same underlying state;
/// the state is torn down when the last handle goes away, counting the
/// back-links held by live instances.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Creates a runtime, adopting or creating its arenas per `options`.
    ///
    /// # Errors
    ///
    /// [`MemError`] if an arena had to be created and the system allocator
    /// failed.
    pub fn new(options: RuntimeOptions) -> Result<Runtime, MemError> {
        let global = match options.global_arena {
            Some(arena) => arena,
            None => Arc::new(Arena::with_default_chunk()?),
        };
        let objects = match options.objects_arena {
            Some(arena) => arena,
            None => Arc::new(Arena::new(global.chunk_size())?),
        };
        basalt_log::debug!(
            "runtime initialized (threadsafe: {}, recycle capacity: {})",
            options.threadsafe,
            options.recycle_capacity
        );
        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                threadsafe: options.threadsafe,
                classes: RwLock::new(FxHashMap::default()),
                interface_ids: RwLock::new(FxHashMap::default()),
                object_class: OnceLock::new(),
                weakref_class: OnceLock::new(),
                ring: Mutex::new(ArenaRing {
                    slots: VecDeque::with_capacity(options.recycle_capacity),
                    capacity: options.recycle_capacity,
                }),
                objects,
                global,
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Runtime {
        Runtime { inner }
    }

    /// Whether instances of this runtime carry locks.
    #[must_use]
    pub fn is_threadsafe(&self) -> bool {
        self.inner.threadsafe
    }

    /// The runtime's metadata arena.
    #[must_use]
    pub fn global_arena(&self) -> &Arc<Arena> {
        &self.inner.global
    }

    /// The root class every other class ultimately derives from.
    /// Registered lazily on first use.
    #[must_use]
    pub fn object_class(&self) -> Class {
        *self.inner.object_class.get_or_init(|| {
            let mut classes = self.inner.classes.write().unwrap();
            let name = self
                .inner
                .global
                .store_str("Object")
                .expect("global arena exhausted");
            let inner = Box::new(ClassInner {
                name,
                super_class: None,
                public_layout: Layout::new::<InstanceCore>(),
                private_layout: Layout::new::<InstanceHeader>(),
                init: MethodChain::new(),
                assign: MethodChain::new(),
                clear: MethodChain::new(),
                interfaces: None,
            });
            classes.insert("Object".to_owned(), inner);
            let slot = classes.get_mut("Object").unwrap();
            let ptr = NonNull::from(&mut **slot);
            slot.clear = slot.clear.extend(ptr, object::object_clear_step);
            basalt_log::debug!("registered class Object (root)");
            Class { ptr }
        })
    }

    /// The built-in weak-reference class. Registered lazily on first use.
    pub(crate) fn weakref_class(&self) -> Class {
        *self.inner.weakref_class.get_or_init(|| {
            self.register_class(&ClassDef {
                name: "WeakRef",
                super_class: self.object_class(),
                public_layout: Layout::new::<InstanceCore>(),
                private_layout: Layout::new::<weakref::WeakPrivate>(),
                init: None,
                assign: None,
                clear: Some(weakref::weakref_clear_step),
                interfaces: &[],
            })
        })
    }

    /// Registers a class, or returns the descriptor already registered
    /// under the same name.
    ///
    /// Safe for concurrent first use: the fast path is a shared-lock
    /// lookup, and registration double-checks under the write lock. The
    /// new descriptor starts as a copy of the superclass's (chains and
    /// interface table inherited), then each supplied step extends its
    /// chain and a non-empty interface list replaces the table.
    ///
    /// # Panics
    ///
    /// If a region layout does not cover the superclass's layout for that
    /// region, or if the global arena is exhausted.
    pub fn register_class(&self, def: &ClassDef<'_>) -> Class {
        {
            let classes = self.inner.classes.read().unwrap();
            if let Some(existing) = classes.get(def.name) {
                return Class { ptr: NonNull::from(&**existing) };
            }
        }

        let sup = def.super_class;
        let sup_inner = sup.inner();
        assert!(
            def.public_layout.size() >= sup_inner.public_layout.size()
                && def.public_layout.align() >= sup_inner.public_layout.align(),
            "{}: public region must cover the superclass region",
            def.name
        );
        assert!(
            def.private_layout.size() >= sup_inner.private_layout.size()
                && def.private_layout.align() >= sup_inner.private_layout.align(),
            "{}: private region must cover the superclass region",
            def.name
        );

        let mut classes = self.inner.classes.write().unwrap();
        if let Some(existing) = classes.get(def.name) {
            return Class { ptr: NonNull::from(&**existing) };
        }

        let name = self
            .inner
            .global
            .store_str(def.name)
            .expect("global arena exhausted");
        let inner = Box::new(ClassInner {
            name,
            super_class: Some(sup.ptr),
            public_layout: def.public_layout,
            private_layout: def.private_layout,
            init: sup_inner.init.clone(),
            assign: sup_inner.assign.clone(),
            clear: sup_inner.clear.clone(),
            interfaces: sup_inner.interfaces.clone(),
        });
        classes.insert(def.name.to_owned(), inner);
        let slot = classes.get_mut(def.name).unwrap();
        let ptr = NonNull::from(&mut **slot);
        if let Some(step) = def.init {
            slot.init = slot.init.extend(ptr, step);
        }
        if let Some(step) = def.assign {
            slot.assign = slot.assign.extend(ptr, step);
        }
        if let Some(step) = def.clear {
            slot.clear = slot.clear.extend(ptr, step);
        }
        if !def.interfaces.is_empty() {
            slot.interfaces = Some(self.build_interface_table(def.interfaces));
        }
        basalt_log::debug!("registered class {} (super: {})", def.name, sup.name());
        Class { ptr }
    }

    /// The id assigned to an interface name, allocating the next
    /// sequential id on first use. Ids are positive and stable for the
    /// runtime's lifetime; lookups after the first are shared-lock reads.
    #[must_use]
    pub fn interface_id(&self, name: &str) -> InterfaceId {
        {
            let ids = self.inner.interface_ids.read().unwrap();
            if let Some(&id) = ids.get(name) {
                return InterfaceId(id);
            }
        }
        let mut ids = self.inner.interface_ids.write().unwrap();
        if let Some(&id) = ids.get(name) {
            return InterfaceId(id);
        }
        let id = u32::try_from(ids.len()).expect("interface id space exhausted") + 1;
        ids.insert(name.to_owned(), id);
        basalt_log::trace!("interface {name:?} assigned id {id}");
        InterfaceId(id)
    }

    /// Resolves each spec's name to an id and packs the vtables into a
    /// sparse table sized `max id + 1`. `None` for an empty spec list.
    #[must_use]
    pub fn pack_interfaces(&self, specs: &[InterfaceSpec<'_>]) -> Option<InterfaceTable> {
        if specs.is_empty() {
            return None;
        }
        Some(self.build_interface_table(specs))
    }

    fn build_interface_table(&self, specs: &[InterfaceSpec<'_>]) -> InterfaceTable {
        let ids: Vec<InterfaceId> = specs.iter().map(|s| self.interface_id(s.name)).collect();
        let size = ids.iter().map(|id| id.index()).max().unwrap_or(0) + 1;
        let mut slots = vec![None; size].into_boxed_slice();
        for (spec, id) in specs.iter().zip(&ids) {
            slots[id.index()] = Some(spec.vtable);
        }
        InterfaceTable { slots }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classes = self.inner.classes.read().unwrap().len();
        let interfaces = self.inner.interface_ids.read().unwrap().len();
        f.debug_struct("Runtime")
            .field("threadsafe", &self.inner.threadsafe)
            .field("classes", &classes)
            .field("interfaces", &interfaces)
            .finish()
    }
}
