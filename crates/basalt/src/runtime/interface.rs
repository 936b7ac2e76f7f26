//! Interface dispatch: named capabilities resolved through sparse vtables.
//!
//! An interface is a name plus a vtable struct of plain function pointers.
//! A class that implements an interface supplies one `'static` vtable
//! record per interface name at definition time; the runtime assigns each
//! name a small stable id and packs the records into a sparse table indexed
//! by id. Callers reach an implementation only through lookup; absence is
//! a normal "not implemented" outcome, never an error.
//!
//! The id registry lives in the runtime (written once per name, read
//! thereafter), so repeated by-name lookups are cheap and call sites never
//! need their own caches.
//!
//! # Wrapper convention
//!
//! A capability accessor wraps lookup and a documented default:
//!
//! ```ignore
//! pub struct Describe {
//!     pub describe: fn(InstanceRef) -> i64,
//! }
//!
//! pub fn describe(obj: &Object) -> i64 {
//!     match obj.vtable_by_name::<Describe>("Describe") {
//!         Some(vt) => (vt.describe)(obj.view()),
//!         None => 0, // documented default
//!     }
//! }
//! ```

use crate::runtime::object::Object;
use std::any::Any;
use std::fmt;

/// Identifier assigned to an interface name by a runtime.
///
/// Positive, sequential from 1, and stable for the lifetime of the runtime
/// that assigned it. Ids from different runtimes are not interchangeable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct InterfaceId(pub(crate) u32);

impl InterfaceId {
    /// The raw id value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One (interface name, vtable) pair supplied by a class definition.
///
/// The vtable is any `'static` struct of function pointers; lookups
/// downcast it back to the concrete type.
pub struct InterfaceSpec<'a> {
    /// The implemented interface's name.
    pub name: &'a str,
    /// The implementation record.
    pub vtable: &'static (dyn Any + Send + Sync),
}

/// Sparse table of vtables, indexed by interface id. Slot 0 is never used;
/// ids start at 1.
pub struct InterfaceTable {
    pub(crate) slots: Box<[Option<&'static (dyn Any + Send + Sync)>]>,
}

impl InterfaceTable {
    /// The vtable stored for `id`, if the table has one.
    #[must_use]
    pub fn get(&self, id: InterfaceId) -> Option<&'static (dyn Any + Send + Sync)> {
        self.slots.get(id.index()).copied().flatten()
    }
}

impl Clone for InterfaceTable {
    fn clone(&self) -> Self {
        InterfaceTable { slots: self.slots.clone() }
    }
}

impl fmt::Debug for InterfaceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let implemented: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|_| i))
            .collect();
        f.debug_struct("InterfaceTable").field("ids", &implemented).finish()
    }
}

impl Object {
    /// The type-erased vtable the instance's class registered for `id`,
    /// or `None` if the interface is not implemented.
    #[must_use]
    pub fn implementation(&self, id: InterfaceId) -> Option<&'static (dyn Any + Send + Sync)> {
        self.class().inner().interfaces.as_ref()?.get(id)
    }

    /// The vtable for `id`, downcast to its concrete record type.
    ///
    /// `None` if the interface is not implemented or was registered with a
    /// different record type.
    #[must_use]
    pub fn vtable<V: Any>(&self, id: InterfaceId) -> Option<&'static V> {
        self.implementation(id)?.downcast_ref::<V>()
    }

    /// Like [`Object::vtable`], resolving the name through the instance's
    /// runtime first.
    #[must_use]
    pub fn vtable_by_name<V: Any>(&self, name: &str) -> Option<&'static V> {
        let id = self.runtime().interface_id(name);
        self.vtable(id)
    }
}
