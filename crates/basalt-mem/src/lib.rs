//! Arena allocation for the Basalt object runtime.
//!
//! Every Basalt instance lives in its own [`Arena`]: a small chunked bump
//! allocator that can be cleared in place and handed back to the runtime for
//! reuse. The runtime's shared metadata (class names) lives in a long-lived
//! arena of the same type.
//!
//! Arenas never free individual allocations. Memory is reclaimed either by
//! [`Arena::clear`] (reset in place, keeping the first chunk warm) or by
//! dropping the arena.
//!
//! # Example
//!
//! ```
//! use basalt_mem::Arena;
//! use std::alloc::Layout;
//!
//! let arena = Arena::with_default_chunk().unwrap();
//! let p = arena.alloc_zeroed(Layout::new::<u64>()).unwrap();
//! unsafe { assert_eq!(*p.as_ptr().cast::<u64>(), 0) };
//! ```

mod arena;

pub use arena::{Arena, ArenaStr, DEFAULT_CHUNK_SIZE, MemError};

/// Result type for arena operations.
pub type Result<T> = std::result::Result<T, MemError>;
