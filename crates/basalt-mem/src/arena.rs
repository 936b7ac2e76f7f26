//! Chunked bump arena.
//!
//! An [`Arena`] owns a list of fixed-size chunks obtained from the system
//! allocator and serves allocations by bumping a cursor through the current
//! chunk. Allocation is cheap, pointers are stable for the arena's lifetime,
//! and nothing is freed until the arena is cleared or dropped.
//!
//! The chunk list sits behind a mutex. Arenas used for per-instance storage
//! have a single owner, and the shared metadata arena is touched under the
//! runtime's registry locks, so the mutex is effectively uncontended.

use crate::Result;
use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Mutex;

/// Default chunk size for new arenas (one page).
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Base alignment of every chunk. Allocations with stricter alignment pay
/// for the extra padding themselves.
const CHUNK_ALIGN: usize = 16;

/// Failures raised by arena operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// The system allocator refused a chunk of the given size.
    ChunkAllocationFailed {
        /// The requested chunk size in bytes.
        size: usize,
    },
    /// A requested chunk size was zero or otherwise unusable.
    InvalidChunkSize {
        /// The offending size.
        size: usize,
    },
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemError::ChunkAllocationFailed { size } => {
                write!(f, "failed to allocate arena chunk of {size} bytes")
            }
            MemError::InvalidChunkSize { size } => {
                write!(f, "invalid arena chunk size: {size}")
            }
        }
    }
}

impl std::error::Error for MemError {}

/// One system allocation, bump-allocated front to back.
struct Chunk {
    start: NonNull<u8>,
    /// Bytes handed out so far.
    used: usize,
    capacity: usize,
}

// SAFETY: a Chunk exclusively owns its allocation; the raw pointer is never
// shared outside the owning arena's lock.
unsafe impl Send for Chunk {}

impl Chunk {
    fn new(capacity: usize) -> Result<Chunk> {
        if capacity == 0 {
            return Err(MemError::InvalidChunkSize { size: capacity });
        }
        // SAFETY: capacity is non-zero and CHUNK_ALIGN is a power of two.
        let layout = unsafe { Layout::from_size_align_unchecked(capacity, CHUNK_ALIGN) };
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        let start =
            NonNull::new(raw).ok_or(MemError::ChunkAllocationFailed { size: capacity })?;
        Ok(Chunk { start, used: 0, capacity })
    }

    /// Bumps the cursor for `layout`, or returns `None` if the chunk is full.
    fn try_alloc(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let base = self.start.as_ptr().addr();
        let cursor = base + self.used;
        let aligned = cursor.checked_add(layout.align() - 1)? & !(layout.align() - 1);
        let end = aligned.checked_add(layout.size())?;
        if end > base + self.capacity {
            return None;
        }
        self.used = end - base;
        // SAFETY: aligned - base is within the chunk's allocation, checked
        // above; the resulting pointer keeps the chunk's provenance.
        let ptr = unsafe { self.start.as_ptr().add(aligned - base) };
        // SAFETY: derived from a NonNull base by an in-bounds offset.
        Some(unsafe { NonNull::new_unchecked(ptr) })
    }

    fn reset(&mut self) {
        self.used = 0;
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: start was produced by alloc::alloc with exactly this layout.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.capacity, CHUNK_ALIGN);
            alloc::dealloc(self.start.as_ptr(), layout);
        }
    }
}

/// A chunked bump allocator.
///
/// Pointers returned by the allocation methods remain valid until the arena
/// is cleared or dropped; the caller is responsible for not using them past
/// that point.
pub struct Arena {
    chunks: Mutex<Vec<Chunk>>,
    chunk_size: usize,
}

impl Arena {
    /// Creates an arena and eagerly allocates its first chunk, so that
    /// allocation failure surfaces here rather than at first use.
    ///
    /// # Errors
    ///
    /// [`MemError::InvalidChunkSize`] for a zero `chunk_size`, or
    /// [`MemError::ChunkAllocationFailed`] if the system allocator fails.
    pub fn new(chunk_size: usize) -> Result<Arena> {
        let first = Chunk::new(chunk_size)?;
        Ok(Arena {
            chunks: Mutex::new(vec![first]),
            chunk_size,
        })
    }

    /// Creates an arena with [`DEFAULT_CHUNK_SIZE`] chunks.
    ///
    /// # Errors
    ///
    /// [`MemError::ChunkAllocationFailed`] if the system allocator fails.
    pub fn with_default_chunk() -> Result<Arena> {
        Arena::new(DEFAULT_CHUNK_SIZE)
    }

    /// Creates a fresh arena configured like this one.
    ///
    /// Only configuration is inherited: the new arena owns its own chunks
    /// and its lifetime is independent of `self`.
    ///
    /// # Errors
    ///
    /// [`MemError::ChunkAllocationFailed`] if the system allocator fails.
    pub fn subscope(&self) -> Result<Arena> {
        Arena::new(self.chunk_size)
    }

    /// Returns the configured chunk size.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Allocates uninitialized memory for `layout`.
    ///
    /// # Errors
    ///
    /// [`MemError::ChunkAllocationFailed`] if a new chunk is needed and the
    /// system allocator fails.
    pub fn alloc(&self, layout: Layout) -> Result<NonNull<u8>> {
        let mut chunks = self.chunks.lock().unwrap();
        if let Some(ptr) = chunks.last_mut().and_then(|c| c.try_alloc(layout)) {
            return Ok(ptr);
        }
        // Oversized requests get a dedicated chunk; everything else grows by
        // one standard chunk.
        let needed = layout.size() + layout.align();
        let capacity = needed.max(self.chunk_size);
        let mut chunk = Chunk::new(capacity)?;
        let ptr = chunk
            .try_alloc(layout)
            .ok_or(MemError::ChunkAllocationFailed { size: capacity })?;
        chunks.push(chunk);
        Ok(ptr)
    }

    /// Allocates zero-filled memory for `layout`.
    ///
    /// # Errors
    ///
    /// See [`Arena::alloc`].
    pub fn alloc_zeroed(&self, layout: Layout) -> Result<NonNull<u8>> {
        let ptr = self.alloc(layout)?;
        // SAFETY: ptr points to at least layout.size() writable bytes.
        unsafe { ptr.as_ptr().write_bytes(0, layout.size()) };
        Ok(ptr)
    }

    /// Copies `s` into the arena and returns a handle to the stored bytes.
    ///
    /// # Errors
    ///
    /// See [`Arena::alloc`].
    pub fn store_str(&self, s: &str) -> Result<ArenaStr> {
        if s.is_empty() {
            return Ok(ArenaStr { ptr: NonNull::dangling(), len: 0 });
        }
        // SAFETY: s.len() is non-zero here and align 1 is trivially valid.
        let layout = unsafe { Layout::from_size_align_unchecked(s.len(), 1) };
        let ptr = self.alloc(layout)?;
        // SAFETY: disjoint buffers; ptr has s.len() writable bytes.
        unsafe { ptr.as_ptr().copy_from_nonoverlapping(s.as_ptr(), s.len()) };
        Ok(ArenaStr { ptr, len: s.len() })
    }

    /// Releases every allocation while keeping the arena alive: the first
    /// chunk is reset for reuse and any overflow chunks are returned to the
    /// system.
    ///
    /// Requires exclusive access, which guarantees no outstanding borrows of
    /// arena memory can be held by safe code.
    pub fn clear(&mut self) {
        let chunks = self.chunks.get_mut().unwrap();
        chunks.truncate(1);
        if let Some(first) = chunks.first_mut() {
            first.reset();
        }
    }

    /// Total bytes currently handed out across all chunks.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.chunks.lock().unwrap().iter().map(|c| c.used).sum()
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("chunk_size", &self.chunk_size)
            .field("allocated_bytes", &self.allocated_bytes())
            .finish()
    }
}

/// An immutable string stored in an arena.
///
/// The handle is a raw view: it does not keep the arena alive. Callers must
/// only read it while the owning arena exists and has not been cleared.
#[derive(Clone, Copy)]
pub struct ArenaStr {
    ptr: NonNull<u8>,
    len: usize,
}

impl ArenaStr {
    /// Reborrows the stored bytes as `&str`.
    ///
    /// # Safety
    ///
    /// The arena that produced this handle must still be alive and must not
    /// have been cleared since.
    #[must_use]
    pub unsafe fn as_str<'a>(&self) -> &'a str {
        if self.len == 0 {
            return "";
        }
        // SAFETY: per the caller's contract the bytes are live, and they
        // were copied verbatim from a &str.
        unsafe {
            let bytes = std::slice::from_raw_parts(self.ptr.as_ptr(), self.len);
            std::str::from_utf8_unchecked(bytes)
        }
    }

    /// Length of the stored string in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// SAFETY: ArenaStr is an immutable view of bytes that are never written
// again; sharing it across threads is no different from sharing &str.
unsafe impl Send for ArenaStr {}
unsafe impl Sync for ArenaStr {}

impl fmt::Debug for ArenaStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SAFETY: debug-formatting a handle is only meaningful while the
        // arena is live; same contract as as_str.
        write!(f, "{:?}", unsafe { self.as_str() })
    }
}
