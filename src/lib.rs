//! # treealloc - A Best-Fit Heap Allocator Library
//!
//! This crate provides a classic **boundary-tag heap allocator** with a
//! size-ordered free tree, managing one contiguous arena that grows the
//! way a `sbrk`-based `malloc` does.
//!
//! ## Overview
//!
//! The arena is a single run of blocks bounded by a sentinel pair:
//!
//! ```text
//!   Arena Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                            ARENA                                     │
//!   │                                                                      │
//!   │   ┌─────┬──────────┬───────┬──────┬───────┬──────┬───────────────┐   │
//!   │   │ pad │ prologue │ block │ block│ block │ ...  │ epilogue hdr  │   │
//!   │   │ 4B  │ hdr+ftr  │ (a)   │ (f)  │ (a)   │      │ (size 0, a)   │   │
//!   │   └─────┴──────────┴───────┴──────┴───────┴──────┴───────────────┘   │
//!   │   ▲                                                             ▲    │
//!   │   │                                                             │    │
//!   │  Arena Base                                              Arena End   │
//!   │                                                    (grows on demand) │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Every block carries a header and a footer tag, so both physical
//!   neighbors are reachable in O(1) and freed blocks merge eagerly.
//! ```
//!
//! Each block packs its size and allocation state into the tags; free
//! blocks reuse their payload as a search-tree node:
//!
//! ```text
//!   Allocated Block:                    Free Block:
//!   ┌────────┬───────────────┬────────┐ ┌────────┬──────┬───────┬──────┬────────┐
//!   │ header │    payload    │ footer │ │ header │ left │ right │ ...  │ footer │
//!   │ size|a │ (user bytes)  │ size|a │ │ size|f │ link │ link  │      │ size|f │
//!   └────────┴───────────────┴────────┘ └────────┴──────┴───────┴──────┴────────┘
//!            ▲                                   ▲
//!            └── pointer returned to user        └── tree node, keyed by size
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   treealloc
//!   ├── align      - Alignment macro (align!) and the double-word constant
//!   ├── tag        - Boundary tags and block addressing (internal)
//!   ├── tree       - Intrusive best-fit free tree (internal)
//!   ├── grow       - ArenaGrower trait, SbrkGrower, FixedArena
//!   └── heap       - Heap: allocate / free / reallocate / check_heap
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use treealloc::{FixedArena, Heap};
//!
//! let mut heap = Heap::new(FixedArena::with_capacity(64 * 1024)).unwrap();
//!
//! unsafe {
//!     // Allocate memory for a u64
//!     let ptr = heap.allocate(size_of::<u64>()) as *mut u64;
//!
//!     // Use the memory
//!     *ptr = 42;
//!     assert_eq!(*ptr, 42);
//!
//!     // Free the memory
//!     heap.free(ptr as *mut u8);
//! }
//! ```
//!
//! ## How It Works
//!
//! - **Allocation** rounds the request up to a double word plus tag
//!   overhead, then takes the smallest free block that fits (a ceiling
//!   search in the tree). Oversized blocks are split; which side of the
//!   split is handed out depends on the neighbors, so remainders pool
//!   next to the larger one. When nothing fits the arena grows by at
//!   least [`CHUNK_SIZE`] bytes.
//! - **Freeing** merges the block with any free physical neighbor via
//!   the boundary tags, then indexes the result in the tree.
//! - **Reallocation** prefers growing in place, absorbing a free
//!   successor or extending the arena when the block sits at its end,
//!   and only falls back to allocate-copy-free.
//!
//! The free tree is a plain binary search tree embedded in the free
//! blocks themselves, so the index costs no memory beyond the arena.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Grow-only arena**: Memory is never returned to the source
//! - **Unbalanced tree**: Degenerate free-size patterns degrade the
//!   fit search to linear time
//! - **`SbrkGrower` is Unix-only**: Requires `libc` and `sbrk`; the
//!   heap itself runs anywhere via [`FixedArena`]
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory
//! management. All allocation and deallocation operations require
//! `unsafe` blocks.

pub mod align;
mod grow;
mod heap;
mod tag;
mod tree;

pub use grow::{ArenaGrower, FixedArena, SbrkGrower};
pub use heap::{CHUNK_SIZE, Heap, HeapError};
