//! # brkalloc - A Free-List Allocator on the Program Break
//!
//! This crate provides a **first-fit free-list allocator** that carves every
//! block out of a single growable heap and gives the last block back when it
//! is released.
//!
//! ## Overview
//!
//! ```text
//!   Heap Chain:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         HEAP MEMORY                                  │
//!   │                                                                      │
//!   │   ┌────┬──────┬────┬──────┬────┬──────┐                              │
//!   │   │ H1 │  A1  │ H2 │ free │ H3 │  A3  │                              │
//!   │   └────┴──────┴────┴──────┴────┴──────┘                              │
//!   │    │ ▲         │ ▲         ▲          ▲                              │
//!   │    └─┼─ next ──┘ └─ next ──┘          │                              │
//!   │    head                    tail    Program                           │
//!   │                                     Break                            │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   allocate: first free block that is large enough, else grow the break.
//!   release:  the tail gives its bytes back to the break, any other block
//!             is only marked free.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── align      - ALIGNMENT and the align! macro
//!   ├── block      - Header stored before every payload, BlockInfo
//!   ├── brk        - HeapBreak backends: SbrkHeap, ArenaHeap
//!   ├── chain      - head/tail list of blocks (internal)
//!   ├── error      - AllocError, HeapError
//!   └── malloc     - Malloc: locking, public operations, GlobalAlloc
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brkalloc::{ArenaHeap, Malloc};
//!
//! let malloc = Malloc::new(ArenaHeap::new(4096));
//!
//! let ptr = malloc.allocate(8).unwrap();
//! unsafe {
//!     ptr.cast::<u64>().write(42);
//!     let ptr = malloc.resize(Some(ptr), 64).unwrap();
//!     assert_eq!(ptr.cast::<u64>().read(), 42);
//!     malloc.release(Some(ptr));
//! }
//!
//! // The first block was left behind as free, the second one was trimmed.
//! assert!(malloc.dump_state().iter().all(|block| block.is_free));
//! ```
//!
//! As the process allocator:
//!
//! ```rust,ignore
//! use brkalloc::{Malloc, SbrkHeap};
//!
//! #[global_allocator]
//! static ALLOCATOR: Malloc<SbrkHeap> = Malloc::new(SbrkHeap::new());
//! ```
//!
//! ## How It Works
//!
//! Each block is a header followed by its payload, in one region of the heap:
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ is_free: false  │  │  │                          │  │
//!   │  │ next: null/ptr  │  │  │     N bytes usable       │  │
//!   │  └─────────────────┘  │  │                          │  │
//!   │   HEADER_SIZE bytes   │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user (16-byte aligned)
//! ```
//!
//! Requested sizes are rounded up to [`ALIGNMENT`], so every header that
//! follows is aligned as well.
//!
//! ## Limitations
//!
//! - **One lock**: every operation serializes on a single spin lock.
//! - **No splitting or coalescing**: a reused block keeps its full size, and
//!   neighbouring free blocks stay separate.
//! - **Only the tail is trimmed**: free blocks in the middle of the heap are
//!   kept for reuse, never returned.
//! - **Alignment up to 16**: over-aligned layouts are refused.
//!
//! ## Safety
//!
//! Releasing or resizing a pointer that did not come from the same allocator,
//! releasing it twice, or writing outside its payload is undefined behavior
//! and is not detected. [`SbrkHeap`] assumes nothing else in the process moves
//! the program break concurrently.

use std::sync::atomic::{AtomicBool, Ordering};

#[macro_use]
mod alog;

pub mod align;
mod block;
mod brk;
mod chain;
mod error;
mod malloc;


pub use align::ALIGNMENT;
pub use block::{BlockInfo, HEADER_SIZE};
pub use brk::{ArenaHeap, HeapBreak, SbrkHeap};
pub use error::{AllocError, HeapError};
pub use malloc::Malloc;

static ALLOC_LOG: AtomicBool = AtomicBool::new(false);

/// Enables logging through the `log` facade. Off by default.
///
/// Records are emitted only after the allocator's lock is released, so a
/// logger may call back into the same allocator, including the one installed
/// as the global allocator.
pub fn enable_logging() {
  ALLOC_LOG.store(true, Ordering::Relaxed);
}

/// Disables logging for the allocator
pub fn disable_logging() {
  ALLOC_LOG.store(false, Ordering::Relaxed);
}

pub(crate) fn should_log() -> bool {
  ALLOC_LOG.load(Ordering::Relaxed)
}
