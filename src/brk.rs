//! Backends that own the heap break.
//!
//! A [`HeapBreak`] is a contiguous region that grows and shrinks at one end,
//! the way `brk(2)`/`sbrk(2)` move the program break:
//!
//! ```text
//!   base                                  current()
//!   ├──────────────── in use ─────────────┤
//!                                         ├── grow(n) ──┤
//!                          ├── shrink(n) ─┤
//! ```

use std::{
  alloc::{self, Layout},
  fmt,
  ptr::NonNull,
};

use libc::{c_void, intptr_t, sbrk};

use crate::{
  align::{self, ALIGNMENT},
  error::HeapError,
};

/// A heap that is extended and retracted at its break.
///
/// # Safety
///
/// Implementors must guarantee that the region returned by
/// [`grow`](HeapBreak::grow) is valid for reads and writes of `increment`
/// bytes, ends exactly at the new [`current`](HeapBreak::current) break, and
/// is not handed to anyone else until it is given back with
/// [`shrink`](HeapBreak::shrink). As long as every increment is a multiple
/// of [`ALIGNMENT`], every region returned must be aligned to it.
pub unsafe trait HeapBreak {
  /// The current break: one past the last byte in use.
  fn current(&self) -> *mut u8;

  /// Moves the break forward by exactly `increment` bytes and returns the
  /// start of the new region.
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, HeapError>;

  /// Moves the break back by exactly `decrement` bytes.
  fn shrink(
    &mut self,
    decrement: usize,
  ) -> Result<(), HeapError>;
}

/// The process data segment, moved with `sbrk(2)`.
///
/// Assumes nothing else in the process moves the break while an allocation
/// is in flight. If the break is not aligned, the first growth pads it
/// forward; that padding is never retracted.
#[derive(Debug, Default, Clone, Copy)]
pub struct SbrkHeap;

impl SbrkHeap {
  pub const fn new() -> Self {
    Self
  }
}

const SBRK_FAILED: *mut c_void = usize::MAX as *mut c_void;

unsafe impl HeapBreak for SbrkHeap {
  fn current(&self) -> *mut u8 {
    unsafe { sbrk(0) }.cast()
  }

  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, HeapError> {
    let exhausted = HeapError::Exhausted {
      requested: increment,
    };

    let brk = self.current() as usize;
    let padding = align::padding_for(brk);
    let total = increment
      .checked_add(padding)
      .and_then(|total| intptr_t::try_from(total).ok())
      .ok_or(exhausted)?;

    let previous = unsafe { sbrk(total) };
    if previous == SBRK_FAILED {
      return Err(exhausted);
    }

    let start = unsafe { previous.cast::<u8>().add(padding) };
    NonNull::new(start).ok_or(exhausted)
  }

  fn shrink(
    &mut self,
    decrement: usize,
  ) -> Result<(), HeapError> {
    let underflow = HeapError::Underflow {
      requested: decrement,
    };

    let decrement = intptr_t::try_from(decrement).map_err(|_| underflow)?;
    if unsafe { sbrk(-decrement) } == SBRK_FAILED {
      return Err(underflow);
    }
    Ok(())
  }
}

/// A fixed-capacity region with its own break, carved out of the system
/// allocator once and returned to it on drop.
///
/// Each arena is independent, so several allocators can coexist in one
/// process and their break movements can be observed exactly.
pub struct ArenaHeap {
  base: NonNull<u8>,
  capacity: usize,
  used: usize,
}

// The arena exclusively owns its buffer.
unsafe impl Send for ArenaHeap {}

impl ArenaHeap {
  /// Reserves `capacity` bytes aligned to [`ALIGNMENT`].
  ///
  /// # Panics
  ///
  /// Panics if `capacity` rounded up to [`ALIGNMENT`] overflows `isize`, and
  /// aborts through [`alloc::handle_alloc_error`] if the system allocator
  /// cannot provide the buffer.
  pub fn new(capacity: usize) -> Self {
    let layout = Self::layout(capacity);
    let base = NonNull::new(unsafe { alloc::alloc(layout) })
      .unwrap_or_else(|| alloc::handle_alloc_error(layout));

    Self {
      base,
      capacity,
      used: 0,
    }
  }

  fn layout(capacity: usize) -> Layout {
    Layout::from_size_align(capacity.max(ALIGNMENT), ALIGNMENT)
      .expect("arena capacity overflows isize")
  }

  pub fn base(&self) -> *mut u8 {
    self.base.as_ptr()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes between the base and the break.
  pub fn used(&self) -> usize {
    self.used
  }

  /// Whether `address` lies below the break.
  pub fn contains(
    &self,
    address: usize,
  ) -> bool {
    let base = self.base.as_ptr() as usize;
    address >= base && address < base + self.used
  }
}

unsafe impl HeapBreak for ArenaHeap {
  fn current(&self) -> *mut u8 {
    unsafe { self.base.as_ptr().add(self.used) }
  }

  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, HeapError> {
    let used = self
      .used
      .checked_add(increment)
      .filter(|&used| used <= self.capacity)
      .ok_or(HeapError::Exhausted {
        requested: increment,
      })?;

    let start = unsafe { NonNull::new_unchecked(self.current()) };
    self.used = used;
    Ok(start)
  }

  fn shrink(
    &mut self,
    decrement: usize,
  ) -> Result<(), HeapError> {
    self.used = self
      .used
      .checked_sub(decrement)
      .ok_or(HeapError::Underflow {
        requested: decrement,
      })?;
    Ok(())
  }
}

impl Drop for ArenaHeap {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), Self::layout(self.capacity)) };
  }
}

impl fmt::Debug for ArenaHeap {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("ArenaHeap")
      .field("base", &self.base)
      .field("capacity", &self.capacity)
      .field("used", &self.used)
      .finish()
  }
}
