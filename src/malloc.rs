use std::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull},
};

use spin::Mutex;

use crate::{
  align::{self, ALIGNMENT},
  block::{BlockInfo, Header},
  brk::HeapBreak,
  chain::Chain,
  error::{AllocError, HeapError},
};

/// A first-fit free-list allocator over a single growable heap.
///
/// Every public operation takes one lock around the whole chain and the
/// break, so calls behave as if they ran one after another. `resize` and
/// `zeroed_allocate` take it once per inner `allocate`/`release`, never
/// across two of them.
///
/// Freed blocks are reused as they are: they are neither split nor merged
/// with their neighbours. Only a freed tail block is returned to the break.
pub struct Malloc<B: HeapBreak> {
  chain: Mutex<Chain<B>>,
}

impl<B: HeapBreak> Malloc<B> {
  pub const fn new(brk: B) -> Self {
    Self {
      chain: Mutex::new(Chain::new(brk)),
    }
  }

  /// Returns `size` bytes of uninitialized memory aligned to [`ALIGNMENT`],
  /// or `None` for a zero-sized request or when the heap cannot grow.
  pub fn allocate(
    &self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    self.try_allocate(size).ok()
  }

  /// [`allocate`](Self::allocate), reporting why nothing was returned.
  pub fn try_allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if size == 0 {
      adebug!("Rejected zero-sized allocation");
      return Err(AllocError::ZeroSize);
    }
    let size = align::checked_align(size).ok_or(HeapError::Exhausted { requested: size })?;

    let mut chain = self.chain.lock();

    let free = chain.find_free(size);
    if !free.is_null() {
      let held = unsafe {
        (*free).is_free = false;
        (*free).size
      };
      drop(chain);

      atrace!("Reusing block {:p} ({} bytes) for {} bytes", free, held, size);
      return Ok(unsafe { Header::payload(free) });
    }

    let grown = chain.grow(size);
    drop(chain);

    match grown {
      Ok(header) => {
        atrace!("Grew heap for block {:p} ({} bytes)", header, size);
        Ok(unsafe { Header::payload(header) })
      }
      Err(err) => {
        awarn!("Cannot allocate {} bytes: {}", size, err);
        Err(err.into())
      }
    }
  }

  /// Returns `count * element_size` zeroed bytes, or `None` if either factor
  /// is zero, the product overflows, or the heap cannot grow.
  pub fn zeroed_allocate(
    &self,
    count: usize,
    element_size: usize,
  ) -> Option<NonNull<u8>> {
    self.try_zeroed_allocate(count, element_size).ok()
  }

  /// [`zeroed_allocate`](Self::zeroed_allocate), reporting why nothing was
  /// returned.
  pub fn try_zeroed_allocate(
    &self,
    count: usize,
    element_size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if count == 0 || element_size == 0 {
      adebug!("Rejected zeroed allocation of {} x {}", count, element_size);
      return Err(AllocError::ZeroSize);
    }
    let size = count.checked_mul(element_size).ok_or_else(|| {
      adebug!("Rejected zeroed allocation of {} x {}: overflow", count, element_size);
      AllocError::Overflow {
        count,
        element_size,
      }
    })?;

    let payload = self.try_allocate(size)?;
    unsafe { ptr::write_bytes(payload.as_ptr(), 0, size) };
    Ok(payload)
  }

  /// Grows the block at `ptr` to hold `new_size` bytes.
  ///
  /// - `ptr == None` behaves as [`allocate(new_size)`](Self::allocate).
  /// - `new_size == 0` returns `None` **without releasing `ptr`**; the caller
  ///   still owns it and must release it separately.
  /// - If the block already holds `new_size` bytes, `ptr` is returned as is
  ///   and its recorded size is unchanged.
  /// - Otherwise the contents move to a new block and `ptr` is released. If
  ///   that new block cannot be allocated, `None` is returned and `ptr` is
  ///   left untouched.
  ///
  /// # Safety
  ///
  /// A `Some` pointer must have been returned by this allocator and not
  /// released yet.
  pub unsafe fn resize(
    &self,
    ptr: Option<NonNull<u8>>,
    new_size: usize,
  ) -> Option<NonNull<u8>> {
    let Some(ptr) = ptr else {
      return self.allocate(new_size);
    };
    if new_size == 0 {
      return self.allocate(0);
    }

    let old_size = unsafe { self.usable_size(ptr) };
    if old_size >= new_size {
      return Some(ptr);
    }

    let moved = self.allocate(new_size)?;
    unsafe {
      ptr::copy_nonoverlapping(ptr.as_ptr(), moved.as_ptr(), old_size.min(new_size));
      self.release(Some(ptr));
    }
    Some(moved)
  }

  /// Returns the block at `ptr` to the allocator. `None` is a no-op.
  ///
  /// If the block is the last one before the break, the break is moved back
  /// over it. Otherwise it is marked free and stays in the chain for reuse.
  ///
  /// # Safety
  ///
  /// A `Some` pointer must have been returned by this allocator and not
  /// released yet. Releasing anything else, or releasing twice, is
  /// undefined behavior and is not detected.
  pub unsafe fn release(
    &self,
    ptr: Option<NonNull<u8>>,
  ) {
    let Some(ptr) = ptr else {
      return;
    };

    let mut chain = self.chain.lock();

    let header = unsafe { Header::from_payload(ptr) };
    let (size, reclaimed) = unsafe {
      debug_assert!(!(*header).is_free, "double release of {ptr:p}");
      let size = (*header).size;

      if chain.ends_heap(header) {
        (size, Some(chain.reclaim_tail(header)))
      } else {
        (*header).is_free = true;
        (size, None)
      }
    };
    drop(chain);

    // The header may lie past the break by now; only the copies are read.
    match reclaimed {
      Some(Ok(())) => atrace!("Returned block {:p} ({} bytes) to the break", header, size),
      Some(Err(err)) => awarn!("Kept block {:p} as free: {}", header, err),
      None => atrace!("Marked block {:p} ({} bytes) free", header, size),
    }
  }

  /// Payload size recorded for the block at `ptr`; at least what was asked
  /// for, rounded up to [`ALIGNMENT`].
  ///
  /// # Safety
  ///
  /// `ptr` must have been returned by this allocator and not released yet.
  pub unsafe fn usable_size(
    &self,
    ptr: NonNull<u8>,
  ) -> usize {
    let _chain = self.chain.lock();
    unsafe { (*Header::from_payload(ptr)).size }
  }

  /// Number of blocks in the chain, free or not.
  pub fn block_count(&self) -> usize {
    self.chain.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.block_count() == 0
  }

  /// The current break of the backing heap.
  pub fn break_address(&self) -> *mut u8 {
    self.chain.lock().brk().current()
  }

  /// A consistent snapshot of every block, head first.
  ///
  /// The result is reserved before the lock is taken, so this is safe to
  /// call on the instance installed as the global allocator.
  pub fn dump_state(&self) -> Vec<BlockInfo> {
    let mut blocks = Vec::new();

    loop {
      blocks.reserve(self.block_count());

      let chain = self.chain.lock();
      if chain.len() <= blocks.capacity() {
        blocks.extend(chain.blocks());
        return blocks;
      }
    }
  }

  /// Logs the head, the tail and every block at info level.
  pub fn print_state(&self) {
    let blocks = self.dump_state();
    let head = blocks.first().map_or(0, |block| block.address);
    let tail = blocks.last().map_or(0, |block| block.address);

    ainfo!("head = {:#x}, tail = {:#x}", head, tail);
    for block in &blocks {
      ainfo!("{}", block);
    }
  }

  /// Runs `f` on the backend while holding the lock.
  pub fn with_break<R>(
    &self,
    f: impl FnOnce(&B) -> R,
  ) -> R {
    f(self.chain.lock().brk())
  }
}

unsafe impl<B: HeapBreak> GlobalAlloc for Malloc<B> {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      adebug!("Rejected layout aligned to {}", layout.align());
      return ptr::null_mut();
    }
    self.allocate(layout.size()).map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      adebug!("Rejected layout aligned to {}", layout.align());
      return ptr::null_mut();
    }
    self
      .zeroed_allocate(1, layout.size())
      .map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    unsafe { self.release(NonNull::new(ptr)) }
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }
    unsafe { self.resize(NonNull::new(ptr), new_size) }
      .map_or(ptr::null_mut(), NonNull::as_ptr)
  }
}
