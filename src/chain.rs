use std::ptr::{self, NonNull};

use crate::{
  block::{BlockInfo, HEADER_SIZE, Header},
  brk::HeapBreak,
  error::HeapError,
};

/// The singly linked list of every block in the heap, in address order,
/// together with the break it was carved from.
///
/// Growth always appends at the break, so `tail` is the block that ends at
/// the break for as long as nobody else moves it.
pub(crate) struct Chain<B> {
  head: *mut Header,
  tail: *mut Header,
  len: usize,
  brk: B,
}

// Headers are only reached through the chain, and the chain is only reached
// through the allocator's lock.
unsafe impl<B: Send> Send for Chain<B> {}

impl<B: HeapBreak> Chain<B> {
  pub const fn new(brk: B) -> Self {
    Self {
      head: ptr::null_mut(),
      tail: ptr::null_mut(),
      len: 0,
      brk,
    }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn brk(&self) -> &B {
    &self.brk
  }

  /// First block in address order that is free and holds at least `size`
  /// bytes, or null.
  pub fn find_free(
    &self,
    size: usize,
  ) -> *mut Header {
    unsafe {
      let mut current = self.head;

      while !current.is_null() {
        if (*current).is_free && (*current).size >= size {
          return current;
        }
        current = (*current).next;
      }

      ptr::null_mut()
    }
  }

  /// Extends the break by a header plus `size` bytes and appends an in-use
  /// block there. The chain is untouched if the break cannot move.
  pub fn grow(
    &mut self,
    size: usize,
  ) -> Result<*mut Header, HeapError> {
    let total = size.checked_add(HEADER_SIZE).ok_or(HeapError::Exhausted {
      requested: size,
    })?;

    let address = self.brk.grow(total)?;
    let header = unsafe { Header::init(address, size) };

    unsafe { self.append(header) };
    Ok(header)
  }

  unsafe fn append(
    &mut self,
    header: *mut Header,
  ) {
    if self.head.is_null() {
      self.head = header;
    }
    if !self.tail.is_null() {
      unsafe { (*self.tail).next = header };
    }
    self.tail = header;
    self.len += 1;
  }

  /// Whether `header` is the tail and its payload ends at the break, which
  /// makes it eligible for [`Chain::reclaim_tail`].
  ///
  /// # Safety
  ///
  /// `header` must be a block of this chain.
  pub unsafe fn ends_heap(
    &self,
    header: *mut Header,
  ) -> bool {
    header == self.tail && unsafe { Header::end(header) } == self.brk.current()
  }

  /// Unlinks the tail and gives its memory back to the break.
  ///
  /// If the backend refuses to shrink, the block is put back as the tail,
  /// marked free, and the error is returned.
  ///
  /// # Safety
  ///
  /// `header` must be the tail of this chain.
  pub unsafe fn reclaim_tail(
    &mut self,
    header: *mut Header,
  ) -> Result<(), HeapError> {
    debug_assert_eq!(header, self.tail);

    unsafe {
      self.unlink_tail();

      let total = HEADER_SIZE + (*header).size;
      if let Err(err) = self.brk.shrink(total) {
        (*header).is_free = true;
        (*header).next = ptr::null_mut();
        self.append(header);
        return Err(err);
      }
    }
    Ok(())
  }

  unsafe fn unlink_tail(&mut self) {
    unsafe {
      if self.head == self.tail {
        self.head = ptr::null_mut();
        self.tail = ptr::null_mut();
      } else {
        let mut current = self.head;
        while (*current).next != self.tail {
          current = (*current).next;
        }
        (*current).next = ptr::null_mut();
        self.tail = current;
      }
    }
    self.len -= 1;
  }

  /// Copies of every header from head to tail.
  pub fn blocks(&self) -> Blocks<'_, B> {
    Blocks {
      current: self.head,
      _chain: self,
    }
  }
}

pub(crate) struct Blocks<'a, B> {
  current: *mut Header,
  _chain: &'a Chain<B>,
}

impl<B> Iterator for Blocks<'_, B> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    let header = NonNull::new(self.current)?.as_ptr();
    let info = unsafe { BlockInfo::read(header) };
    self.current = unsafe { (*header).next };
    Some(info)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{align::ALIGNMENT, brk::ArenaHeap};

  fn chain() -> Chain<ArenaHeap> {
    Chain::new(ArenaHeap::new(4096))
  }

  #[test]
  fn test_grow_appends_in_address_order() {
    let mut chain = chain();

    let first = chain.grow(32).unwrap();
    let second = chain.grow(16).unwrap();
    let third = chain.grow(48).unwrap();

    assert_eq!(chain.head, first);
    assert_eq!(chain.tail, third);
    assert_eq!(chain.len(), 3);

    let blocks: Vec<_> = chain.blocks().collect();
    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[0].next, Some(second as usize));
    assert_eq!(blocks[1].next, Some(third as usize));
    assert_eq!(blocks[2].next, None);
    assert_eq!(blocks[0].end(), blocks[1].address);
    assert_eq!(blocks[1].end(), blocks[2].address);
    assert_eq!(blocks[2].end(), chain.brk().current() as usize);
  }

  #[test]
  fn test_find_free_is_first_fit() {
    let mut chain = chain();

    let small = chain.grow(16).unwrap();
    let large = chain.grow(64).unwrap();
    let larger = chain.grow(128).unwrap();
    chain.grow(16).unwrap();

    assert!(chain.find_free(16).is_null());

    unsafe {
      (*small).is_free = true;
      (*large).is_free = true;
      (*larger).is_free = true;
    }

    assert_eq!(chain.find_free(16), small);
    assert_eq!(chain.find_free(32), large);
    assert_eq!(chain.find_free(64), large);
    assert_eq!(chain.find_free(80), larger);
    assert!(chain.find_free(256).is_null());
  }

  #[test]
  fn test_grow_failure_leaves_chain_untouched() {
    let mut chain = Chain::new(ArenaHeap::new(128));

    let first = chain.grow(32).unwrap();
    assert!(chain.grow(1024).is_err());
    assert!(chain.grow(usize::MAX).is_err());

    assert_eq!(chain.len(), 1);
    assert_eq!(chain.head, first);
    assert_eq!(chain.tail, first);
    assert!(unsafe { (*first).next.is_null() });
  }

  #[test]
  fn test_reclaim_tail() {
    let mut chain = chain();
    let base = chain.brk().current();

    let first = chain.grow(32).unwrap();
    let second = chain.grow(64).unwrap();

    unsafe {
      assert!(!chain.ends_heap(first));
      assert!(chain.ends_heap(second));

      chain.reclaim_tail(second).unwrap();
      assert_eq!(chain.tail, first);
      assert!((*first).next.is_null());
      assert_eq!(chain.brk().current(), Header::end(first));

      assert!(chain.ends_heap(first));
      chain.reclaim_tail(first).unwrap();
    }

    assert!(chain.head.is_null());
    assert!(chain.tail.is_null());
    assert_eq!(chain.len(), 0);
    assert_eq!(chain.brk().current(), base);
  }

  #[test]
  fn test_tail_behind_moved_break_is_not_reclaimable() {
    let mut chain = chain();

    chain.grow(32).unwrap();
    let tail = chain.grow(16).unwrap();
    assert!(unsafe { chain.ends_heap(tail) });

    // Someone else takes the bytes after the tail.
    chain.brk.grow(ALIGNMENT).unwrap();

    assert_eq!(chain.tail, tail);
    assert!(!unsafe { chain.ends_heap(tail) });
  }

  struct StuckHeap(ArenaHeap);

  unsafe impl HeapBreak for StuckHeap {
    fn current(&self) -> *mut u8 {
      self.0.current()
    }

    fn grow(
      &mut self,
      increment: usize,
    ) -> Result<NonNull<u8>, HeapError> {
      self.0.grow(increment)
    }

    fn shrink(
      &mut self,
      decrement: usize,
    ) -> Result<(), HeapError> {
      Err(HeapError::Underflow {
        requested: decrement,
      })
    }
  }

  #[test]
  fn test_reclaim_failure_keeps_block_as_free_tail() {
    let mut chain = Chain::new(StuckHeap(ArenaHeap::new(1024)));

    let first = chain.grow(16).unwrap();
    let second = chain.grow(16).unwrap();

    let err = unsafe { chain.reclaim_tail(second) }.unwrap_err();
    assert_eq!(
      err,
      HeapError::Underflow {
        requested: HEADER_SIZE + 16
      }
    );

    assert_eq!(chain.len(), 2);
    assert_eq!(chain.tail, second);
    assert_eq!(unsafe { (*first).next }, second);
    assert!(unsafe { (*second).is_free });
    assert_eq!(chain.find_free(16), second);
  }
}
