use std::{
  fmt, mem,
  ptr::{self, NonNull},
};

use crate::align::{ALIGNMENT, is_aligned};

/// Metadata written immediately before every payload.
///
/// ```text
///   ┌──────────────────────┬──────────────────────────────┐
///   │ Header (HEADER_SIZE) │ payload (size bytes)         │
///   └──────────────────────┴──────────────────────────────┘
///   ▲                      ▲                              ▲
///   header                 payload pointer                next header
/// ```
///
/// The `align(16)` representation rounds the header itself up to a multiple
/// of [`ALIGNMENT`], so a payload that starts right after an aligned header is
/// aligned too.
#[repr(C, align(16))]
pub struct Header {
  /// Payload bytes, header excluded. Always a multiple of [`ALIGNMENT`].
  pub size: usize,
  pub is_free: bool,
  /// Next block in allocation (and address) order, or null for the tail.
  pub next: *mut Header,
}

pub const HEADER_SIZE: usize = mem::size_of::<Header>();

const _: () = assert!(mem::align_of::<Header>() == ALIGNMENT);
const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);

impl Header {
  pub fn new(size: usize) -> Self {
    Self {
      size,
      is_free: false,
      next: ptr::null_mut(),
    }
  }

  /// Writes an in-use header describing `size` payload bytes at `address`.
  ///
  /// # Safety
  ///
  /// `address` must be aligned to [`ALIGNMENT`] and valid for writes of
  /// `HEADER_SIZE + size` bytes.
  pub unsafe fn init(
    address: NonNull<u8>,
    size: usize,
  ) -> *mut Header {
    debug_assert!(is_aligned(address.as_ptr() as usize));

    let header = address.as_ptr().cast::<Header>();
    unsafe { header.write(Header::new(size)) };
    header
  }

  /// Recovers the header that precedes `payload`.
  ///
  /// # Safety
  ///
  /// `payload` must have been produced by [`Header::payload`] on a header
  /// that is still part of a heap chain.
  pub unsafe fn from_payload(payload: NonNull<u8>) -> *mut Header {
    debug_assert!(is_aligned(payload.as_ptr() as usize));

    unsafe { payload.as_ptr().sub(HEADER_SIZE) }.cast()
  }

  /// # Safety
  ///
  /// `header` must point to an initialized header.
  pub unsafe fn payload(header: *mut Header) -> NonNull<u8> {
    unsafe { NonNull::new_unchecked(header.cast::<u8>().add(HEADER_SIZE)) }
  }

  /// First byte past the payload of `header`.
  ///
  /// # Safety
  ///
  /// `header` must point to an initialized header.
  pub unsafe fn end(header: *mut Header) -> *mut u8 {
    unsafe { header.cast::<u8>().add(HEADER_SIZE + (*header).size) }
  }
}

/// A copy of one header, as reported by [`crate::Malloc::dump_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Address of the header.
  pub address: usize,
  pub size: usize,
  pub is_free: bool,
  /// Address of the next header, `None` for the tail.
  pub next: Option<usize>,
}

impl BlockInfo {
  /// # Safety
  ///
  /// `header` must point to an initialized header.
  pub(crate) unsafe fn read(header: *mut Header) -> Self {
    let header_ref = unsafe { &*header };
    Self {
      address: header as usize,
      size: header_ref.size,
      is_free: header_ref.is_free,
      next: (!header_ref.next.is_null()).then_some(header_ref.next as usize),
    }
  }

  /// Address handed out to the caller for this block.
  pub fn payload(&self) -> usize {
    self.address + HEADER_SIZE
  }

  /// First address past this block's payload.
  pub fn end(&self) -> usize {
    self.payload() + self.size
  }
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "addr = {:#x}, size = {}, is_free = {}, next = ",
      self.address, self.size, self.is_free
    )?;
    match self.next {
      Some(next) => write!(f, "{next:#x}"),
      None => f.write_str("null"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[repr(C, align(16))]
  struct Scratch([u8; 256]);

  #[test]
  fn test_header_layout() {
    assert_eq!(HEADER_SIZE % ALIGNMENT, 0);
    assert!(HEADER_SIZE >= mem::size_of::<usize>() * 2 + 1);
  }

  #[test]
  fn test_payload_round_trip() {
    let mut scratch = Scratch([0; 256]);
    let base = NonNull::new(scratch.0.as_mut_ptr()).unwrap();

    unsafe {
      let header = Header::init(base, 64);
      let payload = Header::payload(header);

      assert_eq!(payload.as_ptr() as usize - base.as_ptr() as usize, HEADER_SIZE);
      assert!(is_aligned(payload.as_ptr() as usize));
      assert_eq!(Header::from_payload(payload), header);
      assert_eq!(Header::end(header), payload.as_ptr().add(64));

      assert_eq!((*header).size, 64);
      assert!(!(*header).is_free);
      assert!((*header).next.is_null());
    }
  }

  #[test]
  fn test_block_info() {
    let mut scratch = Scratch([0; 256]);
    let base = NonNull::new(scratch.0.as_mut_ptr()).unwrap();

    unsafe {
      let first = Header::init(base, 32);
      let second = Header::init(NonNull::new(Header::end(first)).unwrap(), 16);
      (*first).next = second;
      (*second).is_free = true;

      let info = BlockInfo::read(first);
      assert_eq!(info.address, first as usize);
      assert_eq!(info.size, 32);
      assert!(!info.is_free);
      assert_eq!(info.next, Some(second as usize));
      assert_eq!(info.end(), second as usize);

      let tail = BlockInfo::read(second);
      assert!(tail.is_free);
      assert_eq!(tail.next, None);
      assert!(tail.to_string().ends_with("next = null"));
    }
  }
}
