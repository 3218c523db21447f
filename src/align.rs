/// Boundary every payload address (and therefore every header) sits on.
pub const ALIGNMENT: usize = 16;

/// Rounds a size up to the next multiple of [`ALIGNMENT`].
///
/// The expression must not overflow `usize` once rounded; use
/// [`checked_align`] for sizes that come from callers.
///
/// # Examples
///
/// ```rust
/// use brkalloc::align;
///
/// assert_eq!(align!(1), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(17), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Same rounding as [`align!`], returning `None` instead of wrapping.
pub const fn checked_align(value: usize) -> Option<usize> {
  match value.checked_add(ALIGNMENT - 1) {
    Some(padded) => Some(padded & !(ALIGNMENT - 1)),
    None => None,
  }
}

/// Bytes needed to move `address` forward to the next aligned address.
pub const fn padding_for(address: usize) -> usize {
  address.wrapping_neg() & (ALIGNMENT - 1)
}

pub const fn is_aligned(address: usize) -> bool {
  address & (ALIGNMENT - 1) == 0
}
