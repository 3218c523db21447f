use thiserror::Error;

/// Failures reported by a [`crate::HeapBreak`] backend.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
  /// The backend refused to move the break forward.
  #[error("heap break cannot grow by {requested} bytes")]
  Exhausted { requested: usize },

  /// The backend refused to move the break back.
  #[error("heap break cannot shrink by {requested} bytes")]
  Underflow { requested: usize },
}

/// Why an allocation request produced no block.
///
/// Misuse of a pointer (releasing a foreign pointer, releasing twice, writing
/// past the payload) has no variant here: it is undefined behavior and is not
/// detected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  #[error("zero-sized request")]
  ZeroSize,

  #[error("{count} elements of {element_size} bytes overflow usize")]
  Overflow { count: usize, element_size: usize },

  #[error("out of memory: {0}")]
  OutOfMemory(#[from] HeapError),
}
