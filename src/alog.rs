// Logging is gated so that a logger which allocates cannot re-enter an
// allocator installed as the global one unless the user opted in.

macro_rules! awarn {
  ($($arg:tt)*) => {
    if $crate::should_log() {
      log::warn!($($arg)*);
    }
  };
}

macro_rules! ainfo {
  ($($arg:tt)*) => {
    if $crate::should_log() {
      log::info!($($arg)*);
    }
  };
}

macro_rules! adebug {
  ($($arg:tt)*) => {
    if $crate::should_log() {
      log::debug!($($arg)*);
    }
  };
}

macro_rules! atrace {
  ($($arg:tt)*) => {
    if $crate::should_log() {
      log::trace!($($arg)*);
    }
  };
}
