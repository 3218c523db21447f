//! Installs a logger that calls back into the allocator it is logging for.
//! Any record emitted while the allocator's lock is held would spin forever
//! inside the logger, so the scenario runs on its own thread under a timeout.

use std::{
  sync::{
    OnceLock,
    atomic::{AtomicUsize, Ordering},
    mpsc,
  },
  thread,
  time::Duration,
};

use brkalloc::{ArenaHeap, Malloc};
use log::{LevelFilter, Log, Metadata, Record};

static MALLOC: OnceLock<Malloc<ArenaHeap>> = OnceLock::new();
static RECORDS: AtomicUsize = AtomicUsize::new(0);

struct CallbackLogger;

impl Log for CallbackLogger {
  fn enabled(
    &self,
    _metadata: &Metadata,
  ) -> bool {
    true
  }

  fn log(
    &self,
    _record: &Record,
  ) {
    if let Some(malloc) = MALLOC.get() {
      let _ = malloc.block_count();
      let _ = malloc.break_address();
      RECORDS.fetch_add(1, Ordering::Relaxed);
    }
  }

  fn flush(&self) {}
}

static LOGGER: CallbackLogger = CallbackLogger;

#[test]
fn test_logger_may_reenter_allocator() {
  log::set_logger(&LOGGER).unwrap();
  log::set_max_level(LevelFilter::Trace);
  brkalloc::enable_logging();

  let malloc = MALLOC.get_or_init(|| Malloc::new(ArenaHeap::new(1024)));
  let (done, finished) = mpsc::channel();

  thread::spawn(move || {
    // grow, then reuse, then out of memory
    let a = malloc.allocate(64).unwrap();
    let b = malloc.allocate(64).unwrap();
    unsafe { malloc.release(Some(a)) };
    let c = malloc.allocate(32).unwrap();
    assert_eq!(a, c);
    assert!(malloc.allocate(4096).is_none());

    // middle block marked free, tail given back to the break
    unsafe {
      malloc.release(Some(c));
      malloc.release(Some(b));
    }
    malloc.print_state();

    done.send(()).unwrap();
  });

  finished
    .recv_timeout(Duration::from_secs(10))
    .expect("a record was logged while the allocator lock was held");

  // grow x2, mark free, reuse, out of memory, mark free, reclaim, print
  assert!(RECORDS.load(Ordering::Relaxed) >= 8);
}
