use std::io::Read;

use brkalloc::{Malloc, SbrkHeap};

/// Waits until the user presses ENTER, so the break can be inspected with
/// `pmap`, `gdb` or `/proc/<pid>/maps` between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_mem_list(
  malloc: &Malloc<SbrkHeap>,
  label: &str,
) {
  let blocks = malloc.dump_state();

  println!("\n[{}] program break = {:?}", label, malloc.break_address());
  println!(
    "head = {:#x}, tail = {:#x}",
    blocks.first().map_or(0, |block| block.address),
    blocks.last().map_or(0, |block| block.address),
  );
  for block in &blocks {
    println!("{block}");
  }
}

fn main() {
  let malloc = Malloc::new(SbrkHeap::new());

  println!("Testing custom memory allocator (PID = {})", std::process::id());
  print_mem_list(&malloc, "start");
  block_until_enter_pressed();

  unsafe {
    // 1) Five ints, uninitialized, and three zeroed ints.
    let arr1 = malloc.allocate(5 * size_of::<i32>());
    let arr2 = malloc.zeroed_allocate(3, size_of::<i32>());
    print_mem_list(&malloc, "after allocations");
    block_until_enter_pressed();

    // 2) arr1 has a block after it, so it is only marked free.
    malloc.release(arr1);
    print_mem_list(&malloc, "after freeing arr1");
    block_until_enter_pressed();

    // 3) arr2 does not fit five ints: it moves into the freed arr1 block.
    let arr2 = malloc.resize(arr2, 5 * size_of::<i32>());
    print_mem_list(&malloc, "after reallocation");
    block_until_enter_pressed();

    // 4) Whatever sits at the break goes back to the OS.
    malloc.release(arr2);
    print_mem_list(&malloc, "after freeing arr2");
  }
}
