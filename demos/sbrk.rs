use std::{io::Read, ptr};

use libc::sbrk;
use treealloc::{Heap, SbrkGrower};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  unsafe {
    // Initial break, before the heap claims anything.
    print_program_break("start");
    block_until_enter_pressed();

    // Bringing the heap up lays down the arena sentinels and pulls in
    // the first 4 KiB chunk, all through sbrk.
    let mut heap = Heap::new(SbrkGrower).expect("sbrk refused the initial arena");
    println!("\n[1] Heap initialized over sbrk");
    print_program_break("after init");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate space for a u64 and use it.
    // --------------------------------------------------------------------
    let first_block = heap.allocate(size_of::<u64>());
    println!("\n[2] Allocate u64 -> {first_block:?}");

    let first_ptr = first_block as *mut u64;
    first_ptr.write(0xDEADBEEF);
    println!("[2] Value written to first_block = 0x{:X}", first_ptr.read());
    println!(
      "[2] Address = {:#X}, addr % 8 = {}",
      first_block as usize,
      first_block as usize % 8
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Allocate 100 bytes and fill them.
    //    Odd sizes are rounded up to a double word internally.
    // --------------------------------------------------------------------
    let second_block = heap.allocate(100);
    println!("\n[3] Allocate 100 bytes -> {second_block:?}");

    ptr::write_bytes(second_block, 0xAB, 100);
    println!("[3] Initialized second block with 0xAB");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Free the first block, then allocate 8 bytes again.
    //    The freed block is indexed in the free tree, so the new
    //    allocation lands right back on it.
    // --------------------------------------------------------------------
    heap.free(first_block);
    println!("\n[4] Freed first_block at {first_block:?}");

    let third_block = heap.allocate(8);
    println!("[4] Allocate 8 bytes -> {third_block:?}");
    println!(
      "[4] third_block == first_block? {}",
      if third_block == first_block {
        "Yes, it reused the freed block"
      } else {
        "No, it allocated somewhere else"
      }
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Grow the second block in place with reallocate.
    //    Its successor is free, so the data stays put.
    // --------------------------------------------------------------------
    let grown = heap.reallocate(second_block, 200);
    println!("\n[5] Reallocate second block to 200 bytes -> {grown:?}");
    println!(
      "[5] grown == second_block? {} (first byte still 0x{:X})",
      grown == second_block,
      grown.read(),
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Allocate a large block to observe arena growth.
    //    This changes the result of `sbrk(0)`.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");

    // Example: 64 KiB
    let big_block = heap.allocate(64 * 1024);
    println!("\n[6] Allocate large 64 KiB block -> {big_block:?}");

    print_program_break("after large alloc");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) Walk the whole arena and print it, block by block.
    // --------------------------------------------------------------------
    println!("\n[7] Heap report:\n{}", heap.check_heap(true));

    // --------------------------------------------------------------------
    // 8) End of demo.
    //
    //    The arena is grow-only; the OS reclaims all memory when the
    //    process exits.
    // --------------------------------------------------------------------
    println!("\n[8] End of example. Process will exit and the OS will reclaim all memory.");
  }
}
