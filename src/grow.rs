use core::ptr::NonNull;

use libc::{c_void, intptr_t, sbrk};

use crate::align::DOUBLE_WORD;

/// Source of raw arena memory.
///
/// Each call hands out `len` fresh bytes starting directly after the
/// bytes of the previous call, so the arena stays one contiguous run.
/// The first region must be 8-byte aligned; `len` is always a multiple
/// of 8, which keeps every later region aligned as well. Growth is
/// one-way: nothing is ever handed back.
pub trait ArenaGrower {
  /// Extends the arena, returning a pointer to the start of the new
  /// region, or `None` when no more memory is available.
  unsafe fn grow(&mut self, len: usize) -> Option<NonNull<u8>>;
}

/// Grower backed by `sbrk(2)`, moving the program break the way a
/// classic `malloc` does. Only one heap should sit on top of it per
/// process.
pub struct SbrkGrower;

impl ArenaGrower for SbrkGrower {
  unsafe fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
    unsafe {
      // The break may start unaligned; nudge it to a double word so the
      // first region (and with it every block payload) is aligned.
      let brk = sbrk(0) as usize;
      let pad = crate::align!(brk) - brk;
      if pad != 0 && sbrk(pad as intptr_t) == usize::MAX as *mut c_void {
        return None;
      }

      let address = sbrk(len as intptr_t);

      if address == usize::MAX as *mut c_void {
        return None;
      }

      NonNull::new(address as *mut u8)
    }
  }
}

/// Bounded grower over an owned, 8-aligned buffer.
///
/// Lets a heap live inside ordinary process memory, which is what makes
/// several independent arenas possible side by side (one per test, for
/// instance). Runs dry instead of growing past its capacity.
pub struct FixedArena {
  buf: Box<[u64]>,
  used: usize,
}

impl FixedArena {
  /// Reserves `capacity` bytes (rounded up to a double word) of backing
  /// storage.
  pub fn with_capacity(capacity: usize) -> Self {
    let words = crate::align!(capacity) / DOUBLE_WORD;

    FixedArena {
      buf: vec![0u64; words].into_boxed_slice(),
      used: 0,
    }
  }

  /// Bytes handed out so far.
  pub fn used(&self) -> usize {
    self.used
  }

  /// Total backing capacity in bytes.
  pub fn capacity(&self) -> usize {
    self.buf.len() * DOUBLE_WORD
  }
}

impl ArenaGrower for FixedArena {
  unsafe fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
    if self.used + len > self.capacity() {
      return None;
    }

    let start = unsafe { self.buf.as_mut_ptr().cast::<u8>().add(self.used) };
    self.used += len;

    NonNull::new(start)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fixed_arena_regions_are_contiguous_and_aligned() {
    let mut arena = FixedArena::with_capacity(256);

    unsafe {
      let first = arena.grow(64).unwrap();
      let second = arena.grow(128).unwrap();

      assert_eq!(first.as_ptr() as usize % DOUBLE_WORD, 0);
      assert_eq!(second.as_ptr(), first.as_ptr().add(64));
      assert_eq!(arena.used(), 192);
    }
  }

  #[test]
  fn fixed_arena_runs_dry() {
    let mut arena = FixedArena::with_capacity(64);

    unsafe {
      assert!(arena.grow(64).is_some());
      assert!(arena.grow(8).is_none());
      assert_eq!(arena.used(), 64);
    }
  }
}
