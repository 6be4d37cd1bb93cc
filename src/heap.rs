use core::ptr::{self, NonNull};

use log::{debug, trace};
use thiserror::Error;

use crate::align::DOUBLE_WORD;
use crate::grow::ArenaGrower;
use crate::tag::{Block, MIN_BLOCK, OVERHEAD, Tag};
use crate::tree::FreeTree;

/// Bytes requested from the grower when the heap comes up or a fit
/// search comes back empty.
pub const CHUNK_SIZE: usize = 4096;

/// Failure to bring up a heap.
#[derive(Debug, Error)]
pub enum HeapError {
  /// The grower could not supply the sentinel region or the first chunk.
  #[error("arena grower could not supply the initial {0} bytes")]
  InitialArena(usize),
}

/// A boundary-tag heap over one contiguous, growable arena.
///
/// ```text
///   | pad | prologue hdr | prologue ftr | blocks ... | epilogue hdr |
///           \_____ always allocated ____/              size 0, alloc
/// ```
///
/// The prologue and epilogue sentinels bound every neighbor lookup, so
/// coalescing never has to special-case the ends of the arena. Free
/// blocks are indexed by size in a [`FreeTree`] that lives inside the
/// blocks themselves.
///
/// Single caller at a time: nothing in here locks, and the returned
/// pointers alias the arena, so concurrent use needs external
/// serialization.
pub struct Heap<G> {
  grower: G,
  base: NonNull<u8>,
  first: Block,
  tree: FreeTree,
}

/// Adjusted block size for a request: the payload rounded up to a
/// double word, plus tag overhead, never below the minimum block.
fn adjusted_size(size: usize) -> usize {
  if size <= DOUBLE_WORD {
    MIN_BLOCK
  } else {
    crate::align!(size + OVERHEAD)
  }
}

impl<G: ArenaGrower> Heap<G> {
  /// Brings up an empty heap: lays down the sentinel pair, then extends
  /// the arena by one chunk and indexes the resulting free block.
  pub fn new(mut grower: G) -> Result<Self, HeapError> {
    let Some(base) = (unsafe { grower.grow(2 * DOUBLE_WORD) }) else {
      return Err(HeapError::InitialArena(2 * DOUBLE_WORD));
    };
    debug_assert!(base.as_ptr() as usize % DOUBLE_WORD == 0);

    let first = unsafe {
      base.cast::<u32>().write(0); // alignment padding
      Block::from_payload(NonNull::new_unchecked(base.as_ptr().add(DOUBLE_WORD)))
    };

    unsafe {
      first.write_header(Tag::pack(OVERHEAD, true)); // prologue
      first.write_footer(Tag::pack(OVERHEAD, true));
      first.next().write_header(Tag::pack(0, true)); // epilogue
    }

    let mut heap = Heap {
      grower,
      base,
      first,
      tree: FreeTree::new(base),
    };

    let Some(block) = heap.extend(CHUNK_SIZE) else {
      return Err(HeapError::InitialArena(CHUNK_SIZE));
    };
    unsafe { heap.tree.insert(block) };

    debug!("heap up at {:?} with a {CHUNK_SIZE}-byte chunk", heap.base);

    Ok(heap)
  }

  /// Allocates a block with at least `size` usable bytes, returning its
  /// 8-byte-aligned payload pointer, or null when the request is zero
  /// or the arena is exhausted.
  pub unsafe fn allocate(&mut self, size: usize) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    let asize = adjusted_size(size);

    if let Some(block) = unsafe { self.tree.ceiling(asize) } {
      unsafe {
        self.tree.remove(block);
        return self.place(block, asize).payload();
      }
    }

    trace!("no fit for {asize} bytes, extending");
    let Some(block) = self.extend(asize.max(CHUNK_SIZE)) else {
      return ptr::null_mut();
    };

    unsafe { self.place(block, asize).payload() }
  }

  /// Frees an allocated block by payload pointer.
  ///
  /// The pointer must have come out of this heap's [`Heap::allocate`]
  /// or [`Heap::reallocate`] and must not have been freed since; that
  /// is not validated. Null is ignored.
  pub unsafe fn free(&mut self, payload: *mut u8) {
    let Some(payload) = NonNull::new(payload) else {
      return;
    };
    let block = Block::from_payload(payload);

    unsafe {
      let size = block.size();
      block.set_tags(size, false);
      trace!("freed {size} bytes at {payload:?}");

      let merged = self.coalesce(block);
      self.tree.insert(merged);
    }
  }

  /// Resizes an allocated block, case by case rather than copy-minimal:
  /// the block grows in place when it borders the epilogue or a free
  /// successor that can cover the request, and moves otherwise. Returns
  /// the block's (possibly new) payload pointer, or null when the arena
  /// cannot supply the extra memory. A null `payload` is a plain
  /// allocation; a zero `size` returns null with the block untouched.
  pub unsafe fn reallocate(&mut self, payload: *mut u8, size: usize) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    let Some(payload) = NonNull::new(payload) else {
      return unsafe { self.allocate(size) };
    };
    let block = Block::from_payload(payload);
    let asize = adjusted_size(size);

    unsafe {
      let old_size = block.size();
      let next = block.next();

      // Bordering the epilogue: extend and grow in place.
      if next.size() == 0 {
        let extend_size = asize.max(CHUNK_SIZE);
        if self.extend(extend_size).is_none() {
          return ptr::null_mut();
        }

        block.set_tags(asize, true);
        let remainder = block.next();
        remainder.set_tags(extend_size + old_size - asize, false);
        self.tree.insert(remainder);

        return block.payload();
      }

      if !next.is_allocated() {
        let total = old_size + next.size();

        // A free successor that covers the request: absorb it, keeping
        // any leftover that can stand as a block of its own.
        if total >= asize {
          self.tree.remove(next);
          let leftover = total - asize;

          if leftover < MIN_BLOCK {
            block.set_tags(total, true);
          } else {
            block.set_tags(asize, true);
            let remainder = block.next();
            remainder.set_tags(leftover, false);
            self.tree.insert(remainder);
          }

          return block.payload();
        }

        // A free successor that is too small but touches the epilogue:
        // extending folds it into the new region, then split as above.
        if next.next().size() == 0 {
          let extend_size = asize.max(CHUNK_SIZE);
          if self.extend(extend_size).is_none() {
            return ptr::null_mut();
          }

          block.set_tags(asize, true);
          let remainder = block.next();
          remainder.set_tags(extend_size + total - asize, false);
          self.tree.insert(remainder);

          return block.payload();
        }
      }

      // No in-place option left: move.
      let moved = self.allocate(size);
      if moved.is_null() {
        return ptr::null_mut();
      }

      let kept = (old_size - OVERHEAD).min(size);
      ptr::copy_nonoverlapping(block.payload(), moved, kept);
      self.free(block.payload());

      moved
    }
  }

  /// Extends the arena by at least `bytes`, rebuilds the epilogue past
  /// the new region, and merges backward into a trailing free block.
  /// The returned block is not yet indexed; the caller decides.
  fn extend(&mut self, bytes: usize) -> Option<Block> {
    let size = crate::align!(bytes);

    let payload = unsafe { self.grower.grow(size) }?;
    let block = Block::from_payload(payload);

    debug!("extended arena by {size} bytes at {payload:?}");

    unsafe {
      // The new region starts where the old epilogue header sat, so the
      // block's header overwrites it and a fresh epilogue goes in past
      // the end.
      block.set_tags(size, false);
      block.next().write_header(Tag::pack(0, true));

      Some(self.coalesce(block))
    }
  }

  /// Boundary-tag coalescing: merges `block` with whichever physical
  /// neighbors are free, pulling absorbed neighbors out of the tree
  /// first, and returns the merged block for the caller to index.
  unsafe fn coalesce(&mut self, block: Block) -> Block {
    unsafe {
      let prev = block.prev();
      let next = block.next();
      let size = block.size();

      match (prev.footer().is_allocated(), next.is_allocated()) {
        (true, true) => block,
        (true, false) => {
          self.tree.remove(next);
          block.set_tags(size + next.size(), false);
          block
        }
        (false, true) => {
          self.tree.remove(prev);
          prev.set_tags(size + prev.size(), false);
          prev
        }
        (false, false) => {
          let merged = size + prev.size() + next.size();
          self.tree.remove(next);
          self.tree.remove(prev);
          prev.set_tags(merged, false);
          prev
        }
      }
    }
  }

  /// Carves `asize` bytes out of a block that is not in the tree.
  ///
  /// When the leftover can stand as a block of its own the block is
  /// split; requests above the neighbor-size average take the larger
  /// neighbor's side, smaller ones leave the remainder against it, so
  /// remainders tend to merge into one big region instead of several
  /// middling ones. The free part is indexed and the allocated part
  /// returned.
  unsafe fn place(&mut self, block: Block, asize: usize) -> Block {
    unsafe {
      let csize = block.size();
      let leftover = csize - asize;

      if leftover < MIN_BLOCK {
        block.set_tags(csize, true);
        return block;
      }

      let prev_size = block.prev().size();
      let next_size = block.next().size();
      let average = (prev_size + next_size) / 2;
      let prev_is_larger = next_size <= prev_size;

      let carve_front = if asize > average {
        prev_is_larger
      } else {
        !prev_is_larger
      };

      if carve_front {
        block.set_tags(asize, true);
        let remainder = block.next();
        remainder.set_tags(leftover, false);
        self.tree.insert(remainder);
        block
      } else {
        block.set_tags(leftover, false);
        let allocated = block.next();
        allocated.set_tags(asize, true);
        self.tree.insert(block);
        allocated
      }
    }
  }
}

impl<G> Heap<G> {
  /// The grower backing this heap.
  pub fn grower(&self) -> &G {
    &self.grower
  }

  /// Walks the whole arena and reports on it: sentinel shape, per-block
  /// alignment, and header/footer agreement. Violations come back as
  /// `error:` lines in the returned report; with `verbose` every block
  /// is listed, free blocks with their tree links. Report only;
  /// nothing is repaired.
  pub fn check_heap(&self, verbose: bool) -> String {
    use core::fmt::Write as _;

    let mut report = String::new();

    if verbose {
      let _ = writeln!(report, "heap base: {:?}", self.base);
      let _ = writeln!(
        report,
        "tree root: {:?}",
        self.tree.root().map(Block::payload)
      );
    }

    unsafe {
      if self.first.size() != DOUBLE_WORD || !self.first.is_allocated() {
        report.push_str("error: bad prologue header\n");
      }

      let mut block = self.first;
      loop {
        if verbose {
          self.print_block(&mut report, block);
        }
        if block.size() == 0 {
          break;
        }
        self.check_block(&mut report, block);
        block = block.next();
      }

      if block.size() != 0 || !block.is_allocated() {
        report.push_str("error: bad epilogue header\n");
      }
    }

    report
  }

  unsafe fn check_block(&self, report: &mut String, block: Block) {
    use core::fmt::Write as _;

    unsafe {
      if block.payload() as usize % DOUBLE_WORD != 0 {
        let _ = writeln!(
          report,
          "error: {:?} is not double-word aligned",
          block.payload()
        );
      }
      if block.header() != block.footer() {
        let _ = writeln!(
          report,
          "error: {:?} header does not match footer",
          block.payload()
        );
      }
    }
  }

  unsafe fn print_block(&self, report: &mut String, block: Block) {
    use core::fmt::Write as _;

    fn state(allocated: bool) -> char {
      if allocated { 'a' } else { 'f' }
    }

    unsafe {
      let header = block.header();

      if header.size() == 0 {
        let _ = writeln!(report, "{:?}: epilogue", block.payload());
      } else if header.is_allocated() {
        let _ = writeln!(
          report,
          "{:?}: header [{}:{}] footer [{}:{}]",
          block.payload(),
          header.size(),
          state(header.is_allocated()),
          block.footer().size(),
          state(block.footer().is_allocated()),
        );
      } else {
        let _ = writeln!(
          report,
          "{:?}: header [{}:{}] left {:?} right {:?} footer [{}:{}]",
          block.payload(),
          header.size(),
          state(header.is_allocated()),
          self.tree.left(block).map(Block::payload),
          self.tree.right(block).map(Block::payload),
          block.footer().size(),
          state(block.footer().is_allocated()),
        );
      }
    }
  }
}
