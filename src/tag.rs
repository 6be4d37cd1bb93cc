use core::ptr::NonNull;

use crate::align::DOUBLE_WORD;

/// Word size in bytes. A boundary tag occupies one word.
pub(crate) const WORD: usize = 4;

/// Per-block overhead of the header/footer tag pair.
pub(crate) const OVERHEAD: usize = 2 * WORD;

/// Smallest representable block: a double-word payload plus the tag pair.
pub(crate) const MIN_BLOCK: usize = DOUBLE_WORD + OVERHEAD;

/// A packed boundary tag: the block size with the allocated flag in the
/// low bit.
///
/// Sizes are multiples of 8, so the low three bits of a size are always
/// zero and the lowest one is free to carry the allocation state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Tag(u32);

impl Tag {
  pub fn pack(size: usize, allocated: bool) -> Self {
    debug_assert!(size % DOUBLE_WORD == 0);
    debug_assert!(size <= u32::MAX as usize);

    Tag(size as u32 | allocated as u32)
  }

  pub fn size(self) -> usize {
    (self.0 & !0x7) as usize
  }

  pub fn is_allocated(self) -> bool {
    self.0 & 0x1 != 0
  }
}

/// Handle to one heap block, addressed by its payload pointer.
///
/// The header sits one word below the payload; the footer fills the last
/// word of the block. Every block carries both tags whatever its state,
/// which is what makes [`Block::prev`] O(1) without a back pointer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Block(NonNull<u8>);

impl Block {
  pub fn from_payload(payload: NonNull<u8>) -> Self {
    debug_assert!(payload.as_ptr() as usize % DOUBLE_WORD == 0);

    Block(payload)
  }

  pub fn payload(self) -> *mut u8 {
    self.0.as_ptr()
  }

  /// Offset of this block's payload from the arena base. Offset zero is
  /// the arena's padding word, never a payload, so it doubles as the
  /// null tree link.
  pub fn to_offset(self, base: NonNull<u8>) -> u32 {
    let offset = self.0.as_ptr() as usize - base.as_ptr() as usize;
    debug_assert!(offset <= u32::MAX as usize);

    offset as u32
  }

  pub fn from_offset(base: NonNull<u8>, offset: u32) -> Option<Self> {
    if offset == 0 {
      return None;
    }

    NonNull::new(base.as_ptr().wrapping_add(offset as usize)).map(Block)
  }

  unsafe fn header_ptr(self) -> *mut u32 {
    unsafe { self.0.as_ptr().sub(WORD) }.cast()
  }

  unsafe fn footer_ptr(self) -> *mut u32 {
    unsafe { self.0.as_ptr().add(self.size() - OVERHEAD) }.cast()
  }

  pub unsafe fn header(self) -> Tag {
    Tag(unsafe { self.header_ptr().read() })
  }

  /// Footer tag, located from the size currently in the header.
  pub unsafe fn footer(self) -> Tag {
    Tag(unsafe { self.footer_ptr().read() })
  }

  pub unsafe fn size(self) -> usize {
    unsafe { self.header() }.size()
  }

  pub unsafe fn is_allocated(self) -> bool {
    unsafe { self.header() }.is_allocated()
  }

  pub unsafe fn write_header(self, tag: Tag) {
    unsafe { self.header_ptr().write(tag.0) };
  }

  /// Writes the footer at the position implied by the current header, so
  /// the header must already hold the block's final size.
  pub unsafe fn write_footer(self, tag: Tag) {
    unsafe { self.footer_ptr().write(tag.0) };
  }

  /// Rewrites the whole tag pair.
  pub unsafe fn set_tags(self, size: usize, allocated: bool) {
    let tag = Tag::pack(size, allocated);
    unsafe {
      self.write_header(tag);
      self.write_footer(tag);
    }
  }

  pub unsafe fn next(self) -> Block {
    let payload = unsafe { self.0.as_ptr().add(self.size()) };
    Block(unsafe { NonNull::new_unchecked(payload) })
  }

  pub unsafe fn prev(self) -> Block {
    // The word right below the header is the previous block's footer.
    let footer = Tag(unsafe { self.0.as_ptr().sub(OVERHEAD).cast::<u32>().read() });
    let payload = unsafe { self.0.as_ptr().sub(footer.size()) };
    Block(unsafe { NonNull::new_unchecked(payload) })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pack_round_trips_size_and_flag() {
    for size in (0..256).step_by(8) {
      for allocated in [false, true] {
        let tag = Tag::pack(size, allocated);
        assert_eq!(tag.size(), size);
        assert_eq!(tag.is_allocated(), allocated);
      }
    }
  }

  #[test]
  fn tags_address_neighbors() {
    // pad | 32-byte block | 24-byte block | epilogue header
    let mut buf = vec![0u64; 16];
    let base = NonNull::new(buf.as_mut_ptr().cast::<u8>()).unwrap();

    unsafe {
      let first = Block::from_payload(NonNull::new(base.as_ptr().add(8)).unwrap());
      first.set_tags(32, true);

      let second = first.next();
      second.set_tags(24, false);

      assert_eq!(second.payload(), base.as_ptr().add(40));
      assert_eq!(second.prev(), first);
      assert_eq!(first.size(), 32);
      assert!(first.is_allocated());
      assert!(!second.is_allocated());
      assert_eq!(first.header(), first.footer());
      assert_eq!(second.header(), second.footer());
    }
  }

  #[test]
  fn offsets_encode_null_as_zero() {
    let mut buf = vec![0u64; 8];
    let base = NonNull::new(buf.as_mut_ptr().cast::<u8>()).unwrap();

    let block = Block::from_payload(NonNull::new(base.as_ptr().wrapping_add(16)).unwrap());
    assert_eq!(block.to_offset(base), 16);
    assert_eq!(Block::from_offset(base, 16), Some(block));
    assert_eq!(Block::from_offset(base, 0), None);
  }
}
