/// Rounds a size up to the next double-word boundary.
///
/// Every block size the heap handles is a multiple of the double word,
/// so this is applied to every incoming request and every arena
/// extension.
///
/// # Examples
///
/// ```rust
/// assert_eq!(treealloc::align!(13), 16);
/// assert_eq!(treealloc::align!(16), 16);
/// assert_eq!(treealloc::align!(17), 24);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    (($value) + $crate::align::DOUBLE_WORD - 1) & !($crate::align::DOUBLE_WORD - 1)
  };
}

/// Double-word size in bytes. Block sizes, payload addresses, and arena
/// extensions are all multiples of this.
pub const DOUBLE_WORD: usize = 8;
