use core::ptr::NonNull;

use crate::tag::{Block, WORD};

/// Size-ordered intrusive binary search tree over the free blocks.
///
/// There is no node type: every free block is a node keyed by its own
/// size, and its first payload double word holds the two child links
/// (left word, then right word) as offsets from the arena base. The
/// links are meaningful only while the block's allocated flag is clear;
/// the same bytes are caller data while the block is allocated.
///
/// Equal sizes descend left, and both parent lookup and removal re-walk
/// that exact comparison, so every block must have been inserted with
/// it. The tree is never rebalanced: height degrades to linear in the
/// worst case, and that is accepted.
pub(crate) struct FreeTree {
  base: NonNull<u8>,
  root: Option<Block>,
}

impl FreeTree {
  pub fn new(base: NonNull<u8>) -> Self {
    FreeTree { base, root: None }
  }

  pub fn root(&self) -> Option<Block> {
    self.root
  }

  unsafe fn left_ptr(bp: Block) -> *mut u32 {
    bp.payload().cast()
  }

  unsafe fn right_ptr(bp: Block) -> *mut u32 {
    unsafe { bp.payload().add(WORD) }.cast()
  }

  pub unsafe fn left(&self, bp: Block) -> Option<Block> {
    Block::from_offset(self.base, unsafe { Self::left_ptr(bp).read() })
  }

  pub unsafe fn right(&self, bp: Block) -> Option<Block> {
    Block::from_offset(self.base, unsafe { Self::right_ptr(bp).read() })
  }

  unsafe fn set_left(&self, bp: Block, child: Option<Block>) {
    let offset = child.map_or(0, |child| child.to_offset(self.base));
    unsafe { Self::left_ptr(bp).write(offset) };
  }

  unsafe fn set_right(&self, bp: Block, child: Option<Block>) {
    let offset = child.map_or(0, |child| child.to_offset(self.base));
    unsafe { Self::right_ptr(bp).write(offset) };
  }

  /// Indexes a free block. The block's links are cleared as it becomes
  /// a leaf; equal sizes descend left.
  pub unsafe fn insert(&mut self, bp: Block) {
    self.root = unsafe { self.insert_at(self.root, bp) };
  }

  unsafe fn insert_at(&mut self, rt: Option<Block>, bp: Block) -> Option<Block> {
    let Some(rt) = rt else {
      unsafe {
        self.set_left(bp, None);
        self.set_right(bp, None);
      }
      return Some(bp);
    };

    unsafe {
      if bp.size() <= rt.size() {
        let left = self.insert_at(self.left(rt), bp);
        self.set_left(rt, left);
      } else {
        let right = self.insert_at(self.right(rt), bp);
        self.set_right(rt, right);
      }
    }

    Some(rt)
  }

  /// Best fit: the free block with the smallest size at least `size`,
  /// or `None` when nothing qualifies.
  pub unsafe fn ceiling(&self, size: usize) -> Option<Block> {
    unsafe { self.ceiling_at(self.root, size) }
  }

  unsafe fn ceiling_at(&self, rt: Option<Block>, size: usize) -> Option<Block> {
    let rt = rt?;
    let rt_size = unsafe { rt.size() };

    if rt_size == size {
      return Some(rt);
    }

    let candidate = if rt_size > size {
      unsafe { self.ceiling_at(self.left(rt), size) }
    } else {
      unsafe { self.ceiling_at(self.right(rt), size) }
    };

    // A miss below still leaves this node as the bound when it is big
    // enough; a miss on the small side is final.
    match candidate {
      Some(fit) => Some(fit),
      None if rt_size > size => Some(rt),
      None => None,
    }
  }

  /// Direct parent of `bp`, or `None` when `bp` is the root of the
  /// subtree at `rt`. Re-walks the insert comparison and matches
  /// children by identity.
  unsafe fn parent(&self, rt: Block, bp: Block) -> Option<Block> {
    if rt == bp {
      return None;
    }

    let child = if unsafe { bp.size() <= rt.size() } {
      unsafe { self.left(rt) }
    } else {
      unsafe { self.right(rt) }
    };

    let child = child.expect("free block not reachable along its size path");
    if child == bp {
      Some(rt)
    } else {
      unsafe { self.parent(child, bp) }
    }
  }

  unsafe fn count_children(&self, bp: Block) -> usize {
    unsafe { self.left(bp).is_some() as usize + self.right(bp).is_some() as usize }
  }

  /// Rightmost descendant of `bp`: the in-order predecessor two-child
  /// removal splices in when called on the victim's left child.
  unsafe fn rightmost(&self, bp: Block) -> Block {
    match unsafe { self.right(bp) } {
      Some(right) => unsafe { self.rightmost(right) },
      None => bp,
    }
  }

  /// Unlinks a block that is currently indexed.
  pub unsafe fn remove(&mut self, bp: Block) {
    let rt = self.root.expect("remove on an empty tree");
    self.root = unsafe { self.remove_at(rt, bp) };
  }

  unsafe fn remove_at(&mut self, rt: Block, bp: Block) -> Option<Block> {
    unsafe {
      match self.count_children(bp) {
        0 => self.remove_leaf(rt, bp),
        1 => self.remove_with_child(rt, bp),
        _ => self.remove_with_children(rt, bp),
      }
    }
  }

  unsafe fn remove_leaf(&mut self, rt: Block, bp: Block) -> Option<Block> {
    let Some(parent) = (unsafe { self.parent(rt, bp) }) else {
      return None;
    };

    unsafe {
      if self.left(parent) == Some(bp) {
        self.set_left(parent, None);
      } else {
        self.set_right(parent, None);
      }
    }

    Some(rt)
  }

  unsafe fn remove_with_child(&mut self, rt: Block, bp: Block) -> Option<Block> {
    let child = match unsafe { self.left(bp) } {
      Some(left) => left,
      None => unsafe { self.right(bp) }.expect("single-child removal on a leaf"),
    };

    let Some(parent) = (unsafe { self.parent(rt, bp) }) else {
      return Some(child);
    };

    unsafe {
      if self.left(parent) == Some(bp) {
        self.set_left(parent, Some(child));
      } else {
        self.set_right(parent, Some(child));
      }
    }

    Some(rt)
  }

  unsafe fn remove_with_children(&mut self, rt: Block, bp: Block) -> Option<Block> {
    unsafe {
      let parent = self.parent(rt, bp);
      let left = self.left(bp).expect("two-child removal without a left child");
      let replacement = self.rightmost(left);

      // The replacement sits on the right spine of the left subtree, so
      // this inner removal bottoms out in the zero- or one-child case.
      let reduced_left = self.remove_at(left, replacement);

      self.set_left(replacement, reduced_left);
      self.set_right(replacement, self.right(bp));

      let Some(parent) = parent else {
        return Some(replacement);
      };

      if self.left(parent) == Some(bp) {
        self.set_left(parent, Some(replacement));
      } else {
        self.set_right(parent, Some(replacement));
      }

      Some(rt)
    }
  }

  /// In-order traversal of every indexed block.
  #[cfg(test)]
  pub unsafe fn collect(&self, out: &mut Vec<Block>) {
    unsafe { self.collect_at(self.root, out) };
  }

  #[cfg(test)]
  unsafe fn collect_at(&self, rt: Option<Block>, out: &mut Vec<Block>) {
    let Some(rt) = rt else {
      return;
    };

    unsafe {
      self.collect_at(self.left(rt), out);
      out.push(rt);
      self.collect_at(self.right(rt), out);
    }
  }
}

#[cfg(test)]
mod tests {
  use rand::{Rng, SeedableRng};

  use super::*;
  use crate::align::DOUBLE_WORD;
  use crate::tag::MIN_BLOCK;

  /// Backing store carved into consecutive free blocks of the given
  /// sizes, mimicking the layout the heap produces.
  struct Bed {
    _buf: Vec<u64>,
    base: NonNull<u8>,
    blocks: Vec<Block>,
  }

  fn bed(sizes: &[usize]) -> Bed {
    let total: usize = sizes.iter().sum();
    let mut buf = vec![0u64; total / DOUBLE_WORD + 2];
    let base = NonNull::new(buf.as_mut_ptr().cast::<u8>()).unwrap();

    let mut blocks = Vec::new();
    let mut offset = DOUBLE_WORD;
    for &size in sizes {
      assert!(size >= MIN_BLOCK && size % DOUBLE_WORD == 0);

      let payload = NonNull::new(base.as_ptr().wrapping_add(offset)).unwrap();
      let block = Block::from_payload(payload);
      unsafe { block.set_tags(size, false) };
      blocks.push(block);
      offset += size;
    }

    Bed {
      _buf: buf,
      base,
      blocks,
    }
  }

  fn sizes_of(tree: &FreeTree) -> Vec<usize> {
    let mut nodes = Vec::new();
    unsafe { tree.collect(&mut nodes) };
    nodes.iter().map(|bp| unsafe { bp.size() }).collect()
  }

  /// Smallest size at least `target`, by linear scan.
  fn scan_ceiling(sizes: &[usize], target: usize) -> Option<usize> {
    sizes.iter().copied().filter(|&s| s >= target).min()
  }

  #[test]
  fn ceiling_matches_linear_scan() {
    let sizes = [32, 48, 16, 72, 48, 24, 104, 64];
    let bed = bed(&sizes);
    let mut tree = FreeTree::new(bed.base);

    unsafe {
      for &block in &bed.blocks {
        tree.insert(block);
      }

      for target in (8..=128).step_by(8) {
        let found = tree.ceiling(target).map(|bp| unsafe { bp.size() });
        assert_eq!(found, scan_ceiling(&sizes, target), "target {target}");
      }
    }
  }

  #[test]
  fn equal_sizes_descend_left() {
    let bed = bed(&[48, 48, 48]);
    let mut tree = FreeTree::new(bed.base);

    unsafe {
      for &block in &bed.blocks {
        tree.insert(block);
      }

      let first = bed.blocks[0];
      let second = bed.blocks[1];
      let third = bed.blocks[2];

      assert_eq!(tree.root(), Some(first));
      assert_eq!(tree.left(first), Some(second));
      assert_eq!(tree.left(second), Some(third));

      // An exact match stops at the first node on the descent.
      assert_eq!(tree.ceiling(48), Some(first));
    }
  }

  #[test]
  fn two_child_removal_promotes_predecessor() {
    // Insertion order shapes the tree:
    //        64
    //      /    \
    //    32      96
    //   /  \    /  \
    //  16   48 80  112
    let bed = bed(&[64, 32, 96, 16, 48, 80, 112]);
    let mut tree = FreeTree::new(bed.base);

    unsafe {
      for &block in &bed.blocks {
        tree.insert(block);
      }

      let by_size = |size: usize| {
        *bed
          .blocks
          .iter()
          .find(|bp| unsafe { bp.size() } == size)
          .unwrap()
      };

      tree.remove(by_size(64));

      // The in-order predecessor (rightmost of the left subtree) takes
      // the root slot.
      let root = tree.root().unwrap();
      assert_eq!(root, by_size(48));
      assert_eq!(tree.left(root), Some(by_size(32)));
      assert_eq!(tree.right(root), Some(by_size(96)));
      assert_eq!(tree.left(by_size(32)), Some(by_size(16)));
      assert_eq!(tree.right(by_size(32)), None);

      assert_eq!(sizes_of(&tree), [16, 32, 48, 80, 96, 112]);
    }
  }

  #[test]
  fn removal_handles_every_child_count() {
    let bed = bed(&[64, 32, 96, 16, 48]);
    let mut tree = FreeTree::new(bed.base);

    unsafe {
      for &block in &bed.blocks {
        tree.insert(block);
      }

      // Leaf.
      tree.remove(bed.blocks[3]);
      assert_eq!(sizes_of(&tree), [32, 48, 64, 96]);

      // Single child (32 now only holds 48 on the right).
      tree.remove(bed.blocks[1]);
      assert_eq!(sizes_of(&tree), [48, 64, 96]);

      // Root with two children.
      tree.remove(bed.blocks[0]);
      assert_eq!(sizes_of(&tree), [48, 96]);

      tree.remove(bed.blocks[4]);
      tree.remove(bed.blocks[2]);
      assert!(tree.root().is_none());
    }
  }

  #[test]
  fn randomized_insert_remove_tracks_mirror() {
    let sizes: Vec<usize> = (0..48).map(|i| MIN_BLOCK + 8 * (i % 12)).collect();
    let bed = bed(&sizes);
    let mut tree = FreeTree::new(bed.base);

    let mut rng = rand::rngs::StdRng::seed_from_u64(0x42);
    let mut indexed = vec![false; bed.blocks.len()];

    unsafe {
      for _ in 0..2000 {
        let pick = rng.random_range(0..bed.blocks.len());
        if indexed[pick] {
          tree.remove(bed.blocks[pick]);
        } else {
          tree.insert(bed.blocks[pick]);
        }
        indexed[pick] = !indexed[pick];

        let mirror: Vec<usize> = bed
          .blocks
          .iter()
          .zip(&indexed)
          .filter(|&(_, &index)| index)
          .map(|(bp, _)| unsafe { bp.size() })
          .collect();

        let mut in_tree = sizes_of(&tree);
        let mut expected = mirror.clone();
        in_tree.sort_unstable();
        expected.sort_unstable();
        assert_eq!(in_tree, expected);

        let target = MIN_BLOCK + 8 * rng.random_range(0..14);
        let found = tree.ceiling(target).map(|bp| unsafe { bp.size() });
        assert_eq!(found, scan_ceiling(&mirror, target), "target {target}");
      }
    }
  }
}
