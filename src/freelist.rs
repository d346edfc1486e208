use std::marker::PhantomData;

use crate::block::{Block, Links, MIN_BLOCK_SIZE};

/// Linked list to keep track of free [`Block`].
///
/// The list does not own any storage of its own. We use the payload of every
/// free block to store the links, since a free block only needs its tags and
/// the payload won't be read by anyone until the block is allocated again:
///
/// ```text
/// +------------------------+ <--------+
/// |     header (Tag)       |          |-------> Boundary tag
/// +------------------------+ <--------+
/// |       Links.prev       |          |
/// +------------------------+          |-------> Free list node
/// |       Links.next       |          |
/// +------------------------+ <--------+
/// |                        |
/// |      Free Payload      |
/// |        (unused)        |
/// |          ...           |
/// +------------------------+
/// |     footer (Tag)       |
/// +------------------------+
/// ```
///
/// The list is unordered and not circular. New blocks are pushed to the
/// front, and lookups are first-fit from the head.
///
/// ```text
///    head
///     |
///     v
/// +--------+  next   +--------+  next   +--------+
/// |  Free  | ------> |  Free  | ------> |  Free  | ----> None
/// |        | <------ |        | <------ |        |
/// +--------+  prev   +--------+  prev   +--------+
/// ```
pub(crate) struct FreeList {
    head: Option<Block>,
    len: usize,
}

pub(crate) struct Iter<'a> {
    current: Option<Block>,
    marker: PhantomData<&'a FreeList>,
}

impl FreeList {
    /// Creates a new empty List
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// It tells whether the FreeList is empty or not.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Pushes `block` to the front of the list.
    ///
    /// # Safety
    ///
    /// `block` must be a free block that is not already on the list.
    pub unsafe fn insert(&mut self, block: Block) {
        unsafe {
            block.set_links(Links { prev: None, next: self.head });

            if let Some(head) = self.head {
                head.set_prev(Some(block));
            }
        }

        self.head = Some(block);
        self.len += 1;
    }

    /// Unlinks `block` using its own links.
    ///
    /// # Safety
    ///
    /// `block` must currently be on this list.
    pub unsafe fn remove(&mut self, block: Block) {
        unsafe {
            let Links { prev, next } = block.links();

            match (prev, next) {
                // Only node.
                (None, None) => self.head = None,
                // Head with a successor.
                (None, Some(next)) => {
                    next.set_prev(None);
                    self.head = Some(next);
                }
                // Tail with a predecessor.
                (Some(prev), None) => prev.set_next(None),
                (Some(prev), Some(next)) => {
                    prev.set_next(Some(next));
                    next.set_prev(Some(prev));
                }
            }
        }

        self.len -= 1;
    }

    /// Returns the first free block whose total size is at least `size`.
    ///
    /// This is first-fit, not best-fit: we stop at the first block that can
    /// hold the request.
    ///
    /// # Safety
    ///
    /// Every block on the list must be a valid free block.
    pub unsafe fn find_fit(&self, size: usize) -> Option<Block> {
        if self.is_empty() {
            return None;
        }

        unsafe { self.iter().find(|block| block.size() >= size) }
    }

    /// Takes `block` out of the list and marks `size` bytes of it as
    /// allocated.
    ///
    /// When the leftover is larger than [`MIN_BLOCK_SIZE`] it becomes a new
    /// free block right after the allocated one. Otherwise the whole block is
    /// handed out, since a smaller remainder could not even hold its links.
    ///
    /// # Safety
    ///
    /// `block` must be on this list and `size` must be a multiple of
    /// [`crate::block::ALIGNMENT`] not larger than the block.
    pub unsafe fn mark_allocated(&mut self, block: Block, size: usize) {
        unsafe {
            let available = block.size();
            debug_assert!(available >= size);

            self.remove(block);

            let remainder = available - size;

            if remainder > MIN_BLOCK_SIZE {
                block.set_tags(size, true);

                let rest = block.next();
                rest.set_tags(remainder, false);
                self.insert(rest);

                log::trace!("split {available} byte block at {:p} into {size} + {remainder}", block.payload());
            } else {
                block.set_tags(available, true);
            }
        }
    }

    /// Merges a block that was just marked free with its free neighbours and
    /// makes sure the result is on the list. Returns the merged block.
    ///
    /// Free blocks are never adjacent outside of this function, so looking
    /// at the immediate neighbours is enough. Page sentinels always report
    /// allocated, so merging stops at page boundaries.
    ///
    /// # Safety
    ///
    /// `block` must be a free block, not on the list, surrounded by valid
    /// blocks or sentinels.
    pub unsafe fn coalesce(&mut self, block: Block) -> Block {
        unsafe {
            let prev_allocated = block.prev_footer().is_allocated();
            let next = block.next();
            let next_allocated = next.is_allocated();
            let size = block.size();

            match (prev_allocated, next_allocated) {
                (true, true) => {
                    self.insert(block);
                    block
                }
                (true, false) => {
                    self.remove(next);
                    block.set_tags(size + next.size(), false);
                    self.insert(block);

                    log::trace!("merged {:p} with next neighbour", block.payload());
                    block
                }
                (false, true) => {
                    // Previous block is already on the list, only its tags change.
                    let prev = block.prev();
                    prev.set_tags(prev.size() + size, false);

                    log::trace!("merged {:p} into previous neighbour", block.payload());
                    prev
                }
                (false, false) => {
                    let prev = block.prev();
                    self.remove(next);
                    prev.set_tags(prev.size() + size + next.size(), false);

                    log::trace!("merged {:p} with both neighbours", block.payload());
                    prev
                }
            }
        }
    }

    /// Iterates over the free blocks from the head.
    ///
    /// # Safety
    ///
    /// Every block on the list must be a valid free block for as long as the
    /// iterator is used.
    pub unsafe fn iter(&self) -> Iter<'_> {
        Iter { current: self.head, marker: PhantomData }
    }
}

impl Iterator for Iter<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;

        // SAFETY: guaranteed by the caller of `FreeList::iter`.
        self.current = unsafe { block.links().next };

        Some(block)
    }
}
