use std::{mem, ptr::NonNull};

/// Every payload we hand out is aligned to this boundary, and every block size
/// is a multiple of it.
pub(crate) const ALIGNMENT: usize = 16;

/// Size of a boundary tag (header or footer) in bytes.
pub(crate) const TAG_SIZE: usize = mem::size_of::<Tag>();

/// Header plus footer.
pub(crate) const BLOCK_OVERHEAD: usize = 2 * TAG_SIZE;

/// Smallest block we ever create: both tags plus room for the free list
/// [`Links`] once the block is released.
pub(crate) const MIN_BLOCK_SIZE: usize = BLOCK_OVERHEAD + ALIGNMENT;

const SIZE_MASK: u64 = !(ALIGNMENT as u64 - 1);
const ALLOCATED_BIT: u64 = 0x1;

const _: () = assert!(mem::size_of::<Links>() <= MIN_BLOCK_SIZE - BLOCK_OVERHEAD);

/// Boundary tag. Size and allocation flag packed into a single word.
///
/// Block sizes are always multiples of [`ALIGNMENT`], so the low 4 bits of
/// the size are free and the lowest one stores whether the block is in use.
///
/// ```text
/// 63                                  4   3   2   1   0
/// +-----------------------------------+---+---+---+---+
/// |            block size             | 0 | 0 | 0 | a |
/// +-----------------------------------+---+---+---+---+
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub(crate) struct Tag(u64);

impl Tag {
    #[inline]
    pub const fn pack(size: usize, allocated: bool) -> Self {
        Self((size as u64 & SIZE_MASK) | allocated as u64)
    }

    #[inline]
    pub const fn size(self) -> usize {
        (self.0 & SIZE_MASK) as usize
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED_BIT == ALLOCATED_BIT
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Free list linkage. It overlays the first bytes of the payload while the
/// block is free and means nothing once the block is handed out again.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(C)]
pub(crate) struct Links {
    pub prev: Option<Block>,
    pub next: Option<Block>,
}

/// Handle to a block, represented by its payload address.
///
/// Every block carries the same tag at both ends, so all navigation is done
/// from the size field alone:
///
/// ```text
///            +--------+------------------------------+--------+
///  previous  | header |           payload            | footer |  next
///  footer -> |  Tag   | (user data or free `Links`)  |  Tag   | <- header
///            +--------+------------------------------+--------+
///                     ^
///                     +-- Block(payload)
///            <------------------- size() ------------------->
/// ```
///
/// None of the methods check anything: the handle must point at a block
/// written by this crate, which is why most of them are `unsafe`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub(crate) struct Block(NonNull<u8>);

/// What the payload of a block currently holds.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum BlockState {
    Free(Links),
    Allocated,
}

impl Block {
    #[inline]
    pub const fn from_payload(payload: NonNull<u8>) -> Self {
        Self(payload)
    }

    #[inline]
    pub const fn payload(self) -> NonNull<u8> {
        self.0
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    fn header_ptr(self) -> *mut Tag {
        self.0.as_ptr().wrapping_sub(TAG_SIZE).cast()
    }

    /// # Safety
    ///
    /// `self` must be a valid block.
    #[inline]
    pub unsafe fn header(self) -> Tag {
        unsafe { self.header_ptr().read() }
    }

    /// # Safety
    ///
    /// `self` must be a valid block.
    #[inline]
    pub unsafe fn footer(self) -> Tag {
        unsafe { self.footer_ptr().read() }
    }

    /// # Safety
    ///
    /// The header of `self` must hold the size of the block.
    #[inline]
    unsafe fn footer_ptr(self) -> *mut Tag {
        unsafe { self.0.as_ptr().add(self.size()).sub(BLOCK_OVERHEAD).cast() }
    }

    /// # Safety
    ///
    /// `self` must be a valid block.
    #[inline]
    pub unsafe fn size(self) -> usize {
        unsafe { self.header().size() }
    }

    /// # Safety
    ///
    /// `self` must be a valid block.
    #[inline]
    pub unsafe fn is_allocated(self) -> bool {
        unsafe { self.header().is_allocated() }
    }

    /// Rewrites both tags of the block. The header goes first since the
    /// footer position is derived from it.
    ///
    /// # Safety
    ///
    /// `size` bytes starting at the header of `self` must be owned by the
    /// allocator.
    #[inline]
    pub unsafe fn set_tags(self, size: usize, allocated: bool) {
        let tag = Tag::pack(size, allocated);
        unsafe {
            self.header_ptr().write(tag);
            self.footer_ptr().write(tag);
        }
    }

    /// Block located right after this one in memory.
    ///
    /// # Safety
    ///
    /// `self` must be a valid block.
    #[inline]
    pub unsafe fn next(self) -> Block {
        unsafe { Block(self.0.add(self.size())) }
    }

    /// Footer of the block located right before this one.
    ///
    /// # Safety
    ///
    /// `self` must be a valid block that is not the first thing in memory.
    #[inline]
    pub unsafe fn prev_footer(self) -> Tag {
        unsafe { self.0.as_ptr().sub(BLOCK_OVERHEAD).cast::<Tag>().read() }
    }

    /// Block located right before this one in memory.
    ///
    /// # Safety
    ///
    /// Same as [`Block::prev_footer`].
    #[inline]
    pub unsafe fn prev(self) -> Block {
        unsafe { Block(self.0.sub(self.prev_footer().size())) }
    }

    /// # Safety
    ///
    /// `self` must be a free block.
    #[inline]
    pub unsafe fn links(self) -> Links {
        unsafe { self.0.cast::<Links>().read() }
    }

    /// # Safety
    ///
    /// `self` must be a free block.
    #[inline]
    pub unsafe fn set_links(self, links: Links) {
        unsafe { self.0.cast::<Links>().write(links) }
    }

    /// # Safety
    ///
    /// `self` must be a free block.
    #[inline]
    pub unsafe fn set_prev(self, prev: Option<Block>) {
        unsafe { (*self.0.cast::<Links>().as_ptr()).prev = prev }
    }

    /// # Safety
    ///
    /// `self` must be a free block.
    #[inline]
    pub unsafe fn set_next(self, next: Option<Block>) {
        unsafe { (*self.0.cast::<Links>().as_ptr()).next = next }
    }

    /// # Safety
    ///
    /// `self` must be a valid block.
    pub unsafe fn state(self) -> BlockState {
        unsafe {
            if self.is_allocated() {
                BlockState::Allocated
            } else {
                BlockState::Free(self.links())
            }
        }
    }
}
