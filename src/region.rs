use std::ptr::NonNull;

use crate::{
    block::{Block, Tag, ALIGNMENT, BLOCK_OVERHEAD, TAG_SIZE},
    utils::checked_align,
};

/// Bytes of every region that never belong to a usable block: the link word,
/// the prologue and the epilogue.
pub(crate) const REGION_OVERHEAD: usize = TAG_SIZE + PROLOGUE_SIZE + TAG_SIZE;

/// The prologue is a block with both tags and an empty payload.
const PROLOGUE_SIZE: usize = BLOCK_OVERHEAD;

const PROLOGUE: Tag = Tag::pack(PROLOGUE_SIZE, true);
const EPILOGUE: Tag = Tag::pack(0, true);

/// Offset of the first real payload from the start of the region.
const FIRST_PAYLOAD: usize = TAG_SIZE + PROLOGUE_SIZE + TAG_SIZE;

const _: () = assert!(FIRST_PAYLOAD % ALIGNMENT == 0);

/// Handle to one page-aligned memory region obtained from the
/// [`crate::kernel::PageProvider`].
///
/// Every region is framed by sentinels so that neighbour lookups never leave
/// the region:
///
/// ```text
/// +--------+---------+---------+--------+----------- ... -----+--------+----------+
/// |  next  | prolog. | prolog. | header |                     | footer | epilogue |
/// | region |  16/1   |  16/1   |  S/0   |      free block     |  S/0   |   0/1    |
/// +--------+---------+---------+--------+----------- ... -----+--------+----------+
/// 0        8         16        24       32
/// ```
///
/// The first word would otherwise be padding to get the first payload
/// 16-aligned. We use it to chain all the regions owned by the allocator.
///
/// The prologue is the only allocated block of size 16 (real blocks are at
/// least [`crate::block::MIN_BLOCK_SIZE`]) and the epilogue is the only tag of
/// size 0, so both can be recognised from their tags alone.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub(crate) struct Region(NonNull<u8>);

impl Region {
    /// Writes the sentinels and one free block spanning the rest of `len`
    /// bytes at `start`. Returns the region and its free block, which is not
    /// on any free list yet.
    ///
    /// # Safety
    ///
    /// `start` must be 16-aligned and point to `len` writable bytes, and `len`
    /// must be a multiple of [`ALIGNMENT`] large enough for one minimum block.
    pub unsafe fn format(start: NonNull<u8>, len: usize, next: Option<Region>) -> (Region, Block) {
        let region = Region(start);

        unsafe {
            region.set_next(next);

            let prologue = Block::from_payload(start.add(TAG_SIZE + TAG_SIZE));
            prologue.set_tags(PROLOGUE_SIZE, true);

            let block = region.first_block();
            block.set_tags(len - REGION_OVERHEAD, false);

            block.next().payload().as_ptr().sub(TAG_SIZE).cast::<Tag>().write(EPILOGUE);

            (region, block)
        }
    }

    /// Finds the region a block lives in, if that block covers the whole
    /// usable space between the prologue and the epilogue.
    ///
    /// # Safety
    ///
    /// `block` must be a valid block inside a formatted region.
    pub unsafe fn spanned_by(block: Block) -> Option<Region> {
        unsafe {
            if block.prev_footer() != PROLOGUE || block.next().header() != EPILOGUE {
                return None;
            }

            Some(Region(block.payload().sub(FIRST_PAYLOAD)))
        }
    }

    #[inline]
    pub fn start(self) -> NonNull<u8> {
        self.0
    }

    /// # Safety
    ///
    /// `self` must be a formatted region.
    #[inline]
    pub unsafe fn next(self) -> Option<Region> {
        unsafe { self.0.cast::<Option<Region>>().read() }
    }

    /// # Safety
    ///
    /// `self` must point to writable memory of a region.
    #[inline]
    pub unsafe fn set_next(self, next: Option<Region>) {
        unsafe { self.0.cast::<Option<Region>>().write(next) }
    }

    /// # Safety
    ///
    /// `self` must be a formatted region.
    #[inline]
    pub unsafe fn first_block(self) -> Block {
        unsafe { Block::from_payload(self.0.add(FIRST_PAYLOAD)) }
    }

    /// Whether both prologue tags are intact.
    ///
    /// # Safety
    ///
    /// `self` must be a formatted region.
    pub unsafe fn has_prologue(self) -> bool {
        unsafe {
            let first = self.first_block();
            let prologue = first.prev();
            first.prev_footer() == PROLOGUE && prologue.header() == PROLOGUE
        }
    }

    /// Tells whether `tag` marks the end of a region.
    #[inline]
    pub fn is_epilogue(tag: Tag) -> bool {
        tag == EPILOGUE
    }
}

/// Page growth heuristic.
///
/// Regions grow geometrically (each one doubles the previous size) so that
/// the number of calls to the page provider stays low, until doubling would
/// go past the ceiling. From then on new regions keep the last size. A
/// request larger than the doubled size always gets a region of its own
/// size.
#[derive(Debug, Default)]
pub(crate) struct Growth {
    /// Size of the last region that set the baseline. 0 before the first one.
    last: usize,
}

/// Outcome of [`Growth::plan`]. Nothing is recorded until
/// [`Growth::commit`], so a failed acquisition leaves the baseline alone.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct GrowthPlan {
    /// Bytes to request from the page provider.
    pub size: usize,
    /// Whether `size` becomes the new baseline.
    pub rebase: bool,
}

impl Growth {
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    #[inline]
    pub fn last(&self) -> usize {
        self.last
    }

    /// Computes the size of the next region for a block of `block_size`
    /// bytes. Returns `None` if the numbers overflow.
    pub fn plan(&self, block_size: usize, page_size: usize, ceiling: usize) -> Option<GrowthPlan> {
        let doubled = checked_align(self.last.checked_mul(2)?, page_size)?;
        let needed = checked_align(block_size.checked_add(REGION_OVERHEAD)?, page_size)?;

        let plan = if needed > doubled {
            GrowthPlan { size: needed, rebase: true }
        } else if doubled <= ceiling {
            GrowthPlan { size: doubled, rebase: true }
        } else {
            GrowthPlan { size: self.last.max(needed), rebase: false }
        };

        Some(plan)
    }

    pub fn commit(&mut self, plan: GrowthPlan) {
        if plan.rebase {
            self.last = plan.size;
        }
    }

    pub fn reset(&mut self) {
        self.last = 0;
    }
}
