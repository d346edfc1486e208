//! Heap consistency walker.
//!
//! Walks every region block by block from the prologue to the epilogue and
//! then the free list, and verifies the invariants the allocator relies on.

use crate::{
    block::{BlockState, ALIGNMENT, MIN_BLOCK_SIZE},
    error::HeapError,
    freelist::FreeList,
    region::Region,
};

/// Summary of a successful [`crate::MemAlloc::check`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct HeapReport {
    /// Regions currently mapped.
    pub regions: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
}

/// # Safety
///
/// `regions` must be the head of the region chain owned by the allocator that
/// also owns `free_list`.
pub(crate) unsafe fn check(regions: Option<Region>, free_list: &FreeList) -> Result<HeapReport, HeapError> {
    let mut report = HeapReport::default();
    let mut current = regions;

    unsafe {
        while let Some(region) = current {
            walk_region(region, &mut report)?;
            report.regions += 1;
            current = region.next();
        }

        let mut listed = 0;
        for block in free_list.iter() {
            if block.state() == BlockState::Allocated {
                return Err(HeapError::AllocatedInFreeList { addr: block.addr() });
            }
            listed += 1;
        }

        if listed != report.free_blocks || listed != free_list.len() {
            return Err(HeapError::FreeListMismatch { listed, found: report.free_blocks });
        }
    }

    Ok(report)
}

unsafe fn walk_region(region: Region, report: &mut HeapReport) -> Result<(), HeapError> {
    unsafe {
        if !region.has_prologue() {
            return Err(HeapError::BrokenPrologue { region: region.start().as_ptr() as usize });
        }

        let mut block = region.first_block();
        let mut prev_free = false;

        while !Region::is_epilogue(block.header()) {
            let (header, footer) = (block.header(), block.footer());
            let size = header.size();

            if size < MIN_BLOCK_SIZE || block.addr() % ALIGNMENT != 0 {
                return Err(HeapError::BadBlock { addr: block.addr(), size });
            }

            if header != footer {
                return Err(HeapError::TagMismatch { addr: block.addr(), header: header.raw(), footer: footer.raw() });
            }

            if header.is_allocated() {
                report.allocated_blocks += 1;
                report.allocated_bytes += size;
                prev_free = false;
            } else {
                if prev_free {
                    return Err(HeapError::AdjacentFree { addr: block.addr() });
                }
                report.free_blocks += 1;
                report.free_bytes += size;
                prev_free = true;
            }

            block = block.next();
        }
    }

    Ok(())
}
