use std::ptr::NonNull;

use crate::{
    block::{Block, ALIGNMENT, BLOCK_OVERHEAD, MIN_BLOCK_SIZE},
    check::{self, HeapReport},
    config::Config,
    error::{AllocError, HeapError},
    freelist::FreeList,
    kernel::{Kernel, PageProvider},
    region::{Growth, Region, REGION_OVERHEAD},
    utils::checked_align,
};

/// Boundary tag allocator over memory regions obtained from a
/// [`PageProvider`].
///
/// ```text
///   allocate(size)
///        |
///        v
///   first fit in FreeList ---- hit ----> split / mark allocated
///        |                                      ^
///       miss                                    |
///        v                                      |
///   grow: map new region, insert its block -----+
///
///   release(ptr)
///        |
///        v
///   mark free -> coalesce -> spans a whole big region? -> unmap it
/// ```
///
/// The allocator is single threaded. It is not [`Sync`], and every operation
/// takes `&mut self`.
pub struct MemAlloc<P: PageProvider = Kernel> {
    provider: P,
    config: Config,
    free_list: FreeList,
    growth: Growth,
    /// Head of the chain of regions we own.
    regions: Option<Region>,
}

impl MemAlloc<Kernel> {
    /// Allocator backed by the operating system with the default [`Config`].
    pub fn new() -> Self {
        Self::with_provider(Kernel::new(), Config::default())
    }

    /// Allocator backed by the operating system.
    pub fn with_config(config: Config) -> Self {
        Self::with_provider(Kernel::new(), config)
    }
}

impl Default for MemAlloc<Kernel> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PageProvider> MemAlloc<P> {
    pub fn with_provider(provider: P, config: Config) -> Self {
        Self { provider, config, free_list: FreeList::new(), growth: Growth::new(), regions: None }
    }

    /// Returns every region to the provider and starts from scratch. Pointers
    /// handed out before are invalid afterwards.
    pub fn init(&mut self) {
        unsafe { self.release_regions() };

        self.free_list = FreeList::new();
        self.growth.reset();
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Allocates at least `size` bytes. The returned pointer is aligned to 16
    /// bytes.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let block_size = size
            .checked_add(BLOCK_OVERHEAD)
            .and_then(|size| checked_align(size, ALIGNMENT))
            .ok_or(AllocError::TooLarge { requested: size })?
            .max(MIN_BLOCK_SIZE);

        unsafe {
            let block = match self.free_list.find_fit(block_size) {
                Some(block) => block,
                None => self.extend(size, block_size)?,
            };

            self.free_list.mark_allocated(block, block_size);

            log::trace!("allocated {size} bytes at {:p}", block.payload());

            Ok(block.payload())
        }
    }

    /// Releases the block at `ptr`.
    ///
    /// The block is merged with its free neighbours. If the result covers a
    /// whole region of at least [`Config::release_threshold`] bytes, the
    /// region goes back to the provider.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`MemAlloc::allocate`] on this
    /// allocator and not released since. Nothing of this is checked.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) {
        unsafe {
            let block = Block::from_payload(ptr);
            let size = block.size();

            block.set_tags(size, false);
            let block = self.free_list.coalesce(block);

            log::trace!("released {size} bytes at {ptr:p}");

            let Some(region) = Region::spanned_by(block) else {
                return;
            };

            let size = block.size();
            if size < self.config.release_threshold(self.provider.page_size()) {
                return;
            }

            self.free_list.remove(block);
            self.unlink_region(region);

            let len = size + REGION_OVERHEAD;
            log::debug!("returning {len} byte region at {:p}", region.start());
            self.provider.release(region.start(), len);
        }
    }

    /// Payload bytes available in the allocated block at `ptr`. This can be
    /// more than what was asked for because of rounding.
    ///
    /// # Safety
    ///
    /// Same as [`MemAlloc::release`].
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { Block::from_payload(ptr).size() - BLOCK_OVERHEAD }
    }

    /// Walks all regions and the free list and verifies their invariants.
    pub fn check(&self) -> Result<HeapReport, HeapError> {
        // SAFETY: the chain and the list are only built by this allocator.
        unsafe { check::check(self.regions, &self.free_list) }
    }

    /// Maps a new region big enough for `block_size` and puts its single
    /// free block on the free list.
    unsafe fn extend(&mut self, requested: usize, block_size: usize) -> Result<Block, AllocError> {
        let page_size = self.provider.page_size();

        let plan = self
            .growth
            .plan(block_size, page_size, self.config.growth_ceiling(page_size))
            .ok_or(AllocError::TooLarge { requested })?;

        let Some(start) = self.provider.acquire(plan.size) else {
            log::warn!("could not map {} bytes for a {requested} byte allocation", plan.size);
            return Err(AllocError::OutOfMemory { requested });
        };

        self.growth.commit(plan);

        log::debug!("mapped {} byte region at {start:p} (baseline {})", plan.size, self.growth.last());

        unsafe {
            let (region, block) = Region::format(start, plan.size, self.regions);
            self.regions = Some(region);
            self.free_list.insert(block);

            Ok(block)
        }
    }

    /// Removes `region` from the chain.
    unsafe fn unlink_region(&mut self, region: Region) {
        unsafe {
            let next = region.next();

            if self.regions == Some(region) {
                self.regions = next;
                return;
            }

            let mut current = self.regions;
            while let Some(candidate) = current {
                if candidate.next() == Some(region) {
                    candidate.set_next(next);
                    return;
                }
                current = candidate.next();
            }
        }

        debug_assert!(false, "region {:p} is not owned by this allocator", region.start());
    }

    /// Gives every region back to the provider. Leaves `self.regions` empty
    /// but does not touch the free list.
    unsafe fn release_regions(&mut self) {
        while let Some(region) = self.regions {
            unsafe {
                self.regions = region.next();

                let len = region_len(region);
                self.provider.release(region.start(), len);
            }
        }
    }
}

impl<P: PageProvider> Drop for MemAlloc<P> {
    fn drop(&mut self) {
        unsafe { self.release_regions() }
    }
}

/// Length of a region, found by walking its blocks up to the epilogue.
unsafe fn region_len(region: Region) -> usize {
    unsafe {
        let mut block = region.first_block();
        while !Region::is_epilogue(block.header()) {
            block = block.next();
        }

        block.addr() - region.start().as_ptr() as usize
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::kernel::tracking::TrackingKernel;

    const PAGE: usize = 4096;

    fn allocator() -> MemAlloc<TrackingKernel> {
        let mut allocator = MemAlloc::with_provider(TrackingKernel::new(), Config::default());
        allocator.init();
        allocator
    }

    fn block_of(ptr: NonNull<u8>) -> Block {
        Block::from_payload(ptr)
    }

    #[test]
    fn allocation_reuses_released_block() {
        let mut allocator = allocator();

        let first = allocator.allocate(100).unwrap();
        assert_eq!(first.as_ptr() as usize % 16, 0);

        unsafe { allocator.release(first) };

        let second = allocator.allocate(100).unwrap();
        assert_eq!(first, second);
        assert_eq!(allocator.provider().acquired, vec![PAGE]);
    }

    #[test]
    fn payloads_are_aligned_and_writable() {
        let mut allocator = allocator();
        let mut pointers = Vec::new();

        for size in [0, 1, 7, 15, 16, 17, 100, 255, 1000, 4000, 10_000] {
            let ptr = allocator.allocate(size).unwrap();
            assert_eq!(ptr.as_ptr() as usize % 16, 0, "size {size}");

            unsafe {
                assert!(allocator.usable_size(ptr) >= size);
                ptr.as_ptr().write_bytes(0xAB, size);
            }
            pointers.push((ptr, size));
        }

        for (ptr, size) in &pointers {
            let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), *size) };
            assert!(bytes.iter().all(|&byte| byte == 0xAB));
        }

        allocator.check().unwrap();
    }

    #[test]
    fn first_allocation_splits_the_region() {
        let mut allocator = allocator();

        let ptr = allocator.allocate(100).unwrap();

        unsafe {
            let block = block_of(ptr);
            assert_eq!(block.size(), 128);
            assert!(block.is_allocated());

            let rest = block.next();
            assert_eq!(rest.size(), PAGE - REGION_OVERHEAD - 128);
            assert!(!rest.is_allocated());
            assert_eq!(unsafe { allocator.free_list.iter().next() }, Some(rest));
        }

        let report = allocator.check().unwrap();
        assert_eq!(report.allocated_blocks, 1);
        assert_eq!(report.free_blocks, 1);
    }

    #[test]
    fn small_remainders_are_not_split() {
        let mut allocator = allocator();

        // Leaves exactly 32 bytes over in a fresh 4096 byte region.
        let ptr = allocator.allocate(4016).unwrap();

        unsafe {
            assert_eq!(block_of(ptr).size(), PAGE - REGION_OVERHEAD);
            assert_eq!(allocator.usable_size(ptr), PAGE - REGION_OVERHEAD - BLOCK_OVERHEAD);
        }
        assert!(allocator.free_list.is_empty());
        assert_eq!(allocator.provider().acquired, vec![PAGE]);
    }

    #[test]
    fn released_blocks_coalesce() {
        let mut allocator = allocator();

        let a = allocator.allocate(64).unwrap();
        let b = allocator.allocate(64).unwrap();
        let c = allocator.allocate(64).unwrap();
        let d = allocator.allocate(64).unwrap();

        unsafe {
            // Neighbours allocated on both sides.
            allocator.release(b);
            assert_eq!(allocator.check().unwrap().free_blocks, 2);

            // Merges with `b` before and nothing after.
            allocator.release(c);
            assert_eq!(allocator.check().unwrap().free_blocks, 2);
            assert_eq!(block_of(b).size(), 160);

            // Merges with the free tail after.
            allocator.release(d);
            assert_eq!(allocator.check().unwrap().free_blocks, 1);

            // Merges on both sides: the region is one free block again.
            allocator.release(a);
        }

        let report = allocator.check().unwrap();
        assert_eq!(report.free_blocks, 1);
        assert_eq!(report.allocated_blocks, 0);
        assert_eq!(report.free_bytes, PAGE - REGION_OVERHEAD);
    }

    #[test]
    fn no_adjacent_free_blocks_after_mixed_releases() {
        let mut allocator = allocator();

        let pointers: Vec<_> = (0..64).map(|i| allocator.allocate(16 + (i % 7) * 40).unwrap()).collect();

        for (i, ptr) in pointers.iter().enumerate() {
            if i % 3 == 0 {
                unsafe { allocator.release(*ptr) };
                allocator.check().unwrap();
            }
        }

        for (i, ptr) in pointers.iter().enumerate().rev() {
            if i % 3 != 0 {
                unsafe { allocator.release(*ptr) };
                allocator.check().unwrap();
            }
        }

        let report = allocator.check().unwrap();
        assert_eq!(report.allocated_blocks, 0);
        assert_eq!(report.free_blocks, report.regions);
    }

    #[test]
    fn growth_never_exceeds_the_ceiling() {
        let mut allocator = allocator();

        for _ in 0..2000 {
            allocator.allocate(1000).unwrap();
        }

        let acquired = &allocator.provider().acquired;
        assert!(acquired.len() > 6);
        assert!(acquired.iter().all(|&len| len <= PAGE * 60));
        assert_eq!(&acquired[..3], &[PAGE, 2 * PAGE, 4 * PAGE]);
    }

    #[test]
    fn large_allocations_get_a_matching_region() {
        let mut allocator = allocator();

        let ptr = allocator.allocate(100 * PAGE).unwrap();

        assert_eq!(allocator.provider().acquired, vec![101 * PAGE]);
        unsafe { assert!(allocator.usable_size(ptr) >= 100 * PAGE) };
    }

    #[test]
    fn big_regions_are_released_when_empty() {
        let mut allocator = allocator();

        let ptr = allocator.allocate(50_000).unwrap();
        assert_eq!(allocator.provider().live(), 1);

        unsafe { allocator.release(ptr) };

        assert_eq!(allocator.provider().live(), 0);
        assert_eq!(allocator.provider().released.len(), 1);
        assert_eq!(allocator.provider().released[0].1, 13 * PAGE);

        let report = allocator.check().unwrap();
        assert_eq!(report, HeapReport::default());
    }

    #[test]
    fn small_regions_stay_resident() {
        let mut allocator = allocator();

        let ptr = allocator.allocate(100).unwrap();
        unsafe { allocator.release(ptr) };

        assert_eq!(allocator.provider().live(), 1);
        assert!(allocator.provider().released.is_empty());
        assert_eq!(allocator.check().unwrap().regions, 1);
    }

    #[test]
    fn big_region_is_released_once_fully_free() {
        let mut allocator = allocator();

        let big = allocator.allocate(50_000).unwrap();
        // Served from the tail of the big region.
        let small = allocator.allocate(100).unwrap();
        assert_eq!(allocator.provider().live(), 1);

        unsafe { allocator.release(big) };
        assert_eq!(allocator.provider().live(), 1);
        allocator.check().unwrap();

        unsafe { allocator.release(small) };
        assert_eq!(allocator.provider().live(), 0);
    }

    #[test]
    fn released_region_in_the_middle_of_the_chain() {
        let mut allocator = allocator();

        let first = allocator.allocate(100).unwrap();
        let big = allocator.allocate(50_000).unwrap();
        let last = allocator.allocate(200_000).unwrap();
        assert_eq!(allocator.check().unwrap().regions, 3);

        unsafe { allocator.release(big) };

        let report = allocator.check().unwrap();
        assert_eq!(report.regions, 2);
        assert_eq!(report.allocated_blocks, 2);

        unsafe {
            allocator.release(last);
            allocator.release(first);
        }
        assert_eq!(allocator.check().unwrap().regions, 1);
    }

    #[test]
    fn release_threshold_is_configurable() {
        let config = Config::new().release_threshold_pages(1);
        let mut allocator = MemAlloc::with_provider(TrackingKernel::new(), config);

        // Two pages, above the one page threshold once free.
        let ptr = allocator.allocate(5000).unwrap();
        assert_eq!(allocator.provider().acquired, vec![2 * PAGE]);

        unsafe { allocator.release(ptr) };

        assert_eq!(allocator.provider().live(), 0);
    }

    #[test]
    fn failed_growth_commits_nothing() {
        let mut allocator = MemAlloc::with_provider(TrackingKernel::with_budget(1), Config::default());

        let ptr = allocator.allocate(3000).unwrap();

        assert_eq!(allocator.allocate(3000), Err(AllocError::OutOfMemory { requested: 3000 }));
        assert_eq!(allocator.growth.last(), PAGE);

        let report = allocator.check().unwrap();
        assert_eq!(report.regions, 1);
        assert_eq!(report.allocated_blocks, 1);

        // What is left still serves small requests.
        let small = allocator.allocate(100).unwrap();
        assert_ne!(small, ptr);
    }

    #[test]
    fn overflowing_sizes_are_rejected() {
        let mut allocator = allocator();

        assert_eq!(allocator.allocate(usize::MAX), Err(AllocError::TooLarge { requested: usize::MAX }));
        assert_eq!(allocator.allocate(usize::MAX - 64), Err(AllocError::TooLarge { requested: usize::MAX - 64 }));
        assert!(allocator.provider().acquired.is_empty());
    }

    #[test]
    fn init_returns_all_regions() {
        let mut allocator = allocator();

        allocator.allocate(100).unwrap();
        allocator.allocate(10_000).unwrap();
        assert_eq!(allocator.provider().live(), 2);

        allocator.init();
        assert_eq!(allocator.provider().live(), 0);
        assert_eq!(allocator.check().unwrap(), HeapReport::default());

        // Starts growing from scratch again.
        allocator.allocate(100).unwrap();
        assert_eq!(allocator.provider().acquired.last(), Some(&PAGE));

        allocator.init();
        allocator.init();
        assert_eq!(allocator.provider().live(), 0);
    }

    #[test]
    fn os_backed_allocator() {
        let mut allocator = MemAlloc::new();

        let ptr = allocator.allocate(24).unwrap().cast::<u64>();
        unsafe {
            ptr.as_ptr().write(23);
            assert_eq!(ptr.as_ptr().read(), 23);
            allocator.release(ptr.cast());
        }

        assert_eq!(allocator.check().unwrap().allocated_blocks, 0);
    }
}
