/// Tunables of the page growth and release policy. Both values are given in
/// pages of the [`crate::kernel::PageProvider`] in use.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Config {
    /// Regions stop doubling once they would get bigger than this.
    pub growth_ceiling_pages: usize,
    /// A free block spanning a whole region is only given back to the
    /// provider if it is at least this big. Smaller regions stay around
    /// since they are likely to be needed again soon.
    pub release_threshold_pages: usize,
}

impl Config {
    pub const DEFAULT_GROWTH_CEILING_PAGES: usize = 60;
    pub const DEFAULT_RELEASE_THRESHOLD_PAGES: usize = 10;

    pub const fn new() -> Self {
        Self {
            growth_ceiling_pages: Self::DEFAULT_GROWTH_CEILING_PAGES,
            release_threshold_pages: Self::DEFAULT_RELEASE_THRESHOLD_PAGES,
        }
    }

    pub const fn growth_ceiling_pages(mut self, pages: usize) -> Self {
        self.growth_ceiling_pages = pages;
        self
    }

    pub const fn release_threshold_pages(mut self, pages: usize) -> Self {
        self.release_threshold_pages = pages;
        self
    }

    /// Largest region size reachable by doubling, in bytes.
    pub fn growth_ceiling(&self, page_size: usize) -> usize {
        self.growth_ceiling_pages.saturating_mul(page_size)
    }

    /// Smallest block that gets its region released, in bytes.
    pub fn release_threshold(&self, page_size: usize) -> usize {
        self.release_threshold_pages.saturating_mul(page_size)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
