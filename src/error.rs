use std::{error::Error, fmt};

/// Reasons why [`crate::MemAlloc::allocate`] can fail. No allocator state is
/// modified when an allocation fails.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AllocError {
    /// The page provider could not map a new region.
    OutOfMemory { requested: usize },
    /// The request is so large that the block or region size overflows.
    TooLarge { requested: usize },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory while allocating {requested} bytes")
            }
            Self::TooLarge { requested } => {
                write!(f, "allocation of {requested} bytes is too large")
            }
        }
    }
}

impl Error for AllocError {}

/// Inconsistencies found by [`crate::MemAlloc::check`]. Addresses are
/// payload addresses of the offending block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HeapError {
    /// Prologue tags of the region starting at `region` are damaged.
    BrokenPrologue { region: usize },
    /// Header and footer disagree.
    TagMismatch { addr: usize, header: u64, footer: u64 },
    /// Payload not 16-aligned, or size below the minimum block size.
    BadBlock { addr: usize, size: usize },
    /// Two free blocks next to each other escaped coalescing.
    AdjacentFree { addr: usize },
    /// An allocated block is linked in the free list.
    AllocatedInFreeList { addr: usize },
    /// The free list does not hold exactly the free blocks found in the regions.
    FreeListMismatch { listed: usize, found: usize },
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokenPrologue { region } => write!(f, "broken prologue in region {region:#x}"),
            Self::TagMismatch { addr, header, footer } => {
                write!(f, "block {addr:#x} has header {header:#x} but footer {footer:#x}")
            }
            Self::BadBlock { addr, size } => write!(f, "block {addr:#x} has invalid size {size}"),
            Self::AdjacentFree { addr } => write!(f, "free block {addr:#x} follows another free block"),
            Self::AllocatedInFreeList { addr } => write!(f, "allocated block {addr:#x} is on the free list"),
            Self::FreeListMismatch { listed, found } => {
                write!(f, "free list holds {listed} blocks but {found} free blocks exist")
            }
        }
    }
}

impl Error for HeapError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(
            AllocError::OutOfMemory { requested: 100 }.to_string(),
            "out of memory while allocating 100 bytes"
        );
        assert_eq!(
            HeapError::FreeListMismatch { listed: 2, found: 3 }.to_string(),
            "free list holds 2 blocks but 3 free blocks exist"
        );
    }
}
