//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This method is used to align page sizes to be a multiple of
/// [`crate::kernel::PageProvider::page_size`] and block sizes to be a multiple
/// of [`crate::block::ALIGNMENT`].
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when
/// `to_be_aligned` is close to `usize::MAX`.
pub fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    Some(to_be_aligned.checked_add(aligment - 1)? & !(aligment - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_block_size() {
        let aligments = vec![(1..16, 16), (17..32, 32), (33..48, 48), (49..64, 64)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, 16));
            }
        }
    }

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let aligments = vec![(1..4096, 4096), (4097..8192, 8192)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, 4096))
            }
        }
    }

    #[test]
    fn aligned_values_are_kept() {
        assert_eq!(align(0, 16), 0);
        assert_eq!(align(4096, 4096), 4096);
    }

    #[test]
    fn checked_align_detects_overflow() {
        assert_eq!(checked_align(usize::MAX, 16), None);
        assert_eq!(checked_align(usize::MAX - 20, 16), Some(usize::MAX - 15));
        assert_eq!(checked_align(100, 16), Some(112));
    }
}
