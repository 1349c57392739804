//! Size classes for small allocations.
//!
//! Small requests are rounded up to a multiple of [`ALIGN`] and bucketed into
//! [`NUM_SIZE_CLASSES`] classes. Class `i` holds blocks of exactly
//! `(i + 1) * ALIGN` bytes, so the largest class is [`MAX_SMALL_SIZE`].

/// Alignment boundary for every small block (bytes).
pub const ALIGN: usize = 8;

/// Maximum size served from the pool (bytes). Above this, use the primary path.
pub const MAX_SMALL_SIZE: usize = 128;

/// Number of size class free lists.
pub const NUM_SIZE_CLASSES: usize = MAX_SMALL_SIZE / ALIGN;

/// Rounds `bytes` up to the next multiple of [`ALIGN`].
#[inline]
#[must_use]
pub const fn round_up(bytes: usize) -> usize {
    (bytes + ALIGN - 1) & !(ALIGN - 1)
}

/// Returns true if a request of `bytes` is served by the pool.
#[inline]
#[must_use]
pub const fn is_small(bytes: usize) -> bool {
    bytes <= MAX_SMALL_SIZE
}

/// Computes the free-list index for a small request.
///
/// `classify(n) == ceil(n / ALIGN) - 1`. A zero-byte request shares class 0
/// with the one-byte request.
#[inline]
#[must_use]
pub const fn classify(bytes: usize) -> usize {
    ((bytes + ALIGN - 1) / ALIGN).saturating_sub(1)
}

/// Returns the block size held by free list `index`, or 0 for out-of-range
/// indices.
#[inline]
#[must_use]
pub const fn class_size(index: usize) -> usize {
    if index < NUM_SIZE_CLASSES {
        (index + 1) * ALIGN
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_match_reference_policy() {
        assert_eq!(ALIGN, 8);
        assert_eq!(MAX_SMALL_SIZE, 128);
        assert_eq!(NUM_SIZE_CLASSES, 16);
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0), 0);
        assert_eq!(round_up(1), 8);
        assert_eq!(round_up(8), 8);
        assert_eq!(round_up(9), 16);
        assert_eq!(round_up(127), 128);
        assert_eq!(round_up(128), 128);
        assert_eq!(round_up(129), 136);
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(0), 0);
        assert_eq!(classify(1), 0);
        assert_eq!(classify(8), 0);
        assert_eq!(classify(9), 1);
        assert_eq!(classify(16), 1);
        assert_eq!(classify(120), 14);
        assert_eq!(classify(121), 15);
        assert_eq!(classify(128), NUM_SIZE_CLASSES - 1);
    }

    #[test]
    fn test_classify_is_stable_under_round_up() {
        for n in 1..=MAX_SMALL_SIZE {
            assert_eq!(classify(n), classify(round_up(n)), "size {n}");
            assert_eq!(class_size(classify(n)), round_up(n), "size {n}");
        }
    }

    #[test]
    fn test_class_size_roundtrip() {
        for i in 0..NUM_SIZE_CLASSES {
            let size = class_size(i);
            assert_eq!(size % ALIGN, 0);
            assert_eq!(classify(size), i);
        }
        assert_eq!(class_size(NUM_SIZE_CLASSES), 0);
    }

    #[test]
    fn test_is_small() {
        assert!(is_small(1));
        assert!(is_small(MAX_SMALL_SIZE));
        assert!(!is_small(MAX_SMALL_SIZE + 1));
    }
}
