//! Fixed-size batching for per-call volume limits.

/// Number of chunks `len` items split into at `size` per chunk.
///
/// Ceiling of integer division; zero items yield zero chunks.
pub const fn batch_count(len: usize, size: usize) -> usize {
    len.div_ceil(size)
}

/// Split `items` into consecutive chunks of `size`, preserving order.
///
/// Every chunk but the last holds exactly `size` items; the last holds the
/// remainder. No empty trailing chunk is produced.
///
/// # Panics
///
/// Panics if `size` is zero.
pub fn batch<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    assert!(size > 0, "batch size must be positive");
    let batches: Vec<Vec<T>> = items.chunks(size).map(<[T]>::to_vec).collect();
    debug_assert_eq!(batches.len(), batch_count(items.len(), size));
    batches
}
