/// Buffers kept back from every multibuffer operator for the other scans of the query
const RESERVED_BUFFERS: usize = 2;

/// The largest chunk size `k`, no bigger than the usable buffers, such that `size` blocks
/// split into chunks of `k` blocks evenly (the last chunk may be short)
///
/// Always at least 1.
pub fn best_factor(available: usize, size: usize) -> usize {
    let usable = available.saturating_sub(RESERVED_BUFFERS);
    if usable <= 1 {
        return 1;
    }
    let mut k = size;
    let mut chunks = 1;
    while k > usable {
        chunks += 1;
        k = size.div_ceil(chunks);
    }
    k.max(1)
}

#[cfg(test)]
mod buffer_needs_tests {
    use super::best_factor;

    #[test]
    fn test_best_factor() {
        assert_eq!(best_factor(10, 5), 5);
        assert_eq!(best_factor(7, 7), 4);
        assert_eq!(best_factor(12, 100), 10);
        assert_eq!(best_factor(3, 100), 1);
        assert_eq!(best_factor(0, 10), 1);
        assert_eq!(best_factor(8, 0), 1);
    }
}
