//! Chunked, pointer-stable storage for tape data.
//!
//! Tape recording appends millions of small entries. A flat `Vec` doubles and
//! moves its whole buffer on growth; the arena instead allocates fixed-size
//! blocks and never relocates existing elements. Indexing stays O(1) because
//! the block size is a power of two: the high bits select the block and the
//! low bits the offset within it.

use std::ops::{Index, IndexMut};

/// Elements per block. Power of two so indexing is a shift and a mask.
pub const CHUNK_SIZE: usize = 1 << 16;

const CHUNK_SHIFT: u32 = CHUNK_SIZE.trailing_zeros();
const CHUNK_MASK: usize = CHUNK_SIZE - 1;

/// Append-only block storage with stable element addresses.
///
/// Blocks are pre-allocated to exactly `CHUNK_SIZE` elements and are kept
/// (with their capacity) across `truncate` and `clear`, so a tape that is
/// re-recorded at a similar size allocates nothing.
#[derive(Debug)]
pub struct ChunkedArena<T> {
    chunks: Vec<Vec<T>>,
    len: usize,
}

impl<T> ChunkedArena<T> {
    pub fn new() -> Self {
        ChunkedArena {
            chunks: Vec::new(),
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total number of elements the allocated blocks can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.chunks.len() << CHUNK_SHIFT
    }

    /// Number of allocated blocks.
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Ensure capacity for at least `n` elements, allocating whole blocks.
    pub fn reserve(&mut self, n: usize) {
        while self.capacity() < n {
            self.chunks.push(Vec::with_capacity(CHUNK_SIZE));
        }
    }

    #[inline]
    pub fn push(&mut self, value: T) {
        let high = self.len >> CHUNK_SHIFT;
        if high == self.chunks.len() {
            self.chunks.push(Vec::with_capacity(CHUNK_SIZE));
        }
        self.chunks[high].push(value);
        self.len += 1;
    }

    #[inline]
    pub fn get(&self, i: usize) -> Option<&T> {
        if i >= self.len {
            return None;
        }
        Some(&self.chunks[i >> CHUNK_SHIFT][i & CHUNK_MASK])
    }

    /// Last element, if any.
    pub fn last(&self) -> Option<&T> {
        if self.len == 0 {
            None
        } else {
            self.get(self.len - 1)
        }
    }

    /// Drop elements from the back down to length `n`. Block allocations are
    /// retained for reuse.
    pub fn truncate(&mut self, n: usize) {
        if n >= self.len {
            return;
        }
        let high = n >> CHUNK_SHIFT;
        let low = n & CHUNK_MASK;
        for chunk in self.chunks.iter_mut().skip(high + 1) {
            chunk.clear();
        }
        if let Some(chunk) = self.chunks.get_mut(high) {
            chunk.truncate(low);
        }
        self.len = n;
    }

    /// Remove all elements, keeping block allocations.
    pub fn clear(&mut self) {
        for chunk in &mut self.chunks {
            chunk.clear();
        }
        self.len = 0;
    }

    /// Approximate heap footprint in bytes.
    pub fn memory(&self) -> usize {
        self.capacity() * std::mem::size_of::<T>()
    }
}

impl<T: Clone> ChunkedArena<T> {
    /// Grow or shrink to exactly `n` elements, filling with clones of `value`.
    pub fn resize(&mut self, n: usize, value: T) {
        if n <= self.len {
            self.truncate(n);
            return;
        }
        self.reserve(n);
        while self.len < n {
            self.push(value.clone());
        }
    }
}

impl<T> Index<usize> for ChunkedArena<T> {
    type Output = T;

    #[inline]
    fn index(&self, i: usize) -> &T {
        debug_assert!(i < self.len);
        &self.chunks[i >> CHUNK_SHIFT][i & CHUNK_MASK]
    }
}

impl<T> IndexMut<usize> for ChunkedArena<T> {
    #[inline]
    fn index_mut(&mut self, i: usize) -> &mut T {
        debug_assert!(i < self.len);
        &mut self.chunks[i >> CHUNK_SHIFT][i & CHUNK_MASK]
    }
}

impl<T> Default for ChunkedArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_index_across_chunk_boundary() {
        let mut arena = ChunkedArena::new();
        let n = CHUNK_SIZE + 17;
        for i in 0..n {
            arena.push(i);
        }
        assert_eq!(arena.len(), n);
        assert_eq!(arena.num_chunks(), 2);
        assert_eq!(arena[0], 0);
        assert_eq!(arena[CHUNK_SIZE - 1], CHUNK_SIZE - 1);
        assert_eq!(arena[CHUNK_SIZE], CHUNK_SIZE);
        assert_eq!(arena[n - 1], n - 1);
    }

    #[test]
    fn truncate_keeps_blocks_and_restores_push_position() {
        let mut arena = ChunkedArena::new();
        for i in 0..(CHUNK_SIZE + 10) {
            arena.push(i);
        }
        arena.truncate(CHUNK_SIZE - 3);
        assert_eq!(arena.len(), CHUNK_SIZE - 3);
        assert_eq!(arena.num_chunks(), 2);
        arena.push(999);
        assert_eq!(arena[CHUNK_SIZE - 3], 999);
    }

    #[test]
    fn resize_grows_with_fill_value() {
        let mut arena: ChunkedArena<f64> = ChunkedArena::new();
        arena.resize(5, 1.5);
        assert_eq!(arena.len(), 5);
        assert_eq!(arena[4], 1.5);
        arena.resize(2, 0.0);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena[1], 1.5);
    }

    #[test]
    fn clear_retains_capacity() {
        let mut arena = ChunkedArena::new();
        for i in 0..100 {
            arena.push(i);
        }
        let cap = arena.capacity();
        arena.clear();
        assert!(arena.is_empty());
        assert_eq!(arena.capacity(), cap);
    }
}
