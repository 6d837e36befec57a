//! Operation store: the (multiplier, slot) pairs recorded per statement.
//!
//! Multipliers and slots live in two parallel arenas rather than one arena of
//! pairs, so the adjoint sweep streams each array with its natural alignment.

use crate::arena::ChunkedArena;
use crate::float::Float;

/// Parallel storage for recorded operations.
#[derive(Debug, Default)]
pub struct OpStore<F: Float> {
    multipliers: ChunkedArena<F>,
    slots: ChunkedArena<u32>,
}

impl<F: Float> OpStore<F> {
    pub fn new() -> Self {
        OpStore {
            multipliers: ChunkedArena::new(),
            slots: ChunkedArena::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.multipliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.multipliers.is_empty()
    }

    #[inline]
    pub fn push(&mut self, multiplier: F, slot: u32) {
        self.multipliers.push(multiplier);
        self.slots.push(slot);
    }

    /// Append parallel runs of multipliers and slots. Lengths must match.
    pub fn append(&mut self, multipliers: &[F], slots: &[u32]) {
        debug_assert_eq!(multipliers.len(), slots.len());
        for (&m, &s) in multipliers.iter().zip(slots) {
            self.push(m, s);
        }
    }

    /// Read the entry at `i`.
    #[inline]
    pub fn get(&self, i: usize) -> (F, u32) {
        (self.multipliers[i], self.slots[i])
    }

    /// Apply `f` to every (multiplier, slot) pair in `[start, end)`.
    #[inline]
    pub fn for_each(&self, start: usize, end: usize, mut f: impl FnMut(F, u32)) {
        for i in start..end {
            f(self.multipliers[i], self.slots[i]);
        }
    }

    /// Shrink or zero-extend to exactly `n` entries.
    pub fn resize(&mut self, n: usize) {
        self.multipliers.resize(n, F::zero());
        self.slots.resize(n, 0);
    }

    pub fn clear(&mut self) {
        self.multipliers.clear();
        self.slots.clear();
    }

    pub fn reserve(&mut self, n: usize) {
        self.multipliers.reserve(n);
        self.slots.reserve(n);
    }

    /// Approximate heap footprint in bytes.
    pub fn memory(&self) -> usize {
        self.multipliers.memory() + self.slots.memory()
    }
}
