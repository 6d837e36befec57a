//! Active scalar type recorded by the tape and the graph recorder.

use std::fmt::{self, Display};

use crate::active::{self, ActiveFloat};
use crate::error::{Error, Result};
use crate::graph::OpCode;
use crate::slots::INVALID_SLOT;

/// Reverse-mode AD variable.
///
/// Holds a value and a slot. Untracked variables (constants) carry
/// `INVALID_SLOT` and record nothing. Arithmetic consults the thread's
/// active engine: under a [`crate::Tape`] it records statements with
/// pre-evaluated partials, under a [`crate::GraphRecorder`] it records
/// symbolic graph nodes.
///
/// Not `Copy`: a tape-tracked variable returns its slot to the allocator
/// when dropped, so copies must record a fresh slot. Cloning does exactly
/// that.
#[derive(Debug)]
pub struct Var<F: ActiveFloat> {
    pub(crate) value: F,
    pub(crate) slot: u32,
}

impl<F: ActiveFloat> Var<F> {
    /// Create an untracked constant.
    #[inline]
    pub fn new(value: F) -> Self {
        Var {
            value,
            slot: INVALID_SLOT,
        }
    }

    /// Alias for [`Var::new`], matching the tape-variable vocabulary.
    #[inline]
    pub fn constant(value: F) -> Self {
        Self::new(value)
    }

    #[inline]
    pub(crate) fn from_raw(value: F, slot: u32) -> Self {
        Var { value, slot }
    }

    #[inline]
    pub fn value(&self) -> F {
        self.value
    }

    /// Overwrite the value in place, keeping the slot. Checkpointed code
    /// uses this to run a segment passively and deposit its result back
    /// into the recorded variable.
    #[inline]
    pub fn set_value(&mut self, value: F) {
        self.value = value;
    }

    /// Slot on the tape, or node id in a graph recording.
    #[inline]
    pub fn slot(&self) -> u32 {
        self.slot
    }

    #[inline]
    pub fn is_tracked(&self) -> bool {
        self.slot != INVALID_SLOT
    }

    pub(crate) fn set_slot(&mut self, slot: u32) {
        self.slot = slot;
    }

    /// Read this variable's adjoint (or gradient, under a graph recorder).
    ///
    /// Untracked variables read as zero. Fails with
    /// [`Error::NoActiveEngine`] when no engine is installed.
    pub fn derivative(&self) -> Result<F> {
        if !active::engine_active::<F>() {
            return Err(Error::NoActiveEngine);
        }
        if !self.is_tracked() {
            return Ok(F::zero());
        }
        if let Some(r) = active::with_tape::<F, _>(|t| t.get_derivative(self.slot)) {
            return r;
        }
        if let Some(d) = active::with_recorder::<F, _>(|r| r.get_derivative(self.slot)) {
            return Ok(d);
        }
        Err(Error::NoActiveEngine)
    }

    /// Seed this variable's adjoint before an adjoint sweep.
    pub fn set_derivative(&self, value: F) -> Result<()> {
        if !active::engine_active::<F>() {
            return Err(Error::NoActiveEngine);
        }
        if !self.is_tracked() {
            return Err(Error::out_of_range("slot", INVALID_SLOT as usize, 0));
        }
        if let Some(r) = active::with_tape::<F, _>(|t| t.set_derivative(self.slot, value)) {
            return r;
        }
        if let Some(r) = active::with_recorder::<F, _>(|r| r.set_derivative(self.slot, value)) {
            return r;
        }
        Err(Error::NoActiveEngine)
    }

    /// Build a result from one tracked operand with local partial `da`.
    pub(crate) fn from_unary(a: &Var<F>, value: F, da: F, op: OpCode) -> Var<F> {
        if a.is_tracked() {
            if let Some(slot) = active::with_tape::<F, _>(|t| {
                t.push_rhs(da, a.slot);
                let lhs = t.register_variable();
                t.push_lhs(lhs);
                lhs
            }) {
                return Var::from_raw(value, slot);
            }
            if let Some(slot) = active::with_recorder::<F, _>(|r| r.record_unary(op, a.slot)) {
                return Var::from_raw(value, slot);
            }
        }
        Var::new(value)
    }

    /// Build a result from two operands with local partials `da` and `db`.
    /// Untracked operands contribute nothing on tape and materialize as
    /// constants in a graph recording.
    pub(crate) fn from_binary(
        a: &Var<F>,
        b: &Var<F>,
        value: F,
        da: F,
        db: F,
        op: OpCode,
    ) -> Var<F> {
        if a.is_tracked() || b.is_tracked() {
            if let Some(slot) = active::with_tape::<F, _>(|t| {
                if a.is_tracked() {
                    t.push_rhs(da, a.slot);
                }
                if b.is_tracked() {
                    t.push_rhs(db, b.slot);
                }
                let lhs = t.register_variable();
                t.push_lhs(lhs);
                lhs
            }) {
                return Var::from_raw(value, slot);
            }
            if let Some(slot) = active::with_recorder::<F, _>(|r| {
                let ai = r.materialize(a);
                let bi = r.materialize(b);
                r.record_binary(op, ai, bi)
            }) {
                return Var::from_raw(value, slot);
            }
        }
        Var::new(value)
    }
}

impl<F: ActiveFloat> Clone for Var<F> {
    /// Copying a tracked variable records an identity statement so the copy
    /// owns its own slot; without an active tape the copy is passive.
    fn clone(&self) -> Self {
        if self.is_tracked() {
            if let Some(slot) = active::with_tape::<F, _>(|t| {
                t.push_rhs(F::one(), self.slot);
                let lhs = t.register_variable();
                t.push_lhs(lhs);
                lhs
            }) {
                return Var::from_raw(self.value, slot);
            }
            // Graph nodes are never unregistered; sharing the id is safe.
            if active::with_recorder::<F, _>(|_| ()).is_some() {
                return Var::from_raw(self.value, self.slot);
            }
        }
        Var::new(self.value)
    }
}

impl<F: ActiveFloat> Drop for Var<F> {
    fn drop(&mut self) {
        if self.slot != INVALID_SLOT {
            active::with_tape::<F, _>(|t| t.unregister_variable(self.slot));
        }
    }
}

impl<F: ActiveFloat> From<F> for Var<F> {
    fn from(value: F) -> Self {
        Var::new(value)
    }
}

impl<F: ActiveFloat> Default for Var<F> {
    fn default() -> Self {
        Var::new(F::zero())
    }
}

impl<F: ActiveFloat> Display for Var<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<F: ActiveFloat> PartialEq for Var<F> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<F: ActiveFloat> PartialOrd for Var<F> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

impl<F: ActiveFloat> PartialEq<F> for Var<F> {
    fn eq(&self, other: &F) -> bool {
        self.value == *other
    }
}

impl<F: ActiveFloat> PartialOrd<F> for Var<F> {
    fn partial_cmp(&self, other: &F) -> Option<std::cmp::Ordering> {
        self.value.partial_cmp(other)
    }
}
