//! Branch-replayable booleans.
//!
//! Tape recording bakes the branch actually taken into the tape; replaying
//! a recorded [`crate::Graph`] at inputs that take the other branch would
//! silently evaluate the stale path. A [`TrackedBool`] carries both the
//! concrete truth value and, when a graph recorder is active, the node id of
//! the comparison that produced it, so [`TrackedBool::select`] can record an
//! [`OpCode::If`] node that re-decides the branch at every replay.

use crate::active::{self, ActiveFloat};
use crate::graph::OpCode;
use crate::slots::INVALID_SLOT;
use crate::var::Var;

/// Boolean with an optional recorded condition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedBool {
    truth: bool,
    node: u32,
}

impl TrackedBool {
    /// Plain boolean with no recorded condition.
    pub fn new(truth: bool) -> Self {
        TrackedBool {
            truth,
            node: INVALID_SLOT,
        }
    }

    pub(crate) fn with_node(truth: bool, node: u32) -> Self {
        TrackedBool { truth, node }
    }

    /// The concrete truth value at recording time.
    #[inline]
    pub fn truth(&self) -> bool {
        self.truth
    }

    /// True if a graph node re-decides this condition on replay.
    pub fn is_tracked(&self) -> bool {
        self.node != INVALID_SLOT
    }

    pub fn node(&self) -> u32 {
        self.node
    }

    /// Pick between two values.
    ///
    /// With a recorded condition and an active graph recorder this emits a
    /// ternary select node, so replays at other inputs take the branch that
    /// is live there. Otherwise it degrades to a plain host-side choice,
    /// with the usual fixed-branch semantics.
    pub fn select<F: ActiveFloat>(&self, if_true: &Var<F>, if_false: &Var<F>) -> Var<F> {
        if self.is_tracked() {
            let recorded = active::with_recorder::<F, _>(|r| {
                let ti = r.materialize(if_true);
                let fi = r.materialize(if_false);
                r.record_ternary(OpCode::If, self.node, ti, fi)
            });
            if let Some(slot) = recorded {
                let value = if self.truth {
                    if_true.value()
                } else {
                    if_false.value()
                };
                return Var::from_raw(value, slot);
            }
        }
        if self.truth {
            if_true.clone()
        } else {
            if_false.clone()
        }
    }
}

impl From<bool> for TrackedBool {
    fn from(truth: bool) -> Self {
        TrackedBool::new(truth)
    }
}

fn compare<F: ActiveFloat>(a: &Var<F>, b: &Var<F>, op: OpCode, truth: bool) -> TrackedBool {
    if a.is_tracked() || b.is_tracked() {
        let recorded = active::with_recorder::<F, _>(|r| {
            let ai = r.materialize(a);
            let bi = r.materialize(b);
            r.record_binary(op, ai, bi)
        });
        if let Some(node) = recorded {
            return TrackedBool::with_node(truth, node);
        }
    }
    TrackedBool::new(truth)
}

impl<F: ActiveFloat> Var<F> {
    /// `self < other`, recorded as a condition node under a graph recorder.
    pub fn lt(&self, other: &Var<F>) -> TrackedBool {
        compare(self, other, OpCode::CmpLt, self.value() < other.value())
    }

    /// `self <= other`, recorded as a condition node under a graph recorder.
    pub fn le(&self, other: &Var<F>) -> TrackedBool {
        compare(self, other, OpCode::CmpLe, self.value() <= other.value())
    }

    /// `self > other`, recorded as a condition node under a graph recorder.
    pub fn gt(&self, other: &Var<F>) -> TrackedBool {
        compare(self, other, OpCode::CmpGt, self.value() > other.value())
    }

    /// `self >= other`, recorded as a condition node under a graph recorder.
    pub fn ge(&self, other: &Var<F>) -> TrackedBool {
        compare(self, other, OpCode::CmpGe, self.value() >= other.value())
    }

    /// `self == other`, recorded as a condition node under a graph recorder.
    pub fn eq_tracked(&self, other: &Var<F>) -> TrackedBool {
        compare(self, other, OpCode::CmpEq, self.value() == other.value())
    }

    /// `self != other`, recorded as a condition node under a graph recorder.
    pub fn ne_tracked(&self, other: &Var<F>) -> TrackedBool {
        compare(self, other, OpCode::CmpNe, self.value() != other.value())
    }
}
