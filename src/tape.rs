//! Adjoint tape: the record of a computation and its reverse sweep.
//!
//! Recording appends one statement per assignment. A statement stores the
//! slot it wrote and the exclusive end of its (multiplier, slot) operations
//! in the [`OpStore`]; the operations of statement `i` therefore span
//! `[statements[i-1].end, statements[i].end)`, anchored by a sentinel
//! statement at index 0. The adjoint sweep walks statements newest-first,
//! consumes each written slot's adjoint and scatters it into the operand
//! slots, skipping statements whose adjoint is zero.
//!
//! Checkpoint callbacks and nested recordings let a long computation trade
//! tape memory for recomputation: the sweep pauses at a checkpoint, rolls
//! the tape back and hands control to the callback, which typically
//! re-records its segment inside a nested recording and pushes the incoming
//! adjoints through it.

use std::fmt;

use crate::active::{self, ActiveFloat};
use crate::arena::ChunkedArena;
use crate::error::{Error, Result};
use crate::ops::OpStore;
use crate::slots::{SlotAllocator, SlotFrame, SlotPolicy, INVALID_SLOT};
use crate::var::Var;

/// Index of a statement on the tape.
pub type Position = u32;

#[derive(Debug, Clone, Copy)]
struct Statement {
    /// Exclusive end of this statement's operations in the op store.
    end: u32,
    /// Slot written by this statement; `INVALID_SLOT` for sentinels.
    lhs: u32,
}

const SENTINEL: Statement = Statement {
    end: 0,
    lhs: INVALID_SLOT,
};

/// Handler invoked mid-sweep when the adjoint pass crosses a checkpoint.
///
/// The callback reads the adjoints flowing in from later statements with
/// [`Tape::get_and_reset_output_adjoint`], recomputes its segment (usually
/// inside a nested recording) and deposits results via
/// [`Tape::increment_adjoint`].
pub trait CheckpointCallback<F: ActiveFloat> {
    fn compute_adjoint(&mut self, tape: &mut Tape<F>) -> Result<()>;
}

/// Handle to a callback registered with [`Tape::push_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackHandle(usize);

/// Bookkeeping for one recording level.
struct Frame {
    statement_start: u32,
    op_start: u32,
    start_derivative: u32,
    /// Watermark of the enclosing sweep while a checkpoint callback runs;
    /// `INVALID_SLOT` outside of callback invocation.
    prev_max: u32,
    derivatives_initialized: bool,
    /// Allocator snapshot to restore on fold; `None` for the root frame.
    slots: Option<SlotFrame>,
}

/// Reverse-mode adjoint tape.
pub struct Tape<F: ActiveFloat> {
    ops: OpStore<F>,
    statements: ChunkedArena<Statement>,
    derivatives: Vec<F>,
    /// (statement position, callback index), ordered by position.
    checkpoints: Vec<(Position, usize)>,
    callbacks: Vec<Option<Box<dyn CheckpointCallback<F>>>>,
    allocator: SlotAllocator,
    frames: Vec<Frame>,
}

impl<F: ActiveFloat> Tape<F> {
    pub fn new() -> Self {
        Self::with_policy(SlotPolicy::default())
    }

    pub fn with_policy(policy: SlotPolicy) -> Self {
        let mut statements = ChunkedArena::new();
        statements.push(SENTINEL);
        Tape {
            ops: OpStore::new(),
            statements,
            derivatives: Vec::new(),
            checkpoints: Vec::new(),
            callbacks: Vec::new(),
            allocator: SlotAllocator::new(policy),
            frames: vec![Frame {
                statement_start: 1,
                op_start: 0,
                start_derivative: 0,
                prev_max: INVALID_SLOT,
                derivatives_initialized: false,
                slots: None,
            }],
        }
    }

    /// Install this tape as the thread's active engine. Fails if any engine
    /// is already active for `F` on this thread.
    pub fn activate(&mut self) -> Result<ActiveTape<F>> {
        ActiveTape::new(self)
    }

    /// True if this tape is the thread's active engine.
    pub fn is_active(&self) -> bool {
        active::tape_is(self as *const _)
    }

    fn current(&self) -> &Frame {
        // frames always holds at least the root
        &self.frames[self.frames.len() - 1]
    }

    fn current_mut(&mut self) -> &mut Frame {
        let i = self.frames.len() - 1;
        &mut self.frames[i]
    }

    // ── Slot management ──

    /// Claim a slot for a new tape variable.
    #[inline]
    pub fn register_variable(&mut self) -> u32 {
        self.allocator.register()
    }

    /// Release a variable's slot for reuse.
    #[inline]
    pub fn unregister_variable(&mut self, slot: u32) {
        self.allocator.unregister(slot);
    }

    /// Number of currently registered variables.
    pub fn num_variables(&self) -> u32 {
        self.allocator.num_live()
    }

    pub fn slot_policy(&self) -> SlotPolicy {
        self.allocator.policy()
    }

    /// Free slots currently pooled for reuse.
    pub fn num_reusable_slots(&self) -> u32 {
        self.allocator.num_free_slots()
    }

    pub fn num_reusable_ranges(&self) -> usize {
        self.allocator.num_free_ranges()
    }

    // ── Recording ──

    /// Append one operand: the local partial `multiplier` with respect to
    /// the variable in `slot`.
    #[inline]
    pub fn push_rhs(&mut self, multiplier: F, slot: u32) {
        self.ops.push(multiplier, slot);
    }

    /// Append a run of operands in bulk.
    pub fn push_all(&mut self, multipliers: &[F], slots: &[u32]) {
        self.ops.append(multipliers, slots);
    }

    /// Close the pending statement, recording `slot` as its written variable.
    #[inline]
    pub fn push_lhs(&mut self, slot: u32) {
        self.statements.push(Statement {
            end: self.ops.len() as u32,
            lhs: slot,
        });
    }

    /// Give `var` a slot and record it as an independent input.
    pub fn register_input(&mut self, var: &mut Var<F>) {
        if !var.is_tracked() {
            let slot = self.register_variable();
            var.set_slot(slot);
            self.push_lhs(slot);
        }
    }

    pub fn register_inputs(&mut self, vars: &mut [Var<F>]) {
        for v in vars {
            self.register_input(v);
        }
    }

    /// Mark `var` as a dependent output; constants get a slot of their own
    /// so their (zero) derivative is addressable.
    pub fn register_output(&mut self, var: &mut Var<F>) {
        if !var.is_tracked() {
            let slot = self.register_variable();
            var.set_slot(slot);
            self.push_lhs(slot);
        }
    }

    pub fn register_outputs(&mut self, vars: &mut [Var<F>]) {
        for v in vars {
            self.register_output(v);
        }
    }

    /// Discard recorded statements and start a fresh recording.
    ///
    /// Registered variables keep their slots, so inputs survive and can be
    /// reused in the next recording. Open nested recordings are folded
    /// first.
    pub fn new_recording(&mut self) {
        while self.frames.len() > 1 {
            self.end_nested_recording();
        }
        self.ops.clear();
        self.statements.clear();
        self.statements.push(SENTINEL);
        self.checkpoints.clear();
        self.allocator.set_watermark(self.allocator.cursor() + 1);
        let root = self.current_mut();
        root.derivatives_initialized = false;
        root.prev_max = INVALID_SLOT;
    }

    /// Reset the tape completely: statements, operations, derivatives,
    /// slots and owned callbacks.
    pub fn clear_all(&mut self) {
        self.frames.truncate(1);
        self.ops.clear();
        self.statements.clear();
        self.statements.push(SENTINEL);
        self.derivatives.clear();
        self.checkpoints.clear();
        self.callbacks.clear();
        self.allocator.clear();
        let root = self.current_mut();
        root.statement_start = 1;
        root.op_start = 0;
        root.start_derivative = 0;
        root.prev_max = INVALID_SLOT;
        root.derivatives_initialized = false;
    }

    // ── Derivatives ──

    fn init_derivatives(&mut self) {
        let max = self.allocator.watermark() as usize;
        let i = self.frames.len() - 1;
        let start = self.frames[i].start_derivative as usize;
        if !self.frames[i].derivatives_initialized && self.derivatives.len() > start {
            for d in &mut self.derivatives[start..] {
                *d = F::zero();
            }
        }
        self.derivatives.resize(max, F::zero());
        self.frames[i].derivatives_initialized = true;
    }

    /// Mutable access to a slot's adjoint. Initializes the derivative
    /// vector on first use within a recording.
    pub fn derivative(&mut self, slot: u32) -> Result<&mut F> {
        let max = self.allocator.watermark();
        if slot >= max {
            return Err(Error::out_of_range("slot", slot as usize, max as usize));
        }
        self.init_derivatives();
        Ok(&mut self.derivatives[slot as usize])
    }

    pub fn set_derivative(&mut self, slot: u32, value: F) -> Result<()> {
        *self.derivative(slot)? = value;
        Ok(())
    }

    pub fn get_derivative(&mut self, slot: u32) -> Result<F> {
        Ok(*self.derivative(slot)?)
    }

    /// Zero all adjoints without discarding the recording, allowing another
    /// sweep with different seeds.
    pub fn clear_derivatives(&mut self) {
        for d in &mut self.derivatives {
            *d = F::zero();
        }
        self.current_mut().derivatives_initialized = false;
    }

    /// Read and zero the adjoint of `slot`, as a checkpoint callback does
    /// for the values flowing in from later statements.
    pub fn get_and_reset_output_adjoint(&mut self, slot: u32) -> Result<F> {
        let len = self.derivatives.len();
        let i = slot as usize;
        if i >= len {
            return Err(Error::out_of_range("slot", i, len));
        }
        let v = self.derivatives[i];
        self.derivatives[i] = F::zero();
        Ok(v)
    }

    /// Add `value` to the adjoint of `slot`.
    pub fn increment_adjoint(&mut self, slot: u32, value: F) -> Result<()> {
        let len = self.derivatives.len();
        let i = slot as usize;
        if i >= len {
            return Err(Error::out_of_range("slot", i, len));
        }
        self.derivatives[i] = self.derivatives[i] + value;
        Ok(())
    }

    // ── Positions and rollback ──

    /// Position of the most recent statement.
    pub fn position(&self) -> Position {
        (self.statements.len() - 1) as Position
    }

    /// Roll the tape back so `pos` is the newest statement. Later
    /// statements, their operations and any checkpoints among them are
    /// discarded; free slot ranges above the watermark are clipped.
    pub fn reset_to(&mut self, pos: Position) -> Result<()> {
        let len = self.statements.len();
        let p = pos as usize;
        if p >= len {
            return Err(Error::out_of_range("position", p, len));
        }
        if p == len - 1 {
            return Ok(());
        }
        let st = self.statements[p];
        self.statements.truncate(p + 1);
        self.ops.resize(st.end as usize);
        while matches!(self.checkpoints.last(), Some(&(cp, _)) if cp > pos) {
            self.checkpoints.pop();
        }
        self.allocator.clamp_ranges_to(self.allocator.watermark());
        Ok(())
    }

    /// Shrink the derivative vector to what existed at `pos`, dropping the
    /// adjoints of everything recorded after it.
    pub fn clear_derivatives_after(&mut self, pos: Position) -> Result<()> {
        let len = self.statements.len();
        let p = pos as usize;
        if p >= len {
            return Err(Error::out_of_range("position", p, len));
        }
        let lhs = self.statements[p].lhs;
        let keep = if lhs == INVALID_SLOT {
            0
        } else {
            lhs as usize + 1
        };
        self.derivatives.truncate(keep);
        self.allocator.set_watermark(keep as u32);
        Ok(())
    }

    // ── Adjoint sweep ──

    /// Propagate adjoints through every statement of the current recording
    /// level.
    pub fn compute_adjoints(&mut self) -> Result<()> {
        let pos = self.current().statement_start - 1;
        self.compute_adjoints_to(pos)
    }

    /// Propagate adjoints backwards until `pos` is the newest remaining
    /// statement, invoking checkpoint callbacks along the way.
    pub fn compute_adjoints_to(&mut self, pos: Position) -> Result<()> {
        if !self.current().derivatives_initialized {
            return Err(Error::DerivativesNotInitialized);
        }
        let len = self.statements.len();
        if pos as usize >= len {
            return Err(Error::out_of_range("position", pos as usize, len));
        }
        self.init_derivatives();
        let mut start = self.position();
        while let Some(&(ck_pos, idx)) = self.checkpoints.last() {
            if ck_pos <= pos {
                break;
            }
            self.sweep(ck_pos, start);
            // Drop the checkpoint's own sentinel statement and everything
            // after it before handing control to the callback.
            self.reset_to(ck_pos - 1)?;
            self.current_mut().prev_max = self.allocator.watermark();
            let num_callbacks = self.callbacks.len();
            let mut cb = match self.callbacks.get_mut(idx).and_then(Option::take) {
                Some(cb) => cb,
                None => return Err(Error::out_of_range("callback", idx, num_callbacks)),
            };
            let outcome = cb.compute_adjoint(self);
            if let Some(entry) = self.callbacks.get_mut(idx) {
                *entry = Some(cb);
            }
            outcome?;
            self.current_mut().prev_max = INVALID_SLOT;
            self.reset_to(ck_pos - 1)?;
            start = ck_pos - 1;
        }
        if start > pos {
            self.sweep(pos, start);
        }
        Ok(())
    }

    /// Walk statements `(pos, start]` newest-first, consuming each written
    /// slot's adjoint and scattering it into the operand slots.
    fn sweep(&mut self, pos: Position, start: Position) {
        let zero = F::zero();
        let mut i = start as usize;
        while i > pos as usize {
            let st = self.statements[i];
            if st.lhs != INVALID_SLOT {
                let lhs = st.lhs as usize;
                let a = self.derivatives[lhs];
                self.derivatives[lhs] = zero;
                if a != zero {
                    let begin = self.statements[i - 1].end as usize;
                    let derivatives = &mut self.derivatives;
                    self.ops.for_each(begin, st.end as usize, |mult, slot| {
                        derivatives[slot as usize] = derivatives[slot as usize] + mult * a;
                    });
                }
            }
            i -= 1;
        }
    }

    // ── Checkpoint callbacks ──

    /// Hand a callback to the tape. The tape owns it until
    /// [`Tape::clear_all`] or [`Tape::pop_callback`].
    pub fn push_callback(&mut self, cb: Box<dyn CheckpointCallback<F>>) -> CallbackHandle {
        self.callbacks.push(Some(cb));
        CallbackHandle(self.callbacks.len() - 1)
    }

    /// Reclaim the most recently pushed callback.
    pub fn pop_callback(&mut self) -> Option<Box<dyn CheckpointCallback<F>>> {
        self.callbacks.pop().flatten()
    }

    pub fn num_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    pub fn have_callbacks(&self) -> bool {
        !self.callbacks.is_empty()
    }

    /// Handle of the most recently pushed callback, for re-insertion.
    pub fn last_callback(&self) -> Option<CallbackHandle> {
        if self.callbacks.is_empty() {
            None
        } else {
            Some(CallbackHandle(self.callbacks.len() - 1))
        }
    }

    /// Pin a checkpoint at the current position; the adjoint sweep invokes
    /// the callback when it reaches this point.
    pub fn insert_callback(&mut self, handle: CallbackHandle) -> Result<()> {
        if handle.0 >= self.callbacks.len() {
            return Err(Error::out_of_range(
                "callback",
                handle.0,
                self.callbacks.len(),
            ));
        }
        self.checkpoints
            .push((self.statements.len() as Position, handle.0));
        self.push_lhs(INVALID_SLOT);
        Ok(())
    }

    /// Push a callback and pin it at the current position in one step.
    pub fn insert_callback_owned(&mut self, cb: Box<dyn CheckpointCallback<F>>) {
        let handle = self.push_callback(cb);
        // fresh handle, insertion cannot fail
        let _ = self.insert_callback(handle);
    }

    // ── Nested recordings ──

    /// Open a nested recording. Everything recorded until the matching
    /// [`Tape::end_nested_recording`] is discarded when the level folds,
    /// restoring the outer recording's slots and positions.
    pub fn new_nested_recording(&mut self) {
        let prev_max = self.current().prev_max;
        if prev_max != INVALID_SLOT {
            self.derivatives.truncate(prev_max as usize);
            self.allocator.set_watermark(prev_max);
        }
        let slots = self.allocator.push_frame();
        self.frames.push(Frame {
            statement_start: self.statements.len() as u32,
            op_start: self.ops.len() as u32,
            start_derivative: self.allocator.watermark(),
            prev_max,
            derivatives_initialized: false,
            slots: Some(slots),
        });
    }

    /// Fold the innermost nested recording. No-op at the root level.
    pub fn end_nested_recording(&mut self) {
        if self.frames.len() <= 1 {
            return;
        }
        let frame = match self.frames.pop() {
            Some(f) => f,
            None => return,
        };
        if let Some(sf) = frame.slots {
            self.allocator.pop_frame(sf);
        }
        let max = self.allocator.watermark() as usize;
        if self.derivatives.len() > max {
            self.derivatives.truncate(max);
        }
        self.ops.resize(frame.op_start as usize);
        self.statements.truncate(frame.statement_start as usize);
        while matches!(self.checkpoints.last(), Some(&(p, _)) if p >= frame.statement_start) {
            self.checkpoints.pop();
        }
    }

    /// Open a nested recording that folds automatically on drop.
    pub fn nested(&mut self) -> NestedRecording<'_, F> {
        self.new_nested_recording();
        NestedRecording { tape: self }
    }

    pub fn nesting_depth(&self) -> usize {
        self.frames.len() - 1
    }

    // ── Introspection ──

    /// Number of recorded statements, excluding the sentinel.
    pub fn num_statements(&self) -> usize {
        self.statements.len() - 1
    }

    pub fn num_operations(&self) -> usize {
        self.ops.len()
    }

    /// Highest slot count this recording has reached.
    pub fn max_slot(&self) -> u32 {
        self.allocator.watermark()
    }

    /// Approximate heap footprint in bytes.
    pub fn memory(&self) -> usize {
        self.ops.memory()
            + self.statements.memory()
            + self.derivatives.capacity() * std::mem::size_of::<F>()
            + self.checkpoints.capacity() * std::mem::size_of::<(Position, usize)>()
    }

    pub fn stats(&self) -> TapeStats {
        TapeStats {
            statements: self.num_statements(),
            operations: self.num_operations(),
            variables: self.num_variables() as usize,
            max_slot: self.max_slot() as usize,
            reusable_slots: self.num_reusable_slots() as usize,
            reusable_ranges: self.num_reusable_ranges(),
            memory: self.memory(),
        }
    }
}

impl<F: ActiveFloat> Default for Tape<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of tape size counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapeStats {
    pub statements: usize,
    pub operations: usize,
    pub variables: usize,
    pub max_slot: usize,
    pub reusable_slots: usize,
    pub reusable_ranges: usize,
    pub memory: usize,
}

impl fmt::Display for TapeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tape status:")?;
        writeln!(f, "  statements:      {}", self.statements)?;
        writeln!(f, "  operations:      {}", self.operations)?;
        writeln!(f, "  variables:       {}", self.variables)?;
        writeln!(f, "  max slot:        {}", self.max_slot)?;
        writeln!(f, "  reusable slots:  {}", self.reusable_slots)?;
        writeln!(f, "  reusable ranges: {}", self.reusable_ranges)?;
        write!(f, "  memory bytes:    {}", self.memory)
    }
}

/// RAII guard installing a [`Tape`] as the thread's active engine.
///
/// Construction fails with [`Error::EngineAlreadyActive`] if another engine
/// is already installed for `F` on this thread; dropping the guard
/// deactivates the tape. The guard holds a raw pointer rather than the
/// borrow, so the tape stays directly usable for seeding and sweeping while
/// active; the tape must simply outlive the guard.
pub struct ActiveTape<F: ActiveFloat> {
    tape: *mut Tape<F>,
}

impl<F: ActiveFloat> ActiveTape<F> {
    pub fn new(tape: &mut Tape<F>) -> Result<Self> {
        let ptr: *mut Tape<F> = tape;
        active::activate_tape(ptr)?;
        Ok(ActiveTape { tape: ptr })
    }
}

impl<F: ActiveFloat> Drop for ActiveTape<F> {
    fn drop(&mut self) {
        active::deactivate_tape(self.tape);
    }
}

/// RAII wrapper around a nested recording; folds the level on drop.
pub struct NestedRecording<'a, F: ActiveFloat> {
    tape: &'a mut Tape<F>,
}

impl<F: ActiveFloat> NestedRecording<'_, F> {
    pub fn tape(&mut self) -> &mut Tape<F> {
        self.tape
    }

    /// Sweep the statements of this nested level only.
    pub fn compute_adjoints(&mut self) -> Result<()> {
        self.tape.compute_adjoints()
    }

    pub fn increment_adjoint(&mut self, slot: u32, value: F) -> Result<()> {
        self.tape.increment_adjoint(slot, value)
    }
}

impl<F: ActiveFloat> Drop for NestedRecording<'_, F> {
    fn drop(&mut self) {
        self.tape.end_nested_recording();
    }
}
