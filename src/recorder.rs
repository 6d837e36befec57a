//! Graph recording front-end.
//!
//! While a [`GraphRecorder`] is the thread's active engine, arithmetic on
//! [`Var`] builds a [`Graph`] instead of a tape. The recorder stages scalar
//! input values, drives a [`Backend`] to evaluate the graph, and keeps a
//! per-node derivative table the same way the tape keeps per-slot adjoints.

use crate::active::{self, ActiveFloat};
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::graph::{Graph, OpCode};
use crate::interpreter::GraphInterpreter;
use crate::var::Var;

/// Records a computation graph and replays it through a backend.
pub struct GraphRecorder<F: ActiveFloat> {
    graph: Graph<F>,
    backend: Box<dyn Backend<F>>,
    input_values: Vec<F>,
    derivatives: Vec<F>,
    compiled: bool,
}

impl<F: ActiveFloat> GraphRecorder<F> {
    /// Recorder backed by the reference interpreter.
    pub fn new() -> Self {
        Self::with_backend(Box::new(GraphInterpreter::new()))
    }

    pub fn with_backend(backend: Box<dyn Backend<F>>) -> Self {
        GraphRecorder {
            graph: Graph::new(),
            backend,
            input_values: Vec::new(),
            derivatives: Vec::new(),
            compiled: false,
        }
    }

    /// Install this recorder as the thread's active engine. Fails if any
    /// engine is already active for `F` on this thread.
    pub fn activate(&mut self) -> Result<ActiveRecorder<F>> {
        ActiveRecorder::new(self)
    }

    pub fn is_active(&self) -> bool {
        active::recorder_is(self as *const _)
    }

    pub fn graph(&self) -> &Graph<F> {
        &self.graph
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.num_nodes()
    }

    pub fn num_inputs(&self) -> usize {
        self.graph.num_inputs()
    }

    pub fn num_outputs(&self) -> usize {
        self.graph.num_outputs()
    }

    // ── Recording ──

    /// Turn `var` into graph input number `num_inputs()`, staging its
    /// current value for evaluation.
    pub fn register_input(&mut self, var: &mut Var<F>) {
        if !var.is_tracked() {
            let id = self.graph.add_input();
            self.input_values.push(var.value());
            var.set_slot(id);
            self.compiled = false;
        }
    }

    pub fn register_inputs(&mut self, vars: &mut [Var<F>]) {
        for v in vars {
            self.register_input(v);
        }
    }

    /// Mark `var` as a graph output. A passive value gets a constant node
    /// so its (zero) gradient stays addressable.
    pub fn register_output(&mut self, var: &mut Var<F>) {
        if !var.is_tracked() {
            let id = self.graph.add_constant(var.value());
            var.set_slot(id);
        }
        self.graph.mark_output(var.slot());
        self.compiled = false;
    }

    pub fn register_outputs(&mut self, vars: &mut [Var<F>]) {
        for v in vars {
            self.register_output(v);
        }
    }

    /// Node id for an operand: its own node if tracked, otherwise a pooled
    /// constant.
    pub(crate) fn materialize(&mut self, var: &Var<F>) -> u32 {
        if var.is_tracked() {
            var.slot()
        } else {
            self.graph.add_constant(var.value())
        }
    }

    pub(crate) fn record_constant(&mut self, value: F) -> u32 {
        self.graph.add_constant(value)
    }

    pub(crate) fn record_unary(&mut self, op: OpCode, a: u32) -> u32 {
        self.compiled = false;
        self.graph.add_unary(op, a)
    }

    pub(crate) fn record_binary(&mut self, op: OpCode, a: u32, b: u32) -> u32 {
        self.compiled = false;
        self.graph.add_binary(op, a, b)
    }

    pub(crate) fn record_ternary(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> u32 {
        self.compiled = false;
        self.graph.add_ternary(op, a, b, c)
    }

    /// Discard the recorded graph but keep the input layout, so the same
    /// input variables can drive a fresh recording.
    ///
    /// Valid only when inputs were registered before any other node, which
    /// keeps their ids stable across re-recording.
    pub fn new_recording(&mut self) {
        let n = self.input_values.len();
        self.graph.clear();
        self.derivatives.clear();
        self.backend.reset();
        self.compiled = false;
        for _ in 0..n {
            self.graph.add_input();
        }
    }

    /// Full reset: graph, staged inputs, derivatives and backend state.
    pub fn clear_all(&mut self) {
        self.graph.clear();
        self.input_values.clear();
        self.derivatives.clear();
        self.backend.reset();
        self.compiled = false;
    }

    // ── Evaluation ──

    /// Restage input `index` for the next evaluation.
    pub fn set_input(&mut self, index: usize, value: F) -> Result<()> {
        let n = self.input_values.len();
        if index >= n {
            return Err(Error::out_of_range("input index", index, n));
        }
        self.input_values[index] = value;
        Ok(())
    }

    pub fn input_value(&self, index: usize) -> Result<F> {
        self.input_values
            .get(index)
            .copied()
            .ok_or_else(|| Error::out_of_range("input index", index, self.input_values.len()))
    }

    /// Compile the recorded graph on the backend.
    pub fn compile(&mut self) -> Result<()> {
        self.backend.compile(&self.graph)?;
        self.compiled = true;
        Ok(())
    }

    fn stage_inputs(&mut self) -> Result<()> {
        let width = self.backend.vector_width();
        let mut lanes = vec![F::zero(); width];
        for (i, &v) in self.input_values.iter().enumerate() {
            for lane in &mut lanes {
                *lane = v;
            }
            self.backend.set_input(i, &lanes)?;
        }
        Ok(())
    }

    /// Evaluate the graph at the staged inputs. Compiles on first use.
    pub fn forward(&mut self, outputs: &mut [F]) -> Result<()> {
        if !self.compiled {
            self.compile()?;
        }
        let expected = self.graph.num_outputs() * self.backend.vector_width();
        if outputs.len() != expected {
            return Err(Error::count_mismatch("output", expected, outputs.len()));
        }
        self.stage_inputs()?;
        self.backend.forward(outputs)
    }

    /// Evaluate forward and backward: output adjoints are taken from the
    /// derivative table, input gradients are written back into it.
    pub fn compute_adjoints(&mut self) -> Result<()> {
        if self.derivatives.is_empty() {
            return Err(Error::DerivativesNotInitialized);
        }
        if !self.compiled {
            self.compile()?;
        }
        let zero = F::zero();
        let seeds: Vec<F> = self
            .graph
            .output_ids()
            .iter()
            .map(|&id| self.derivatives.get(id as usize).copied().unwrap_or(zero))
            .collect();
        let mut outputs = vec![zero; self.graph.num_outputs()];
        let mut input_gradients = vec![zero; self.graph.num_inputs()];
        self.stage_inputs()?;
        self.backend
            .forward_and_backward(&seeds, &mut outputs, &mut input_gradients)?;
        self.derivatives.resize(self.graph.num_nodes(), zero);
        let input_ids: Vec<u32> = self.graph.input_ids().to_vec();
        for (k, id) in input_ids.iter().enumerate() {
            self.derivatives[*id as usize] = input_gradients[k];
        }
        Ok(())
    }

    /// Mutable access to a node's derivative, growing the table on demand.
    pub fn derivative(&mut self, node: u32) -> Result<&mut F> {
        let n = self.graph.num_nodes();
        let i = node as usize;
        if i >= n {
            return Err(Error::out_of_range("node", i, n));
        }
        if self.derivatives.len() < n {
            self.derivatives.resize(n, F::zero());
        }
        Ok(&mut self.derivatives[i])
    }

    pub fn set_derivative(&mut self, node: u32, value: F) -> Result<()> {
        *self.derivative(node)? = value;
        Ok(())
    }

    /// Read a node's derivative. Nodes outside the table read as zero; this
    /// read never fails, unlike [`GraphRecorder::derivative`].
    pub fn get_derivative(&self, node: u32) -> F {
        self.derivatives
            .get(node as usize)
            .copied()
            .unwrap_or_else(F::zero)
    }

    pub fn clear_derivatives(&mut self) {
        for d in &mut self.derivatives {
            *d = F::zero();
        }
    }

    /// Approximate heap footprint in bytes.
    pub fn memory(&self) -> usize {
        self.graph.memory()
            + (self.input_values.capacity() + self.derivatives.capacity())
                * std::mem::size_of::<F>()
    }
}

impl<F: ActiveFloat> Default for GraphRecorder<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard installing a [`GraphRecorder`] as the thread's active engine.
///
/// Like [`crate::ActiveTape`], holds a raw pointer so the recorder stays
/// directly usable for staging inputs and evaluating while active; the
/// recorder must outlive the guard.
pub struct ActiveRecorder<F: ActiveFloat> {
    recorder: *mut GraphRecorder<F>,
}

impl<F: ActiveFloat> ActiveRecorder<F> {
    pub fn new(recorder: &mut GraphRecorder<F>) -> Result<Self> {
        let ptr: *mut GraphRecorder<F> = recorder;
        active::activate_recorder(ptr)?;
        Ok(ActiveRecorder { recorder: ptr })
    }
}

impl<F: ActiveFloat> Drop for ActiveRecorder<F> {
    fn drop(&mut self) {
        active::deactivate_recorder(self.recorder);
    }
}
