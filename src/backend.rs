//! Execution backend contract for compiled graphs.

use crate::error::Result;
use crate::float::Float;
use crate::graph::Graph;

/// A compilation target for a recorded [`Graph`].
///
/// The front-end drives backends through this trait: compile once, then set
/// inputs and run forward (and optionally backward) passes as many times as
/// needed. Implementations may evaluate several independent points per pass;
/// [`Backend::vector_width`] reports how many lanes each input slot carries.
pub trait Backend<F: Float> {
    /// Prepare internal buffers for `graph`. Called before any evaluation,
    /// and again whenever the recorded graph changes.
    fn compile(&mut self, graph: &Graph<F>) -> Result<()>;

    /// Drop compiled state; a new `compile` is required before evaluation.
    fn reset(&mut self);

    /// Number of evaluation lanes per pass.
    fn vector_width(&self) -> usize;

    /// Input count of the compiled graph.
    fn num_inputs(&self) -> usize;

    /// Output count of the compiled graph.
    fn num_outputs(&self) -> usize;

    /// Stage values for input `index`, one per lane.
    fn set_input(&mut self, index: usize, values: &[F]) -> Result<()>;

    /// Evaluate the graph at the staged inputs. `outputs` must hold
    /// `num_outputs() * vector_width()` elements.
    fn forward(&mut self, outputs: &mut [F]) -> Result<()>;

    /// Evaluate forward, then propagate `output_adjoints` back to the inputs.
    /// `input_gradients` must hold `num_inputs() * vector_width()` elements.
    fn forward_and_backward(
        &mut self,
        output_adjoints: &[F],
        outputs: &mut [F],
        input_gradients: &mut [F],
    ) -> Result<()>;
}
