//! Reference interpreter backend.
//!
//! Evaluates a compiled [`Graph`] one node at a time, scalar lanes only. It
//! is the semantic baseline other backends are checked against: the forward
//! pass walks nodes in index order, the backward pass walks them in reverse
//! and accumulates adjoints into the operands.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::float::Float;
use crate::graph::{Graph, OpCode};

/// Single-lane graph evaluator.
#[derive(Debug, Default)]
pub struct GraphInterpreter<F: Float> {
    graph: Graph<F>,
    inputs: Vec<F>,
    values: Vec<F>,
    adjoints: Vec<F>,
    compiled: bool,
}

impl<F: Float> GraphInterpreter<F> {
    pub fn new() -> Self {
        GraphInterpreter {
            graph: Graph::new(),
            inputs: Vec::new(),
            values: Vec::new(),
            adjoints: Vec::new(),
            compiled: false,
        }
    }

    #[inline]
    fn value(&self, id: u32) -> F {
        self.values[id as usize]
    }

    fn eval_forward(&mut self) {
        let zero = F::zero();
        for i in 0..self.graph.num_nodes() {
            let id = i as u32;
            let (a, b, c) = self.graph.operands(id);
            let v = match self.graph.opcode(id) {
                OpCode::Input | OpCode::Constant => continue, // seeded below / at compile
                OpCode::Add => self.value(a) + self.value(b),
                OpCode::Sub => self.value(a) - self.value(b),
                OpCode::Mul => self.value(a) * self.value(b),
                OpCode::Div => self.value(a) / self.value(b),
                OpCode::Mod => self.value(a) % self.value(b),
                OpCode::Neg => -self.value(a),
                OpCode::Sin => self.value(a).sin(),
                OpCode::Cos => self.value(a).cos(),
                OpCode::Tan => self.value(a).tan(),
                OpCode::Asin => self.value(a).asin(),
                OpCode::Acos => self.value(a).acos(),
                OpCode::Atan => self.value(a).atan(),
                OpCode::Sinh => self.value(a).sinh(),
                OpCode::Cosh => self.value(a).cosh(),
                OpCode::Tanh => self.value(a).tanh(),
                OpCode::Asinh => self.value(a).asinh(),
                OpCode::Acosh => self.value(a).acosh(),
                OpCode::Atanh => self.value(a).atanh(),
                OpCode::Exp => self.value(a).exp(),
                OpCode::Expm1 => self.value(a).exp_m1(),
                OpCode::Log => self.value(a).ln(),
                OpCode::Log1p => self.value(a).ln_1p(),
                OpCode::Log2 => self.value(a).log2(),
                OpCode::Log10 => self.value(a).log10(),
                OpCode::Sqrt => self.value(a).sqrt(),
                OpCode::Cbrt => self.value(a).cbrt(),
                OpCode::Square => self.value(a) * self.value(a),
                OpCode::Pow => self.value(a).powf(self.value(b)),
                OpCode::Abs => self.value(a).abs(),
                OpCode::Min => self.value(a).min(self.value(b)),
                OpCode::Max => self.value(a).max(self.value(b)),
                OpCode::Floor => self.value(a).floor(),
                OpCode::Ceil => self.value(a).ceil(),
                OpCode::Round => self.value(a).round(),
                OpCode::Trunc => self.value(a).trunc(),
                OpCode::Copysign => self.value(a).abs() * self.value(b).signum(),
                OpCode::Atan2 => self.value(a).atan2(self.value(b)),
                OpCode::Hypot => self.value(a).hypot(self.value(b)),
                OpCode::If => {
                    if self.value(a) != zero {
                        self.value(b)
                    } else {
                        self.value(c)
                    }
                }
                OpCode::CmpLt => bool_val(self.value(a) < self.value(b)),
                OpCode::CmpLe => bool_val(self.value(a) <= self.value(b)),
                OpCode::CmpGt => bool_val(self.value(a) > self.value(b)),
                OpCode::CmpGe => bool_val(self.value(a) >= self.value(b)),
                OpCode::CmpEq => bool_val(self.value(a) == self.value(b)),
                OpCode::CmpNe => bool_val(self.value(a) != self.value(b)),
            };
            self.values[i] = v;
        }
    }

    fn eval_backward(&mut self) {
        let zero = F::zero();
        let one = F::one();
        let two = F::from(2.0).unwrap();
        let three = F::from(3.0).unwrap();
        for i in (0..self.graph.num_nodes()).rev() {
            let adj = self.adjoints[i];
            if adj == zero {
                continue;
            }
            let id = i as u32;
            let (a, b, c) = self.graph.operands(id);
            let (ai, bi, ci) = (a as usize, b as usize, c as usize);
            let r = self.values[i];
            match self.graph.opcode(id) {
                OpCode::Input | OpCode::Constant => {}
                OpCode::Add => {
                    self.adjoints[ai] = self.adjoints[ai] + adj;
                    self.adjoints[bi] = self.adjoints[bi] + adj;
                }
                OpCode::Sub => {
                    self.adjoints[ai] = self.adjoints[ai] + adj;
                    self.adjoints[bi] = self.adjoints[bi] - adj;
                }
                OpCode::Mul => {
                    self.adjoints[ai] = self.adjoints[ai] + adj * self.value(b);
                    self.adjoints[bi] = self.adjoints[bi] + adj * self.value(a);
                }
                OpCode::Div => {
                    let vb = self.value(b);
                    self.adjoints[ai] = self.adjoints[ai] + adj / vb;
                    self.adjoints[bi] = self.adjoints[bi] - adj * self.value(a) / (vb * vb);
                }
                OpCode::Mod => {
                    self.adjoints[ai] = self.adjoints[ai] + adj;
                    self.adjoints[bi] =
                        self.adjoints[bi] - adj * (self.value(a) / self.value(b)).floor();
                }
                OpCode::Neg => {
                    self.adjoints[ai] = self.adjoints[ai] - adj;
                }
                OpCode::Sin => {
                    self.adjoints[ai] = self.adjoints[ai] + adj * self.value(a).cos();
                }
                OpCode::Cos => {
                    self.adjoints[ai] = self.adjoints[ai] - adj * self.value(a).sin();
                }
                OpCode::Tan => {
                    let cs = self.value(a).cos();
                    self.adjoints[ai] = self.adjoints[ai] + adj / (cs * cs);
                }
                OpCode::Asin => {
                    let va = self.value(a);
                    self.adjoints[ai] = self.adjoints[ai] + adj / (one - va * va).sqrt();
                }
                OpCode::Acos => {
                    let va = self.value(a);
                    self.adjoints[ai] = self.adjoints[ai] - adj / (one - va * va).sqrt();
                }
                OpCode::Atan => {
                    let va = self.value(a);
                    self.adjoints[ai] = self.adjoints[ai] + adj / (one + va * va);
                }
                OpCode::Sinh => {
                    self.adjoints[ai] = self.adjoints[ai] + adj * self.value(a).cosh();
                }
                OpCode::Cosh => {
                    self.adjoints[ai] = self.adjoints[ai] + adj * self.value(a).sinh();
                }
                OpCode::Tanh => {
                    self.adjoints[ai] = self.adjoints[ai] + adj * (one - r * r);
                }
                OpCode::Asinh => {
                    let va = self.value(a);
                    self.adjoints[ai] = self.adjoints[ai] + adj / (va * va + one).sqrt();
                }
                OpCode::Acosh => {
                    let va = self.value(a);
                    self.adjoints[ai] = self.adjoints[ai] + adj / (va * va - one).sqrt();
                }
                OpCode::Atanh => {
                    let va = self.value(a);
                    self.adjoints[ai] = self.adjoints[ai] + adj / (one - va * va);
                }
                OpCode::Exp => {
                    self.adjoints[ai] = self.adjoints[ai] + adj * r;
                }
                OpCode::Expm1 => {
                    self.adjoints[ai] = self.adjoints[ai] + adj * self.value(a).exp();
                }
                OpCode::Log => {
                    self.adjoints[ai] = self.adjoints[ai] + adj / self.value(a);
                }
                OpCode::Log1p => {
                    self.adjoints[ai] = self.adjoints[ai] + adj / (one + self.value(a));
                }
                OpCode::Log2 => {
                    self.adjoints[ai] = self.adjoints[ai] + adj / (self.value(a) * F::LN_2());
                }
                OpCode::Log10 => {
                    self.adjoints[ai] = self.adjoints[ai] + adj / (self.value(a) * F::LN_10());
                }
                OpCode::Sqrt => {
                    self.adjoints[ai] = self.adjoints[ai] + adj / (two * r);
                }
                OpCode::Cbrt => {
                    self.adjoints[ai] = self.adjoints[ai] + adj / (three * r * r);
                }
                OpCode::Square => {
                    self.adjoints[ai] = self.adjoints[ai] + adj * two * self.value(a);
                }
                OpCode::Pow => {
                    let va = self.value(a);
                    let vb = self.value(b);
                    self.adjoints[ai] = self.adjoints[ai] + adj * vb * va.powf(vb - one);
                    if va > zero {
                        self.adjoints[bi] = self.adjoints[bi] + adj * r * va.ln();
                    }
                }
                OpCode::Abs => {
                    let va = self.value(a);
                    if va > zero {
                        self.adjoints[ai] = self.adjoints[ai] + adj;
                    } else if va < zero {
                        self.adjoints[ai] = self.adjoints[ai] - adj;
                    }
                }
                OpCode::Min => {
                    if self.value(a) < self.value(b) {
                        self.adjoints[ai] = self.adjoints[ai] + adj;
                    } else {
                        self.adjoints[bi] = self.adjoints[bi] + adj;
                    }
                }
                OpCode::Max => {
                    if self.value(a) > self.value(b) {
                        self.adjoints[ai] = self.adjoints[ai] + adj;
                    } else {
                        self.adjoints[bi] = self.adjoints[bi] + adj;
                    }
                }
                OpCode::Floor | OpCode::Ceil | OpCode::Round | OpCode::Trunc => {}
                OpCode::Copysign => {
                    let same = (self.value(a) >= zero) == (self.value(b) >= zero);
                    if same {
                        self.adjoints[ai] = self.adjoints[ai] + adj;
                    } else {
                        self.adjoints[ai] = self.adjoints[ai] - adj;
                    }
                }
                OpCode::Atan2 => {
                    let va = self.value(a);
                    let vb = self.value(b);
                    let denom = va * va + vb * vb;
                    self.adjoints[ai] = self.adjoints[ai] + adj * vb / denom;
                    self.adjoints[bi] = self.adjoints[bi] - adj * va / denom;
                }
                OpCode::Hypot => {
                    self.adjoints[ai] = self.adjoints[ai] + adj * self.value(a) / r;
                    self.adjoints[bi] = self.adjoints[bi] + adj * self.value(b) / r;
                }
                OpCode::If => {
                    // Gradient flows through the taken branch only.
                    if self.value(a) != zero {
                        self.adjoints[bi] = self.adjoints[bi] + adj;
                    } else {
                        self.adjoints[ci] = self.adjoints[ci] + adj;
                    }
                }
                OpCode::CmpLt
                | OpCode::CmpLe
                | OpCode::CmpGt
                | OpCode::CmpGe
                | OpCode::CmpEq
                | OpCode::CmpNe => {}
            }
        }
    }

    fn seed_and_run_forward(&mut self, outputs: &mut [F]) -> Result<()> {
        let width = self.vector_width();
        let expected = self.graph.num_outputs() * width;
        if outputs.len() != expected {
            return Err(Error::count_mismatch("output", expected, outputs.len()));
        }
        // Constants first so re-evaluation after reset stays consistent.
        for i in 0..self.graph.num_nodes() {
            if self.graph.opcode(i as u32) == OpCode::Constant {
                self.values[i] = self.graph.immediate(i as u32);
            }
        }
        let input_ids: Vec<u32> = self.graph.input_ids().to_vec();
        for (k, id) in input_ids.iter().enumerate() {
            self.values[*id as usize] = self.inputs[k];
        }
        self.eval_forward();
        for (k, id) in self.graph.output_ids().iter().enumerate() {
            outputs[k] = self.values[*id as usize];
        }
        Ok(())
    }
}

#[inline]
fn bool_val<F: Float>(b: bool) -> F {
    if b {
        F::one()
    } else {
        F::zero()
    }
}

impl<F: Float> Backend<F> for GraphInterpreter<F> {
    fn compile(&mut self, graph: &Graph<F>) -> Result<()> {
        self.graph = graph.clone();
        let n = self.graph.num_nodes();
        self.values.clear();
        self.values.resize(n, F::zero());
        self.adjoints.clear();
        self.adjoints.resize(n, F::zero());
        self.inputs.clear();
        self.inputs.resize(self.graph.num_inputs(), F::zero());
        self.compiled = true;
        Ok(())
    }

    fn reset(&mut self) {
        self.graph.clear();
        self.inputs.clear();
        self.values.clear();
        self.adjoints.clear();
        self.compiled = false;
    }

    fn vector_width(&self) -> usize {
        1
    }

    fn num_inputs(&self) -> usize {
        self.graph.num_inputs()
    }

    fn num_outputs(&self) -> usize {
        self.graph.num_outputs()
    }

    fn set_input(&mut self, index: usize, values: &[F]) -> Result<()> {
        if !self.compiled || index >= self.inputs.len() {
            return Err(Error::out_of_range("input index", index, self.inputs.len()));
        }
        if values.len() != 1 {
            return Err(Error::count_mismatch("input lane", 1, values.len()));
        }
        self.inputs[index] = values[0];
        Ok(())
    }

    fn forward(&mut self, outputs: &mut [F]) -> Result<()> {
        self.seed_and_run_forward(outputs)
    }

    fn forward_and_backward(
        &mut self,
        output_adjoints: &[F],
        outputs: &mut [F],
        input_gradients: &mut [F],
    ) -> Result<()> {
        let n_out = self.graph.num_outputs();
        if output_adjoints.len() != n_out {
            return Err(Error::count_mismatch(
                "output adjoint",
                n_out,
                output_adjoints.len(),
            ));
        }
        let n_in = self.graph.num_inputs();
        if input_gradients.len() != n_in {
            return Err(Error::count_mismatch(
                "input gradient",
                n_in,
                input_gradients.len(),
            ));
        }
        self.seed_and_run_forward(outputs)?;
        for adj in &mut self.adjoints {
            *adj = F::zero();
        }
        let output_ids: Vec<u32> = self.graph.output_ids().to_vec();
        for (k, id) in output_ids.iter().enumerate() {
            let i = *id as usize;
            self.adjoints[i] = self.adjoints[i] + output_adjoints[k];
        }
        self.eval_backward();
        for (k, id) in self.graph.input_ids().iter().enumerate() {
            input_gradients[k] = self.adjoints[*id as usize];
        }
        Ok(())
    }
}
