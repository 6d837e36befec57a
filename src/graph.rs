//! Graph IR for record-once, replay-many differentiation.
//!
//! Unlike the tape, which stores pre-evaluated local partials, the graph
//! stores symbolic operations. A backend can replay it at new input values,
//! so one recording serves many evaluation points as long as control flow is
//! expressed through [`OpCode::If`] nodes.
//!
//! Storage is struct-of-arrays: one vector per field, indexed by node id.
//! Node ids are assigned in program order and stay stable until [`Graph::clear`].

use crate::float::Float;

/// Operation identifier for a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum OpCode {
    Input = 0,
    Constant = 1,
    Add = 2,
    Sub = 3,
    Mul = 4,
    Div = 5,
    Mod = 6,
    Neg = 7,
    Sin = 8,
    Cos = 9,
    Tan = 10,
    Asin = 11,
    Acos = 12,
    Atan = 13,
    Sinh = 14,
    Cosh = 15,
    Tanh = 16,
    Asinh = 17,
    Acosh = 18,
    Atanh = 19,
    Exp = 20,
    Expm1 = 21,
    Log = 22,
    Log1p = 23,
    Log2 = 24,
    Log10 = 25,
    Sqrt = 26,
    Cbrt = 27,
    Square = 28,
    Pow = 29,
    Abs = 30,
    Min = 31,
    Max = 32,
    Floor = 33,
    Ceil = 34,
    Round = 35,
    Trunc = 36,
    Copysign = 37,
    Atan2 = 38,
    Hypot = 39,
    /// Ternary select: operand `a` is a recorded condition, `b` the value if
    /// the condition is nonzero, `c` otherwise.
    If = 40,
    CmpLt = 41,
    CmpLe = 42,
    CmpGt = 43,
    CmpGe = 44,
    CmpEq = 45,
    CmpNe = 46,
}

/// Per-node flag bits.
pub mod node_flags {
    pub const IS_ACTIVE: u8 = 0x01;
    pub const IS_DEAD: u8 = 0x02;
    pub const NEEDS_GRADIENT: u8 = 0x04;
}

/// Recorded computation graph in struct-of-arrays layout.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Graph<F: Float> {
    opcodes: Vec<OpCode>,
    operand_a: Vec<u32>,
    operand_b: Vec<u32>,
    operand_c: Vec<u32>,
    immediates: Vec<F>,
    flags: Vec<u8>,
    const_pool: Vec<F>,
    input_ids: Vec<u32>,
    output_ids: Vec<u32>,
}

impl<F: Float> Graph<F> {
    pub fn new() -> Self {
        Graph {
            opcodes: Vec::new(),
            operand_a: Vec::new(),
            operand_b: Vec::new(),
            operand_c: Vec::new(),
            immediates: Vec::new(),
            flags: Vec::new(),
            const_pool: Vec::new(),
            input_ids: Vec::new(),
            output_ids: Vec::new(),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.opcodes.len()
    }

    pub fn num_inputs(&self) -> usize {
        self.input_ids.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.output_ids.len()
    }

    pub fn num_constants(&self) -> usize {
        self.const_pool.len()
    }

    pub fn input_ids(&self) -> &[u32] {
        &self.input_ids
    }

    pub fn output_ids(&self) -> &[u32] {
        &self.output_ids
    }

    #[inline]
    pub fn opcode(&self, id: u32) -> OpCode {
        self.opcodes[id as usize]
    }

    #[inline]
    pub fn operands(&self, id: u32) -> (u32, u32, u32) {
        let i = id as usize;
        (self.operand_a[i], self.operand_b[i], self.operand_c[i])
    }

    #[inline]
    pub fn immediate(&self, id: u32) -> F {
        self.immediates[id as usize]
    }

    pub fn flags(&self, id: u32) -> u8 {
        self.flags[id as usize]
    }

    fn push_node(&mut self, op: OpCode, a: u32, b: u32, c: u32, imm: F, flags: u8) -> u32 {
        let id = self.opcodes.len() as u32;
        self.opcodes.push(op);
        self.operand_a.push(a);
        self.operand_b.push(b);
        self.operand_c.push(c);
        self.immediates.push(imm);
        self.flags.push(flags);
        id
    }

    /// Append an input node and register it in recording order.
    pub fn add_input(&mut self) -> u32 {
        let id = self.push_node(OpCode::Input, 0, 0, 0, F::zero(), node_flags::IS_ACTIVE);
        self.input_ids.push(id);
        id
    }

    /// Append a constant node, deduplicating identical values through the
    /// constant pool. The pool index lands in operand `a`, the value itself
    /// in the node's immediate.
    pub fn add_constant(&mut self, value: F) -> u32 {
        let pool_index = match self.const_pool.iter().position(|&c| c == value) {
            Some(i) => i as u32,
            None => {
                self.const_pool.push(value);
                (self.const_pool.len() - 1) as u32
            }
        };
        self.push_node(OpCode::Constant, pool_index, 0, 0, value, 0)
    }

    pub fn add_unary(&mut self, op: OpCode, a: u32) -> u32 {
        self.push_node(op, a, 0, 0, F::zero(), node_flags::IS_ACTIVE)
    }

    pub fn add_binary(&mut self, op: OpCode, a: u32, b: u32) -> u32 {
        self.push_node(op, a, b, 0, F::zero(), node_flags::IS_ACTIVE)
    }

    pub fn add_ternary(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> u32 {
        self.push_node(op, a, b, c, F::zero(), node_flags::IS_ACTIVE)
    }

    /// Mark a node as a graph output; outputs are gathered in marking order.
    pub fn mark_output(&mut self, id: u32) {
        self.flags[id as usize] |= node_flags::NEEDS_GRADIENT;
        self.output_ids.push(id);
    }

    /// Remove every node while keeping allocations for the next recording.
    pub fn clear(&mut self) {
        self.opcodes.clear();
        self.operand_a.clear();
        self.operand_b.clear();
        self.operand_c.clear();
        self.immediates.clear();
        self.flags.clear();
        self.const_pool.clear();
        self.input_ids.clear();
        self.output_ids.clear();
    }

    /// Approximate heap footprint in bytes.
    pub fn memory(&self) -> usize {
        let per_node = std::mem::size_of::<OpCode>()
            + 3 * std::mem::size_of::<u32>()
            + std::mem::size_of::<F>()
            + 1;
        self.opcodes.capacity() * per_node
            + self.const_pool.capacity() * std::mem::size_of::<F>()
            + (self.input_ids.capacity() + self.output_ids.capacity()) * 4
    }
}
