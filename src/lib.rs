//! Reverse-mode automatic differentiation with a slot-based adjoint tape
//! and a replayable graph IR.
//!
//! Two engines share one scalar type, [`Var`]:
//!
//! * [`Tape`] records pre-evaluated local partials per statement and runs a
//!   multiply-accumulate adjoint sweep, with checkpoint callbacks, nested
//!   recordings and partial rollback for memory-bounded adjoints.
//! * [`GraphRecorder`] records symbolic graph nodes and replays them through
//!   a [`Backend`] (the bundled [`GraphInterpreter`] by default) at fresh
//!   input values, so one recording serves many evaluation points.
//!
//! At most one engine per thread and float type is active at a time;
//! activation is scoped through RAII guards ([`ActiveTape`],
//! [`ActiveRecorder`]).

mod abool;
mod active;
pub mod arena;
pub mod backend;
pub mod error;
pub mod float;
pub mod graph;
pub mod interpreter;
pub mod ops;
pub mod recorder;
pub mod slots;
pub mod tape;
mod var;
mod var_math;
mod var_ops;

pub use abool::TrackedBool;
pub use active::ActiveFloat;
pub use backend::Backend;
pub use error::{Error, Result};
pub use float::Float;
pub use graph::{Graph, OpCode};
pub use interpreter::GraphInterpreter;
pub use recorder::{ActiveRecorder, GraphRecorder};
pub use slots::{SlotPolicy, INVALID_SLOT};
pub use tape::{ActiveTape, CheckpointCallback, NestedRecording, Position, Tape, TapeStats};
pub use var::Var;

/// Type alias for reverse-mode variables over `f64`.
pub type Var64 = Var<f64>;
/// Type alias for reverse-mode variables over `f32`.
pub type Var32 = Var<f32>;
