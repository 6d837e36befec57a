//! Numeric foundation shared by the tape and the graph recorder.

use std::fmt::{Debug, Display};

use num_traits::{Float as NumFloat, FloatConst, FromPrimitive};

/// Base floating-point scalar both engines are generic over.
///
/// Bundles the `num-traits` numerics, the constants the derivative rules
/// reach for (`LN_2`, `LN_10`) and the auto traits threaded through the
/// engines. Implemented for `f32` and `f64` only; [`crate::Var`] wraps a
/// `Float` rather than implementing the trait itself.
pub trait Float:
    NumFloat + FloatConst + FromPrimitive + Copy + Send + Sync + Default + Debug + Display + 'static
{
}

impl Float for f32 {}
impl Float for f64 {}
