//! Elemental math functions for [`Var`].
//!
//! Each function evaluates the result and the local partial(s) eagerly for
//! the tape path and names the opcode for the graph path. Derivative rules
//! mirror the reference interpreter so both engines agree numerically.

use crate::active::ActiveFloat;
use crate::graph::OpCode;
use crate::var::Var;

impl<F: ActiveFloat> Var<F> {
    pub fn sin(&self) -> Var<F> {
        Var::from_unary(self, self.value.sin(), self.value.cos(), OpCode::Sin)
    }

    pub fn cos(&self) -> Var<F> {
        Var::from_unary(self, self.value.cos(), -self.value.sin(), OpCode::Cos)
    }

    pub fn tan(&self) -> Var<F> {
        let c = self.value.cos();
        Var::from_unary(self, self.value.tan(), (c * c).recip(), OpCode::Tan)
    }

    pub fn asin(&self) -> Var<F> {
        let d = (F::one() - self.value * self.value).sqrt();
        Var::from_unary(self, self.value.asin(), d.recip(), OpCode::Asin)
    }

    pub fn acos(&self) -> Var<F> {
        let d = (F::one() - self.value * self.value).sqrt();
        Var::from_unary(self, self.value.acos(), -d.recip(), OpCode::Acos)
    }

    pub fn atan(&self) -> Var<F> {
        let d = F::one() + self.value * self.value;
        Var::from_unary(self, self.value.atan(), d.recip(), OpCode::Atan)
    }

    pub fn sinh(&self) -> Var<F> {
        Var::from_unary(self, self.value.sinh(), self.value.cosh(), OpCode::Sinh)
    }

    pub fn cosh(&self) -> Var<F> {
        Var::from_unary(self, self.value.cosh(), self.value.sinh(), OpCode::Cosh)
    }

    pub fn tanh(&self) -> Var<F> {
        let t = self.value.tanh();
        Var::from_unary(self, t, F::one() - t * t, OpCode::Tanh)
    }

    pub fn asinh(&self) -> Var<F> {
        let d = (self.value * self.value + F::one()).sqrt();
        Var::from_unary(self, self.value.asinh(), d.recip(), OpCode::Asinh)
    }

    pub fn acosh(&self) -> Var<F> {
        let d = (self.value * self.value - F::one()).sqrt();
        Var::from_unary(self, self.value.acosh(), d.recip(), OpCode::Acosh)
    }

    pub fn atanh(&self) -> Var<F> {
        let d = F::one() - self.value * self.value;
        Var::from_unary(self, self.value.atanh(), d.recip(), OpCode::Atanh)
    }

    pub fn exp(&self) -> Var<F> {
        let e = self.value.exp();
        Var::from_unary(self, e, e, OpCode::Exp)
    }

    pub fn exp_m1(&self) -> Var<F> {
        Var::from_unary(self, self.value.exp_m1(), self.value.exp(), OpCode::Expm1)
    }

    /// `2^x`, recorded as a power with constant base.
    pub fn exp2(&self) -> Var<F> {
        let two = F::from(2.0).unwrap();
        let r = self.value.exp2();
        Var::from_binary(
            &Var::new(two),
            self,
            r,
            F::zero(),
            r * F::LN_2(),
            OpCode::Pow,
        )
    }

    pub fn ln(&self) -> Var<F> {
        Var::from_unary(self, self.value.ln(), self.value.recip(), OpCode::Log)
    }

    pub fn ln_1p(&self) -> Var<F> {
        let d = F::one() + self.value;
        Var::from_unary(self, self.value.ln_1p(), d.recip(), OpCode::Log1p)
    }

    pub fn log2(&self) -> Var<F> {
        let d = self.value * F::LN_2();
        Var::from_unary(self, self.value.log2(), d.recip(), OpCode::Log2)
    }

    pub fn log10(&self) -> Var<F> {
        let d = self.value * F::LN_10();
        Var::from_unary(self, self.value.log10(), d.recip(), OpCode::Log10)
    }

    pub fn sqrt(&self) -> Var<F> {
        let r = self.value.sqrt();
        let two = F::from(2.0).unwrap();
        Var::from_unary(self, r, (two * r).recip(), OpCode::Sqrt)
    }

    pub fn cbrt(&self) -> Var<F> {
        let r = self.value.cbrt();
        let three = F::from(3.0).unwrap();
        Var::from_unary(self, r, (three * r * r).recip(), OpCode::Cbrt)
    }

    /// `1/x`, recorded as a division with constant numerator.
    pub fn recip(&self) -> Var<F> {
        let inv = self.value.recip();
        Var::from_binary(
            &Var::new(F::one()),
            self,
            inv,
            inv,
            -inv * inv,
            OpCode::Div,
        )
    }

    pub fn abs(&self) -> Var<F> {
        let zero = F::zero();
        let da = if self.value > zero {
            F::one()
        } else if self.value < zero {
            -F::one()
        } else {
            zero
        };
        Var::from_unary(self, self.value.abs(), da, OpCode::Abs)
    }

    /// `x*x` with a single recorded operation.
    pub fn square(&self) -> Var<F> {
        let two = F::from(2.0).unwrap();
        Var::from_unary(
            self,
            self.value * self.value,
            two * self.value,
            OpCode::Square,
        )
    }

    pub fn powi(&self, n: i32) -> Var<F> {
        let nf = F::from_i32(n).unwrap();
        let da = nf * self.value.powi(n - 1);
        Var::from_binary(self, &Var::new(nf), self.value.powi(n), da, F::zero(), OpCode::Pow)
    }

    pub fn powf(&self, exponent: &Var<F>) -> Var<F> {
        let r = self.value.powf(exponent.value);
        let da = exponent.value * self.value.powf(exponent.value - F::one());
        let db = if self.value > F::zero() {
            r * self.value.ln()
        } else {
            F::zero()
        };
        Var::from_binary(self, exponent, r, da, db, OpCode::Pow)
    }

    pub fn hypot(&self, other: &Var<F>) -> Var<F> {
        let r = self.value.hypot(other.value);
        Var::from_binary(
            self,
            other,
            r,
            self.value / r,
            other.value / r,
            OpCode::Hypot,
        )
    }

    pub fn atan2(&self, other: &Var<F>) -> Var<F> {
        let denom = self.value * self.value + other.value * other.value;
        Var::from_binary(
            self,
            other,
            self.value.atan2(other.value),
            other.value / denom,
            -self.value / denom,
            OpCode::Atan2,
        )
    }

    pub fn min(&self, other: &Var<F>) -> Var<F> {
        let take_self = self.value < other.value;
        let (da, db) = if take_self {
            (F::one(), F::zero())
        } else {
            (F::zero(), F::one())
        };
        Var::from_binary(
            self,
            other,
            self.value.min(other.value),
            da,
            db,
            OpCode::Min,
        )
    }

    pub fn max(&self, other: &Var<F>) -> Var<F> {
        let take_self = self.value > other.value;
        let (da, db) = if take_self {
            (F::one(), F::zero())
        } else {
            (F::zero(), F::one())
        };
        Var::from_binary(
            self,
            other,
            self.value.max(other.value),
            da,
            db,
            OpCode::Max,
        )
    }

    pub fn floor(&self) -> Var<F> {
        Var::from_unary(self, self.value.floor(), F::zero(), OpCode::Floor)
    }

    pub fn ceil(&self) -> Var<F> {
        Var::from_unary(self, self.value.ceil(), F::zero(), OpCode::Ceil)
    }

    pub fn round(&self) -> Var<F> {
        Var::from_unary(self, self.value.round(), F::zero(), OpCode::Round)
    }

    pub fn trunc(&self) -> Var<F> {
        Var::from_unary(self, self.value.trunc(), F::zero(), OpCode::Trunc)
    }

    /// Sign of the value (`±1`). Piecewise constant, so the derivative is
    /// zero everywhere; recorded as a copysign onto a unit magnitude.
    pub fn signum(&self) -> Var<F> {
        Var::from_binary(
            &Var::new(F::one()),
            self,
            self.value.signum(),
            F::zero(),
            F::zero(),
            OpCode::Copysign,
        )
    }

    pub fn copysign(&self, sign: &Var<F>) -> Var<F> {
        let zero = F::zero();
        let same = (self.value >= zero) == (sign.value >= zero);
        let da = if same { F::one() } else { -F::one() };
        Var::from_binary(
            self,
            sign,
            self.value.abs() * sign.value.signum(),
            da,
            zero,
            OpCode::Copysign,
        )
    }
}
