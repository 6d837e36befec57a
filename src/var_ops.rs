//! Arithmetic operators for [`Var`].
//!
//! The recording impls live on references; owned and mixed forms delegate.
//! Local partials are evaluated eagerly for the tape path, the opcode feeds
//! the graph path.

use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

use crate::active::ActiveFloat;
use crate::graph::OpCode;
use crate::var::Var;

impl<'b, F: ActiveFloat> Add<&'b Var<F>> for &Var<F> {
    type Output = Var<F>;
    #[inline]
    fn add(self, rhs: &'b Var<F>) -> Var<F> {
        Var::from_binary(
            self,
            rhs,
            self.value + rhs.value,
            F::one(),
            F::one(),
            OpCode::Add,
        )
    }
}

impl<'b, F: ActiveFloat> Sub<&'b Var<F>> for &Var<F> {
    type Output = Var<F>;
    #[inline]
    fn sub(self, rhs: &'b Var<F>) -> Var<F> {
        Var::from_binary(
            self,
            rhs,
            self.value - rhs.value,
            F::one(),
            -F::one(),
            OpCode::Sub,
        )
    }
}

impl<'b, F: ActiveFloat> Mul<&'b Var<F>> for &Var<F> {
    type Output = Var<F>;
    #[inline]
    fn mul(self, rhs: &'b Var<F>) -> Var<F> {
        Var::from_binary(
            self,
            rhs,
            self.value * rhs.value,
            rhs.value,
            self.value,
            OpCode::Mul,
        )
    }
}

impl<'b, F: ActiveFloat> Div<&'b Var<F>> for &Var<F> {
    type Output = Var<F>;
    #[inline]
    fn div(self, rhs: &'b Var<F>) -> Var<F> {
        let inv = F::one() / rhs.value;
        Var::from_binary(
            self,
            rhs,
            self.value * inv,
            inv,
            -self.value * inv * inv,
            OpCode::Div,
        )
    }
}

impl<'b, F: ActiveFloat> Rem<&'b Var<F>> for &Var<F> {
    type Output = Var<F>;
    #[inline]
    fn rem(self, rhs: &'b Var<F>) -> Var<F> {
        Var::from_binary(
            self,
            rhs,
            self.value % rhs.value,
            F::one(),
            -(self.value / rhs.value).floor(),
            OpCode::Mod,
        )
    }
}

impl<F: ActiveFloat> Neg for &Var<F> {
    type Output = Var<F>;
    #[inline]
    fn neg(self) -> Var<F> {
        Var::from_unary(self, -self.value, -F::one(), OpCode::Neg)
    }
}

impl<F: ActiveFloat> Neg for Var<F> {
    type Output = Var<F>;
    #[inline]
    fn neg(self) -> Var<F> {
        -&self
    }
}

// Owned and mixed-ownership forms delegate to the reference impls.
macro_rules! forward_var_binop {
    ($trait:ident, $method:ident) => {
        impl<F: ActiveFloat> $trait for Var<F> {
            type Output = Var<F>;
            #[inline]
            fn $method(self, rhs: Var<F>) -> Var<F> {
                (&self).$method(&rhs)
            }
        }

        impl<'a, F: ActiveFloat> $trait<&'a Var<F>> for Var<F> {
            type Output = Var<F>;
            #[inline]
            fn $method(self, rhs: &'a Var<F>) -> Var<F> {
                (&self).$method(rhs)
            }
        }

        impl<F: ActiveFloat> $trait<Var<F>> for &Var<F> {
            type Output = Var<F>;
            #[inline]
            fn $method(self, rhs: Var<F>) -> Var<F> {
                self.$method(&rhs)
            }
        }
    };
}

forward_var_binop!(Add, add);
forward_var_binop!(Sub, sub);
forward_var_binop!(Mul, mul);
forward_var_binop!(Div, div);
forward_var_binop!(Rem, rem);

// Scalar on the right-hand side.
macro_rules! impl_var_scalar_rhs {
    ($trait:ident, $method:ident) => {
        impl<F: ActiveFloat> $trait<F> for &Var<F> {
            type Output = Var<F>;
            #[inline]
            fn $method(self, rhs: F) -> Var<F> {
                self.$method(&Var::new(rhs))
            }
        }

        impl<F: ActiveFloat> $trait<F> for Var<F> {
            type Output = Var<F>;
            #[inline]
            fn $method(self, rhs: F) -> Var<F> {
                (&self).$method(&Var::new(rhs))
            }
        }
    };
}

impl_var_scalar_rhs!(Add, add);
impl_var_scalar_rhs!(Sub, sub);
impl_var_scalar_rhs!(Mul, mul);
impl_var_scalar_rhs!(Div, div);
impl_var_scalar_rhs!(Rem, rem);

// Scalar on the left-hand side; coherence requires concrete float types.
macro_rules! impl_var_scalar_lhs {
    ($f:ty) => {
        impl Add<Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn add(self, rhs: Var<$f>) -> Var<$f> {
                &Var::new(self) + &rhs
            }
        }

        impl<'a> Add<&'a Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn add(self, rhs: &'a Var<$f>) -> Var<$f> {
                &Var::new(self) + rhs
            }
        }

        impl Sub<Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn sub(self, rhs: Var<$f>) -> Var<$f> {
                &Var::new(self) - &rhs
            }
        }

        impl<'a> Sub<&'a Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn sub(self, rhs: &'a Var<$f>) -> Var<$f> {
                &Var::new(self) - rhs
            }
        }

        impl Mul<Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn mul(self, rhs: Var<$f>) -> Var<$f> {
                &Var::new(self) * &rhs
            }
        }

        impl<'a> Mul<&'a Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn mul(self, rhs: &'a Var<$f>) -> Var<$f> {
                &Var::new(self) * rhs
            }
        }

        impl Div<Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn div(self, rhs: Var<$f>) -> Var<$f> {
                &Var::new(self) / &rhs
            }
        }

        impl<'a> Div<&'a Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn div(self, rhs: &'a Var<$f>) -> Var<$f> {
                &Var::new(self) / rhs
            }
        }

        impl Rem<Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn rem(self, rhs: Var<$f>) -> Var<$f> {
                &Var::new(self) % &rhs
            }
        }

        impl<'a> Rem<&'a Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn rem(self, rhs: &'a Var<$f>) -> Var<$f> {
                &Var::new(self) % rhs
            }
        }
    };
}

impl_var_scalar_lhs!(f32);
impl_var_scalar_lhs!(f64);

macro_rules! impl_var_assign {
    ($trait:ident, $method:ident, $op:tt) => {
        impl<F: ActiveFloat> $trait for Var<F> {
            #[inline]
            fn $method(&mut self, rhs: Var<F>) {
                *self = &*self $op &rhs;
            }
        }

        impl<'a, F: ActiveFloat> $trait<&'a Var<F>> for Var<F> {
            #[inline]
            fn $method(&mut self, rhs: &'a Var<F>) {
                *self = &*self $op rhs;
            }
        }

        impl<F: ActiveFloat> $trait<F> for Var<F> {
            #[inline]
            fn $method(&mut self, rhs: F) {
                *self = &*self $op &Var::new(rhs);
            }
        }
    };
}

impl_var_assign!(AddAssign, add_assign, +);
impl_var_assign!(SubAssign, sub_assign, -);
impl_var_assign!(MulAssign, mul_assign, *);
impl_var_assign!(DivAssign, div_assign, /);
impl_var_assign!(RemAssign, rem_assign, %);
