use bytemuck::{Pod, Zeroable};
use num_complex::{Complex32, Complex64};
use num_traits::{Float, One, Zero};
use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::binder::Atom;
use crate::buffer::{DynBuffer, SharedBuffer};
use crate::kind::ElementType;

/// Plain-old-data element a backend buffer can hold.
pub trait Element: Pod + Zeroable + Copy + Debug + 'static {
    const ELEMENT_TYPE: ElementType;
}

macro_rules! impl_element {
    ($($t:ty => $et:expr),* $(,)?) => {
        $(impl Element for $t {
            const ELEMENT_TYPE: ElementType = $et;
        })*
    };
}

impl_element!(
    i32 => ElementType::Int32,
    f32 => ElementType::Real32,
    f64 => ElementType::Real64,
    Complex32 => ElementType::Complex32,
    Complex64 => ElementType::Complex64,
);

/// Element type of a [`MatrixStore`](crate::MatrixStore): `f32`, `f64`,
/// `Complex32` or `Complex64`.
///
/// Values must be plain old data so a buffer of them can be handed to the
/// backend as raw memory.
pub trait Scalar:
    Element
    + Default
    + PartialEq
    + Zero
    + One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    /// Matching real type (`f64` for `Complex64`).
    type Real: RealScalar;

    fn conj(self) -> Self;

    fn from_real(re: Self::Real) -> Self;

    fn re(self) -> Self::Real;

    /// `|x|^2`
    fn abs_sq(self) -> Self::Real;

    fn modulus(self) -> Self::Real {
        self.abs_sq().sqrt()
    }

    fn finite(self) -> bool;

    fn from_f64(value: f64) -> Self {
        Self::from_real(
            <Self::Real as num_traits::NumCast>::from(value).unwrap_or_else(<Self::Real as Float>::nan),
        )
    }

    fn into_dyn(buffer: SharedBuffer<Self>) -> DynBuffer;

    /// Returns the typed buffer if `buffer` holds elements of this type.
    fn from_dyn(buffer: &DynBuffer) -> Option<SharedBuffer<Self>>;

    fn into_atom(self) -> Atom;

    fn from_atom(atom: Atom) -> Option<Self>;
}

/// Real element types; their own `Real` counterpart.
pub trait RealScalar: Scalar<Real = Self> + Float {}

impl RealScalar for f32 {}
impl RealScalar for f64 {}

macro_rules! impl_real_scalar {
    ($t:ty, $variant:ident) => {
        impl Scalar for $t {
            type Real = $t;

            #[inline]
            fn conj(self) -> Self {
                self
            }

            #[inline]
            fn from_real(re: Self::Real) -> Self {
                re
            }

            #[inline]
            fn re(self) -> Self::Real {
                self
            }

            #[inline]
            fn abs_sq(self) -> Self::Real {
                self * self
            }

            #[inline]
            fn modulus(self) -> Self::Real {
                Float::abs(self)
            }

            #[inline]
            fn finite(self) -> bool {
                Float::is_finite(self)
            }

            fn into_dyn(buffer: SharedBuffer<Self>) -> DynBuffer {
                DynBuffer::$variant(buffer)
            }

            fn from_dyn(buffer: &DynBuffer) -> Option<SharedBuffer<Self>> {
                match buffer {
                    DynBuffer::$variant(b) => Some(b.clone()),
                    _ => None,
                }
            }

            fn into_atom(self) -> Atom {
                Atom::$variant(self)
            }

            fn from_atom(atom: Atom) -> Option<Self> {
                match atom {
                    Atom::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

macro_rules! impl_complex_scalar {
    ($t:ty, $real:ty, $variant:ident) => {
        impl Scalar for $t {
            type Real = $real;

            #[inline]
            fn conj(self) -> Self {
                <$t>::conj(&self)
            }

            #[inline]
            fn from_real(re: Self::Real) -> Self {
                <$t>::new(re, 0.0)
            }

            #[inline]
            fn re(self) -> Self::Real {
                self.re
            }

            #[inline]
            fn abs_sq(self) -> Self::Real {
                self.norm_sqr()
            }

            #[inline]
            fn modulus(self) -> Self::Real {
                self.norm()
            }

            #[inline]
            fn finite(self) -> bool {
                self.re.is_finite() && self.im.is_finite()
            }

            fn into_dyn(buffer: SharedBuffer<Self>) -> DynBuffer {
                DynBuffer::$variant(buffer)
            }

            fn from_dyn(buffer: &DynBuffer) -> Option<SharedBuffer<Self>> {
                match buffer {
                    DynBuffer::$variant(b) => Some(b.clone()),
                    _ => None,
                }
            }

            fn into_atom(self) -> Atom {
                Atom::$variant(self)
            }

            fn from_atom(atom: Atom) -> Option<Self> {
                match atom {
                    Atom::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_real_scalar!(f32, Real32);
impl_real_scalar!(f64, Real64);
impl_complex_scalar!(Complex32, f32, Complex32);
impl_complex_scalar!(Complex64, f64, Complex64);

/// Lossless element conversion used by [`MatrixStore::cast`](crate::MatrixStore::cast).
pub trait Promote<U: Scalar>: Scalar {
    fn promote(self) -> U;
}

impl<T: Scalar> Promote<T> for T {
    #[inline]
    fn promote(self) -> T {
        self
    }
}

impl Promote<f64> for f32 {
    fn promote(self) -> f64 {
        self as f64
    }
}

impl Promote<Complex32> for f32 {
    fn promote(self) -> Complex32 {
        Complex32::new(self, 0.0)
    }
}

impl Promote<Complex64> for f32 {
    fn promote(self) -> Complex64 {
        Complex64::new(self as f64, 0.0)
    }
}

impl Promote<Complex64> for f64 {
    fn promote(self) -> Complex64 {
        Complex64::new(self, 0.0)
    }
}

impl Promote<Complex64> for Complex32 {
    fn promote(self) -> Complex64 {
        Complex64::new(self.re as f64, self.im as f64)
    }
}

/// Generic trait representing a matrix shape.
pub trait Matrix: Debug {
    /// Returns the dimensions of the matrix as (rows, columns).
    fn dims(&self) -> (usize, usize);

    /// Returns the number of rows.
    fn rows(&self) -> usize {
        self.dims().0
    }

    /// Returns the number of columns.
    fn cols(&self) -> usize {
        self.dims().1
    }

    /// Checks if the matrix is square.
    fn is_square(&self) -> bool {
        let (rows, cols) = self.dims();
        rows == cols
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conj_and_abs() {
        let z = Complex64::new(3.0, -4.0);
        assert_eq!(Scalar::conj(z), Complex64::new(3.0, 4.0));
        assert_eq!(z.abs_sq(), 25.0);
        assert_eq!(Scalar::modulus(z), 5.0);
        assert_eq!(Scalar::conj(2.5f64), 2.5);
        assert_eq!(Scalar::modulus(-2.0f32), 2.0);
    }

    #[test]
    fn test_promote() {
        let x: Complex64 = 1.5f32.promote();
        assert_eq!(x, Complex64::new(1.5, 0.0));
        let y: f64 = 2.0f64.promote();
        assert_eq!(y, 2.0);
    }

    #[test]
    fn test_finite() {
        assert!(1.0f64.finite());
        assert!(!f64::NAN.finite());
        assert!(!Complex32::new(0.0, f32::INFINITY).finite());
    }

    #[test]
    fn test_atom_round_trip_keeps_type() {
        let atom = Complex32::new(1.0, 2.0).into_atom();
        assert_eq!(Complex32::from_atom(atom), Some(Complex32::new(1.0, 2.0)));
        assert_eq!(f64::from_atom(atom), None);
    }
}
