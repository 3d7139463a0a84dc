//! Storage kinds and element types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LinbindError, Result};

/// Determines which cells of a [`MatrixStore`](crate::MatrixStore) buffer are authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixKind {
    Dense,
    UpperTriangular,
    LowerTriangular,
    /// Upper triangle is authoritative, the lower one is its conjugate mirror.
    Hermitian,
}

impl MatrixKind {
    /// Whether `(row, col)` is stored rather than synthesized.
    pub fn is_authoritative(self, row: usize, col: usize) -> bool {
        match self {
            MatrixKind::Dense => true,
            MatrixKind::UpperTriangular | MatrixKind::Hermitian => row <= col,
            MatrixKind::LowerTriangular => row >= col,
        }
    }

    pub fn requires_square(self) -> bool {
        matches!(self, MatrixKind::Hermitian)
    }
}

impl fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatrixKind::Dense => "dense",
            MatrixKind::UpperTriangular => "upper triangular",
            MatrixKind::LowerTriangular => "lower triangular",
            MatrixKind::Hermitian => "hermitian",
        };
        f.write_str(name)
    }
}

/// Element types a buffer handed to the backend can hold.
///
/// `Int32` only appears in index arrays (pivots) and boxed integer scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Int32,
    Real32,
    Real64,
    Complex32,
    Complex64,
}

impl ElementType {
    /// LAPACK precision letter (`S`, `D`, `C`, `Z`).
    pub fn precision_letter(self) -> Result<char> {
        match self {
            ElementType::Real32 => Ok('S'),
            ElementType::Real64 => Ok('D'),
            ElementType::Complex32 => Ok('C'),
            ElementType::Complex64 => Ok('Z'),
            ElementType::Int32 => Err(LinbindError::Configuration(
                "integer element type has no routine precision".to_string(),
            )),
        }
    }

    pub fn is_complex(self) -> bool {
        matches!(self, ElementType::Complex32 | ElementType::Complex64)
    }

    /// Real counterpart (`Complex64` -> `Real64`); identity for real and integer types.
    pub fn real(self) -> ElementType {
        match self {
            ElementType::Complex32 => ElementType::Real32,
            ElementType::Complex64 => ElementType::Real64,
            other => other,
        }
    }

    /// Whether values of `self` convert to `target` without losing information.
    pub fn promotes_to(self, target: ElementType) -> bool {
        use ElementType::*;
        matches!(
            (self, target),
            (Int32, Int32)
                | (Real32, Real32 | Real64 | Complex32 | Complex64)
                | (Real64, Real64 | Complex64)
                | (Complex32, Complex32 | Complex64)
                | (Complex64, Complex64)
        )
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Int32 => "i32",
            ElementType::Real32 => "f32",
            ElementType::Real64 => "f64",
            ElementType::Complex32 => "c32",
            ElementType::Complex64 => "c64",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authoritative_masks() {
        assert!(MatrixKind::Dense.is_authoritative(3, 1));
        assert!(MatrixKind::UpperTriangular.is_authoritative(1, 3));
        assert!(!MatrixKind::UpperTriangular.is_authoritative(3, 1));
        assert!(MatrixKind::LowerTriangular.is_authoritative(3, 1));
        assert!(!MatrixKind::LowerTriangular.is_authoritative(1, 3));
        assert!(MatrixKind::Hermitian.is_authoritative(2, 2));
        assert!(!MatrixKind::Hermitian.is_authoritative(2, 1));
    }

    #[test]
    fn test_precision_letters() {
        assert_eq!(ElementType::Real32.precision_letter().unwrap(), 'S');
        assert_eq!(ElementType::Real64.precision_letter().unwrap(), 'D');
        assert_eq!(ElementType::Complex32.precision_letter().unwrap(), 'C');
        assert_eq!(ElementType::Complex64.precision_letter().unwrap(), 'Z');
        assert!(ElementType::Int32.precision_letter().is_err());
    }

    #[test]
    fn test_promotions() {
        assert!(ElementType::Real32.promotes_to(ElementType::Complex64));
        assert!(!ElementType::Real64.promotes_to(ElementType::Real32));
        assert!(!ElementType::Complex32.promotes_to(ElementType::Real64));
        assert!(!ElementType::Int32.promotes_to(ElementType::Real64));
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&MatrixKind::Hermitian).unwrap();
        let back: MatrixKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MatrixKind::Hermitian);
    }
}
