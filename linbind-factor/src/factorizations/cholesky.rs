use num_traits::{Float, Zero};

use linbind_core::{
    Argument, Backend, CallSpec, FailureKind, InputOutputArg, LinbindError, MatrixKind,
    MatrixStore, Result, Routine, Scalar,
};

use super::Factorization;

/// `A = L·Lᴴ` with `L` lower triangular (the left square root of `A`).
#[derive(Debug, Clone)]
pub struct Cholesky<T: Scalar> {
    left: MatrixStore<T>,
}

impl<T: Scalar> Cholesky<T> {
    pub fn new(left: MatrixStore<T>) -> Result<Self> {
        if left.nrow() != left.ncol() {
            return Err(LinbindError::NotSquare {
                nrow: left.nrow(),
                ncol: left.ncol(),
            });
        }
        if left.kind() != MatrixKind::LowerTriangular {
            return Err(LinbindError::Configuration(format!(
                "Cholesky factor must be lower triangular, got {}",
                left.kind()
            )));
        }
        Ok(Cholesky { left })
    }

    pub fn left(&self) -> &MatrixStore<T> {
        &self.left
    }

    fn rescaled(&self, factor: T::Real) -> Result<Self> {
        let factor = T::from_real(factor);
        let data = self.left.logical_elements()?;
        let n = self.left.nrow();
        let left = MatrixStore::from_buffer(
            n,
            n,
            data.into_iter().map(|x| x * factor).collect(),
            MatrixKind::LowerTriangular,
        )?;
        Ok(Cholesky { left })
    }

    /// Factorization of `alpha·A`: the root is scaled by `sqrt(alpha)`.
    pub fn scale(&self, alpha: T::Real) -> Result<Self> {
        if !(alpha >= T::Real::zero()) {
            return Err(LinbindError::Domain(format!(
                "cannot scale a square root by {:?}; the factor must be non-negative",
                alpha
            )));
        }
        self.rescaled(alpha.sqrt())
    }

    /// Factorization of `A / alpha`: the root is divided by `sqrt(alpha)`.
    pub fn divide(&self, alpha: T::Real) -> Result<Self> {
        if !(alpha > T::Real::zero()) {
            return Err(LinbindError::Domain(format!(
                "cannot divide a square root by {:?}; the divisor must be positive",
                alpha
            )));
        }
        self.rescaled(alpha.sqrt().recip())
    }

    /// Solves `A·X = B` with `potrs`. `B` is copied; the result is a new matrix.
    pub fn solve(&self, backend: &dyn Backend, b: &MatrixStore<T>) -> Result<MatrixStore<T>> {
        let n = self.left.nrow();
        if b.nrow() != n {
            return Err(LinbindError::DimensionMismatch(format!(
                "right-hand side has {} rows, system has {}",
                b.nrow(),
                n
            )));
        }
        let mut outcome = CallSpec::new(
            Routine::new("potrs"),
            T::ELEMENT_TYPE,
            vec![
                Argument::character('L'),
                Argument::int(n as i32),
                Argument::int(b.ncol() as i32),
                Argument::input(self.left.as_view()),
                Argument::int(n as i32),
                InputOutputArg::new(b.as_view()).force_copy(true).into(),
                Argument::int(n as i32),
                Argument::status(FailureKind::Other),
            ],
        )?
        .invoke(backend)?;
        outcome.take_matrix(5, MatrixKind::Dense)
    }
}

impl<T: Scalar> Factorization<T> for Cholesky<T> {
    fn dims(&self) -> (usize, usize) {
        (self.left.nrow(), self.left.ncol())
    }

    fn reconstruct(&self) -> Result<MatrixStore<T>> {
        self.left.matmul(&self.left.conjugate_transpose()?)
    }
}
