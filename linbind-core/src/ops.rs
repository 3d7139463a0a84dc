// Dense helpers on MatrixStore. They work on logical values, so the kind of
// the operands never leaks into the result: every result is a fresh dense store.

use crate::error::{LinbindError, Result};
use crate::kind::MatrixKind;
use crate::store::MatrixStore;
use crate::traits::Scalar;
use num_traits::Zero;

impl<T: Scalar> MatrixStore<T> {
    /// Logical contents as a column-major vector.
    pub fn logical_elements(&self) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(self.len());
        for col in 0..self.ncol() {
            for row in 0..self.nrow() {
                out.push(self.read(row, col)?);
            }
        }
        Ok(out)
    }

    pub fn transpose(&self) -> Result<MatrixStore<T>> {
        let data = self.logical_elements()?;
        let (nrow, ncol) = (self.nrow(), self.ncol());
        MatrixStore::from_fn(MatrixKind::Dense, ncol, nrow, |r, c| data[c + nrow * r])
    }

    /// Transpose with every element conjugated.
    pub fn conjugate_transpose(&self) -> Result<MatrixStore<T>> {
        let data = self.logical_elements()?;
        let (nrow, ncol) = (self.nrow(), self.ncol());
        MatrixStore::from_fn(MatrixKind::Dense, ncol, nrow, |r, c| data[c + nrow * r].conj())
    }

    /// `self * rhs`
    pub fn matmul(&self, rhs: &MatrixStore<T>) -> Result<MatrixStore<T>> {
        if self.ncol() != rhs.nrow() {
            return Err(LinbindError::DimensionMismatch(format!(
                "cannot multiply {}x{} by {}x{}",
                self.nrow(),
                self.ncol(),
                rhs.nrow(),
                rhs.ncol()
            )));
        }
        let a = self.logical_elements()?;
        let b = rhs.logical_elements()?;
        let (m, k, n) = (self.nrow(), self.ncol(), rhs.ncol());
        let mut c = vec![T::zero(); m * n];
        for j in 0..n {
            for p in 0..k {
                let bpj = b[p + k * j];
                if bpj.is_zero() {
                    continue;
                }
                for i in 0..m {
                    c[i + m * j] = c[i + m * j] + a[i + m * p] * bpj;
                }
            }
        }
        MatrixStore::from_buffer(m, n, c, MatrixKind::Dense)
    }

    /// `self - rhs`, elementwise on logical values.
    pub fn sub(&self, rhs: &MatrixStore<T>) -> Result<MatrixStore<T>> {
        if self.dims_pair() != rhs.dims_pair() {
            return Err(LinbindError::DimensionMismatch(format!(
                "cannot subtract {}x{} from {}x{}",
                rhs.nrow(),
                rhs.ncol(),
                self.nrow(),
                self.ncol()
            )));
        }
        let a = self.logical_elements()?;
        let b = rhs.logical_elements()?;
        let diff = a.iter().zip(&b).map(|(&x, &y)| x - y).collect();
        MatrixStore::from_buffer(self.nrow(), self.ncol(), diff, MatrixKind::Dense)
    }

    pub fn frobenius_norm(&self) -> Result<T::Real> {
        let mut sum = <T::Real as Zero>::zero();
        for x in self.logical_elements()? {
            sum = sum + x.abs_sq();
        }
        Ok(num_traits::Float::sqrt(sum))
    }

    fn dims_pair(&self) -> (usize, usize) {
        (self.nrow(), self.ncol())
    }
}
