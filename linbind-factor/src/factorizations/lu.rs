use linbind_core::{
    Argument, ArrayView, Backend, CallSpec, FailureKind, InputOutputArg, LinbindError, MatrixKind,
    MatrixStore, Result, Routine, Scalar,
};

use super::{permutations, Factorization};

/// `A = P·L·U` as returned by `getrf`: unit lower `L` below the diagonal of
/// `packed`, `U` on and above it, and 1-based row interchanges in `pivots`.
#[derive(Debug, Clone)]
pub struct Lu<T: Scalar> {
    packed: MatrixStore<T>,
    pivots: Vec<i32>,
}

impl<T: Scalar> Lu<T> {
    pub fn new(packed: MatrixStore<T>, pivots: Vec<i32>) -> Result<Self> {
        let (m, n) = (packed.nrow(), packed.ncol());
        if pivots.len() != m.min(n) {
            return Err(LinbindError::DimensionMismatch(format!(
                "{} pivots for a {}x{} factorization",
                pivots.len(),
                m,
                n
            )));
        }
        if let Some(p) = pivots.iter().find(|&&p| p < 1 || p as usize > m) {
            return Err(LinbindError::Domain(format!(
                "pivot {} is outside rows 1..={}",
                p, m
            )));
        }
        Ok(Lu { packed, pivots })
    }

    pub fn packed(&self) -> &MatrixStore<T> {
        &self.packed
    }

    pub fn pivots(&self) -> &[i32] {
        &self.pivots
    }

    pub fn permutations(&self) -> usize {
        permutations(&self.pivots)
    }

    /// Solves `A·X = B` with `getrs`. `B` is copied; the result is a new matrix.
    pub fn solve(&self, backend: &dyn Backend, b: &MatrixStore<T>) -> Result<MatrixStore<T>> {
        let n = self.packed.nrow();
        if self.packed.ncol() != n {
            return Err(LinbindError::NotSquare {
                nrow: n,
                ncol: self.packed.ncol(),
            });
        }
        if b.nrow() != n {
            return Err(LinbindError::DimensionMismatch(format!(
                "right-hand side has {} rows, system has {}",
                b.nrow(),
                n
            )));
        }
        let spec = CallSpec::new(
            Routine::new("getrs"),
            T::ELEMENT_TYPE,
            vec![
                Argument::character('N'),
                Argument::int(n as i32),
                Argument::int(b.ncol() as i32),
                Argument::input(self.packed.as_view()),
                Argument::int(n as i32),
                Argument::input(ArrayView::ints(&self.pivots)),
                InputOutputArg::new(b.as_view()).force_copy(true).into(),
                Argument::int(n as i32),
                Argument::status(FailureKind::Other),
            ],
        )?;
        let mut outcome = spec.invoke(backend)?;
        outcome.take_matrix(6, MatrixKind::Dense)
    }
}

impl<T: Scalar> Factorization<T> for Lu<T> {
    fn dims(&self) -> (usize, usize) {
        (self.packed.nrow(), self.packed.ncol())
    }

    fn reconstruct(&self) -> Result<MatrixStore<T>> {
        let (m, n) = self.dims();
        let k = m.min(n);
        let a = self.packed.logical_elements()?;
        let l = MatrixStore::from_fn(MatrixKind::Dense, m, k, |i, j| {
            if i == j {
                T::one()
            } else if i > j {
                a[i + m * j]
            } else {
                T::zero()
            }
        })?;
        let u = MatrixStore::from_fn(MatrixKind::Dense, k, n, |i, j| {
            if i <= j {
                a[i + m * j]
            } else {
                T::zero()
            }
        })?;
        let mut data = l.matmul(&u)?.raw_elements()?;
        for i in (0..k).rev() {
            let p = (self.pivots[i] - 1) as usize;
            if p != i {
                for col in 0..n {
                    data.swap(i + m * col, p + m * col);
                }
            }
        }
        MatrixStore::from_buffer(m, n, data, MatrixKind::Dense)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruct_applies_pivots() -> Result<()> {
        // A = [[0, 1], [2, 3]] factors as P·L·U with rows swapped:
        // L = [[1, 0], [0, 1]], U = [[2, 3], [0, 1]], pivots = [2, 2]
        let packed = MatrixStore::from_rows(&[&[2.0, 3.0], &[0.0, 1.0]])?;
        let lu = Lu::new(packed, vec![2, 2])?;
        assert_eq!(lu.permutations(), 1);
        let a = lu.reconstruct()?;
        assert_eq!(a.logical_elements()?, vec![0.0, 2.0, 1.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_reconstruct_rectangular() -> Result<()> {
        // 3x2: L = [[1, 0], [0.5, 1], [0.25, 0.5]], U = [[4, 2], [0, 1]]
        let packed = MatrixStore::from_rows(&[&[4.0, 2.0], &[0.5, 1.0], &[0.25, 0.5]])?;
        let a = Lu::new(packed, vec![1, 2])?.reconstruct()?;
        let expected = MatrixStore::from_rows(&[&[4.0, 2.0], &[2.0, 2.0], &[1.0, 1.0]])?;
        let err: f64 = a.sub(&expected)?.frobenius_norm()?;
        assert_eq!(err, 0.0);
        Ok(())
    }

    #[test]
    fn test_invalid_pivots() {
        let packed = MatrixStore::<f64>::identity(2).unwrap();
        assert!(matches!(
            Lu::new(packed.clone(), vec![1]),
            Err(LinbindError::DimensionMismatch(_))
        ));
        assert!(matches!(
            Lu::new(packed, vec![1, 3]),
            Err(LinbindError::Domain(_))
        ));
    }
}
