use num_traits::{Float, Zero};

use linbind_core::{LinbindError, MatrixKind, MatrixStore, Result, Scalar};

use super::Factorization;

/// `A = U·diag(s)·Vᴴ`, with `vt` holding `Vᴴ` and singular values in
/// descending order. The singular vectors are optional; without them the
/// model only carries the spectrum.
#[derive(Debug, Clone)]
pub struct Svd<T: Scalar> {
    u: Option<MatrixStore<T>>,
    singular_values: Vec<T::Real>,
    vt: Option<MatrixStore<T>>,
    dims: (usize, usize),
}

impl<T: Scalar> Svd<T> {
    /// Fails unless there are `min(nrow, ncol)` singular values, all finite,
    /// non-negative and in descending order.
    pub fn new(
        u: Option<MatrixStore<T>>,
        singular_values: Vec<T::Real>,
        vt: Option<MatrixStore<T>>,
        dims: (usize, usize),
    ) -> Result<Self> {
        let k = dims.0.min(dims.1);
        if singular_values.len() != k {
            return Err(LinbindError::DimensionMismatch(format!(
                "{} singular values for a {}x{} matrix, expected {}",
                singular_values.len(),
                dims.0,
                dims.1,
                k
            )));
        }
        if let Some(s) = singular_values.iter().find(|s| !s.is_finite() || **s < T::Real::zero()) {
            return Err(LinbindError::Domain(format!(
                "singular value {:?} is not a finite non-negative number",
                s
            )));
        }
        if let Some(i) = singular_values.windows(2).position(|w| w[0] < w[1]) {
            return Err(LinbindError::Domain(format!(
                "singular values are not descending at index {}",
                i + 1
            )));
        }
        Ok(Svd {
            u,
            singular_values,
            vt,
            dims,
        })
    }

    pub fn u(&self) -> Option<&MatrixStore<T>> {
        self.u.as_ref()
    }

    pub fn vt(&self) -> Option<&MatrixStore<T>> {
        self.vt.as_ref()
    }

    pub fn singular_values(&self) -> &[T::Real] {
        &self.singular_values
    }

    /// Ratio of the largest to the smallest singular value.
    pub fn condition_number(&self) -> Option<T::Real> {
        let first = *self.singular_values.first()?;
        let last = *self.singular_values.last()?;
        Some(first / last)
    }
}

impl<T: Scalar> Factorization<T> for Svd<T> {
    fn dims(&self) -> (usize, usize) {
        self.dims
    }

    /// Uses the leading `min(nrow, ncol)` columns of `U` and rows of `Vᴴ`, so
    /// full and reduced factors give the same result.
    fn reconstruct(&self) -> Result<MatrixStore<T>> {
        let u = self.u.as_ref().ok_or(LinbindError::MissingFactor("U"))?;
        let vt = self.vt.as_ref().ok_or(LinbindError::MissingFactor("Vt"))?;
        let (m, n) = self.dims;
        let k = self.singular_values.len();
        if u.nrow() != m || u.ncol() < k || vt.ncol() != n || vt.nrow() < k {
            return Err(LinbindError::DimensionMismatch(format!(
                "factors {}x{} and {}x{} do not fit a {}x{} matrix of rank {}",
                u.nrow(),
                u.ncol(),
                vt.nrow(),
                vt.ncol(),
                m,
                n,
                k
            )));
        }
        let u_data = u.logical_elements()?;
        let vt_data = vt.logical_elements()?;
        let ldvt = vt.nrow();
        let scaled = MatrixStore::from_fn(MatrixKind::Dense, m, k, |i, l| {
            u_data[i + m * l] * T::from_real(self.singular_values[l])
        })?;
        let right = MatrixStore::from_fn(MatrixKind::Dense, k, n, |l, j| vt_data[l + ldvt * j])?;
        scaled.matmul(&right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruct_uses_leading_vectors() -> Result<()> {
        // A = [[0, 2], [3, 0], [0, 0]]: s = [3, 2]
        let u = MatrixStore::from_rows(&[&[0.0, 1.0, 0.0], &[1.0, 0.0, 0.0], &[0.0, 0.0, 1.0]])?;
        let vt = MatrixStore::identity(2)?;
        let svd = Svd::new(Some(u), vec![3.0, 2.0], Some(vt), (3, 2))?;
        let a = svd.reconstruct()?;
        let expected = MatrixStore::from_rows(&[&[0.0, 2.0], &[3.0, 0.0], &[0.0, 0.0]])?;
        let err: f64 = a.sub(&expected)?.frobenius_norm()?;
        assert_eq!(err, 0.0);
        assert_eq!(svd.condition_number(), Some(1.5));
        Ok(())
    }

    #[test]
    fn test_missing_factors() {
        let s: Svd<f64> =
            Svd::new(None, vec![1.0], Some(MatrixStore::identity(1).unwrap()), (1, 1)).unwrap();
        assert_eq!(s.reconstruct().unwrap_err(), LinbindError::MissingFactor("U"));
        let s: Svd<f64> =
            Svd::new(Some(MatrixStore::identity(1).unwrap()), vec![1.0], None, (1, 1)).unwrap();
        assert_eq!(s.reconstruct().unwrap_err(), LinbindError::MissingFactor("Vt"));
    }

    #[test]
    fn test_spectrum_is_validated() {
        let wrong_len = Svd::<f64>::new(None, vec![3.0, 2.0, 1.0], None, (3, 2));
        assert!(matches!(wrong_len, Err(LinbindError::DimensionMismatch(_))));
        let ascending = Svd::<f64>::new(None, vec![2.0, 3.0], None, (3, 2));
        assert!(matches!(ascending, Err(LinbindError::Domain(_))));
        let negative = Svd::<f64>::new(None, vec![3.0, -1.0], None, (2, 2));
        assert!(matches!(negative, Err(LinbindError::Domain(_))));
        let nan = Svd::<linbind_core::Complex64>::new(None, vec![f64::NAN], None, (1, 4));
        assert!(matches!(nan, Err(LinbindError::Domain(_))));
        let rank_deficient = Svd::<f64>::new(None, vec![3.0, 0.0], None, (2, 2)).unwrap();
        assert_eq!(rank_deficient.condition_number(), Some(f64::INFINITY));
    }
}
