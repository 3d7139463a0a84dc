use linbind_core::{LinbindError, MatrixKind, MatrixStore, Result, Scalar};

use super::Factorization;

/// `A = Q·R` as returned by `geqrf`. `R` is the upper trapezoid of `packed`;
/// `Q = H(1)·…·H(k)` with `H(i) = I - tau[i]·v·vᴴ`, where `v` has a unit
/// `i`-th entry and its trailing entries stored below the diagonal of column `i`.
#[derive(Debug, Clone)]
pub struct Qr<T: Scalar> {
    packed: MatrixStore<T>,
    tau: Vec<T>,
}

impl<T: Scalar> Qr<T> {
    pub fn new(packed: MatrixStore<T>, tau: Vec<T>) -> Result<Self> {
        let k = packed.nrow().min(packed.ncol());
        if tau.len() != k {
            return Err(LinbindError::DimensionMismatch(format!(
                "{} reflector scalars for a {}x{} factorization",
                tau.len(),
                packed.nrow(),
                packed.ncol()
            )));
        }
        Ok(Qr { packed, tau })
    }

    pub fn packed(&self) -> &MatrixStore<T> {
        &self.packed
    }

    pub fn tau(&self) -> &[T] {
        &self.tau
    }
}

impl<T: Scalar> Factorization<T> for Qr<T> {
    fn dims(&self) -> (usize, usize) {
        (self.packed.nrow(), self.packed.ncol())
    }

    fn reconstruct(&self) -> Result<MatrixStore<T>> {
        let (m, n) = self.dims();
        let a = self.packed.logical_elements()?;
        // start from R and apply the reflectors right to left
        let mut r: Vec<T> = (0..n)
            .flat_map(|col| (0..m).map(move |row| (row, col)))
            .map(|(row, col)| if row <= col { a[row + m * col] } else { T::zero() })
            .collect();
        for i in (0..self.tau.len()).rev() {
            let tau = self.tau[i];
            if tau == T::zero() {
                continue;
            }
            let v = |row: usize| {
                if row == i {
                    T::one()
                } else {
                    a[row + m * i]
                }
            };
            for col in 0..n {
                let mut dot = T::zero();
                for row in i..m {
                    dot = dot + v(row).conj() * r[row + m * col];
                }
                let scaled = tau * dot;
                for row in i..m {
                    r[row + m * col] = r[row + m * col] - v(row) * scaled;
                }
            }
        }
        MatrixStore::from_buffer(m, n, r, MatrixKind::Dense)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linbind_core::Complex64;

    #[test]
    fn test_reconstruct_single_reflector() -> Result<()> {
        // v = [1, 1], tau = 1: H = [[0, -1], [-1, 0]]; R = [[2, 3], [0, 4]]
        let packed = MatrixStore::from_rows(&[&[2.0, 3.0], &[1.0, 4.0]])?;
        let a = Qr::new(packed, vec![1.0, 0.0])?.reconstruct()?;
        let expected = MatrixStore::from_rows(&[&[0.0, -4.0], &[-2.0, -3.0]])?;
        let err: f64 = a.sub(&expected)?.frobenius_norm()?;
        assert_eq!(err, 0.0);
        Ok(())
    }

    #[test]
    fn test_reconstruct_complex_reflector_is_unitary() -> Result<()> {
        // v = [1, i], tau = 1 gives H = I - v·vᴴ, a unitary reflector
        let i = Complex64::new(0.0, 1.0);
        let one = Complex64::new(1.0, 0.0);
        let zero = Complex64::new(0.0, 0.0);
        let packed = MatrixStore::from_rows(&[&[one, zero][..], &[i, one][..]])?;
        let q = Qr::new(packed, vec![one, zero])?.reconstruct()?;
        // R = I, so the reconstruction is Q itself
        let qhq = q.conjugate_transpose()?.matmul(&q)?;
        let err = qhq.sub(&MatrixStore::identity(2)?)?.frobenius_norm()?;
        assert!(err < 1e-15);
        Ok(())
    }

    #[test]
    fn test_tau_length_checked() {
        let packed = MatrixStore::<f64>::zeros(MatrixKind::Dense, 3, 2).unwrap();
        assert!(Qr::new(packed, vec![0.0; 3]).is_err());
    }
}
