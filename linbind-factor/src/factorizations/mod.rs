//! Factorization results and the reconstruction of the factored matrix.

pub mod cholesky;
pub mod hermitian;
pub mod lu;
pub mod qr;
pub mod svd;

pub use cholesky::Cholesky;
pub use hermitian::HermitianIndefinite;
pub use lu::Lu;
pub use qr::Qr;
pub use svd::Svd;

use linbind_core::{MatrixStore, Result, Scalar};

/// A factored matrix.
pub trait Factorization<T: Scalar> {
    /// Dimensions of the matrix that was factored.
    fn dims(&self) -> (usize, usize);

    /// Multiplies the factors back together. The result is a fresh dense,
    /// fully materialized matrix.
    fn reconstruct(&self) -> Result<MatrixStore<T>>;
}

/// Number of row interchanges recorded in a 1-based pivot vector:
/// positions `i` with `pivots[i] != i`.
pub fn permutations(pivots: &[i32]) -> usize {
    pivots
        .iter()
        .enumerate()
        .filter(|&(i, &p)| p != (i + 1) as i32)
        .count()
}

/// Any of the supported factorizations.
#[derive(Debug, Clone)]
pub enum FactorizationModel<T: Scalar> {
    Lu(Lu<T>),
    Qr(Qr<T>),
    Cholesky(Cholesky<T>),
    HermitianIndefinite(HermitianIndefinite<T>),
    Svd(Svd<T>),
}

impl<T: Scalar> FactorizationModel<T> {
    pub fn name(&self) -> &'static str {
        match self {
            FactorizationModel::Lu(_) => "LU",
            FactorizationModel::Qr(_) => "QR",
            FactorizationModel::Cholesky(_) => "Cholesky",
            FactorizationModel::HermitianIndefinite(_) => "Hermitian indefinite",
            FactorizationModel::Svd(_) => "SVD",
        }
    }

    /// Row interchanges of pivoted factorizations, `None` for the others.
    pub fn permutations(&self) -> Option<usize> {
        match self {
            FactorizationModel::Lu(lu) => Some(lu.permutations()),
            FactorizationModel::HermitianIndefinite(h) => Some(h.permutations()),
            _ => None,
        }
    }
}

impl<T: Scalar> Factorization<T> for FactorizationModel<T> {
    fn dims(&self) -> (usize, usize) {
        match self {
            FactorizationModel::Lu(f) => f.dims(),
            FactorizationModel::Qr(f) => f.dims(),
            FactorizationModel::Cholesky(f) => f.dims(),
            FactorizationModel::HermitianIndefinite(f) => f.dims(),
            FactorizationModel::Svd(f) => f.dims(),
        }
    }

    fn reconstruct(&self) -> Result<MatrixStore<T>> {
        log::debug!("reconstructing from {} factors", self.name());
        match self {
            FactorizationModel::Lu(f) => f.reconstruct(),
            FactorizationModel::Qr(f) => f.reconstruct(),
            FactorizationModel::Cholesky(f) => f.reconstruct(),
            FactorizationModel::HermitianIndefinite(f) => f.reconstruct(),
            FactorizationModel::Svd(f) => f.reconstruct(),
        }
    }
}

macro_rules! impl_from_factorization {
    ($($variant:ident),*) => {
        $(impl<T: Scalar> From<$variant<T>> for FactorizationModel<T> {
            fn from(f: $variant<T>) -> Self {
                FactorizationModel::$variant(f)
            }
        })*
    };
}

impl_from_factorization!(Lu, Qr, Cholesky, HermitianIndefinite, Svd);

#[cfg(test)]
mod tests {
    use super::*;
    use linbind_core::{LinbindError, MatrixKind};

    #[test]
    fn test_permutations() {
        assert_eq!(permutations(&[1, 2, 3]), 0);
        assert_eq!(permutations(&[2, 1, 3]), 2);
        assert_eq!(permutations(&[3, 3, 3]), 2);
        assert_eq!(permutations(&[]), 0);
    }

    #[test]
    fn test_model_dispatch() -> Result<()> {
        let left = MatrixStore::from_buffer(1, 1, vec![2.0f64], MatrixKind::LowerTriangular)?;
        let model: FactorizationModel<f64> = Cholesky::new(left)?.into();
        assert_eq!(model.dims(), (1, 1));
        assert_eq!(model.permutations(), None);
        assert_eq!(model.reconstruct()?.read(0, 0)?, 4.0);

        let svd: FactorizationModel<f64> = Svd::new(None, vec![1.0], None, (1, 1))?.into();
        assert_eq!(svd.reconstruct().unwrap_err(), LinbindError::MissingFactor("U"));
        Ok(())
    }
}
