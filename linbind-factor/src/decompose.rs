//! Decompositions computed by a [`Backend`].
//!
//! Every decomposition hands the backend a private copy of its input, so the
//! caller's matrix is never modified.

use serde::{Deserialize, Serialize};

use linbind_core::{
    Allocation, Argument, Backend, BinderOptions, CallOutcome, CallSpec, Element, FailureKind,
    InputOutputArg, LinbindError, MatrixKind, MatrixStore, OutputArg, Result, Routine, Scalar,
    TrapMask,
};

use crate::factorizations::{Cholesky, HermitianIndefinite, Lu, Qr, Svd};

/// Which singular vectors `gesvd` computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SingularVectors {
    /// Singular values only.
    None,
    /// The leading `min(nrow, ncol)` vectors on each side.
    #[default]
    Reduced,
    /// Square `U` and `Vᴴ`.
    Full,
}

impl SingularVectors {
    fn job(self) -> char {
        match self {
            SingularVectors::None => 'N',
            SingularVectors::Reduced => 'S',
            SingularVectors::Full => 'A',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvdOptions {
    pub vectors: SingularVectors,
    /// Mask floating-point traps while the backend runs.
    pub mask_traps: bool,
}

impl Default for SvdOptions {
    fn default() -> Self {
        SvdOptions {
            vectors: SingularVectors::Reduced,
            mask_traps: true,
        }
    }
}

/// Runs decompositions against one backend.
pub struct Decomposer<'a> {
    backend: &'a dyn Backend,
    options: BinderOptions,
}

fn leading_dim(rows: usize) -> i32 {
    rows.max(1) as i32
}

fn require_square<T: Scalar>(a: &MatrixStore<T>) -> Result<usize> {
    if a.nrow() != a.ncol() {
        return Err(LinbindError::NotSquare {
            nrow: a.nrow(),
            ncol: a.ncol(),
        });
    }
    Ok(a.nrow())
}

impl<'a> Decomposer<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Decomposer {
            backend,
            options: BinderOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BinderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &BinderOptions {
        &self.options
    }

    fn run<T: Scalar>(&self, routine: Routine, args: Vec<Argument>) -> Result<CallOutcome> {
        CallSpec::new(routine, T::ELEMENT_TYPE, args)?
            .with_options(self.options)
            .invoke(self.backend)
    }

    /// `A = P·L·U` with partial pivoting (`getrf`).
    pub fn lu<T: Scalar>(&self, a: &MatrixStore<T>) -> Result<Lu<T>> {
        let (m, n) = (a.nrow(), a.ncol());
        log::debug!("LU of a {}x{} {} matrix on {}", m, n, T::ELEMENT_TYPE, self.backend.name());
        let mut outcome = self.run::<T>(
            Routine::new("getrf"),
            vec![
                Argument::int(m as i32),
                Argument::int(n as i32),
                InputOutputArg::new(a.as_view()).force_copy(true).into(),
                Argument::int(leading_dim(m)),
                Argument::int_output(Allocation::Len(m.min(n))),
                Argument::status(FailureKind::Singular),
            ],
        )?;
        let packed = outcome.take_matrix(2, MatrixKind::Dense)?;
        let pivots = outcome.take_ints(4)?;
        Lu::new(packed, pivots)
    }

    /// `A = Q·R` from Householder reflectors (`geqrf`).
    pub fn qr<T: Scalar>(&self, a: &MatrixStore<T>) -> Result<Qr<T>> {
        let (m, n) = (a.nrow(), a.ncol());
        log::debug!("QR of a {}x{} {} matrix on {}", m, n, T::ELEMENT_TYPE, self.backend.name());
        let mut outcome = self.run::<T>(
            Routine::new("geqrf"),
            vec![
                Argument::int(m as i32),
                Argument::int(n as i32),
                InputOutputArg::new(a.as_view()).force_copy(true).into(),
                Argument::int(leading_dim(m)),
                Argument::output(Allocation::Len(m.min(n))),
                Argument::workspace_query(),
                Argument::status(FailureKind::Other),
            ],
        )?;
        let packed = outcome.take_matrix(2, MatrixKind::Dense)?;
        let tau = outcome.take_vec(4)?;
        Qr::new(packed, tau)
    }

    /// Lower Cholesky factor of a Hermitian positive definite matrix (`potrf`).
    /// Only the lower triangle of `a` is read.
    pub fn cholesky<T: Scalar>(&self, a: &MatrixStore<T>) -> Result<Cholesky<T>> {
        let n = require_square(a)?;
        log::debug!("Cholesky of a {}x{} {} matrix on {}", n, n, T::ELEMENT_TYPE, self.backend.name());
        let mut outcome = self.run::<T>(
            Routine::new("potrf"),
            vec![
                Argument::character('L'),
                Argument::int(n as i32),
                InputOutputArg::new(a.as_view()).force_copy(true).into(),
                Argument::int(leading_dim(n)),
                Argument::status(FailureKind::NotPositiveDefinite),
            ],
        )?;
        Cholesky::new(outcome.take_matrix(2, MatrixKind::LowerTriangular)?)
    }

    /// Block-pivoted `U·D·Uᴴ` of a symmetric (real) or Hermitian (complex)
    /// indefinite matrix (`sytrf`/`hetrf`). Only the upper triangle is read.
    pub fn hermitian_indefinite<T: Scalar>(&self, a: &MatrixStore<T>) -> Result<HermitianIndefinite<T>> {
        let n = require_square(a)?;
        log::debug!(
            "Hermitian indefinite factorization of a {}x{} {} matrix on {}",
            n,
            n,
            T::ELEMENT_TYPE,
            self.backend.name()
        );
        let mut outcome = self.run::<T>(
            Routine::split("sytrf", "hetrf"),
            vec![
                Argument::character('U'),
                Argument::int(n as i32),
                InputOutputArg::new(a.as_view()).force_copy(true).into(),
                Argument::int(leading_dim(n)),
                Argument::int_output(Allocation::Len(n)),
                Argument::workspace_query(),
                Argument::status(FailureKind::Singular),
            ],
        )?;
        let factor = outcome.take_matrix(2, MatrixKind::UpperTriangular)?;
        let pivots = outcome.take_ints(4)?;
        HermitianIndefinite::new(factor, pivots)
    }

    /// Singular value decomposition (`gesvd`).
    pub fn svd<T: Scalar>(&self, a: &MatrixStore<T>, options: SvdOptions) -> Result<Svd<T>> {
        let (m, n) = (a.nrow(), a.ncol());
        let k = m.min(n);
        let real = <T::Real as Element>::ELEMENT_TYPE;
        log::debug!(
            "SVD ({:?} vectors) of a {}x{} {} matrix on {}",
            options.vectors,
            m,
            n,
            T::ELEMENT_TYPE,
            self.backend.name()
        );
        let (u_shape, vt_shape) = match options.vectors {
            SingularVectors::None => (None, None),
            SingularVectors::Reduced => (Some((m, k)), Some((k, n))),
            SingularVectors::Full => (Some((m, m)), Some((n, n))),
        };
        let vector_arg = |shape: Option<(usize, usize)>| match shape {
            Some((rows, cols)) => Argument::output(Allocation::Shape(rows, cols)),
            None => Argument::Null,
        };
        let job = options.vectors.job();

        let mut args = vec![
            Argument::character(job),
            Argument::character(job),
            Argument::int(m as i32),
            Argument::int(n as i32),
            InputOutputArg::new(a.as_view()).force_copy(true).into(),
            Argument::int(leading_dim(m)),
            OutputArg::new(Allocation::Len(k)).of_type(real).into(),
            vector_arg(u_shape),
            Argument::int(leading_dim(u_shape.map_or(1, |(rows, _)| rows))),
            vector_arg(vt_shape),
            Argument::int(leading_dim(vt_shape.map_or(1, |(rows, _)| rows))),
            Argument::workspace_query(),
        ];
        if T::ELEMENT_TYPE.is_complex() {
            args.push(Argument::WorkArea {
                size: 5 * k.max(1),
                ty: Some(real),
            });
        }
        args.push(Argument::status(FailureKind::NoConvergence));

        let mut outcome = {
            let _mask = options.mask_traps.then(TrapMask::all);
            self.run::<T>(Routine::new("gesvd"), args)?
        };
        let singular_values = outcome.take_vec::<T::Real>(6)?;
        let u = match u_shape {
            Some(_) => Some(outcome.take_matrix(7, MatrixKind::Dense)?),
            None => None,
        };
        let vt = match vt_shape {
            Some(_) => Some(outcome.take_matrix(9, MatrixKind::Dense)?),
            None => None,
        };
        Svd::new(u, singular_values, vt, (m, n))
    }
}
