//! `linbind-factor`: dense matrix factorizations computed by a native backend.
//!
//! Decompositions marshal a [`MatrixStore`] through the `linbind-core` binder
//! into the backend's routines (`getrf`, `geqrf`, `potrf`, `sytrf`/`hetrf`,
//! `gesvd`) and repackage the results as factorization models that can
//! rebuild the original matrix.

// Core modules
pub mod decompose;
pub mod factorizations;

pub use decompose::{Decomposer, SingularVectors, SvdOptions};
pub use factorizations::{
    permutations, Cholesky, Factorization, FactorizationModel, HermitianIndefinite, Lu, Qr, Svd,
};

// Re-export from linbind_core
pub use linbind_core::{
    Backend, BinderOptions, ElementType, FailureKind, FnBackend, LinbindError, MatrixKind,
    MatrixStore, Result, Scalar,
};

cfg_if::cfg_if! {
    if #[cfg(feature = "lapack")] {
        pub use linbind_core::NativeBackend;
    }
}
