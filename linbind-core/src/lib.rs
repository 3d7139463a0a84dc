//! # linbind core
//!
//! Typed column-major matrix storage with kind-dependent element visibility,
//! and the argument binder that marshals it into calls on a native numerical
//! backend such as LAPACK.

// Declare modules
pub mod backend;
pub mod binder;
pub mod buffer;
pub mod error;
pub mod fpenv;
pub mod kind;
#[cfg(feature = "lapack")]
pub mod native;
pub mod ops; // Dense helpers on MatrixStore
pub mod store;
pub mod traits;

// Re-export public types
pub use backend::{Backend, CountingBackend, FnBackend};
pub use binder::{
    Allocation, Argument, ArrayView, Atom, BinderOptions, CallArgs, CallOutcome, CallSpec,
    Destination, FailureKind, InputArg, InputOutputArg, OutputArg, Routine, ScalarArg, ScalarValue,
};
pub use buffer::{DynBuffer, SharedBuffer};
pub use error::{LinbindError, Result};
pub use fpenv::{FpTraps, TrapMask};
pub use kind::{ElementType, MatrixKind};
#[cfg(feature = "lapack")]
pub use native::NativeBackend;
pub use store::{Conversion, MatrixStore};
pub use traits::{Element, Matrix, Promote, RealScalar, Scalar};

// Complex element types, so downstream crates need not depend on num-complex directly.
pub use num_complex::{Complex32, Complex64};
