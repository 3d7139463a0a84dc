use thiserror::Error;

use crate::binder::FailureKind;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinbindError {
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Matrix must be square, got {nrow}x{ncol}")]
    NotSquare { nrow: usize, ncol: usize },

    #[error("Index ({row}, {col}) is out of range for a {nrow}x{ncol} matrix")]
    IndexOutOfRange {
        row: usize,
        col: usize,
        nrow: usize,
        ncol: usize,
    },

    #[error("Cell ({row}, {col}) is not writable in a {kind} matrix")]
    ReadOnlyCellWrite {
        row: usize,
        col: usize,
        kind: crate::kind::MatrixKind,
    },

    #[error("Invalid call specification: {0}")]
    Configuration(String),

    #[error("{routine}: argument {position} had an illegal value")]
    InvalidArgument { routine: String, position: i32 },

    #[error("{routine}: factorization failed ({kind}, info = {code})")]
    FactorizationFailure {
        routine: String,
        code: i32,
        kind: FailureKind,
    },

    #[error("Domain error: {0}")]
    Domain(String),

    #[error("Factorization does not hold the {0} factor")]
    MissingFactor(&'static str),

    #[error("Backend does not provide routine {0}")]
    UnknownRoutine(String),

    #[error("Buffer is already borrowed: {0}")]
    BufferBusy(String),

    #[error("Argument {position} contains non-finite values")]
    NonFiniteInput { position: usize },
}

impl LinbindError {
    /// `true` for outcomes a caller may react to (e.g. regularize and retry),
    /// as opposed to contract violations.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LinbindError::FactorizationFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, LinbindError>;
