//! Interpretation of the integer status a routine reports.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LinbindError, Result};

/// What a positive status means for a given routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// A pivot is exactly zero (`getrf`, `sytrf`).
    Singular,
    /// A leading minor is not positive definite (`potrf`).
    NotPositiveDefinite,
    /// An iterative phase did not converge (`gesvd`).
    NoConvergence,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureKind::Singular => "singular matrix",
            FailureKind::NotPositiveDefinite => "matrix is not positive definite",
            FailureKind::NoConvergence => "no convergence",
            FailureKind::Other => "routine failure",
        };
        f.write_str(text)
    }
}

/// Maps a status to a result: zero is success, `-k` blames argument `k`
/// (1-based), a positive code is a computational failure of `kind`.
pub fn decode(routine: &str, status: i32, kind: FailureKind) -> Result<()> {
    match status {
        0 => Ok(()),
        s if s < 0 => {
            log::warn!("{}: illegal value in argument {}", routine, -s);
            Err(LinbindError::InvalidArgument {
                routine: routine.to_string(),
                position: -s,
            })
        }
        code => {
            log::warn!("{}: {} (info = {})", routine, kind, code);
            Err(LinbindError::FactorizationFailure {
                routine: routine.to_string(),
                code,
                kind,
            })
        }
    }
}
