//! Backend linking the system LAPACK (feature `lapack`).
//!
//! Every routine takes all of its parameters by address; the binder has
//! already boxed scalars and pinned arrays, so dispatch only forwards the
//! pointer list.

use std::ffi::c_void;

use crate::backend::Backend;
use crate::binder::CallArgs;
use crate::error::{LinbindError, Result};

macro_rules! lapack_routines {
    ($($symbol:ident($($arg:ident),+);)+) => {
        #[link(name = "lapack")]
        extern "C" {
            $(fn $symbol($($arg: *mut c_void),+);)+
        }

        /// Symbols this backend can run.
        pub const SYMBOLS: &[&str] = &[$(stringify!($symbol)),+];

        fn dispatch(symbol: &str, pointers: &[*mut c_void]) -> Result<()> {
            $(
                if symbol == stringify!($symbol) {
                    let &[$($arg),+] = pointers else {
                        return Err(LinbindError::Configuration(format!(
                            "{} takes {} arguments, got {}",
                            symbol,
                            [$(stringify!($arg)),+].len(),
                            pointers.len()
                        )));
                    };
                    // SAFETY: the arity matches the routine's signature and every
                    // pointer refers to a boxed scalar or a pinned buffer that stays
                    // alive for the duration of the call.
                    unsafe { $symbol($($arg),+) };
                    return Ok(());
                }
            )+
            Err(LinbindError::UnknownRoutine(symbol.to_string()))
        }
    };
}

lapack_routines! {
    sgetrf_(m, n, a, lda, ipiv, info);
    dgetrf_(m, n, a, lda, ipiv, info);
    cgetrf_(m, n, a, lda, ipiv, info);
    zgetrf_(m, n, a, lda, ipiv, info);

    sgetrs_(trans, n, nrhs, a, lda, ipiv, b, ldb, info);
    dgetrs_(trans, n, nrhs, a, lda, ipiv, b, ldb, info);
    cgetrs_(trans, n, nrhs, a, lda, ipiv, b, ldb, info);
    zgetrs_(trans, n, nrhs, a, lda, ipiv, b, ldb, info);

    sgeqrf_(m, n, a, lda, tau, work, lwork, info);
    dgeqrf_(m, n, a, lda, tau, work, lwork, info);
    cgeqrf_(m, n, a, lda, tau, work, lwork, info);
    zgeqrf_(m, n, a, lda, tau, work, lwork, info);

    spotrf_(uplo, n, a, lda, info);
    dpotrf_(uplo, n, a, lda, info);
    cpotrf_(uplo, n, a, lda, info);
    zpotrf_(uplo, n, a, lda, info);

    spotrs_(uplo, n, nrhs, a, lda, b, ldb, info);
    dpotrs_(uplo, n, nrhs, a, lda, b, ldb, info);
    cpotrs_(uplo, n, nrhs, a, lda, b, ldb, info);
    zpotrs_(uplo, n, nrhs, a, lda, b, ldb, info);

    ssytrf_(uplo, n, a, lda, ipiv, work, lwork, info);
    dsytrf_(uplo, n, a, lda, ipiv, work, lwork, info);
    chetrf_(uplo, n, a, lda, ipiv, work, lwork, info);
    zhetrf_(uplo, n, a, lda, ipiv, work, lwork, info);

    sgesvd_(jobu, jobvt, m, n, a, lda, s, u, ldu, vt, ldvt, work, lwork, info);
    dgesvd_(jobu, jobvt, m, n, a, lda, s, u, ldu, vt, ldvt, work, lwork, info);
    cgesvd_(jobu, jobvt, m, n, a, lda, s, u, ldu, vt, ldvt, work, lwork, rwork, info);
    zgesvd_(jobu, jobvt, m, n, a, lda, s, u, ldu, vt, ldvt, work, lwork, rwork, info);
}

/// Calls into the LAPACK library the crate was linked against.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        log::info!("Using native LAPACK backend ({} routines)", SYMBOLS.len());
        NativeBackend
    }
}

impl Backend for NativeBackend {
    fn invoke(&self, symbol: &str, args: &mut CallArgs) -> Result<()> {
        let pointers = args.raw_pointers()?;
        dispatch(symbol, &pointers)
    }

    fn name(&self) -> &str {
        "lapack"
    }
}
