//! Round trips against the system LAPACK.
#![cfg(feature = "lapack")]

use linbind_core::Complex64;
use linbind_factor::{
    Decomposer, Factorization, MatrixKind, MatrixStore, NativeBackend, Result, SvdOptions,
};

fn random_matrix(rng: &mut fastrand::Rng, nrow: usize, ncol: usize) -> MatrixStore<f64> {
    MatrixStore::from_fn(MatrixKind::Dense, nrow, ncol, |_, _| rng.f64() * 2.0 - 1.0).unwrap()
}

fn relative_error(a: &MatrixStore<f64>, b: &MatrixStore<f64>) -> f64 {
    a.sub(b).unwrap().frobenius_norm().unwrap() / a.frobenius_norm().unwrap()
}

#[test]
fn test_native_lu_and_cholesky() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rng = fastrand::Rng::with_seed(42);
    let a = random_matrix(&mut rng, 5, 5);
    let decomposer = Decomposer::new(&NativeBackend);

    let lu = decomposer.lu(&a)?;
    assert!(relative_error(&a, &lu.reconstruct()?) < 1e-10);

    let spd = a.matmul(&a.transpose()?)?;
    let spd = MatrixStore::from_fn(MatrixKind::Dense, 5, 5, |i, j| {
        spd.read(i, j).unwrap() + if i == j { 1.0 } else { 0.0 }
    })?;
    let cholesky = decomposer.cholesky(&spd)?;
    assert!(relative_error(&spd, &cholesky.reconstruct()?) < 1e-10);

    let b = random_matrix(&mut rng, 5, 3);
    let x = cholesky.solve(&NativeBackend, &b)?;
    assert!(relative_error(&b, &spd.matmul(&x)?) < 1e-10);
    Ok(())
}

#[test]
fn test_native_qr_hermitian_and_svd() -> Result<()> {
    let mut rng = fastrand::Rng::with_seed(17);
    let a = random_matrix(&mut rng, 6, 4);
    let decomposer = Decomposer::new(&NativeBackend);

    let qr = decomposer.qr(&a)?;
    assert!(relative_error(&a, &qr.reconstruct()?) < 1e-10);

    let svd = decomposer.svd(&a, SvdOptions::default())?;
    let s = svd.singular_values();
    assert!(s.windows(2).all(|w| w[0] >= w[1]));
    assert!(relative_error(&a, &svd.reconstruct()?) < 1e-10);

    let r = random_matrix(&mut rng, 5, 5);
    let sym = MatrixStore::from_fn(MatrixKind::Dense, 5, 5, |i, j| {
        r.read(i, j).unwrap() + r.read(j, i).unwrap()
    })?;
    let ldl = decomposer.hermitian_indefinite(&sym)?;
    assert!(relative_error(&sym, &ldl.reconstruct()?) < 1e-10);
    Ok(())
}

#[test]
fn test_native_complex_hermitian_indefinite() -> Result<()> {
    let mut rng = fastrand::Rng::with_seed(23);
    let n = 4;
    let entries: Vec<Complex64> = (0..n * n)
        .map(|_| Complex64::new(rng.f64() - 0.5, rng.f64() - 0.5))
        .collect();
    let a = MatrixStore::from_fn(MatrixKind::Dense, n, n, |i, j| {
        entries[i + n * j] + entries[j + n * i].conj()
    })?;
    let ldl = Decomposer::new(&NativeBackend).hermitian_indefinite(&a)?;
    let err = ldl.reconstruct()?.sub(&a)?.frobenius_norm()? / a.frobenius_norm()?;
    assert!(err < 1e-10);
    Ok(())
}
