use linbind_core::CountingBackend;
use linbind_factor::{
    Decomposer, Factorization, LinbindError, MatrixKind, MatrixStore, NativeBackend, SvdOptions,
};
use std::time::Instant;

/// Creates a symmetric pentadiagonal matrix A of size n x n.
/// Diagonals:
/// - Main: 4.0
/// - Adjacent (+1, -1): -1.0
/// - Outer (+2, -2): -0.5
fn create_pentadiagonal_matrix(n: usize) -> Result<MatrixStore<f64>, LinbindError> {
    MatrixStore::from_fn(MatrixKind::Dense, n, n, |i, j| match i.abs_diff(j) {
        0 => 4.0,
        1 => -1.0,
        2 => -0.5,
        _ => 0.0,
    })
}

/// Creates a right-hand side b of size n with b[i] = sin(i / n).
fn create_sin_vector(n: usize) -> Result<MatrixStore<f64>, LinbindError> {
    MatrixStore::from_fn(MatrixKind::Dense, n, 1, |i, _| (i as f64 / n as f64).sin())
}

fn run(n: usize) -> Result<(), LinbindError> {
    let a = create_pentadiagonal_matrix(n)?;
    let b = create_sin_vector(n)?;
    let backend = CountingBackend::new(NativeBackend);
    let decomposer = Decomposer::new(&backend);

    let start_time = Instant::now();
    let cholesky = decomposer.cholesky(&a)?;
    let x = cholesky.solve(&backend, &b)?;
    log::info!("Cholesky solve finished in {:?}", start_time.elapsed());

    let residual = a.matmul(&x)?.sub(&b)?.frobenius_norm()?;
    log::info!("  Residual norm: {:.6e}", residual);
    let error = cholesky.reconstruct()?.sub(&a)?.frobenius_norm()? / a.frobenius_norm()?;
    log::info!("  Reconstruction error: {:.6e}", error);

    let start_time = Instant::now();
    let svd = decomposer.svd(&a, SvdOptions::default())?;
    let s = svd.singular_values();
    log::info!("SVD finished in {:?}", start_time.elapsed());
    log::info!("  Largest singular value: {:.6}", s[0]);
    log::info!("  Smallest singular value: {:.6}", s[s.len() - 1]);
    if let Some(condition) = svd.condition_number() {
        log::info!("  Condition number: {:.6}", condition);
    }

    log::info!("Backend invocations: {}", backend.total());
    log::info!("  dgesvd_: {} (workspace query + call)", backend.count("dgesvd_"));
    Ok(())
}

fn main() {
    // Initialize logging based on RUST_LOG environment variable
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let n = 200;
    log::info!("Factoring {}x{} pentadiagonal matrix A...", n, n);
    if let Err(e) = run(n) {
        log::error!("Factorization failed: {}", e);
    }
}
