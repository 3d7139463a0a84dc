use std::cell::RefCell;
use std::rc::Rc;

use linbind_core::{
    Allocation, Argument, CallArgs, CallSpec, CountingBackend, ElementType, FailureKind, FnBackend,
    InputOutputArg, LinbindError, MatrixKind, MatrixStore, Routine, ScalarArg,
};

const REPORTED_WORK: f64 = 37.0;

/// Routine shaped like `xgeqrf`: (m, n, a, lda, tau, work, lwork, info).
/// Answers a size query with `REPORTED_WORK`, and records the lengths it
/// received on the real call.
fn sizing_backend(seen: Rc<RefCell<Vec<(usize, i32)>>>) -> FnBackend {
    FnBackend::new().with("dgeqrf_", move |args: &mut CallArgs| {
        let lwork = args.int(6)?;
        if lwork == -1 {
            assert_eq!(args.array_len(5)?, 1);
            args.slice_mut::<f64>(5)?[0] = REPORTED_WORK;
            return Ok(());
        }
        seen.borrow_mut().push((args.array_len(5)?, lwork));
        let k = args.array_len(4)?;
        for (i, t) in args.slice_mut::<f64>(4)?.iter_mut().enumerate() {
            *t = (i + 1) as f64;
        }
        assert_eq!(k, 2);
        Ok(())
    })
}

fn geqrf_spec(a: &MatrixStore<f64>) -> Result<CallSpec, LinbindError> {
    let (m, n) = (a.nrow() as i32, a.ncol() as i32);
    CallSpec::new(
        Routine::new("geqrf"),
        ElementType::Real64,
        vec![
            Argument::int(m),
            Argument::int(n),
            Argument::input_output(a.as_view()),
            Argument::int(m),
            Argument::output(Allocation::Len(m.min(n) as usize)),
            Argument::workspace_query(),
            Argument::status(FailureKind::Other),
        ],
    )
}

#[test]
fn test_workspace_query_invokes_twice() -> Result<(), LinbindError> {
    let _ = env_logger::builder().is_test(true).try_init();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let backend = CountingBackend::new(sizing_backend(Rc::clone(&seen)));

    let spec = geqrf_spec(&MatrixStore::<f64>::zeros(MatrixKind::Dense, 4, 2)?)?;
    assert_eq!(spec.arity(), 8);
    let mut outcome = spec.invoke(&backend)?;

    assert_eq!(backend.count("dgeqrf_"), 2);
    assert_eq!(backend.total(), 2);
    assert_eq!(*seen.borrow(), vec![(37, 37)]);
    assert_eq!(outcome.work_size(), Some(37));
    assert_eq!(outcome.take_vec::<f64>(4)?, vec![1.0, 2.0]);
    assert_eq!(outcome.int(7)?, 0);
    Ok(())
}

#[test]
fn test_each_call_owns_its_workspace() -> Result<(), LinbindError> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let backend = CountingBackend::new(sizing_backend(Rc::clone(&seen)));
    let a = MatrixStore::<f64>::zeros(MatrixKind::Dense, 4, 2)?;
    geqrf_spec(&a)?.invoke(&backend)?;
    geqrf_spec(&a)?.invoke(&backend)?;
    assert_eq!(backend.count("dgeqrf_"), 4);
    assert_eq!(*seen.borrow(), vec![(37, 37), (37, 37)]);
    Ok(())
}

fn status_backend(status: i32) -> FnBackend {
    FnBackend::new().with("dgetrf_", move |args: &mut CallArgs| {
        args.set_int(5, status)?;
        Ok(())
    })
}

fn getrf_spec(a: &MatrixStore<f64>) -> Result<CallSpec, LinbindError> {
    let n = a.nrow() as i32;
    CallSpec::new(
        Routine::new("getrf"),
        ElementType::Real64,
        vec![
            Argument::int(n),
            Argument::int(n),
            Argument::input_output(a.as_view()),
            Argument::int(n),
            Argument::int_output(Allocation::Len(a.nrow())),
            Argument::status(FailureKind::Singular),
        ],
    )
}

#[test]
fn test_negative_status_blames_argument() -> Result<(), LinbindError> {
    let a = MatrixStore::<f64>::identity(2)?;
    let err = getrf_spec(&a)?.invoke(&status_backend(-3)).unwrap_err();
    assert_eq!(
        err,
        LinbindError::InvalidArgument {
            routine: "dgetrf_".to_string(),
            position: 3
        }
    );
    assert!(!err.is_recoverable());
    Ok(())
}

#[test]
fn test_positive_status_is_factorization_failure() -> Result<(), LinbindError> {
    let a = MatrixStore::<f64>::identity(2)?;
    let err = getrf_spec(&a)?.invoke(&status_backend(2)).unwrap_err();
    assert_eq!(
        err,
        LinbindError::FactorizationFailure {
            routine: "dgetrf_".to_string(),
            code: 2,
            kind: FailureKind::Singular
        }
    );
    assert!(err.is_recoverable());
    Ok(())
}

#[test]
fn test_two_status_arguments_rejected() {
    let err = CallSpec::new(
        Routine::new("getrf"),
        ElementType::Real64,
        vec![
            Argument::status(FailureKind::Singular),
            Argument::status(FailureKind::Other),
        ],
    )
    .unwrap_err();
    match err {
        LinbindError::Configuration(msg) => assert!(msg.contains("status")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_pins_released_after_failure() -> Result<(), LinbindError> {
    let mut a = MatrixStore::<f64>::identity(2)?;
    let spec = CallSpec::new(
        Routine::new("getrf"),
        ElementType::Real64,
        vec![
            Argument::int(2),
            Argument::int(2),
            Argument::input_output(a.as_view()),
            Argument::int(2),
            Argument::int_output(Allocation::Len(2)),
            Argument::status(FailureKind::Singular),
        ],
    )?;
    assert!(spec.invoke(&status_backend(1)).is_err());
    a.write(0, 1, 5.0)?;
    assert_eq!(a.read(0, 1)?, 5.0);
    Ok(())
}

fn scal_backend() -> FnBackend {
    FnBackend::new().with("dscal_", |args: &mut CallArgs| {
        let alpha = args.scalar::<f64>(1)?;
        for x in args.slice_mut::<f64>(2)? {
            *x *= alpha;
        }
        Ok(())
    })
}

fn scal_spec(arg: Argument) -> Result<CallSpec, LinbindError> {
    CallSpec::new(
        Routine::new("scal"),
        ElementType::Real64,
        vec![Argument::int(3), ScalarArg::real(2.0).into(), arg, Argument::int(1)],
    )
}

#[test]
fn test_input_output_writes_in_place_unless_copy_requested() -> Result<(), LinbindError> {
    let backend = scal_backend();
    let x = MatrixStore::from_buffer(3, 1, vec![1.0, 2.0, 3.0], MatrixKind::Dense)?;

    let mut outcome = scal_spec(InputOutputArg::new(x.as_view()).force_copy(true).into())?.invoke(&backend)?;
    let y = outcome.take_matrix::<f64>(2, MatrixKind::Dense)?;
    assert_eq!(y.raw_elements()?, vec![2.0, 4.0, 6.0]);
    assert_eq!(x.raw_elements()?, vec![1.0, 2.0, 3.0]);
    assert!(!y.shares_buffer_with(&x));

    let mut outcome = scal_spec(Argument::input_output(x.as_view()))?.invoke(&backend)?;
    let z = outcome.take_matrix::<f64>(2, MatrixKind::Dense)?;
    assert_eq!(x.raw_elements()?, vec![2.0, 4.0, 6.0]);
    assert!(z.shares_buffer_with(&x));

    let mut outcome =
        scal_spec(InputOutputArg::new(x.as_view()).into_buffer(x.as_view()).into())?.invoke(&backend)?;
    let w = outcome.take_matrix::<f64>(2, MatrixKind::Dense)?;
    assert_eq!(x.raw_elements()?, vec![4.0, 8.0, 12.0]);
    assert!(w.shares_buffer_with(&x));
    Ok(())
}

#[test]
fn test_distinct_destination_receives_results() -> Result<(), LinbindError> {
    let backend = scal_backend();
    let x = MatrixStore::from_buffer(3, 1, vec![1.0, 2.0, 3.0], MatrixKind::Dense)?;
    let y = MatrixStore::<f64>::zeros(MatrixKind::Dense, 3, 1)?;

    let mut outcome =
        scal_spec(InputOutputArg::new(x.as_view()).into_buffer(y.as_view()).into())?.invoke(&backend)?;
    let out = outcome.take_matrix::<f64>(2, MatrixKind::Dense)?;
    assert!(out.shares_buffer_with(&y));
    assert_eq!(y.raw_elements()?, vec![2.0, 4.0, 6.0]);
    assert_eq!(x.raw_elements()?, vec![1.0, 2.0, 3.0]);

    let small = MatrixStore::<f64>::zeros(MatrixKind::Dense, 2, 1)?;
    let err = scal_spec(InputOutputArg::new(x.as_view()).into_buffer(small.as_view()).into())?
        .invoke(&backend)
        .unwrap_err();
    assert!(matches!(err, LinbindError::DimensionMismatch(_)));
    Ok(())
}

/// Routine shaped like `xgels` with one right-hand side:
/// (m, n, a, lda, b, ldb, info). `b` must hold `max(m, n)` rows.
#[test]
fn test_right_hand_side_grown_into_allocation() -> Result<(), LinbindError> {
    let backend = FnBackend::new().with("dgels_", |args: &mut CallArgs| {
        let (m, n) = (args.int(0)? as usize, args.int(1)? as usize);
        assert_eq!(args.int(5)? as usize, m.max(n));
        let b = args.slice_mut::<f64>(4)?;
        assert_eq!(b, &[5.0, 7.0, 0.0]);
        b[2] = -1.0;
        args.set_int(6, 0)
    });
    let a = MatrixStore::from_rows(&[&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]])?;
    let b = MatrixStore::from_buffer(2, 1, vec![5.0, 7.0], MatrixKind::Dense)?;
    let mut outcome = CallSpec::new(
        Routine::new("gels"),
        ElementType::Real64,
        vec![
            Argument::int(2),
            Argument::int(3),
            Argument::input(a.as_view()),
            Argument::int(2),
            InputOutputArg::new(b.as_view())
                .into_allocation(Allocation::Shape(3, 1))
                .into(),
            Argument::int(3),
            Argument::status(FailureKind::Singular),
        ],
    )?
    .invoke(&backend)?;
    assert_eq!(outcome.shape(4), Some((3, 1)));
    let x = outcome.take_matrix::<f64>(4, MatrixKind::Dense)?;
    assert_eq!(x.raw_elements()?, vec![5.0, 7.0, -1.0]);
    assert_eq!(b.raw_elements()?, vec![5.0, 7.0]);
    Ok(())
}

#[test]
fn test_same_matrix_as_two_inputs() -> Result<(), LinbindError> {
    // C = A·A with a fake gemm: (m, n, k, a, b, c)
    let backend = FnBackend::new().with("dgemm_", |args: &mut CallArgs| {
        let n = args.int(0)? as usize;
        let a = args.slice::<f64>(3)?.to_vec();
        let b = args.slice::<f64>(4)?.to_vec();
        let c = args.slice_mut::<f64>(5)?;
        for col in 0..n {
            for row in 0..n {
                c[row + n * col] = (0..n).map(|l| a[row + n * l] * b[l + n * col]).sum();
            }
        }
        Ok(())
    });
    let gemm = |a: &MatrixStore<f64>| {
        CallSpec::new(
            Routine::new("gemm"),
            ElementType::Real64,
            vec![
                Argument::int(2),
                Argument::int(2),
                Argument::int(2),
                Argument::input(a.as_view()),
                Argument::input(a.as_view()),
                Argument::output(Allocation::SameAs(3)),
            ],
        )?
        .invoke(&backend)
    };

    let a = MatrixStore::from_rows(&[&[1.0, 2.0], &[3.0, 4.0]])?;
    let mut outcome = gemm(&a)?;
    let c = outcome.take_matrix::<f64>(5, MatrixKind::Dense)?;
    assert_eq!(c.logical_elements()?, vec![7.0, 15.0, 10.0, 22.0]);

    let u = MatrixStore::from_buffer(2, 2, vec![1.0, 0.0, 2.0, 3.0], MatrixKind::UpperTriangular)?;
    let mut outcome = gemm(&u)?;
    let c = outcome.take_matrix::<f64>(5, MatrixKind::Dense)?;
    assert_eq!(c.logical_elements()?, vec![1.0, 0.0, 8.0, 9.0]);
    Ok(())
}

#[test]
fn test_null_and_output_scalars() -> Result<(), LinbindError> {
    let backend = FnBackend::new().with("znorm_", |args: &mut CallArgs| {
        assert!(args.is_null(0));
        assert_eq!(args.character(1)?, 'F');
        args.set_scalar(2, 4.5f64)?;
        Ok(())
    });
    let outcome = CallSpec::new(
        Routine::new("norm"),
        ElementType::Complex64,
        vec![
            Argument::Null,
            Argument::character('F'),
            ScalarArg::zero().of_type(ElementType::Real64).output().into(),
        ],
    )?
    .invoke(&backend)?;
    assert_eq!(outcome.scalar::<f64>(2)?, 4.5);
    assert_eq!(outcome.symbol(), "znorm_");
    assert!(outcome.int(1).is_err());
    Ok(())
}
