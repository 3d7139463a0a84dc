//! Column-major matrix storage with kind-dependent element visibility.

use std::cell::{Ref, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::buffer::{shared, DynBuffer, SharedBuffer};
use crate::error::{LinbindError, Result};
use crate::kind::MatrixKind;
use crate::traits::{Matrix, Promote, Scalar};

/// Rewrites the non-authoritative cells of a column-major `nrow x ncol`
/// buffer with their logical values. Idempotent.
pub(crate) fn materialize_slice<T: Scalar>(
    data: &mut [T],
    nrow: usize,
    ncol: usize,
    kind: MatrixKind,
) -> Result<()> {
    if data.len() != nrow * ncol {
        return Err(LinbindError::DimensionMismatch(format!(
            "buffer of {} elements is not {}x{}",
            data.len(),
            nrow,
            ncol
        )));
    }
    match kind {
        MatrixKind::Dense => {}
        MatrixKind::UpperTriangular => {
            for col in 0..ncol {
                for row in (col + 1)..nrow {
                    data[row + nrow * col] = T::zero();
                }
            }
        }
        MatrixKind::LowerTriangular => {
            for col in 0..ncol {
                for row in 0..col.min(nrow) {
                    data[row + nrow * col] = T::zero();
                }
            }
        }
        MatrixKind::Hermitian => {
            if nrow != ncol {
                return Err(LinbindError::NotSquare { nrow, ncol });
            }
            for col in 0..ncol {
                for row in (col + 1)..nrow {
                    data[row + nrow * col] = data[col + nrow * row].conj();
                }
            }
        }
    }
    Ok(())
}

/// Whether every non-authoritative cell already holds its logical value.
pub(crate) fn is_materialized_slice<T: Scalar>(data: &[T], nrow: usize, ncol: usize, kind: MatrixKind) -> bool {
    if data.len() != nrow * ncol {
        return false;
    }
    let at = |row: usize, col: usize| data[row + nrow * col];
    match kind {
        MatrixKind::Dense => true,
        MatrixKind::UpperTriangular => {
            (0..ncol).all(|col| ((col + 1)..nrow).all(|row| at(row, col) == T::zero()))
        }
        MatrixKind::LowerTriangular => {
            (0..ncol).all(|col| (0..col.min(nrow)).all(|row| at(row, col) == T::zero()))
        }
        MatrixKind::Hermitian => {
            nrow == ncol
                && (0..ncol).all(|col| ((col + 1)..nrow).all(|row| at(row, col) == at(col, row).conj()))
        }
    }
}

fn check_shape(kind: MatrixKind, nrow: usize, ncol: usize, len: usize) -> Result<()> {
    if nrow == 0 || ncol == 0 {
        return Err(LinbindError::DimensionMismatch(format!(
            "matrix dimensions must be positive, got {}x{}",
            nrow, ncol
        )));
    }
    if nrow * ncol != len {
        return Err(LinbindError::DimensionMismatch(format!(
            "Data length ({}) does not match dimensions ({}x{})",
            len, nrow, ncol
        )));
    }
    if kind.requires_square() && nrow != ncol {
        return Err(LinbindError::NotSquare { nrow, ncol });
    }
    Ok(())
}

/// Target of [`MatrixStore::convert`]. Unset fields keep the source's value;
/// `copy: None` applies the default aliasing policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Conversion {
    pub kind: Option<MatrixKind>,
    pub shape: Option<(usize, usize)>,
    pub copy: Option<bool>,
}

impl Conversion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: MatrixKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn shape(mut self, nrow: usize, ncol: usize) -> Self {
        self.shape = Some((nrow, ncol));
        self
    }

    pub fn copy(mut self, copy: bool) -> Self {
        self.copy = Some(copy);
        self
    }
}

/// Dense column-major buffer of one scalar type, tagged with a [`MatrixKind`].
///
/// The buffer is reference counted: stores produced by a shallow
/// [`convert`](MatrixStore::convert) share it, so writes through one are
/// visible through the other. `Clone` always makes an independent copy.
pub struct MatrixStore<T: Scalar> {
    nrow: usize,
    ncol: usize,
    kind: MatrixKind,
    elements: SharedBuffer<T>,
}

impl<T: Scalar> MatrixStore<T> {
    /// Creates a `nrow x ncol` matrix with every stored cell set to `fill`.
    ///
    /// Cells outside the kind's authoritative region are written with their
    /// logical value, so the raw buffer starts out materialized.
    pub fn new(kind: MatrixKind, nrow: usize, ncol: usize, fill: T) -> Result<Self> {
        check_shape(kind, nrow, ncol, nrow * ncol)?;
        let mut data = vec![fill; nrow * ncol];
        materialize_slice(&mut data, nrow, ncol, kind)?;
        Ok(Self {
            nrow,
            ncol,
            kind,
            elements: shared(data),
        })
    }

    pub fn zeros(kind: MatrixKind, nrow: usize, ncol: usize) -> Result<Self> {
        Self::new(kind, nrow, ncol, T::zero())
    }

    pub fn identity(n: usize) -> Result<Self> {
        let m = Self::zeros(MatrixKind::Dense, n, n)?;
        {
            let mut data = m.elements_mut()?;
            for i in 0..n {
                data[i + n * i] = T::one();
            }
        }
        Ok(m)
    }

    /// Wraps an existing column-major buffer.
    pub fn from_buffer(nrow: usize, ncol: usize, buffer: Vec<T>, kind: MatrixKind) -> Result<Self> {
        check_shape(kind, nrow, ncol, buffer.len())?;
        Ok(Self {
            nrow,
            ncol,
            kind,
            elements: shared(buffer),
        })
    }

    /// Builds a dense matrix from row slices; convenient for literals in tests and examples.
    pub fn from_rows(rows: &[&[T]]) -> Result<Self> {
        let nrow = rows.len();
        let ncol = rows.first().map_or(0, |r| r.len());
        if rows.iter().any(|r| r.len() != ncol) {
            return Err(LinbindError::DimensionMismatch(
                "all rows must have the same length".to_string(),
            ));
        }
        Self::from_fn(MatrixKind::Dense, nrow, ncol, |r, c| rows[r][c])
    }

    /// Dense-buffer matrix whose cell `(row, col)` is `f(row, col)`; non-authoritative
    /// cells are then materialized.
    pub fn from_fn(
        kind: MatrixKind,
        nrow: usize,
        ncol: usize,
        mut f: impl FnMut(usize, usize) -> T,
    ) -> Result<Self> {
        check_shape(kind, nrow, ncol, nrow * ncol)?;
        let mut data = Vec::with_capacity(nrow * ncol);
        for col in 0..ncol {
            for row in 0..nrow {
                data.push(f(row, col));
            }
        }
        materialize_slice(&mut data, nrow, ncol, kind)?;
        Ok(Self {
            nrow,
            ncol,
            kind,
            elements: shared(data),
        })
    }

    pub(crate) fn from_shared(
        nrow: usize,
        ncol: usize,
        elements: SharedBuffer<T>,
        kind: MatrixKind,
    ) -> Result<Self> {
        let len = elements
            .try_borrow()
            .map_err(|_| LinbindError::BufferBusy("wrap output".to_string()))?
            .len();
        check_shape(kind, nrow, ncol, len)?;
        Ok(Self {
            nrow,
            ncol,
            kind,
            elements,
        })
    }

    pub fn nrow(&self) -> usize {
        self.nrow
    }

    pub fn ncol(&self) -> usize {
        self.ncol
    }

    pub fn kind(&self) -> MatrixKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.nrow * self.ncol
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn index(&self, row: usize, col: usize) -> usize {
        row + self.nrow * col
    }

    fn check_index(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.nrow || col >= self.ncol {
            return Err(LinbindError::IndexOutOfRange {
                row,
                col,
                nrow: self.nrow,
                ncol: self.ncol,
            });
        }
        Ok(())
    }

    pub(crate) fn elements(&self) -> Result<Ref<'_, Vec<T>>> {
        self.elements
            .try_borrow()
            .map_err(|_| LinbindError::BufferBusy("matrix elements".to_string()))
    }

    pub(crate) fn elements_mut(&self) -> Result<RefMut<'_, Vec<T>>> {
        self.elements
            .try_borrow_mut()
            .map_err(|_| LinbindError::BufferBusy("matrix elements".to_string()))
    }

    /// Copy of the raw buffer, read without kind-aware interpretation.
    pub fn raw_elements(&self) -> Result<Vec<T>> {
        Ok(self.elements()?.clone())
    }

    /// Logical value of cell `(row, col)`.
    pub fn read(&self, row: usize, col: usize) -> Result<T> {
        self.check_index(row, col)?;
        let data = self.elements()?;
        let value = match self.kind {
            MatrixKind::Dense => data[self.index(row, col)],
            MatrixKind::UpperTriangular | MatrixKind::LowerTriangular => {
                if self.kind.is_authoritative(row, col) {
                    data[self.index(row, col)]
                } else {
                    T::zero()
                }
            }
            MatrixKind::Hermitian => {
                if row <= col {
                    data[self.index(row, col)]
                } else {
                    data[self.index(col, row)].conj()
                }
            }
        };
        Ok(value)
    }

    /// Sets the logical value of cell `(row, col)`.
    ///
    /// Masked cells of triangular matrices are read-only. Writing below the
    /// diagonal of a Hermitian matrix stores the conjugate into the mirrored
    /// upper cell.
    pub fn write(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        self.check_index(row, col)?;
        let kind = self.kind;
        let (index, value) = match kind {
            MatrixKind::Dense => (self.index(row, col), value),
            MatrixKind::UpperTriangular | MatrixKind::LowerTriangular => {
                if !kind.is_authoritative(row, col) {
                    return Err(LinbindError::ReadOnlyCellWrite { row, col, kind });
                }
                (self.index(row, col), value)
            }
            MatrixKind::Hermitian => {
                if row <= col {
                    (self.index(row, col), value)
                } else {
                    (self.index(col, row), value.conj())
                }
            }
        };
        self.elements_mut()?[index] = value;
        Ok(())
    }

    /// Makes every raw buffer position equal its logical value.
    ///
    /// This does not change what [`read`](Self::read) returns, hence `&self`.
    pub fn materialize(&self) -> Result<()> {
        if self.kind == MatrixKind::Dense {
            return Ok(());
        }
        log::trace!("materializing {} {}x{} matrix", self.kind, self.nrow, self.ncol);
        materialize_slice(&mut self.elements_mut()?, self.nrow, self.ncol, self.kind)
    }

    /// Whether `self` and `other` share one buffer.
    pub fn shares_buffer_with(&self, other: &MatrixStore<T>) -> bool {
        Rc::ptr_eq(&self.elements, &other.elements)
    }

    /// New store with a different kind and/or shape.
    ///
    /// Unless overridden by `target.copy`, the result aliases the source when
    /// the kind is unchanged and either the kind is dense or the row count is
    /// unchanged; any other conversion deep-copies. When the kind or row
    /// count changes, the source is materialized first so that no alias ever
    /// exposes stale synthesized cells.
    pub fn convert(&self, target: Conversion) -> Result<MatrixStore<T>> {
        let kind = target.kind.unwrap_or(self.kind);
        let (nrow, ncol) = target.shape.unwrap_or((self.nrow, self.ncol));
        check_shape(kind, nrow, ncol, self.len())?;

        let shallow_by_default =
            kind == self.kind && (kind == MatrixKind::Dense || nrow == self.nrow);
        let copy = target.copy.unwrap_or(!shallow_by_default);
        if !shallow_by_default {
            self.materialize()?;
        }
        log::debug!(
            "convert {} {}x{} -> {} {}x{} ({})",
            self.kind,
            self.nrow,
            self.ncol,
            kind,
            nrow,
            ncol,
            if copy { "copy" } else { "alias" }
        );
        let elements = if copy {
            shared(self.elements()?.clone())
        } else {
            Rc::clone(&self.elements)
        };
        Ok(MatrixStore {
            nrow,
            ncol,
            kind,
            elements,
        })
    }

    /// Element-type conversion; always yields an independent buffer.
    pub fn cast<U: Scalar>(&self) -> Result<MatrixStore<U>>
    where
        T: Promote<U>,
    {
        self.materialize()?;
        let data: Vec<U> = self.elements()?.iter().map(|&x| x.promote()).collect();
        MatrixStore::from_buffer(self.nrow, self.ncol, data, self.kind)
    }

    /// Deep copy into a fresh buffer; fails while the buffer is pinned for
    /// writing.
    pub fn try_clone(&self) -> Result<MatrixStore<T>> {
        let data = self.elements()?.clone();
        Ok(MatrixStore {
            nrow: self.nrow,
            ncol: self.ncol,
            kind: self.kind,
            elements: shared(data),
        })
    }

    /// Type-erased handle to the same buffer.
    pub fn dyn_buffer(&self) -> DynBuffer {
        T::into_dyn(Rc::clone(&self.elements))
    }
}

/// Deep copy into a fresh buffer.
///
/// # Panics
///
/// Panics if the buffer is pinned for writing, i.e. while it is lent to a
/// backend as an in/out array. [`MatrixStore::try_clone`] reports
/// [`LinbindError::BufferBusy`] instead.
impl<T: Scalar> Clone for MatrixStore<T> {
    fn clone(&self) -> Self {
        let data = self
            .elements
            .borrow()
            .clone();
        Self {
            nrow: self.nrow,
            ncol: self.ncol,
            kind: self.kind,
            elements: shared(data),
        }
    }
}

impl<T: Scalar> fmt::Debug for MatrixStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatrixStore")
            .field("nrow", &self.nrow)
            .field("ncol", &self.ncol)
            .field("kind", &self.kind)
            .field("element_type", &T::ELEMENT_TYPE)
            .finish()
    }
}

impl<T: Scalar> Matrix for MatrixStore<T> {
    fn dims(&self) -> (usize, usize) {
        (self.nrow, self.ncol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    const KINDS: [MatrixKind; 4] = [
        MatrixKind::Dense,
        MatrixKind::UpperTriangular,
        MatrixKind::LowerTriangular,
        MatrixKind::Hermitian,
    ];

    #[test]
    fn test_fill_reads_back_masked() {
        let fill = Complex64::new(1.5, -2.0);
        for kind in KINDS {
            let shapes: &[(usize, usize)] = if kind == MatrixKind::Hermitian {
                &[(1, 1), (3, 3), (4, 4)]
            } else {
                &[(1, 1), (2, 3), (3, 2), (4, 4)]
            };
            for &(nrow, ncol) in shapes {
                let m = MatrixStore::new(kind, nrow, ncol, fill).unwrap();
                for row in 0..nrow {
                    for col in 0..ncol {
                        let expected = match kind {
                            MatrixKind::Dense => fill,
                            MatrixKind::UpperTriangular if row > col => Complex64::new(0.0, 0.0),
                            MatrixKind::LowerTriangular if row < col => Complex64::new(0.0, 0.0),
                            MatrixKind::Hermitian if row > col => fill.conj(),
                            _ => fill,
                        };
                        assert_eq!(m.read(row, col).unwrap(), expected, "{kind} ({row}, {col})");
                    }
                }
            }
        }
    }

    #[test]
    fn test_from_buffer_checks_dimensions() {
        let err = MatrixStore::from_buffer(2, 3, vec![0.0f64; 5], MatrixKind::Dense).unwrap_err();
        assert!(matches!(err, LinbindError::DimensionMismatch(_)));
        let err = MatrixStore::from_buffer(2, 3, vec![0.0f64; 6], MatrixKind::Hermitian).unwrap_err();
        assert_eq!(err, LinbindError::NotSquare { nrow: 2, ncol: 3 });
    }

    #[test]
    fn test_clone_while_lent() {
        let m = MatrixStore::from_buffer(2, 1, vec![1.0f64, 2.0], MatrixKind::Dense).unwrap();
        let buffer = m.dyn_buffer();

        let read_pin = buffer.pin(false).unwrap();
        let copy = m.clone();
        assert!(!copy.shares_buffer_with(&m));
        assert_eq!(copy.raw_elements().unwrap(), vec![1.0, 2.0]);
        drop(read_pin);

        let write_pin = buffer.pin(true).unwrap();
        assert!(matches!(m.try_clone(), Err(LinbindError::BufferBusy(_))));
        drop(write_pin);
        assert_eq!(m.try_clone().unwrap().raw_elements().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    #[should_panic]
    fn test_clone_panics_while_pinned_for_writing() {
        let m = MatrixStore::<f64>::zeros(MatrixKind::Dense, 2, 2).unwrap();
        let buffer = m.dyn_buffer();
        let _pin = buffer.pin(true).unwrap();
        let _ = m.clone();
    }

    #[test]
    fn test_column_major_indexing() {
        let m = MatrixStore::from_buffer(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], MatrixKind::Dense)
            .unwrap();
        assert_eq!(m.read(1, 0).unwrap(), 2.0);
        assert_eq!(m.read(0, 2).unwrap(), 5.0);
        assert_eq!(m.read(1, 2).unwrap(), 6.0);
    }

    #[test]
    fn test_out_of_range() {
        let mut m = MatrixStore::<f64>::zeros(MatrixKind::Dense, 2, 2).unwrap();
        assert!(matches!(m.read(2, 0), Err(LinbindError::IndexOutOfRange { .. })));
        assert!(matches!(m.write(0, 5, 1.0), Err(LinbindError::IndexOutOfRange { .. })));
    }

    #[test]
    fn test_masked_writes_are_rejected() {
        let mut upper = MatrixStore::<f64>::zeros(MatrixKind::UpperTriangular, 3, 3).unwrap();
        upper.write(0, 2, 4.0).unwrap();
        assert_eq!(
            upper.write(2, 0, 1.0).unwrap_err(),
            LinbindError::ReadOnlyCellWrite {
                row: 2,
                col: 0,
                kind: MatrixKind::UpperTriangular
            }
        );
        let mut lower = MatrixStore::<f64>::zeros(MatrixKind::LowerTriangular, 3, 3).unwrap();
        lower.write(2, 0, 4.0).unwrap();
        assert!(matches!(
            lower.write(0, 2, 1.0),
            Err(LinbindError::ReadOnlyCellWrite { .. })
        ));
    }

    #[test]
    fn test_hermitian_mirror_write() {
        let mut h = MatrixStore::<Complex64>::zeros(MatrixKind::Hermitian, 3, 3).unwrap();
        h.write(2, 0, Complex64::new(1.0, 2.0)).unwrap();
        assert_eq!(h.read(0, 2).unwrap(), Complex64::new(1.0, -2.0));
        assert_eq!(h.read(2, 0).unwrap(), Complex64::new(1.0, 2.0));
        let raw = h.raw_elements().unwrap();
        assert_eq!(raw[0 + 3 * 2], Complex64::new(1.0, -2.0));
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let mut h = MatrixStore::<Complex64>::zeros(MatrixKind::Hermitian, 3, 3).unwrap();
        h.write(0, 1, Complex64::new(1.0, 1.0)).unwrap();
        h.write(1, 2, Complex64::new(0.0, 3.0)).unwrap();
        h.materialize().unwrap();
        let once = h.raw_elements().unwrap();
        h.materialize().unwrap();
        assert_eq!(h.raw_elements().unwrap(), once);
        for row in 0..3 {
            for col in 0..3 {
                assert_eq!(once[row + 3 * col], h.read(row, col).unwrap());
            }
        }
    }

    #[test]
    fn test_materialize_zero_fills_masked_triangle() {
        let u = MatrixStore::from_buffer(
            2,
            2,
            vec![1.0f64, 9.0, 3.0, 4.0],
            MatrixKind::UpperTriangular,
        )
        .unwrap();
        assert_eq!(u.raw_elements().unwrap()[1], 9.0);
        u.materialize().unwrap();
        assert_eq!(u.raw_elements().unwrap(), vec![1.0, 0.0, 3.0, 4.0]);
    }

    #[test]
    fn test_convert_default_aliases_same_kind() {
        let m = MatrixStore::<f64>::zeros(MatrixKind::Dense, 2, 3).unwrap();
        let mut alias = m.convert(Conversion::new().copy(false)).unwrap();
        assert!(alias.shares_buffer_with(&m));
        alias.write(1, 1, 7.0).unwrap();
        assert_eq!(m.read(1, 1).unwrap(), 7.0);

        let reshaped = m.convert(Conversion::new().shape(3, 2)).unwrap();
        assert!(reshaped.shares_buffer_with(&m));
    }

    #[test]
    fn test_convert_kind_change_copies_and_materializes() {
        let m = MatrixStore::from_buffer(
            2,
            2,
            vec![1.0f64, 9.0, 3.0, 4.0],
            MatrixKind::UpperTriangular,
        )
        .unwrap();
        let mut dense = m.convert(Conversion::new().kind(MatrixKind::Dense)).unwrap();
        assert!(!dense.shares_buffer_with(&m));
        assert_eq!(dense.read(1, 0).unwrap(), 0.0);
        dense.write(0, 0, -1.0).unwrap();
        assert_eq!(m.read(0, 0).unwrap(), 1.0);
        // source was materialized on the way
        assert_eq!(m.raw_elements().unwrap()[1], 0.0);
    }

    #[test]
    fn test_convert_explicit_copy_overrides() {
        let m = MatrixStore::<f64>::zeros(MatrixKind::Dense, 2, 2).unwrap();
        let copy = m.convert(Conversion::new().copy(true)).unwrap();
        assert!(!copy.shares_buffer_with(&m));
        let alias = m
            .convert(Conversion::new().kind(MatrixKind::LowerTriangular).copy(false))
            .unwrap();
        assert!(alias.shares_buffer_with(&m));
    }

    #[test]
    fn test_convert_rejects_bad_shapes() {
        let m = MatrixStore::<f64>::zeros(MatrixKind::Dense, 2, 3).unwrap();
        assert!(matches!(
            m.convert(Conversion::new().shape(4, 2)),
            Err(LinbindError::DimensionMismatch(_))
        ));
        assert!(matches!(
            m.convert(Conversion::new().kind(MatrixKind::Hermitian)),
            Err(LinbindError::NotSquare { .. })
        ));
    }

    #[test]
    fn test_cast_is_independent() {
        let h = MatrixStore::from_buffer(2, 2, vec![1.0f64, 5.0, 2.0, 3.0], MatrixKind::Hermitian)
            .unwrap();
        let c = h.cast::<Complex64>().unwrap();
        assert_eq!(c.kind(), MatrixKind::Hermitian);
        assert_eq!(c.read(1, 0).unwrap(), Complex64::new(2.0, 0.0));
        assert_eq!(c.raw_elements().unwrap()[1], Complex64::new(2.0, 0.0));
    }

    #[test]
    fn test_clone_is_deep() {
        let m = MatrixStore::<f64>::zeros(MatrixKind::Dense, 2, 2).unwrap();
        let mut c = m.clone();
        c.write(0, 0, 1.0).unwrap();
        assert_eq!(m.read(0, 0).unwrap(), 0.0);
        assert!(!c.shares_buffer_with(&m));
    }
}
