//! Shared element buffers and the pinning guard used while a buffer is lent to the backend.

use num_complex::{Complex32, Complex64};
use std::cell::{Ref, RefCell, RefMut};
use std::ffi::c_void;
use std::rc::Rc;

use crate::error::{LinbindError, Result};
use crate::kind::{ElementType, MatrixKind};
use crate::store::{is_materialized_slice, materialize_slice};
use crate::traits::{Promote, Scalar};

/// Reference-counted element storage. Clones alias the same memory.
pub type SharedBuffer<T> = Rc<RefCell<Vec<T>>>;

pub(crate) fn shared<T>(data: Vec<T>) -> SharedBuffer<T> {
    Rc::new(RefCell::new(data))
}

/// Type-erased buffer as seen by the argument binder.
#[derive(Debug, Clone)]
pub enum DynBuffer {
    Int32(SharedBuffer<i32>),
    Real32(SharedBuffer<f32>),
    Real64(SharedBuffer<f64>),
    Complex32(SharedBuffer<Complex32>),
    Complex64(SharedBuffer<Complex64>),
}

macro_rules! each_buffer {
    ($buffer:expr, $b:ident => $body:expr) => {
        match $buffer {
            DynBuffer::Int32($b) => $body,
            DynBuffer::Real32($b) => $body,
            DynBuffer::Real64($b) => $body,
            DynBuffer::Complex32($b) => $body,
            DynBuffer::Complex64($b) => $body,
        }
    };
}

macro_rules! each_buffer_same {
    ($buffer:expr, $b:ident => $body:expr) => {
        match $buffer {
            DynBuffer::Int32($b) => DynBuffer::Int32($body),
            DynBuffer::Real32($b) => DynBuffer::Real32($body),
            DynBuffer::Real64($b) => DynBuffer::Real64($body),
            DynBuffer::Complex32($b) => DynBuffer::Complex32($body),
            DynBuffer::Complex64($b) => DynBuffer::Complex64($body),
        }
    };
}

fn busy(what: &str) -> LinbindError {
    LinbindError::BufferBusy(what.to_string())
}

fn transpose_vec<T: Copy>(data: &[T], nrow: usize, ncol: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(data.len());
    for row in 0..nrow {
        for col in 0..ncol {
            out.push(data[row + nrow * col]);
        }
    }
    out
}

fn promote_all<T: Promote<U>, U: Scalar>(data: &[T]) -> Vec<U> {
    data.iter().map(|&x| x.promote()).collect()
}

impl DynBuffer {
    /// Zero-filled buffer of `len` elements.
    pub fn zeros(element_type: ElementType, len: usize) -> Self {
        match element_type {
            ElementType::Int32 => DynBuffer::Int32(shared(vec![0; len])),
            ElementType::Real32 => DynBuffer::Real32(shared(vec![0.0; len])),
            ElementType::Real64 => DynBuffer::Real64(shared(vec![0.0; len])),
            ElementType::Complex32 => DynBuffer::Complex32(shared(vec![Complex32::default(); len])),
            ElementType::Complex64 => DynBuffer::Complex64(shared(vec![Complex64::default(); len])),
        }
    }

    pub fn from_ints(values: &[i32]) -> Self {
        DynBuffer::Int32(shared(values.to_vec()))
    }

    pub fn from_slice<T: Scalar>(values: &[T]) -> Self {
        T::into_dyn(shared(values.to_vec()))
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            DynBuffer::Int32(_) => ElementType::Int32,
            DynBuffer::Real32(_) => ElementType::Real32,
            DynBuffer::Real64(_) => ElementType::Real64,
            DynBuffer::Complex32(_) => ElementType::Complex32,
            DynBuffer::Complex64(_) => ElementType::Complex64,
        }
    }

    /// Number of elements; `0` if the buffer is currently pinned for writing.
    /// Use [`DynBuffer::try_len`] where a busy buffer must not look empty.
    pub fn len(&self) -> usize {
        self.try_len().unwrap_or(0)
    }

    /// Number of elements, or [`LinbindError::BufferBusy`] while the buffer
    /// is pinned for writing.
    pub fn try_len(&self) -> Result<usize> {
        each_buffer!(self, b => b.try_borrow().map(|v| v.len()).map_err(|_| busy("length")))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles refer to the same memory.
    pub fn same_buffer(&self, other: &DynBuffer) -> bool {
        match (self, other) {
            (DynBuffer::Int32(a), DynBuffer::Int32(b)) => Rc::ptr_eq(a, b),
            (DynBuffer::Real32(a), DynBuffer::Real32(b)) => Rc::ptr_eq(a, b),
            (DynBuffer::Real64(a), DynBuffer::Real64(b)) => Rc::ptr_eq(a, b),
            (DynBuffer::Complex32(a), DynBuffer::Complex32(b)) => Rc::ptr_eq(a, b),
            (DynBuffer::Complex64(a), DynBuffer::Complex64(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Independent copy of the contents.
    pub fn deep_copy(&self) -> Result<DynBuffer> {
        Ok(each_buffer_same!(self, b => shared(b.try_borrow().map_err(|_| busy("deep copy"))?.clone())))
    }

    /// Copy of an `nrow x ncol` column-major buffer, transposed.
    pub fn transposed(&self, nrow: usize, ncol: usize) -> Result<DynBuffer> {
        let len = self.try_len()?;
        if len != nrow * ncol {
            return Err(LinbindError::DimensionMismatch(format!(
                "cannot transpose a buffer of {} elements as {}x{}",
                len,
                nrow,
                ncol
            )));
        }
        Ok(each_buffer_same!(self, b => {
            let data = b.try_borrow().map_err(|_| busy("transpose"))?;
            shared(transpose_vec(&data, nrow, ncol))
        }))
    }

    /// Copy converted to `target`; only lossless promotions are allowed.
    pub fn cast(&self, target: ElementType) -> Result<DynBuffer> {
        let source = self.element_type();
        if source == target {
            return self.deep_copy();
        }
        if !source.promotes_to(target) {
            return Err(LinbindError::Configuration(format!(
                "cannot convert {} buffer to {}",
                source, target
            )));
        }
        let borrow_err = |_| busy("cast");
        let out = match (self, target) {
            (DynBuffer::Real32(b), ElementType::Real64) => {
                DynBuffer::Real64(shared(promote_all::<f32, f64>(&b.try_borrow().map_err(borrow_err)?)))
            }
            (DynBuffer::Real32(b), ElementType::Complex32) => DynBuffer::Complex32(shared(
                promote_all::<f32, Complex32>(&b.try_borrow().map_err(borrow_err)?),
            )),
            (DynBuffer::Real32(b), ElementType::Complex64) => DynBuffer::Complex64(shared(
                promote_all::<f32, Complex64>(&b.try_borrow().map_err(borrow_err)?),
            )),
            (DynBuffer::Real64(b), ElementType::Complex64) => DynBuffer::Complex64(shared(
                promote_all::<f64, Complex64>(&b.try_borrow().map_err(borrow_err)?),
            )),
            (DynBuffer::Complex32(b), ElementType::Complex64) => DynBuffer::Complex64(shared(
                promote_all::<Complex32, Complex64>(&b.try_borrow().map_err(borrow_err)?),
            )),
            _ => {
                return Err(LinbindError::Configuration(format!(
                    "cannot convert {} buffer to {}",
                    source, target
                )))
            }
        };
        Ok(out)
    }

    /// Writes the logical value of every cell into the raw buffer.
    ///
    /// Dense buffers and buffers that already hold their logical values are
    /// only borrowed for reading.
    pub fn materialize(&self, kind: MatrixKind, nrow: usize, ncol: usize) -> Result<()> {
        if kind == MatrixKind::Dense {
            return Ok(());
        }
        macro_rules! fill {
            ($b:expr) => {{
                let done = {
                    let data = $b.try_borrow().map_err(|_| busy("materialize"))?;
                    is_materialized_slice(&data, nrow, ncol, kind)
                };
                if done {
                    Ok(())
                } else {
                    materialize_slice(&mut $b.try_borrow_mut().map_err(|_| busy("materialize"))?, nrow, ncol, kind)
                }
            }};
        }
        match self {
            DynBuffer::Int32(_) => Err(LinbindError::Configuration(
                "integer buffers can only be dense".to_string(),
            )),
            DynBuffer::Real32(b) => fill!(b),
            DynBuffer::Real64(b) => fill!(b),
            DynBuffer::Complex32(b) => fill!(b),
            DynBuffer::Complex64(b) => fill!(b),
        }
    }

    /// `false` if any element is NaN or infinite.
    pub fn all_finite(&self) -> Result<bool> {
        let err = |_| busy("finiteness check");
        Ok(match self {
            DynBuffer::Int32(_) => true,
            DynBuffer::Real32(b) => b.try_borrow().map_err(err)?.iter().all(|x| x.finite()),
            DynBuffer::Real64(b) => b.try_borrow().map_err(err)?.iter().all(|x| x.finite()),
            DynBuffer::Complex32(b) => b.try_borrow().map_err(err)?.iter().all(|x| x.finite()),
            DynBuffer::Complex64(b) => b.try_borrow().map_err(err)?.iter().all(|x| x.finite()),
        })
    }

    /// Copies `source` into this buffer; both must have the same type and length.
    pub fn copy_from(&self, source: &DynBuffer) -> Result<()> {
        macro_rules! copy {
            ($dst:expr, $src:expr) => {{
                let src = $src.try_borrow().map_err(|_| busy("copy source"))?;
                let mut dst = $dst.try_borrow_mut().map_err(|_| busy("copy target"))?;
                if src.len() != dst.len() {
                    return Err(LinbindError::DimensionMismatch(format!(
                        "cannot copy {} elements into a buffer of {}",
                        src.len(),
                        dst.len()
                    )));
                }
                dst.copy_from_slice(&src);
            }};
        }
        match (self, source) {
            (DynBuffer::Int32(d), DynBuffer::Int32(s)) => copy!(d, s),
            (DynBuffer::Real32(d), DynBuffer::Real32(s)) => copy!(d, s),
            (DynBuffer::Real64(d), DynBuffer::Real64(s)) => copy!(d, s),
            (DynBuffer::Complex32(d), DynBuffer::Complex32(s)) => copy!(d, s),
            (DynBuffer::Complex64(d), DynBuffer::Complex64(s)) => copy!(d, s),
            _ => {
                return Err(LinbindError::Configuration(format!(
                    "cannot copy a {} buffer into a {} buffer",
                    source.element_type(),
                    self.element_type()
                )))
            }
        }
        Ok(())
    }

    /// Copies a dense `nrow x ncol` `source` into the leading block of this
    /// column-major buffer with leading dimension `ld`. Cells outside the
    /// block keep their values.
    pub fn copy_block_from(&self, source: &DynBuffer, nrow: usize, ncol: usize, ld: usize) -> Result<()> {
        macro_rules! copy {
            ($dst:expr, $src:expr) => {{
                let src = $src.try_borrow().map_err(|_| busy("copy source"))?;
                let mut dst = $dst.try_borrow_mut().map_err(|_| busy("copy target"))?;
                if src.len() != nrow * ncol || ld < nrow || dst.len() < ld * ncol {
                    return Err(LinbindError::DimensionMismatch(format!(
                        "cannot place {} elements as {}x{} into a buffer of {} with leading dimension {}",
                        src.len(),
                        nrow,
                        ncol,
                        dst.len(),
                        ld
                    )));
                }
                for col in 0..ncol {
                    dst[ld * col..ld * col + nrow].copy_from_slice(&src[nrow * col..nrow * (col + 1)]);
                }
            }};
        }
        match (self, source) {
            (DynBuffer::Int32(d), DynBuffer::Int32(s)) => copy!(d, s),
            (DynBuffer::Real32(d), DynBuffer::Real32(s)) => copy!(d, s),
            (DynBuffer::Real64(d), DynBuffer::Real64(s)) => copy!(d, s),
            (DynBuffer::Complex32(d), DynBuffer::Complex32(s)) => copy!(d, s),
            (DynBuffer::Complex64(d), DynBuffer::Complex64(s)) => copy!(d, s),
            _ => {
                return Err(LinbindError::Configuration(format!(
                    "cannot copy a {} buffer into a {} buffer",
                    source.element_type(),
                    self.element_type()
                )))
            }
        }
        Ok(())
    }

    /// Real part of the first element, widened to `f64`. Backends report
    /// optimal workspace sizes this way.
    pub(crate) fn leading_value(&self) -> Result<f64> {
        let err = |_| busy("read leading element");
        let value = match self {
            DynBuffer::Int32(b) => b.try_borrow().map_err(err)?.first().map(|&v| v as f64),
            DynBuffer::Real32(b) => b.try_borrow().map_err(err)?.first().map(|&v| v as f64),
            DynBuffer::Real64(b) => b.try_borrow().map_err(err)?.first().copied(),
            DynBuffer::Complex32(b) => b.try_borrow().map_err(err)?.first().map(|v| v.re as f64),
            DynBuffer::Complex64(b) => b.try_borrow().map_err(err)?.first().map(|v| v.re),
        };
        value.ok_or_else(|| LinbindError::Configuration("empty buffer has no leading element".to_string()))
    }

    /// Clone of the integer contents.
    pub fn to_ints(&self) -> Result<Vec<i32>> {
        match self {
            DynBuffer::Int32(b) => Ok(b.try_borrow().map_err(|_| busy("read"))?.clone()),
            other => Err(LinbindError::Configuration(format!(
                "expected an i32 buffer, found {}",
                other.element_type()
            ))),
        }
    }

    /// Clone of the contents as `T`.
    pub fn to_vec<T: Scalar>(&self) -> Result<Vec<T>> {
        let typed = T::from_dyn(self).ok_or_else(|| {
            LinbindError::Configuration(format!(
                "expected a {} buffer, found {}",
                T::ELEMENT_TYPE,
                self.element_type()
            ))
        })?;
        let data = typed.try_borrow().map_err(|_| busy("read"))?.clone();
        Ok(data)
    }

    /// Borrows the buffer for the extent of one backend call.
    ///
    /// Read-only pins may coexist; a writable pin is exclusive. The address
    /// stays valid until the returned guard is dropped.
    pub fn pin(&self, writable: bool) -> Result<PinnedBuffer<'_>> {
        macro_rules! pin_variant {
            ($b:expr, $shared:ident, $exclusive:ident) => {
                if writable {
                    let mut guard = $b.try_borrow_mut().map_err(|_| busy("pin for writing"))?;
                    let address = guard.as_mut_ptr() as *mut c_void;
                    let len = guard.len();
                    (Pin::$exclusive(guard), address, len)
                } else {
                    let guard = $b.try_borrow().map_err(|_| busy("pin for reading"))?;
                    let address = guard.as_ptr() as *mut c_void;
                    let len = guard.len();
                    (Pin::$shared(guard), address, len)
                }
            };
        }
        let (guard, address, len) = match self {
            DynBuffer::Int32(b) => pin_variant!(b, Int32, Int32Mut),
            DynBuffer::Real32(b) => pin_variant!(b, Real32, Real32Mut),
            DynBuffer::Real64(b) => pin_variant!(b, Real64, Real64Mut),
            DynBuffer::Complex32(b) => pin_variant!(b, Complex32, Complex32Mut),
            DynBuffer::Complex64(b) => pin_variant!(b, Complex64, Complex64Mut),
        };
        log::trace!(
            "pinned {} buffer of {} elements at {:p} (writable: {})",
            self.element_type(),
            len,
            address,
            writable
        );
        Ok(PinnedBuffer {
            _guard: guard,
            address,
            len,
            element_type: self.element_type(),
            writable,
        })
    }
}

#[allow(dead_code)]
enum Pin<'a> {
    Int32(Ref<'a, Vec<i32>>),
    Int32Mut(RefMut<'a, Vec<i32>>),
    Real32(Ref<'a, Vec<f32>>),
    Real32Mut(RefMut<'a, Vec<f32>>),
    Real64(Ref<'a, Vec<f64>>),
    Real64Mut(RefMut<'a, Vec<f64>>),
    Complex32(Ref<'a, Vec<Complex32>>),
    Complex32Mut(RefMut<'a, Vec<Complex32>>),
    Complex64(Ref<'a, Vec<Complex64>>),
    Complex64Mut(RefMut<'a, Vec<Complex64>>),
}

/// A buffer held in place for one backend call. Dropping it releases the borrow.
pub struct PinnedBuffer<'a> {
    _guard: Pin<'a>,
    address: *mut c_void,
    len: usize,
    element_type: ElementType,
    writable: bool,
}

impl PinnedBuffer<'_> {
    pub fn address(&self) -> *mut c_void {
        self.address
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn writable(&self) -> bool {
        self.writable
    }
}

impl Drop for PinnedBuffer<'_> {
    fn drop(&mut self) {
        log::trace!("released buffer at {:p}", self.address);
    }
}
