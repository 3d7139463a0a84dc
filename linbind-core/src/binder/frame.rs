//! Per-call state: the argument slots a backend sees and the outputs the
//! caller collects afterwards.

use num_complex::{Complex32, Complex64};
use std::ffi::c_void;
use std::ptr;

use crate::buffer::{DynBuffer, PinnedBuffer};
use crate::error::{LinbindError, Result};
use crate::kind::{ElementType, MatrixKind};
use crate::store::MatrixStore;
use crate::traits::{Element, Scalar};

/// A boxed scalar passed by address.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Atom {
    Int(i32),
    Char(u8),
    Real32(f32),
    Real64(f64),
    Complex32(Complex32),
    Complex64(Complex64),
}

impl Atom {
    /// Builds an atom of type `ty` from a real and an imaginary part. Fails if
    /// the value does not fit the type exactly.
    pub fn from_parts(ty: ElementType, re: f64, im: f64) -> Result<Atom> {
        let lossy = || {
            LinbindError::Configuration(format!(
                "scalar {}{:+}i cannot be represented as {}",
                re, im, ty
            ))
        };
        match ty {
            ElementType::Int32 => {
                if im != 0.0 || re.fract() != 0.0 || re < i32::MIN as f64 || re > i32::MAX as f64 {
                    return Err(lossy());
                }
                Ok(Atom::Int(re as i32))
            }
            ElementType::Real32 if im == 0.0 => Ok(Atom::Real32(re as f32)),
            ElementType::Real64 if im == 0.0 => Ok(Atom::Real64(re)),
            ElementType::Real32 | ElementType::Real64 => Err(lossy()),
            ElementType::Complex32 => Ok(Atom::Complex32(Complex32::new(re as f32, im as f32))),
            ElementType::Complex64 => Ok(Atom::Complex64(Complex64::new(re, im))),
        }
    }

    /// `None` for characters.
    pub fn element_type(&self) -> Option<ElementType> {
        match self {
            Atom::Int(_) => Some(ElementType::Int32),
            Atom::Char(_) => None,
            Atom::Real32(_) => Some(ElementType::Real32),
            Atom::Real64(_) => Some(ElementType::Real64),
            Atom::Complex32(_) => Some(ElementType::Complex32),
            Atom::Complex64(_) => Some(ElementType::Complex64),
        }
    }

    fn address(&mut self) -> *mut c_void {
        match self {
            Atom::Int(v) => v as *mut i32 as *mut c_void,
            Atom::Char(v) => v as *mut u8 as *mut c_void,
            Atom::Real32(v) => v as *mut f32 as *mut c_void,
            Atom::Real64(v) => v as *mut f64 as *mut c_void,
            Atom::Complex32(v) => v as *mut Complex32 as *mut c_void,
            Atom::Complex64(v) => v as *mut Complex64 as *mut c_void,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RawArray {
    address: *mut c_void,
    len: usize,
    element_type: ElementType,
    writable: bool,
}

impl From<&PinnedBuffer<'_>> for RawArray {
    fn from(pinned: &PinnedBuffer<'_>) -> Self {
        RawArray {
            address: pinned.address(),
            len: pinned.len(),
            element_type: pinned.element_type(),
            writable: pinned.writable(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Bound {
    Unbound,
    Null,
    Atom(Box<Atom>),
    Array(RawArray),
}

/// The positional argument list of one backend invocation.
///
/// Positions are 0-based here. Array slots are only readable while the
/// binder holds the underlying buffer pinned, which covers the whole
/// [`Backend::invoke`](crate::Backend::invoke) call.
#[derive(Debug)]
pub struct CallArgs {
    slots: Vec<Bound>,
}

impl CallArgs {
    pub(crate) fn new() -> Self {
        CallArgs { slots: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, pos: usize) -> Result<&Bound> {
        self.slots.get(pos).ok_or_else(|| {
            LinbindError::Configuration(format!("call has no argument at position {}", pos))
        })
    }

    fn slot_mut(&mut self, pos: usize) -> Result<&mut Bound> {
        self.slots.get_mut(pos).ok_or_else(|| {
            LinbindError::Configuration(format!("call has no argument at position {}", pos))
        })
    }

    pub(crate) fn declare(&mut self) {
        self.slots.push(Bound::Unbound);
    }

    pub(crate) fn bind(&mut self, pos: usize, bound: Bound) -> Result<()> {
        *self.slot_mut(pos)? = bound;
        Ok(())
    }

    /// Drops the raw view of an array slot once its pin is about to end.
    pub(crate) fn release(&mut self, pos: usize) {
        if let Some(slot) = self.slots.get_mut(pos) {
            if matches!(slot, Bound::Array(_)) {
                *slot = Bound::Unbound;
            }
        }
    }

    pub fn is_null(&self, pos: usize) -> bool {
        matches!(self.slots.get(pos), Some(Bound::Null))
    }

    pub fn atom(&self, pos: usize) -> Result<Atom> {
        match self.slot(pos)? {
            Bound::Atom(atom) => Ok(**atom),
            other => Err(LinbindError::Configuration(format!(
                "argument {} is not a scalar ({:?})",
                pos, other
            ))),
        }
    }

    pub fn int(&self, pos: usize) -> Result<i32> {
        match self.atom(pos)? {
            Atom::Int(v) => Ok(v),
            other => Err(LinbindError::Configuration(format!(
                "argument {} is not an integer ({:?})",
                pos, other
            ))),
        }
    }

    /// Overwrites an integer scalar; backends report status this way.
    pub fn set_int(&mut self, pos: usize, value: i32) -> Result<()> {
        match self.slot_mut(pos)? {
            Bound::Atom(atom) if matches!(**atom, Atom::Int(_)) => {
                **atom = Atom::Int(value);
                Ok(())
            }
            _ => Err(LinbindError::Configuration(format!(
                "argument {} is not an integer",
                pos
            ))),
        }
    }

    pub fn character(&self, pos: usize) -> Result<char> {
        match self.atom(pos)? {
            Atom::Char(c) => Ok(c as char),
            other => Err(LinbindError::Configuration(format!(
                "argument {} is not a character ({:?})",
                pos, other
            ))),
        }
    }

    pub fn scalar<T: Scalar>(&self, pos: usize) -> Result<T> {
        let atom = self.atom(pos)?;
        T::from_atom(atom).ok_or_else(|| {
            LinbindError::Configuration(format!(
                "argument {} is not a {} scalar ({:?})",
                pos,
                T::ELEMENT_TYPE,
                atom
            ))
        })
    }

    pub fn set_scalar<T: Scalar>(&mut self, pos: usize, value: T) -> Result<()> {
        match self.slot_mut(pos)? {
            Bound::Atom(atom) if T::from_atom(**atom).is_some() => {
                **atom = value.into_atom();
                Ok(())
            }
            _ => Err(LinbindError::Configuration(format!(
                "argument {} is not a {} scalar",
                pos,
                T::ELEMENT_TYPE
            ))),
        }
    }

    fn array<T: Element>(&self, pos: usize) -> Result<RawArray> {
        match self.slot(pos)? {
            Bound::Array(raw) if raw.element_type == T::ELEMENT_TYPE => Ok(*raw),
            Bound::Array(raw) => Err(LinbindError::Configuration(format!(
                "argument {} holds {} elements, not {}",
                pos,
                raw.element_type,
                T::ELEMENT_TYPE
            ))),
            _ => Err(LinbindError::Configuration(format!(
                "argument {} is not an array",
                pos
            ))),
        }
    }

    pub fn array_len(&self, pos: usize) -> Result<usize> {
        match self.slot(pos)? {
            Bound::Array(raw) => Ok(raw.len),
            _ => Err(LinbindError::Configuration(format!(
                "argument {} is not an array",
                pos
            ))),
        }
    }

    pub fn slice<T: Element>(&self, pos: usize) -> Result<&[T]> {
        let raw = self.array::<T>(pos)?;
        // SAFETY: an array slot is bound only while its buffer is pinned, the
        // pin outlives `self`'s use by the backend, and the element type was
        // checked above. Writable pins are exclusive, so no `&mut` alias exists
        // except through `slice_mut`, which needs `&mut self`.
        Ok(unsafe { std::slice::from_raw_parts(raw.address as *const T, raw.len) })
    }

    pub fn slice_mut<T: Element>(&mut self, pos: usize) -> Result<&mut [T]> {
        let raw = self.array::<T>(pos)?;
        if !raw.writable {
            return Err(LinbindError::Configuration(format!(
                "argument {} is read-only",
                pos
            )));
        }
        // SAFETY: as in `slice`; the pin was taken writable, so this is the
        // only live reference to the buffer.
        Ok(unsafe { std::slice::from_raw_parts_mut(raw.address as *mut T, raw.len) })
    }

    /// Addresses of every argument in order, as a native routine expects them.
    /// `Null` arguments are passed as null pointers.
    pub fn raw_pointers(&mut self) -> Result<Vec<*mut c_void>> {
        self.slots
            .iter_mut()
            .enumerate()
            .map(|(pos, slot)| match slot {
                Bound::Null => Ok(ptr::null_mut()),
                Bound::Atom(atom) => Ok(atom.address()),
                Bound::Array(raw) => Ok(raw.address),
                Bound::Unbound => Err(LinbindError::Configuration(format!(
                    "argument {} is not bound",
                    pos
                ))),
            })
            .collect()
    }
}

/// A buffer written by the backend together with its logical shape.
#[derive(Debug, Clone)]
pub(crate) struct OutputValue {
    pub(crate) buffer: DynBuffer,
    pub(crate) nrow: usize,
    pub(crate) ncol: usize,
}

/// Mutable state threaded through the marshaling passes of one call.
pub(crate) struct Frame {
    pub(crate) args: CallArgs,
    shapes: Vec<Option<(usize, usize)>>,
    outputs: Vec<Option<OutputValue>>,
    kept: Vec<bool>,
    work_size: Option<i32>,
}

impl Frame {
    pub(crate) fn new() -> Self {
        Frame {
            args: CallArgs::new(),
            shapes: Vec::new(),
            outputs: Vec::new(),
            kept: Vec::new(),
            work_size: None,
        }
    }

    pub(crate) fn declare(&mut self, pos: usize) {
        debug_assert_eq!(self.args.len(), pos);
        self.args.declare();
        self.shapes.push(None);
        self.outputs.push(None);
        self.kept.push(false);
    }

    pub(crate) fn shapes(&self) -> &[Option<(usize, usize)>] {
        &self.shapes
    }

    pub(crate) fn set_shape(&mut self, pos: usize, shape: (usize, usize)) {
        if let Some(slot) = self.shapes.get_mut(pos) {
            *slot = Some(shape);
        }
    }

    pub(crate) fn put_output(&mut self, pos: usize, output: OutputValue) {
        if let Some(slot) = self.outputs.get_mut(pos) {
            *slot = Some(output);
        }
    }

    /// Marks a scalar slot as readable from the outcome.
    pub(crate) fn keep(&mut self, pos: usize) {
        if let Some(flag) = self.kept.get_mut(pos) {
            *flag = true;
        }
    }

    pub(crate) fn record_work_size(&mut self, size: i32) {
        self.work_size = Some(size);
    }

    pub(crate) fn into_outcome(self, symbol: String) -> CallOutcome {
        let atoms = self
            .args
            .slots
            .iter()
            .zip(&self.kept)
            .map(|(slot, &kept)| match slot {
                Bound::Atom(atom) if kept => Some(**atom),
                _ => None,
            })
            .collect();
        CallOutcome {
            symbol,
            atoms,
            outputs: self.outputs,
            work_size: self.work_size,
        }
    }
}

/// What a completed call produced: output arrays, output scalars and the
/// status. Positions are the 0-based argument positions of the call.
#[derive(Debug)]
pub struct CallOutcome {
    symbol: String,
    atoms: Vec<Option<Atom>>,
    outputs: Vec<Option<OutputValue>>,
    work_size: Option<i32>,
}

impl CallOutcome {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Workspace length used by the real call, if the call queried one.
    pub fn work_size(&self) -> Option<i32> {
        self.work_size
    }

    fn take(&mut self, pos: usize) -> Result<OutputValue> {
        self.outputs
            .get_mut(pos)
            .and_then(Option::take)
            .ok_or_else(|| {
                LinbindError::Configuration(format!(
                    "argument {} of {} produced no output",
                    pos, self.symbol
                ))
            })
    }

    pub fn shape(&self, pos: usize) -> Option<(usize, usize)> {
        self.outputs
            .get(pos)
            .and_then(Option::as_ref)
            .map(|o| (o.nrow, o.ncol))
    }

    /// Wraps an output array as a matrix of `kind`. Non-dense results are
    /// materialized, since the backend leaves unspecified values in the
    /// masked triangle.
    pub fn take_matrix<T: Scalar>(&mut self, pos: usize, kind: MatrixKind) -> Result<MatrixStore<T>> {
        let output = self.take(pos)?;
        let typed = T::from_dyn(&output.buffer).ok_or_else(|| {
            LinbindError::Configuration(format!(
                "argument {} holds {} elements, not {}",
                pos,
                output.buffer.element_type(),
                T::ELEMENT_TYPE
            ))
        })?;
        let matrix = MatrixStore::from_shared(output.nrow, output.ncol, typed, kind)?;
        matrix.materialize()?;
        Ok(matrix)
    }

    pub fn take_vec<T: Scalar>(&mut self, pos: usize) -> Result<Vec<T>> {
        self.take(pos)?.buffer.to_vec::<T>()
    }

    pub fn take_ints(&mut self, pos: usize) -> Result<Vec<i32>> {
        self.take(pos)?.buffer.to_ints()
    }

    fn atom(&self, pos: usize) -> Result<Atom> {
        self.atoms.get(pos).copied().flatten().ok_or_else(|| {
            LinbindError::Configuration(format!(
                "argument {} of {} is not an output scalar",
                pos, self.symbol
            ))
        })
    }

    pub fn int(&self, pos: usize) -> Result<i32> {
        match self.atom(pos)? {
            Atom::Int(v) => Ok(v),
            other => Err(LinbindError::Configuration(format!(
                "argument {} is not an integer ({:?})",
                pos, other
            ))),
        }
    }

    pub fn scalar<T: Scalar>(&self, pos: usize) -> Result<T> {
        let atom = self.atom(pos)?;
        T::from_atom(atom).ok_or_else(|| {
            LinbindError::Configuration(format!(
                "argument {} is not a {} scalar ({:?})",
                pos,
                T::ELEMENT_TYPE,
                atom
            ))
        })
    }
}
