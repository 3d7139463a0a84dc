//! Declarative argument lists for backend routines.
//!
//! A [`CallSpec`] lists one [`Argument`] per routine parameter, in the
//! routine's positional order. Invoking it expands the list into four nested
//! passes, each built by right-folding `wrap(descriptor, inner)` over the
//! arguments:
//!
//! 1. bindings: declare every argument slot,
//! 2. main: prepare and pin arrays, box scalars, allocate outputs,
//! 3. query: dry run that sizes the workspace (only with a workspace query),
//! 4. call: the real invocation, followed by status decoding.
//!
//! Pins taken by the main pass are released on the way out of the nest, on
//! success and on error alike.

mod frame;
pub mod status;
mod workspace;

pub use frame::{Atom, CallArgs, CallOutcome};
pub use status::FailureKind;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

use crate::backend::Backend;
use crate::buffer::DynBuffer;
use crate::error::{LinbindError, Result};
use crate::fpenv::TrapMask;
use crate::kind::{ElementType, MatrixKind};
use crate::store::MatrixStore;
use crate::traits::Scalar;
use frame::{Bound, Frame, OutputValue};
use workspace::WorkspacePair;

pub(crate) type Action<'a> = Box<dyn FnOnce(&mut Frame) -> Result<()> + 'a>;

/// Logical routine name, resolved against an element type at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routine {
    real: &'static str,
    complex: &'static str,
}

impl Routine {
    pub const fn new(name: &'static str) -> Self {
        Routine {
            real: name,
            complex: name,
        }
    }

    /// A routine whose complex variant has a different name (`sytrf`/`hetrf`).
    pub const fn split(real: &'static str, complex: &'static str) -> Self {
        Routine { real, complex }
    }

    pub fn name_for(&self, element_type: ElementType) -> &'static str {
        if element_type.is_complex() {
            self.complex
        } else {
            self.real
        }
    }

    /// Linker symbol, e.g. `dgetrf_` for `getrf` on `f64`.
    pub fn symbol(&self, element_type: ElementType) -> Result<String> {
        let letter = element_type.precision_letter()?.to_ascii_lowercase();
        Ok(format!("{}{}_", letter, self.name_for(element_type)))
    }
}

/// Value of a boxed scalar argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Int(i32),
    Real(f64),
    Complex(Complex64),
    Zero,
    One,
}

/// A scalar passed by address.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarArg {
    pub value: ScalarValue,
    /// Defaults to `Int32` for integers and to the call's element type otherwise.
    pub ty: Option<ElementType>,
    /// The backend writes the scalar; its final value is kept in the outcome.
    pub output: bool,
}

impl ScalarArg {
    pub fn new(value: ScalarValue) -> Self {
        ScalarArg {
            value,
            ty: None,
            output: false,
        }
    }

    pub fn int(value: i32) -> Self {
        Self::new(ScalarValue::Int(value))
    }

    pub fn real(value: f64) -> Self {
        Self::new(ScalarValue::Real(value))
    }

    pub fn complex(value: Complex64) -> Self {
        Self::new(ScalarValue::Complex(value))
    }

    pub fn zero() -> Self {
        Self::new(ScalarValue::Zero)
    }

    pub fn one() -> Self {
        Self::new(ScalarValue::One)
    }

    pub fn of_type(mut self, ty: ElementType) -> Self {
        self.ty = Some(ty);
        self
    }

    pub fn output(mut self) -> Self {
        self.output = true;
        self
    }

    fn resolve(&self, call_type: ElementType) -> Result<Atom> {
        let ty = self.ty.unwrap_or(match self.value {
            ScalarValue::Int(_) => ElementType::Int32,
            _ => call_type,
        });
        let (re, im) = match self.value {
            ScalarValue::Int(v) if ty == ElementType::Int32 => return Ok(Atom::Int(v)),
            ScalarValue::Int(v) => (v as f64, 0.0),
            ScalarValue::Real(x) => (x, 0.0),
            ScalarValue::Complex(z) => (z.re, z.im),
            ScalarValue::Zero => (0.0, 0.0),
            ScalarValue::One => (1.0, 0.0),
        };
        Atom::from_parts(ty, re, im)
    }
}

/// A flat buffer with the logical shape and kind it is read with.
#[derive(Debug, Clone)]
pub struct ArrayView {
    buffer: DynBuffer,
    nrow: usize,
    ncol: usize,
    kind: MatrixKind,
}

impl ArrayView {
    pub fn from_buffer(buffer: DynBuffer, nrow: usize, ncol: usize, kind: MatrixKind) -> Result<Self> {
        let len = buffer.try_len()?;
        if len != nrow * ncol {
            return Err(LinbindError::DimensionMismatch(format!(
                "buffer of {} elements viewed as {}x{}",
                len,
                nrow,
                ncol
            )));
        }
        Ok(ArrayView {
            buffer,
            nrow,
            ncol,
            kind,
        })
    }

    /// A view sharing the matrix's buffer.
    pub fn matrix<T: Scalar>(matrix: &MatrixStore<T>) -> Self {
        ArrayView {
            buffer: matrix.dyn_buffer(),
            nrow: matrix.nrow(),
            ncol: matrix.ncol(),
            kind: matrix.kind(),
        }
    }

    /// A column vector holding a copy of `values`.
    pub fn vector<T: Scalar>(values: &[T]) -> Self {
        ArrayView {
            buffer: DynBuffer::from_slice(values),
            nrow: values.len(),
            ncol: 1,
            kind: MatrixKind::Dense,
        }
    }

    pub fn ints(values: &[i32]) -> Self {
        ArrayView {
            buffer: DynBuffer::from_ints(values),
            nrow: values.len(),
            ncol: 1,
            kind: MatrixKind::Dense,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrow, self.ncol)
    }

    pub fn element_type(&self) -> ElementType {
        self.buffer.element_type()
    }
}

impl<T: Scalar> MatrixStore<T> {
    pub fn as_view(&self) -> ArrayView {
        ArrayView::matrix(self)
    }
}

/// An array read by the backend.
#[derive(Debug, Clone)]
pub struct InputArg {
    pub view: ArrayView,
    /// Element type the backend sees; defaults to the call's type, or `Int32`
    /// for integer views. A differing type forces a converted copy.
    pub ty: Option<ElementType>,
    /// Hand the backend the transpose (a copy).
    pub transpose: bool,
    /// Copy before lending. Defaults to `false`; see [`InputOutputArg`] for
    /// arrays the backend overwrites.
    pub force_copy: Option<bool>,
}

impl InputArg {
    pub fn new(view: ArrayView) -> Self {
        InputArg {
            view,
            ty: None,
            transpose: false,
            force_copy: None,
        }
    }

    pub fn of_type(mut self, ty: ElementType) -> Self {
        self.ty = Some(ty);
        self
    }

    pub fn transposed(mut self) -> Self {
        self.transpose = true;
        self
    }

    pub fn force_copy(mut self, copy: bool) -> Self {
        self.force_copy = Some(copy);
        self
    }

    fn lent_shape(&self) -> (usize, usize) {
        if self.transpose {
            (self.view.ncol, self.view.nrow)
        } else {
            (self.view.nrow, self.view.ncol)
        }
    }
}

/// Where an overwritten array's results land when not in its own buffer.
#[derive(Debug, Clone)]
pub enum Destination {
    /// A caller's buffer at least as large as the input, e.g. a right-hand
    /// side with room for the solution.
    Buffer(ArrayView),
    /// A zero-filled buffer sized like a pure output.
    Allocate(Allocation),
}

/// An array the backend reads and overwrites.
///
/// Without a destination, or with one sharing the input's buffer, the
/// backend works on the caller's buffer unless `force_copy(true)` asks for a
/// private copy. With a distinct destination the input is copied into its
/// leading block and the destination is lent instead; the input is not
/// touched.
#[derive(Debug, Clone)]
pub struct InputOutputArg {
    pub input: InputArg,
    pub destination: Option<Destination>,
}

impl InputOutputArg {
    pub fn new(view: ArrayView) -> Self {
        InputOutputArg {
            input: InputArg::new(view),
            destination: None,
        }
    }

    pub fn of_type(mut self, ty: ElementType) -> Self {
        self.input = self.input.of_type(ty);
        self
    }

    pub fn transposed(mut self) -> Self {
        self.input = self.input.transposed();
        self
    }

    pub fn force_copy(mut self, copy: bool) -> Self {
        self.input = self.input.force_copy(copy);
        self
    }

    pub fn into_buffer(mut self, view: ArrayView) -> Self {
        self.destination = Some(Destination::Buffer(view));
        self
    }

    pub fn into_allocation(mut self, allocation: Allocation) -> Self {
        self.destination = Some(Destination::Allocate(allocation));
        self
    }

    /// Whether the results land in the input's own buffer.
    pub fn in_place(&self) -> bool {
        match &self.destination {
            None => true,
            Some(Destination::Buffer(view)) => view.buffer.same_buffer(&self.input.view.buffer),
            Some(Destination::Allocate(_)) => false,
        }
    }
}

type ShapeFn = dyn Fn(&[Option<(usize, usize)>]) -> Result<(usize, usize)>;

/// Size of a pure output array.
#[derive(Clone)]
pub enum Allocation {
    Shape(usize, usize),
    /// Column vector.
    Len(usize),
    /// Same shape as the (earlier) argument at this position.
    SameAs(usize),
    /// Computed from the shapes of the earlier arguments.
    Derived(Rc<ShapeFn>),
}

impl Allocation {
    pub fn derived(
        f: impl Fn(&[Option<(usize, usize)>]) -> Result<(usize, usize)> + 'static,
    ) -> Self {
        Allocation::Derived(Rc::new(f))
    }

    fn resolve(&self, shapes: &[Option<(usize, usize)>]) -> Result<(usize, usize)> {
        match self {
            Allocation::Shape(nrow, ncol) => Ok((*nrow, *ncol)),
            Allocation::Len(len) => Ok((*len, 1)),
            Allocation::SameAs(pos) => shapes.get(*pos).copied().flatten().ok_or_else(|| {
                LinbindError::Configuration(format!("argument {} has no shape to allocate from", pos))
            }),
            Allocation::Derived(f) => f(shapes),
        }
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Allocation::Shape(nrow, ncol) => write!(f, "Shape({}, {})", nrow, ncol),
            Allocation::Len(len) => write!(f, "Len({})", len),
            Allocation::SameAs(pos) => write!(f, "SameAs({})", pos),
            Allocation::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// An array allocated by the binder and filled by the backend.
#[derive(Debug, Clone)]
pub struct OutputArg {
    pub allocation: Allocation,
    pub ty: Option<ElementType>,
    /// The backend writes the transpose; the outcome holds it transposed back.
    pub transpose: bool,
}

impl OutputArg {
    pub fn new(allocation: Allocation) -> Self {
        OutputArg {
            allocation,
            ty: None,
            transpose: false,
        }
    }

    pub fn of_type(mut self, ty: ElementType) -> Self {
        self.ty = Some(ty);
        self
    }

    pub fn transposed(mut self) -> Self {
        self.transpose = true;
        self
    }
}

/// One routine parameter.
#[derive(Debug, Clone)]
pub enum Argument {
    /// Null pointer (an optional array the routine will not touch).
    Null,
    /// Single ASCII character option such as `'U'` or `'N'`.
    Character(u8),
    Scalar(ScalarArg),
    Input(InputArg),
    Output(OutputArg),
    InputOutput(InputOutputArg),
    /// Zero-filled scratch of a fixed length.
    WorkArea { size: usize, ty: Option<ElementType> },
    /// Integer status written by the routine. At most one per call.
    Status(FailureKind),
    /// Occupies two positions: the work array and its length.
    WorkspaceQuery { ty: Option<ElementType> },
}

impl Argument {
    pub fn character(c: char) -> Self {
        Argument::Character(c as u8)
    }

    pub fn int(value: i32) -> Self {
        Argument::Scalar(ScalarArg::int(value))
    }

    pub fn input(view: ArrayView) -> Self {
        Argument::Input(InputArg::new(view))
    }

    pub fn input_output(view: ArrayView) -> Self {
        Argument::InputOutput(InputOutputArg::new(view))
    }

    pub fn output(allocation: Allocation) -> Self {
        Argument::Output(OutputArg::new(allocation))
    }

    /// Output of `i32` values, e.g. pivot indices.
    pub fn int_output(allocation: Allocation) -> Self {
        Argument::Output(OutputArg::new(allocation).of_type(ElementType::Int32))
    }

    pub fn work_area(size: usize) -> Self {
        Argument::WorkArea { size, ty: None }
    }

    pub fn status(kind: FailureKind) -> Self {
        Argument::Status(kind)
    }

    pub fn workspace_query() -> Self {
        Argument::WorkspaceQuery { ty: None }
    }
}

impl From<ScalarArg> for Argument {
    fn from(arg: ScalarArg) -> Self {
        Argument::Scalar(arg)
    }
}

impl From<InputArg> for Argument {
    fn from(arg: InputArg) -> Self {
        Argument::Input(arg)
    }
}

impl From<InputOutputArg> for Argument {
    fn from(arg: InputOutputArg) -> Self {
        Argument::InputOutput(arg)
    }
}

impl From<OutputArg> for Argument {
    fn from(arg: OutputArg) -> Self {
        Argument::Output(arg)
    }
}

/// Runtime options of the binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinderOptions {
    /// Reject NaN or infinite values in input arrays before calling.
    pub check_finite_inputs: bool,
    /// Run every backend invocation inside a [`TrapMask`].
    pub mask_traps: bool,
    /// Lower bound for queried workspace sizes.
    pub min_workspace: i32,
}

impl Default for BinderOptions {
    fn default() -> Self {
        BinderOptions {
            check_finite_inputs: false,
            mask_traps: false,
            min_workspace: 1,
        }
    }
}

/// Argument descriptors after expansion: one per backend position.
#[derive(Debug)]
enum Descriptor {
    Null,
    Character(u8),
    Scalar(ScalarArg),
    Input(InputArg),
    InputOutput(InputOutputArg),
    Output(OutputArg),
    WorkArea { size: usize, ty: Option<ElementType> },
    Status(FailureKind),
    Work(WorkspacePair),
    WorkSize(WorkspacePair),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Bindings,
    Main,
    Query,
    Call,
}

#[derive(Clone, Copy)]
struct Expansion<'a> {
    symbol: &'a str,
    element_type: ElementType,
    options: &'a BinderOptions,
    backend: &'a dyn Backend,
}

/// A fully described call to one backend routine.
#[derive(Debug)]
pub struct CallSpec {
    routine: Routine,
    element_type: ElementType,
    descriptors: Vec<Descriptor>,
    options: BinderOptions,
}

impl CallSpec {
    /// Validates and expands `args`. Fails with a configuration error for a
    /// second status argument, a second workspace query, an output sized from
    /// a later argument, or an integer call type.
    pub fn new(routine: Routine, element_type: ElementType, args: Vec<Argument>) -> Result<Self> {
        element_type.precision_letter()?;
        let mut descriptors = Vec::with_capacity(args.len() + 1);
        let mut has_status = false;
        let mut has_query = false;
        for arg in args {
            let pos = descriptors.len();
            match arg {
                Argument::Null => descriptors.push(Descriptor::Null),
                Argument::Character(c) => descriptors.push(Descriptor::Character(c)),
                Argument::Scalar(s) => descriptors.push(Descriptor::Scalar(s)),
                Argument::Input(i) => descriptors.push(Descriptor::Input(i)),
                Argument::InputOutput(i) => {
                    if let Some(Destination::Allocate(allocation)) = &i.destination {
                        check_allocation(pos, allocation)?;
                    }
                    descriptors.push(Descriptor::InputOutput(i))
                }
                Argument::Output(o) => {
                    check_allocation(pos, &o.allocation)?;
                    descriptors.push(Descriptor::Output(o))
                }
                Argument::WorkArea { size, ty } => descriptors.push(Descriptor::WorkArea { size, ty }),
                Argument::Status(kind) => {
                    if has_status {
                        return Err(LinbindError::Configuration(
                            "a call takes at most one status argument".to_string(),
                        ));
                    }
                    has_status = true;
                    descriptors.push(Descriptor::Status(kind));
                }
                Argument::WorkspaceQuery { ty } => {
                    if has_query {
                        return Err(LinbindError::Configuration(
                            "a call takes at most one workspace query".to_string(),
                        ));
                    }
                    has_query = true;
                    let pair = WorkspacePair::new(ty);
                    descriptors.push(Descriptor::Work(pair.clone()));
                    descriptors.push(Descriptor::WorkSize(pair));
                }
            }
        }
        Ok(CallSpec {
            routine,
            element_type,
            descriptors,
            options: BinderOptions::default(),
        })
    }

    pub fn with_options(mut self, options: BinderOptions) -> Self {
        self.options = options;
        self
    }

    /// Number of positional arguments the backend receives.
    pub fn arity(&self) -> usize {
        self.descriptors.len()
    }

    pub fn symbol(&self) -> Result<String> {
        self.routine.symbol(self.element_type)
    }

    fn has_workspace_query(&self) -> bool {
        self.descriptors
            .iter()
            .any(|d| matches!(d, Descriptor::Work(_)))
    }

    /// Runs the call against `backend`. A call with a workspace query invokes
    /// the backend twice, otherwise once.
    pub fn invoke(self, backend: &dyn Backend) -> Result<CallOutcome> {
        let symbol = self.symbol()?;
        log::debug!(
            "expanding {} with {} arguments on {}",
            symbol,
            self.descriptors.len(),
            backend.name()
        );
        let cx = Expansion {
            symbol: &symbol,
            element_type: self.element_type,
            options: &self.options,
            backend,
        };
        let descriptors = &self.descriptors;

        let call = fold(descriptors, Pass::Call, cx, invocation(cx, "call"));
        let body: Action<'_> = if self.has_workspace_query() {
            let query = fold(descriptors, Pass::Query, cx, invocation(cx, "query"));
            Box::new(move |frame: &mut Frame| {
                query(frame)?;
                call(frame)
            })
        } else {
            call
        };
        let main = fold(descriptors, Pass::Main, cx, body);
        let action = fold(descriptors, Pass::Bindings, cx, main);

        let mut frame = Frame::new();
        action(&mut frame)?;
        Ok(frame.into_outcome(symbol.clone()))
    }
}

fn check_allocation(pos: usize, allocation: &Allocation) -> Result<()> {
    match allocation {
        Allocation::SameAs(other) if *other >= pos => Err(LinbindError::Configuration(format!(
            "output {} is sized from argument {}, which is not bound before it",
            pos, other
        ))),
        _ => Ok(()),
    }
}

fn fold<'a>(
    descriptors: &'a [Descriptor],
    pass: Pass,
    cx: Expansion<'a>,
    base: Action<'a>,
) -> Action<'a> {
    descriptors
        .iter()
        .enumerate()
        .rev()
        .fold(base, |inner, (pos, descriptor)| wrap(pos, descriptor, pass, cx, inner))
}

fn invocation<'a>(cx: Expansion<'a>, phase: &'static str) -> Action<'a> {
    Box::new(move |frame: &mut Frame| {
        log::debug!("invoking {} ({})", cx.symbol, phase);
        let _mask = cx.options.mask_traps.then(TrapMask::all);
        cx.backend.invoke(cx.symbol, &mut frame.args)
    })
}

/// Lends `buffer` to the slot at `pos` for the duration of `inner`.
pub(crate) fn lend(
    frame: &mut Frame,
    pos: usize,
    buffer: &DynBuffer,
    writable: bool,
    inner: Action<'_>,
) -> Result<()> {
    let pinned = buffer.pin(writable)?;
    frame.args.bind(pos, Bound::Array((&pinned).into()))?;
    let result = inner(frame);
    frame.args.release(pos);
    drop(pinned);
    result
}

fn wrap<'a>(
    pos: usize,
    descriptor: &'a Descriptor,
    pass: Pass,
    cx: Expansion<'a>,
    inner: Action<'a>,
) -> Action<'a> {
    match pass {
        Pass::Bindings => Box::new(move |frame: &mut Frame| {
            frame.declare(pos);
            inner(frame)
        }),
        Pass::Main => wrap_main(pos, descriptor, cx, inner),
        Pass::Query => match descriptor {
            Descriptor::Work(pair) => workspace::wrap_query(
                pos,
                pair,
                pair.ty.unwrap_or(cx.element_type),
                cx.options.min_workspace,
                inner,
            ),
            Descriptor::WorkSize(pair) => workspace::wrap_size(pos, pair, inner),
            Descriptor::Status(kind) => wrap_status(pos, *kind, cx.symbol, inner),
            _ => inner,
        },
        Pass::Call => match descriptor {
            Descriptor::Work(pair) => {
                workspace::wrap_work(pos, pair, pair.ty.unwrap_or(cx.element_type), inner)
            }
            Descriptor::WorkSize(pair) => workspace::wrap_size(pos, pair, inner),
            Descriptor::Status(kind) => wrap_status(pos, *kind, cx.symbol, inner),
            _ => inner,
        },
    }
}

fn wrap_status<'a>(pos: usize, kind: FailureKind, symbol: &'a str, inner: Action<'a>) -> Action<'a> {
    Box::new(move |frame: &mut Frame| {
        frame.args.set_int(pos, 0)?;
        inner(frame)?;
        status::decode(symbol, frame.args.int(pos)?, kind)
    })
}

fn wrap_main<'a>(
    pos: usize,
    descriptor: &'a Descriptor,
    cx: Expansion<'a>,
    inner: Action<'a>,
) -> Action<'a> {
    match descriptor {
        Descriptor::Null => Box::new(move |frame: &mut Frame| {
            frame.args.bind(pos, Bound::Null)?;
            inner(frame)
        }),
        Descriptor::Character(c) => Box::new(move |frame: &mut Frame| {
            frame.args.bind(pos, Bound::Atom(Box::new(Atom::Char(*c))))?;
            inner(frame)
        }),
        Descriptor::Scalar(arg) => Box::new(move |frame: &mut Frame| {
            let atom = arg.resolve(cx.element_type)?;
            frame.args.bind(pos, Bound::Atom(Box::new(atom)))?;
            if arg.output {
                frame.keep(pos);
            }
            inner(frame)
        }),
        Descriptor::Status(_) => Box::new(move |frame: &mut Frame| {
            frame.args.bind(pos, Bound::Atom(Box::new(Atom::Int(0))))?;
            frame.keep(pos);
            inner(frame)
        }),
        Descriptor::Input(arg) => Box::new(move |frame: &mut Frame| {
            let buffer = prepare_input(pos, arg, cx)?;
            frame.set_shape(pos, arg.lent_shape());
            lend(frame, pos, &buffer, false, inner)
        }),
        Descriptor::InputOutput(arg) => Box::new(move |frame: &mut Frame| {
            let prepared = prepare_input(pos, &arg.input, cx)?;
            let input_shape = arg.input.lent_shape();
            let (buffer, shape) = match &arg.destination {
                Some(Destination::Buffer(view)) if !arg.in_place() => {
                    let target = view.buffer.clone();
                    place(pos, &prepared, input_shape, &target, view.shape())?;
                    (target, view.shape())
                }
                Some(Destination::Allocate(allocation)) => {
                    let shape = allocation.resolve(frame.shapes())?;
                    let target = DynBuffer::zeros(prepared.element_type(), shape.0 * shape.1);
                    place(pos, &prepared, input_shape, &target, shape)?;
                    (target, shape)
                }
                _ => (prepared, input_shape),
            };
            frame.set_shape(pos, shape);
            lend(frame, pos, &buffer, true, inner)?;
            let output = collect(buffer, shape, arg.input.transpose)?;
            frame.put_output(pos, output);
            Ok(())
        }),
        Descriptor::Output(arg) => Box::new(move |frame: &mut Frame| {
            let shape = arg.allocation.resolve(frame.shapes())?;
            let ty = arg.ty.unwrap_or(cx.element_type);
            let buffer = DynBuffer::zeros(ty, shape.0 * shape.1);
            log::trace!("allocated {}x{} {} output for argument {}", shape.0, shape.1, ty, pos);
            frame.set_shape(pos, shape);
            lend(frame, pos, &buffer, true, inner)?;
            let output = collect(buffer, shape, arg.transpose)?;
            frame.put_output(pos, output);
            Ok(())
        }),
        Descriptor::WorkArea { size, ty } => Box::new(move |frame: &mut Frame| {
            let ty = ty.unwrap_or(cx.element_type);
            let len = (*size).max(1);
            let buffer = DynBuffer::zeros(ty, len);
            log::trace!("allocated work area of {} {} elements", len, ty);
            frame.set_shape(pos, (len, 1));
            lend(frame, pos, &buffer, true, inner)
        }),
        Descriptor::Work(_) | Descriptor::WorkSize(_) => inner,
    }
}

/// Produces the buffer lent for an input: the caller's own buffer when no
/// conversion is needed, otherwise a materialized copy.
fn prepare_input(pos: usize, arg: &InputArg, cx: Expansion<'_>) -> Result<DynBuffer> {
    let view = &arg.view;
    let source = view.buffer.element_type();
    let target = arg.ty.unwrap_or(if source == ElementType::Int32 {
        ElementType::Int32
    } else {
        cx.element_type
    });
    let copy = arg.force_copy.unwrap_or(false) || arg.transpose || target != source;
    let buffer = if copy {
        let converted = if target == source {
            view.buffer.deep_copy()?
        } else {
            view.buffer.cast(target)?
        };
        converted.materialize(view.kind, view.nrow, view.ncol)?;
        if arg.transpose {
            converted.transposed(view.nrow, view.ncol)?
        } else {
            converted
        }
    } else {
        view.buffer.materialize(view.kind, view.nrow, view.ncol)?;
        view.buffer.clone()
    };
    if cx.options.check_finite_inputs && !buffer.all_finite()? {
        return Err(LinbindError::NonFiniteInput { position: pos });
    }
    log::trace!(
        "prepared {}x{} {} argument {} ({})",
        view.nrow,
        view.ncol,
        target,
        pos,
        if copy { "copy" } else { "in place" }
    );
    Ok(buffer)
}

/// Copies the prepared input of argument `pos` into the leading block of its
/// destination.
fn place(
    pos: usize,
    source: &DynBuffer,
    source_shape: (usize, usize),
    target: &DynBuffer,
    target_shape: (usize, usize),
) -> Result<()> {
    if source_shape.0 > target_shape.0 || source_shape.1 > target_shape.1 {
        return Err(LinbindError::DimensionMismatch(format!(
            "argument {}: {}x{} input does not fit its {}x{} destination",
            pos, source_shape.0, source_shape.1, target_shape.0, target_shape.1
        )));
    }
    log::trace!(
        "placing {}x{} input of argument {} into a {}x{} destination",
        source_shape.0,
        source_shape.1,
        pos,
        target_shape.0,
        target_shape.1
    );
    target.copy_block_from(source, source_shape.0, source_shape.1, target_shape.0)
}

fn collect(buffer: DynBuffer, shape: (usize, usize), transpose: bool) -> Result<OutputValue> {
    let (nrow, ncol) = shape;
    if transpose {
        Ok(OutputValue {
            buffer: buffer.transposed(nrow, ncol)?,
            nrow: ncol,
            ncol: nrow,
        })
    } else {
        Ok(OutputValue { buffer, nrow, ncol })
    }
}
