use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use crate::binder::CallArgs;
use crate::error::{LinbindError, Result};

/// Executes routines by symbol (`dgetrf_`, `zhetrf_`, ...).
///
/// Implementations read and write the arguments through [`CallArgs`] and
/// report routine-level failures through the status argument, not through
/// the returned `Result`. An `Err` means the routine could not be run at all.
pub trait Backend {
    fn invoke(&self, symbol: &str, args: &mut CallArgs) -> Result<()>;

    /// Name used in log messages.
    fn name(&self) -> &str {
        "backend"
    }
}

impl<B: Backend + ?Sized> Backend for &B {
    fn invoke(&self, symbol: &str, args: &mut CallArgs) -> Result<()> {
        (**self).invoke(symbol, args)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

type RoutineFn = Box<dyn Fn(&mut CallArgs) -> Result<()>>;

/// Backend assembled from closures, one per symbol.
#[derive(Default)]
pub struct FnBackend {
    routines: HashMap<String, RoutineFn>,
}

impl FnBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `routine` under `symbol`, replacing any previous one.
    pub fn with(
        mut self,
        symbol: &str,
        routine: impl Fn(&mut CallArgs) -> Result<()> + 'static,
    ) -> Self {
        self.routines.insert(symbol.to_string(), Box::new(routine));
        self
    }

    pub fn provides(&self, symbol: &str) -> bool {
        self.routines.contains_key(symbol)
    }
}

impl fmt::Debug for FnBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut symbols: Vec<&String> = self.routines.keys().collect();
        symbols.sort();
        f.debug_struct("FnBackend").field("routines", &symbols).finish()
    }
}

impl Backend for FnBackend {
    fn invoke(&self, symbol: &str, args: &mut CallArgs) -> Result<()> {
        let routine = self
            .routines
            .get(symbol)
            .ok_or_else(|| LinbindError::UnknownRoutine(symbol.to_string()))?;
        routine(args)
    }

    fn name(&self) -> &str {
        "closures"
    }
}

/// Decorator counting invocations per symbol.
#[derive(Debug)]
pub struct CountingBackend<B> {
    inner: B,
    counts: RefCell<HashMap<String, usize>>,
}

impl<B: Backend> CountingBackend<B> {
    pub fn new(inner: B) -> Self {
        CountingBackend {
            inner,
            counts: RefCell::new(HashMap::new()),
        }
    }

    pub fn count(&self, symbol: &str) -> usize {
        self.counts.borrow().get(symbol).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.borrow().values().sum()
    }

    pub fn reset(&self) {
        self.counts.borrow_mut().clear();
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: Backend> Backend for CountingBackend<B> {
    fn invoke(&self, symbol: &str, args: &mut CallArgs) -> Result<()> {
        *self.counts.borrow_mut().entry(symbol.to_string()).or_insert(0) += 1;
        self.inner.invoke(symbol, args)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
