//! Two-phase workspace sizing: a dry run with size `-1` reports the optimal
//! length into a one-element scratch buffer, then the real call gets exactly that much.

use std::cell::Cell;
use std::rc::Rc;

use super::frame::{Atom, Bound, Frame};
use super::{lend, Action};
use crate::buffer::DynBuffer;
use crate::error::LinbindError;
use crate::kind::ElementType;

/// The work buffer and work size descriptors of one call, sharing a size cell.
#[derive(Debug, Clone)]
pub(crate) struct WorkspacePair {
    size: Rc<Cell<i32>>,
    pub(crate) ty: Option<ElementType>,
}

impl WorkspacePair {
    pub(crate) fn new(ty: Option<ElementType>) -> Self {
        WorkspacePair {
            size: Rc::new(Cell::new(0)),
            ty,
        }
    }
}

/// Backends report the optimal size as a floating-point value in the first
/// work element.
fn coerce_size(reported: f64, min_workspace: i32) -> i32 {
    let floor = min_workspace.max(1);
    if !reported.is_finite() || reported < 1.0 {
        return floor;
    }
    let size = reported.ceil().min(i32::MAX as f64) as i32;
    size.max(floor)
}

/// Query pass of the work buffer: binds a one-element buffer and reads the reported size back.
pub(crate) fn wrap_query<'a>(
    pos: usize,
    pair: &'a WorkspacePair,
    ty: ElementType,
    min_workspace: i32,
    inner: Action<'a>,
) -> Action<'a> {
    Box::new(move |frame: &mut Frame| {
        pair.size.set(-1);
        let scratch = DynBuffer::zeros(ty, 1);
        lend(frame, pos, &scratch, true, inner)?;
        let reported = scratch.leading_value()?;
        let size = coerce_size(reported, min_workspace);
        log::debug!(
            "workspace query for argument {} reported {} ({} {} elements)",
            pos,
            reported,
            size,
            ty
        );
        pair.size.set(size);
        Ok(())
    })
}

/// Call pass of the work buffer: allocates exactly the queried length.
pub(crate) fn wrap_work<'a>(
    pos: usize,
    pair: &'a WorkspacePair,
    ty: ElementType,
    inner: Action<'a>,
) -> Action<'a> {
    Box::new(move |frame: &mut Frame| {
        let size = pair.size.get();
        if size < 1 {
            return Err(LinbindError::Configuration(format!(
                "workspace for argument {} was not queried",
                pos
            )));
        }
        let work = DynBuffer::zeros(ty, size as usize);
        log::trace!("allocated workspace of {} {} elements", size, ty);
        frame.record_work_size(size);
        lend(frame, pos, &work, true, inner)
    })
}

/// Both passes of the size argument: passes the current cell value.
pub(crate) fn wrap_size<'a>(pos: usize, pair: &'a WorkspacePair, inner: Action<'a>) -> Action<'a> {
    Box::new(move |frame: &mut Frame| {
        frame
            .args
            .bind(pos, Bound::Atom(Box::new(Atom::Int(pair.size.get()))))?;
        inner(frame)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_size() {
        assert_eq!(coerce_size(64.0, 1), 64);
        assert_eq!(coerce_size(10.2, 1), 11);
        assert_eq!(coerce_size(0.0, 1), 1);
        assert_eq!(coerce_size(f64::NAN, 4), 4);
        assert_eq!(coerce_size(3.0, 16), 16);
    }
}
