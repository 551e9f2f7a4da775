//! Composite key comparator

use shardflow_core::{CompareContext, Datum, DatumError};
use std::cell::Cell;
use std::cmp::Ordering;
use std::fmt;

/// Lexicographic comparator over key columns with per-column direction.
///
/// Sorting and heap maintenance need an infallible ordering, so
/// [`RowComparator::ordering`] records the first comparison failure and
/// reports the pair as equal. Callers must check [`RowComparator::take_error`]
/// after every sort or heap step.
pub struct RowComparator {
    ctx: CompareContext,
    by_desc: Vec<bool>,
    err: Cell<Option<DatumError>>,
}

impl RowComparator {
    pub fn new(ctx: CompareContext, by_desc: Vec<bool>) -> Self {
        Self {
            ctx,
            by_desc,
            err: Cell::new(None),
        }
    }

    /// Compare two keys; the first column that differs decides
    pub fn compare_keys(&self, left: &[Datum], right: &[Datum]) -> Result<Ordering, DatumError> {
        for (k, desc) in self.by_desc.iter().enumerate() {
            let ret = left[k].compare(&self.ctx, &right[k])?;
            let ret = if *desc { ret.reverse() } else { ret };
            if ret != Ordering::Equal {
                return Ok(ret);
            }
        }
        Ok(Ordering::Equal)
    }

    /// Infallible ordering that captures the first error
    pub fn ordering(&self, left: &[Datum], right: &[Datum]) -> Ordering {
        match self.compare_keys(left, right) {
            Ok(ord) => ord,
            Err(e) => {
                let first = self.err.take().unwrap_or(e);
                self.err.set(Some(first));
                Ordering::Equal
            }
        }
    }

    /// Take the captured error, clearing it
    pub fn take_error(&self) -> Option<DatumError> {
        self.err.take()
    }
}

impl fmt::Debug for RowComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowComparator")
            .field("ctx", &self.ctx)
            .field("by_desc", &self.by_desc)
            .finish_non_exhaustive()
    }
}

impl Clone for RowComparator {
    fn clone(&self) -> Self {
        Self::new(self.ctx, self.by_desc.clone())
    }
}
