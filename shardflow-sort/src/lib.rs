//! External sort/merge engine
//!
//! [`FileSorter`] accepts rows of a fixed schema in any order, buffers them in
//! memory, spills sorted runs to disk when the buffer overflows, and then
//! yields every row in comparator order, merging runs with a k-way heap.
//!
//! The engine is synchronous and single-threaded; it is meant to be owned by
//! exactly one pipeline stage.

pub mod compare;
pub mod error;
pub mod heap;
pub mod run;
pub mod sorter;

pub use compare::RowComparator;
pub use error::{RunError, SortError, SortPhase};
pub use heap::{Keyed, RowHeap};
pub use sorter::{FileSorter, FileSorterBuilder};

use shardflow_core::Datum;

/// The unit the sort engine orders and persists
#[derive(Debug, Clone, PartialEq)]
pub struct ComparableRow {
    pub key: Vec<Datum>,
    pub val: Vec<Datum>,
    /// Stable row identity carried through the sort
    pub handle: i64,
}

impl ComparableRow {
    pub fn new(key: Vec<Datum>, val: Vec<Datum>, handle: i64) -> Self {
        Self { key, val, handle }
    }
}

impl Keyed for ComparableRow {
    fn key(&self) -> &[Datum] {
        &self.key
    }
}
