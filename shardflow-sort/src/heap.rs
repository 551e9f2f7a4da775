//! Binary min-heap ordered by an injected row comparator
//!
//! `std::collections::BinaryHeap` needs a total `Ord` on its items, which a
//! fallible, context-dependent key comparison cannot provide. This heap
//! carries its comparator instead and exposes the captured comparison error.

use shardflow_core::{Datum, DatumError};
use std::cmp::Ordering;

use crate::compare::RowComparator;

/// Anything that exposes a sort key
pub trait Keyed {
    fn key(&self) -> &[Datum];
}

/// Min-heap: the item with the smallest key under the comparator is on top
#[derive(Debug)]
pub struct RowHeap<T> {
    items: Vec<T>,
    comparator: RowComparator,
}

impl<T: Keyed> RowHeap<T> {
    pub fn new(comparator: RowComparator) -> Self {
        Self {
            items: Vec::new(),
            comparator,
        }
    }

    pub fn with_capacity(comparator: RowComparator, capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            comparator,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let top = self.items.pop();
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        top
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// First comparison error since the last call, if any
    pub fn take_error(&self) -> Option<DatumError> {
        self.comparator.take_error()
    }

    fn less(&self, a: usize, b: usize) -> bool {
        self.comparator
            .ordering(self.items[a].key(), self.items[b].key())
            == Ordering::Less
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.less(idx, parent) {
                break;
            }
            self.items.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * idx + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len && self.less(right, left) {
                smallest = right;
            }
            if !self.less(smallest, idx) {
                break;
            }
            self.items.swap(idx, smallest);
            idx = smallest;
        }
    }
}
