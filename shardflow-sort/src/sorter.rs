//! The file sorter and its builder

use shardflow_core::{CompareContext, Datum, DatumError};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::compare::RowComparator;
use crate::error::{SortError, SortPhase};
use crate::heap::{Keyed, RowHeap};
use crate::run::{write_run, RunReader};
use crate::ComparableRow;

/// Collects the parameters for a [`FileSorter`] and checks them on build
#[derive(Debug, Default)]
pub struct FileSorterBuilder {
    ctx: Option<CompareContext>,
    key_size: usize,
    val_size: usize,
    buf_size: usize,
    by_desc: Option<Vec<bool>>,
    tmp_dir: Option<PathBuf>,
}

impl FileSorterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Comparison context for key datums
    pub fn context(mut self, ctx: CompareContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Number of key and value columns in each row
    pub fn schema(mut self, key_size: usize, val_size: usize) -> Self {
        self.key_size = key_size;
        self.val_size = val_size;
        self
    }

    /// Number of rows held in memory before a run is spilled
    pub fn buffer(mut self, buf_size: usize) -> Self {
        self.buf_size = buf_size;
        self
    }

    /// Per-key-column descending flags; all ascending when not set
    pub fn descending(mut self, by_desc: Vec<bool>) -> Self {
        self.by_desc = Some(by_desc);
        self
    }

    /// Existing directory that receives run files
    pub fn dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = Some(tmp_dir.into());
        self
    }

    pub fn build(self) -> Result<FileSorter, SortError> {
        let ctx = self
            .ctx
            .ok_or_else(|| SortError::Config("comparison context is required".to_string()))?;
        if self.key_size == 0 {
            return Err(SortError::Config("key size is not positive".to_string()));
        }
        if self.val_size == 0 {
            return Err(SortError::Config("value size is not positive".to_string()));
        }
        if self.buf_size == 0 {
            return Err(SortError::Config("buffer size is not positive".to_string()));
        }
        let by_desc = self.by_desc.unwrap_or_else(|| vec![false; self.key_size]);
        if by_desc.len() != self.key_size {
            return Err(SortError::Config(format!(
                "mismatch in key size and byDesc slice: {} vs {}",
                self.key_size,
                by_desc.len()
            )));
        }

        let tmp_dir = self
            .tmp_dir
            .ok_or_else(|| SortError::Config("working directory is required".to_string()))?;
        match fs::metadata(&tmp_dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(SortError::Config(format!(
                    "{} is not a directory",
                    tmp_dir.display()
                )))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SortError::Config(format!(
                    "working directory {} does not exist",
                    tmp_dir.display()
                )))
            }
            Err(e) => {
                return Err(SortError::Config(format!(
                    "cannot stat {}: {}",
                    tmp_dir.display(),
                    e
                )))
            }
        }

        let comparator = RowComparator::new(ctx, by_desc);
        Ok(FileSorter {
            key_size: self.key_size,
            val_size: self.val_size,
            buf_size: self.buf_size,
            tmp_dir,
            heap: RowHeap::new(comparator.clone()),
            comparator,
            buf: Vec::with_capacity(self.buf_size),
            files: Vec::new(),
            file_count: 0,
            readers: Vec::new(),
            state: State::Input,
        })
    }
}

#[derive(Debug)]
enum State {
    Input,
    InMemory(std::vec::IntoIter<ComparableRow>),
    Merging,
    Failed,
    Closed,
}

#[derive(Debug)]
struct HeapItem {
    run: usize,
    row: ComparableRow,
}

impl Keyed for HeapItem {
    fn key(&self) -> &[Datum] {
        &self.row.key
    }
}

/// External sorter.
///
/// Rows go in through [`FileSorter::input`] until the first
/// [`FileSorter::output`] call; from then on output yields every row exactly
/// once in comparator order and returns `Ok(None)` when exhausted. Ties
/// between equal keys come out in no particular order once runs have been
/// spilled.
#[derive(Debug)]
pub struct FileSorter {
    key_size: usize,
    val_size: usize,
    buf_size: usize,
    tmp_dir: PathBuf,

    comparator: RowComparator,
    buf: Vec<ComparableRow>,
    files: Vec<PathBuf>,
    file_count: u64,

    readers: Vec<RunReader>,
    heap: RowHeap<HeapItem>,
    state: State,
}

impl FileSorter {
    pub fn builder() -> FileSorterBuilder {
        FileSorterBuilder::new()
    }

    /// Add one row
    pub fn input(&mut self, key: Vec<Datum>, val: Vec<Datum>, handle: i64) -> Result<(), SortError> {
        match self.state {
            State::Input => {}
            State::Closed => return Err(SortError::Closed),
            _ => return Err(SortError::InputAfterOutput),
        }
        if key.len() != self.key_size {
            return Err(SortError::SchemaMismatch {
                what: "key",
                expected: self.key_size,
                actual: key.len(),
            });
        }
        if val.len() != self.val_size {
            return Err(SortError::SchemaMismatch {
                what: "value",
                expected: self.val_size,
                actual: val.len(),
            });
        }

        if self.buf.len() >= self.buf_size {
            self.flush_to_file()?;
        }
        self.buf.push(ComparableRow::new(key, val, handle));
        Ok(())
    }

    /// Next row in sorted order, `Ok(None)` once every row has been returned
    pub fn output(&mut self) -> Result<Option<ComparableRow>, SortError> {
        if matches!(self.state, State::Input) {
            let started = if self.files.is_empty() {
                self.sort_in_memory()
            } else {
                self.prime_merge()
            };
            if let Err(e) = started {
                self.state = State::Failed;
                return Err(e);
            }
        }

        if let State::InMemory(rows) = &mut self.state {
            return Ok(rows.next());
        }
        match self.state {
            State::Merging => {
                let next = self.merge_next();
                if next.is_err() {
                    self.state = State::Failed;
                }
                next
            }
            State::Closed => Err(SortError::Closed),
            _ => Err(SortError::Poisoned),
        }
    }

    /// Release buffers and file handles and remove the working directory if
    /// runs were spilled into it. Closing twice is an error.
    pub fn close(&mut self) -> Result<(), SortError> {
        if matches!(self.state, State::Closed) {
            return Err(SortError::Closed);
        }
        self.buf.clear();
        self.buf.shrink_to_fit();
        self.readers.clear();
        self.heap.clear();

        if self.file_count > 0 {
            fs::remove_dir_all(&self.tmp_dir).map_err(|source| SortError::Cleanup {
                path: self.tmp_dir.clone(),
                source,
            })?;
        }
        self.state = State::Closed;
        Ok(())
    }

    /// Number of runs spilled so far
    pub fn run_count(&self) -> usize {
        self.files.len()
    }

    pub fn buffered_rows(&self) -> usize {
        self.buf.len()
    }

    fn unique_file_name(&mut self) -> PathBuf {
        let path = self.tmp_dir.join(self.file_count.to_string());
        self.file_count += 1;
        path
    }

    fn sort_buffer(&mut self) -> Result<(), DatumError> {
        let comparator = &self.comparator;
        self.buf
            .sort_by(|a, b| comparator.ordering(&a.key, &b.key));
        match comparator.take_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn flush_to_file(&mut self) -> Result<(), SortError> {
        self.sort_buffer().map_err(|source| SortError::Compare {
            phase: SortPhase::Spill,
            source,
        })?;

        let path = self.unique_file_name();
        write_run(&path, &self.buf).map_err(|source| SortError::Spill {
            path: path.clone(),
            source,
        })?;
        debug!(
            "Spilled run {} with {} rows to {}",
            self.files.len(),
            self.buf.len(),
            path.display()
        );

        self.files.push(path);
        self.buf.clear();
        Ok(())
    }

    fn sort_in_memory(&mut self) -> Result<(), SortError> {
        self.sort_buffer().map_err(|source| SortError::Compare {
            phase: SortPhase::InMemorySort,
            source,
        })?;
        let rows = std::mem::take(&mut self.buf);
        self.state = State::InMemory(rows.into_iter());
        Ok(())
    }

    fn prime_merge(&mut self) -> Result<(), SortError> {
        if !self.buf.is_empty() {
            self.flush_to_file()?;
        }

        self.readers = Vec::with_capacity(self.files.len());
        for (run, path) in self.files.iter().enumerate() {
            let reader = RunReader::open(path, self.key_size, self.val_size)
                .map_err(|source| SortError::MergePrime { run, source })?;
            self.readers.push(reader);
        }

        self.heap = RowHeap::with_capacity(self.comparator.clone(), self.readers.len());
        for (run, reader) in self.readers.iter_mut().enumerate() {
            let row = reader
                .next_row()
                .map_err(|source| SortError::MergePrime { run, source })?
                .ok_or(SortError::MergePrime {
                    run,
                    source: crate::error::RunError::Empty,
                })?;
            self.heap.push(HeapItem { run, row });
            if let Some(source) = self.heap.take_error() {
                return Err(SortError::Compare {
                    phase: SortPhase::MergePrime,
                    source,
                });
            }
        }

        debug!("Merging {} runs from {}", self.files.len(), self.tmp_dir.display());
        self.state = State::Merging;
        Ok(())
    }

    fn merge_next(&mut self) -> Result<Option<ComparableRow>, SortError> {
        let Some(item) = self.heap.pop() else {
            return Ok(None);
        };
        if let Some(source) = self.heap.take_error() {
            return Err(SortError::Compare {
                phase: SortPhase::Merge,
                source,
            });
        }

        let run = item.run;
        if let Some(row) = self.readers[run]
            .next_row()
            .map_err(|source| SortError::RunRead { run, source })?
        {
            self.heap.push(HeapItem { run, row });
            if let Some(source) = self.heap.take_error() {
                return Err(SortError::Compare {
                    phase: SortPhase::Merge,
                    source,
                });
            }
        }
        Ok(Some(item.row))
    }
}

impl Drop for FileSorter {
    fn drop(&mut self) {
        if matches!(self.state, State::Closed) || self.file_count == 0 {
            return;
        }
        self.readers.clear();
        if let Err(e) = fs::remove_dir_all(&self.tmp_dir) {
            if e.kind() != ErrorKind::NotFound {
                warn!(
                    "Failed to remove sort directory {}: {}",
                    self.tmp_dir.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn sorter(dir: &Path, buf: usize) -> FileSorter {
        FileSorter::builder()
            .context(CompareContext::default())
            .schema(1, 1)
            .buffer(buf)
            .dir(dir)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_bad_parameters() {
        let dir = TempDir::new().unwrap();

        let no_ctx = FileSorter::builder().schema(1, 1).buffer(1).dir(dir.path()).build();
        assert!(matches!(no_ctx, Err(SortError::Config(_))));

        let base = || {
            FileSorter::builder()
                .context(CompareContext::default())
                .dir(dir.path())
        };
        assert!(base().schema(0, 1).buffer(1).build().is_err());
        assert!(base().schema(1, 0).buffer(1).build().is_err());
        assert!(base().schema(1, 1).buffer(0).build().is_err());
        assert!(base()
            .schema(2, 1)
            .buffer(1)
            .descending(vec![true])
            .build()
            .is_err());

        let missing = FileSorter::builder()
            .context(CompareContext::default())
            .schema(1, 1)
            .buffer(1)
            .dir(dir.path().join("missing"))
            .build();
        assert!(matches!(missing, Err(SortError::Config(msg)) if msg.contains("does not exist")));
    }

    #[test]
    fn test_spill_happens_before_append() {
        let dir = TempDir::new().unwrap();
        let mut sorter_under_test = sorter(dir.path(), 2);

        sorter_under_test.input(vec![Datum::Int(5)], vec![Datum::Null], 0).unwrap();
        sorter_under_test.input(vec![Datum::Int(3)], vec![Datum::Null], 1).unwrap();
        assert_eq!(sorter_under_test.run_count(), 0);
        assert_eq!(sorter_under_test.buffered_rows(), 2);

        sorter_under_test.input(vec![Datum::Int(1)], vec![Datum::Null], 2).unwrap();
        assert_eq!(sorter_under_test.run_count(), 1);
        assert_eq!(sorter_under_test.buffered_rows(), 1);
        assert!(dir.path().join("0").exists());
    }

    #[test]
    fn test_schema_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut sorter_under_test = sorter(dir.path(), 2);
        let err = sorter_under_test
            .input(vec![Datum::Int(1), Datum::Int(2)], vec![Datum::Null], 0)
            .unwrap_err();
        assert!(matches!(
            err,
            SortError::SchemaMismatch {
                what: "key",
                expected: 1,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_close_without_spill_keeps_directory() {
        let dir = TempDir::new().unwrap();
        let mut sorter_under_test = sorter(dir.path(), 4);
        sorter_under_test.input(vec![Datum::Int(1)], vec![Datum::Null], 0).unwrap();
        sorter_under_test.close().unwrap();
        assert!(dir.path().exists());
    }
}
