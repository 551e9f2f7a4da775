//! Built-in instruction functions
//!
//! All built-ins consume and produce framed rows. Counters are in rows: one
//! input per row read, one output per row emitted regardless of how many
//! writers receive it.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use shardflow_core::{decode_all, encode_datums, Collation, CompareContext, Datum};
use shardflow_ipc::{read_row, write_row, IpcError, StageReader, StageWriter};
use shardflow_sort::{FileSorter, Keyed, RowComparator, RowHeap};
use tokio::sync::mpsc;
use tracing::debug;

use crate::registry::{FunctionContext, InstructionFunction};

/// Rows in flight between the async side of [`LocalSort`] and its sorter
const SORT_CHANNEL_ROWS: usize = 1024;

/// One key column of a sort or merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub index: usize,
    #[serde(default)]
    pub descending: bool,
}

/// Options shared by [`LocalSort`] and [`MergeSortedTo`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct SortOptions {
    order_by: Vec<OrderBy>,
    /// Overrides the configured sort buffer
    buffer_rows: Option<usize>,
    collation: Collation,
}

impl SortOptions {
    /// Sort on the first column when no order is given
    fn order(&self) -> Vec<OrderBy> {
        if self.order_by.is_empty() {
            vec![OrderBy {
                index: 0,
                descending: false,
            }]
        } else {
            self.order_by.clone()
        }
    }

    fn comparator(&self) -> RowComparator {
        RowComparator::new(
            CompareContext::new(self.collation),
            self.order().iter().map(|o| o.descending).collect(),
        )
    }
}

fn parse_options<T: DeserializeOwned + Default>(options: &JsonValue) -> anyhow::Result<T> {
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone()).context("invalid function options")
}

fn extract_key(row: &[Datum], order: &[OrderBy]) -> anyhow::Result<Vec<Datum>> {
    order
        .iter()
        .map(|o| {
            row.get(o.index).cloned().ok_or_else(|| {
                anyhow!(
                    "order_by column {} is out of range for a row of {} columns",
                    o.index,
                    row.len()
                )
            })
        })
        .collect()
}

async fn write_to_all(writers: &mut [StageWriter], row: &[Datum]) -> Result<(), IpcError> {
    for writer in writers.iter_mut() {
        write_row(writer, row).await?;
    }
    Ok(())
}

/// Copy every row of the inputs, in input order, to all outputs
async fn concatenate(
    readers: Vec<StageReader>,
    writers: &mut [StageWriter],
    ctx: &FunctionContext,
) -> anyhow::Result<()> {
    for mut reader in readers {
        while let Some(row) = read_row(&mut reader).await? {
            ctx.stat.add_input(1);
            write_to_all(writers, &row).await?;
            ctx.stat.add_output(1);
        }
    }
    Ok(())
}

/// Copies the rows of its single input to every output
#[derive(Debug, Clone, Copy, Default)]
pub struct Pass;

#[async_trait]
impl InstructionFunction for Pass {
    async fn run(
        &self,
        readers: Vec<StageReader>,
        writers: &mut [StageWriter],
        ctx: &FunctionContext,
    ) -> anyhow::Result<()> {
        if readers.len() > 1 {
            bail!("Pass takes one input, got {}", readers.len());
        }
        concatenate(readers, writers, ctx).await
    }
}

/// Concatenates all inputs into every output
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeTo;

#[async_trait]
impl InstructionFunction for MergeTo {
    async fn run(
        &self,
        readers: Vec<StageReader>,
        writers: &mut [StageWriter],
        ctx: &FunctionContext,
    ) -> anyhow::Result<()> {
        concatenate(readers, writers, ctx).await
    }
}

struct MergeItem {
    source: usize,
    key: Vec<Datum>,
    row: Vec<Datum>,
}

impl Keyed for MergeItem {
    fn key(&self) -> &[Datum] {
        &self.key
    }
}

/// K-way merge of inputs that are each already sorted on `order_by`
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeSortedTo;

impl MergeSortedTo {
    async fn next_item(
        reader: &mut StageReader,
        source: usize,
        order: &[OrderBy],
        ctx: &FunctionContext,
    ) -> anyhow::Result<Option<MergeItem>> {
        let Some(row) = read_row(reader).await? else {
            return Ok(None);
        };
        ctx.stat.add_input(1);
        let key = extract_key(&row, order)?;
        Ok(Some(MergeItem { source, key, row }))
    }
}

#[async_trait]
impl InstructionFunction for MergeSortedTo {
    async fn run(
        &self,
        mut readers: Vec<StageReader>,
        writers: &mut [StageWriter],
        ctx: &FunctionContext,
    ) -> anyhow::Result<()> {
        let options: SortOptions = parse_options(&ctx.options)?;
        let order = options.order();
        let mut heap = RowHeap::with_capacity(options.comparator(), readers.len());

        for (source, reader) in readers.iter_mut().enumerate() {
            if let Some(item) = Self::next_item(reader, source, &order, ctx).await? {
                heap.push(item);
            }
        }
        if let Some(e) = heap.take_error() {
            return Err(anyhow::Error::new(e).context("comparing the first rows of each input"));
        }

        while let Some(item) = heap.pop() {
            if let Some(next) = Self::next_item(&mut readers[item.source], item.source, &order, ctx).await? {
                heap.push(next);
            }
            if let Some(e) = heap.take_error() {
                return Err(anyhow::Error::new(e).context("comparing rows while merging"));
            }
            write_to_all(writers, &item.row).await?;
            ctx.stat.add_output(1);
        }
        Ok(())
    }
}

/// Sorts all rows of its inputs with the external sorter.
///
/// The sorter is synchronous and may spill to disk, so it runs on the
/// blocking pool and exchanges rows with the stage over bounded channels.
/// Each row travels as its sort key plus the encoded full row. The worker
/// is spawned on the task's tracker, so a cancelled task still waits for it
/// to drop its spill directory; once cancelled it skips the merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSort;

#[async_trait]
impl InstructionFunction for LocalSort {
    async fn run(
        &self,
        readers: Vec<StageReader>,
        writers: &mut [StageWriter],
        ctx: &FunctionContext,
    ) -> anyhow::Result<()> {
        let options: SortOptions = parse_options(&ctx.options)?;
        let order = options.order();
        let by_desc: Vec<bool> = order.iter().map(|o| o.descending).collect();
        let buffer_rows = options.buffer_rows.unwrap_or(ctx.sort.buffer_rows);
        let tmp_root = ctx.sort.tmp_root();
        let collation = options.collation;
        let instruction = ctx.instruction.clone();
        let cancel = ctx.cancel.clone();

        let (in_tx, mut in_rx) = mpsc::channel::<(Vec<Datum>, Vec<u8>, i64)>(SORT_CHANNEL_ROWS);
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(SORT_CHANNEL_ROWS);

        let sorter_task = ctx.tasks.spawn_blocking(move || -> anyhow::Result<()> {
            let dir = tempfile::Builder::new()
                .prefix("shardflow-sort-")
                .tempdir_in(&tmp_root)
                .with_context(|| format!("creating sort directory under {}", tmp_root.display()))?;
            let mut sorter = FileSorter::builder()
                .context(CompareContext::new(collation))
                .schema(by_desc.len(), 1)
                .buffer(buffer_rows)
                .descending(by_desc)
                .dir(dir.path())
                .build()?;

            while let Some((key, encoded, handle)) = in_rx.blocking_recv() {
                if cancel.is_cancelled() {
                    break;
                }
                sorter.input(key, vec![Datum::Bytes(encoded)], handle)?;
            }
            if cancel.is_cancelled() {
                debug!(instruction = %instruction, runs = sorter.run_count(), "Sort cancelled");
                sorter.close()?;
                return Ok(());
            }
            debug!(
                instruction = %instruction,
                runs = sorter.run_count(),
                "Sort input complete"
            );

            while let Some(row) = sorter.output()? {
                if cancel.is_cancelled() {
                    break;
                }
                let Some(Datum::Bytes(encoded)) = row.val.into_iter().next() else {
                    bail!("sorted row {} lost its payload", row.handle);
                };
                if out_tx.blocking_send(encoded).is_err() {
                    break;
                }
            }
            sorter.close()?;
            Ok(())
        });

        let fed: anyhow::Result<()> = async {
            let mut handle = 0i64;
            for mut reader in readers {
                while let Some(row) = read_row(&mut reader).await? {
                    ctx.stat.add_input(1);
                    let key = extract_key(&row, &order)?;
                    let mut encoded = Vec::new();
                    encode_datums(&mut encoded, &row);
                    if in_tx.send((key, encoded, handle)).await.is_err() {
                        // sorter stopped early; its error surfaces below
                        return Ok(());
                    }
                    handle += 1;
                }
            }
            Ok(())
        }
        .await;
        drop(in_tx);

        let drained: anyhow::Result<()> = match fed {
            Ok(()) => async {
                while let Some(encoded) = out_rx.recv().await {
                    let row = decode_all(&encoded)?;
                    write_to_all(writers, &row).await?;
                    ctx.stat.add_output(1);
                }
                Ok(())
            }
            .await,
            Err(e) => Err(e),
        };
        // the worker owns the spill directory; wait for it to go away
        drop(out_rx);
        let sorted = sorter_task.await.context("sort worker panicked")?;
        drained?;
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shardflow_config::SortConfig;
    use shardflow_core::StatCounter;
    use shardflow_ipc::Piper;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    fn context(options: JsonValue, tmp: &std::path::Path) -> FunctionContext {
        FunctionContext {
            instruction: "test".to_string(),
            options,
            stat: Arc::new(StatCounter::new(1, 0)),
            sort: SortConfig {
                buffer_rows: 100,
                tmp_root: Some(tmp.to_path_buf()),
            },
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    async fn source(rows: Vec<Vec<Datum>>) -> StageReader {
        let (reader, mut writer) = Piper::new(64 * 1024).split();
        for row in rows {
            write_row(&mut writer, &row).await.unwrap();
        }
        writer.shutdown().await.unwrap();
        reader.boxed()
    }

    async fn run_collect(
        function: &dyn InstructionFunction,
        readers: Vec<StageReader>,
        ctx: &FunctionContext,
    ) -> anyhow::Result<Vec<Vec<Datum>>> {
        let (mut out, writer) = Piper::new(64 * 1024).split();
        let mut writers = vec![writer.boxed()];
        function.run(readers, &mut writers, ctx).await?;
        writers[0].shutdown().await?;
        drop(writers);

        let mut rows = Vec::new();
        while let Some(row) = read_row(&mut out).await? {
            rows.push(row);
        }
        Ok(rows)
    }

    fn ints(rows: &[Vec<Datum>], col: usize) -> Vec<i64> {
        rows.iter().map(|r| r[col].as_i64().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_local_sort_spills_and_orders() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = context(
            json!({"order_by": [{"index": 1, "descending": true}], "buffer_rows": 3}),
            tmp.path(),
        );
        let input: Vec<Vec<Datum>> = [4, 9, 1, 7, 3, 8, 2]
            .iter()
            .map(|v| vec![Datum::from(format!("r{v}")), Datum::Int(*v)])
            .collect();

        let rows = run_collect(&LocalSort, vec![source(input).await], &ctx)
            .await
            .unwrap();
        assert_eq!(ints(&rows, 1), vec![9, 8, 7, 4, 3, 2, 1]);
        assert_eq!(rows[0][0], Datum::from("r9"));
        assert_eq!(ctx.stat.input_count(), 7);
        assert_eq!(ctx.stat.output_count(), 7);
        // spill directory cleaned up
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_local_sort_rejects_short_rows() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = context(json!({"order_by": [{"index": 2}]}), tmp.path());
        let err = run_collect(&LocalSort, vec![source(vec![vec![Datum::Int(1)]]).await], &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[tokio::test]
    async fn test_merge_sorted_inputs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = context(JsonValue::Null, tmp.path());
        let a = source(vec![vec![Datum::Int(1)], vec![Datum::Int(4)], vec![Datum::Int(6)]]).await;
        let b = source(vec![vec![Datum::Int(2)], vec![Datum::Int(3)]]).await;
        let c = source(vec![]).await;

        let rows = run_collect(&MergeSortedTo, vec![a, b, c], &ctx).await.unwrap();
        assert_eq!(ints(&rows, 0), vec![1, 2, 3, 4, 6]);
    }

    #[tokio::test]
    async fn test_merge_to_concatenates_and_pass_rejects_many() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = context(JsonValue::Null, tmp.path());
        let a = source(vec![vec![Datum::Int(5)]]).await;
        let b = source(vec![vec![Datum::Int(2)], vec![Datum::Int(7)]]).await;
        let rows = run_collect(&MergeTo, vec![a, b], &ctx).await.unwrap();
        assert_eq!(ints(&rows, 0), vec![5, 2, 7]);

        let a = source(vec![]).await;
        let b = source(vec![]).await;
        assert!(run_collect(&Pass, vec![a, b], &ctx).await.is_err());
    }

    #[test]
    fn test_invalid_options() {
        let opts: anyhow::Result<SortOptions> = parse_options(&json!({"order_by": "x"}));
        assert!(opts.is_err());
        let opts: SortOptions = parse_options(&JsonValue::Null).unwrap();
        assert_eq!(opts.order(), vec![OrderBy { index: 0, descending: false }]);
    }
}
