//! Conversions between raw-line streams and structured-row streams
//!
//! Pipe-mode scripts read and write newline-terminated, tab-separated lines
//! while built-in functions exchange framed rows. Each adapter returns the
//! converted reader together with the pump future that feeds it; the caller
//! decides where that future runs so it can be supervised with the stage.

use shardflow_core::Datum;
use std::future::Future;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

use crate::error::IpcError;
use crate::piper::{Piper, StageReader};
use crate::rows::{read_row, write_row};

/// Convert a line stream into a row stream.
///
/// Every line becomes one row whose fields are the tab-separated parts of the
/// line. The pump resolves to the number of rows produced.
pub fn lines_to_rows(
    reader: StageReader,
    capacity: usize,
) -> (
    StageReader,
    impl Future<Output = Result<u64, IpcError>> + Send + 'static,
) {
    let (out, mut writer) = Piper::new(capacity).split();

    let pump = async move {
        let mut lines = BufReader::new(reader).split(b'\n');
        let mut count = 0u64;
        while let Some(mut line) = lines.next_segment().await? {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let row: Vec<Datum> = line.split(|b| *b == b'\t').map(Datum::from_field).collect();
            write_row(&mut writer, &row).await?;
            count += 1;
        }
        writer.shutdown().await?;
        Ok(count)
    };

    (out.boxed(), pump)
}

/// Convert a row stream into a line stream.
///
/// Fields are rendered with their display form and joined with tabs. The pump
/// resolves to the number of lines produced.
pub fn rows_to_lines(
    mut reader: StageReader,
    capacity: usize,
) -> (
    StageReader,
    impl Future<Output = Result<u64, IpcError>> + Send + 'static,
) {
    let (out, writer) = Piper::new(capacity).split();

    let pump = async move {
        let mut writer = BufWriter::new(writer);
        let mut count = 0u64;
        while let Some(row) = read_row(&mut reader).await? {
            let mut line = row
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join("\t");
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
            count += 1;
        }
        writer.shutdown().await?;
        Ok(count)
    };

    (out.boxed(), pump)
}
