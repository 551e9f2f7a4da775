//! Structured row framing over byte streams
//!
//! A row on the wire is `[4-byte big-endian length][encoded datums]`.

use shardflow_core::{decode_all, encode_datums, Datum};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::IpcError;

/// Upper bound on a single encoded row
pub const MAX_ROW_BYTES: usize = 64 * 1024 * 1024;

/// Write one framed row
pub async fn write_row<W>(writer: &mut W, row: &[Datum]) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
{
    let mut body = Vec::with_capacity(16 * row.len());
    encode_datums(&mut body, row);
    if body.len() > MAX_ROW_BYTES {
        return Err(IpcError::Frame(format!(
            "row of {} bytes exceeds the {} byte limit",
            body.len(),
            MAX_ROW_BYTES
        )));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    Ok(())
}

/// Read one framed row, `Ok(None)` on a clean end of stream
pub async fn read_row<R>(reader: &mut R) -> Result<Option<Vec<Datum>>, IpcError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    let mut filled = 0;
    while filled < head.len() {
        let n = reader.read(&mut head[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(IpcError::Frame(format!(
                "row header truncated after {} bytes",
                filled
            )));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(head) as usize;
    if len > MAX_ROW_BYTES {
        return Err(IpcError::Frame(format!(
            "row of {} bytes exceeds the {} byte limit",
            len, MAX_ROW_BYTES
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            IpcError::Frame(format!("row body truncated, expected {} bytes", len))
        } else {
            IpcError::Io(e)
        }
    })?;
    Ok(Some(decode_all(&body)?))
}
