//! Newline-delimited JSON transport

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Sends and receives [`MessageEnvelope`]s as one JSON document per line
pub struct LineTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Send a message to the other end
    pub async fn send<T: Serialize>(&mut self, message: &MessageEnvelope<T>) -> Result<(), IpcError> {
        let json = serde_json::to_string(message)
            .map_err(IpcError::Encode)?;

        let message_with_newline = format!("{}\n", json);
        self.writer.write_all(message_with_newline.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive a message from the other end
    pub async fn receive<T>(&mut self) -> Result<MessageEnvelope<T>, IpcError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let mut line = String::new();
        self.reader.read_line(&mut line).await?;

        if line.is_empty() {
            return Err(IpcError::ConnectionClosed);
        }

        line.truncate(line.trim_end().len());

        let envelope: MessageEnvelope<T> = serde_json::from_str(&line)
            .map_err(IpcError::Decode)?;

        if envelope.protocol_version != IPC_PROTOCOL_VERSION {
            return Err(IpcError::ProtocolVersionMismatch {
                expected: IPC_PROTOCOL_VERSION,
                actual: envelope.protocol_version,
            });
        }

        Ok(envelope)
    }

    /// Give back the underlying halves, keeping any bytes already buffered
    pub fn into_inner(self) -> (BufReader<R>, W) {
        (self.reader, self.writer)
    }
}
