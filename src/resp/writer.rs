use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::value::RespValue;

/// Writes one RESP value and flushes immediately — payloads here are small
/// command/response frames, so there's no benefit to batching writes.
pub async fn write_value<W>(writer: &mut W, value: &RespValue) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&value.encode_to_vec()).await?;
    writer.flush().await
}
