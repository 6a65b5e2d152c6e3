use bytes::Bytes;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::value::RespValue;

/// An error reading a RESP value or request off the wire.
#[derive(Debug, thiserror::Error)]
pub enum RespReadError {
    /// End of stream reached while waiting to start a new value — a clean
    /// disconnect, not a protocol violation.
    #[error("connection closed")]
    Eof,

    /// The bytes on the wire don't parse as RESP.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Parses one client request: a RESP array of bulk strings.
///
/// Returns the parsed arguments together with the exact number of bytes
/// consumed off the wire — replicas need this to advance `command_processed`
/// byte-for-byte, whether or not the command produces a reply.
pub async fn read_request<R>(reader: &mut R) -> Result<(Vec<Bytes>, usize), RespReadError>
where
    R: AsyncBufRead + Unpin,
{
    let (header, header_len) = read_line(reader).await?;
    let header = header
        .strip_prefix('*')
        .ok_or_else(|| RespReadError::Protocol(format!("expected array, got: {}", header)))?;

    let count: i64 = header
        .parse()
        .map_err(|_| RespReadError::Protocol(format!("invalid array length: {}", header)))?;

    let mut consumed = header_len;
    let mut args = Vec::with_capacity(count.max(0) as usize);

    for _ in 0..count.max(0) {
        let (bulk, bulk_len) = read_bulk_string(reader).await?;
        consumed += bulk_len;
        args.push(bulk);
    }

    Ok((args, consumed))
}

/// Parses one general-purpose RESP value — used by the replica handshake to
/// read a primary's simple-string / error / integer replies (`+PONG`, `+OK`,
/// `+FULLRESYNC ...`).
pub async fn read_reply<R>(reader: &mut R) -> Result<RespValue, RespReadError>
where
    R: AsyncBufRead + Unpin,
{
    let prefix = read_u8_or_eof(reader).await?;

    match prefix {
        b'+' => Ok(RespValue::Simple(read_line(reader).await?.0)),
        b'-' => Ok(RespValue::Error(read_line(reader).await?.0)),
        b':' => {
            let (line, _) = read_line(reader).await?;
            let n = line
                .parse()
                .map_err(|_| RespReadError::Protocol(format!("invalid integer: {}", line)))?;
            Ok(RespValue::Integer(n))
        }
        b'$' => Ok(read_bulk_string(reader).await?.0),
        b'*' => {
            let (line, _) = read_line(reader).await?;
            let count: i64 = line
                .parse()
                .map_err(|_| RespReadError::Protocol(format!("invalid array length: {}", line)))?;

            if count < 0 {
                return Ok(RespValue::NullArray);
            }

            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(Box::pin(read_reply(reader)).await?);
            }
            Ok(RespValue::Array(values))
        }
        other => Err(RespReadError::Protocol(format!(
            "unexpected RESP prefix: {}",
            other as char
        ))),
    }
}

/// Reads the empty-RDB bulk payload sent during PSYNC: a `$<len>\r\n` header
/// followed by exactly `len` bytes, with **no** trailing CRLF. Returns the
/// payload bytes.
pub async fn read_rdb_payload<R>(reader: &mut R) -> Result<Bytes, RespReadError>
where
    R: AsyncBufRead + Unpin,
{
    let (header, _) = read_line(reader).await?;
    let header = header
        .strip_prefix('$')
        .ok_or_else(|| RespReadError::Protocol(format!("expected bulk header, got: {}", header)))?;

    let len: usize = header
        .parse()
        .map_err(|_| RespReadError::Protocol(format!("invalid RDB payload length: {}", header)))?;

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(Bytes::from(data))
}

async fn read_bulk_string<R>(reader: &mut R) -> Result<(RespValue, usize), RespReadError>
where
    R: AsyncBufRead + Unpin,
{
    let (header, header_len) = read_line(reader).await?;
    let header = header
        .strip_prefix('$')
        .ok_or_else(|| RespReadError::Protocol(format!("expected bulk string, got: {}", header)))?;

    let len: i64 = header
        .parse()
        .map_err(|_| RespReadError::Protocol(format!("invalid bulk length: {}", header)))?;

    if len < 0 {
        return Ok((RespValue::Null, header_len));
    }

    let mut data = vec![0u8; len as usize + 2];
    reader.read_exact(&mut data).await?;

    if &data[data.len() - 2..] != b"\r\n" {
        return Err(RespReadError::Protocol(
            "bulk string not terminated by CRLF".to_string(),
        ));
    }
    data.truncate(data.len() - 2);

    Ok((RespValue::Bulk(Bytes::from(data)), header_len + len as usize + 2))
}

/// Reads one `\r\n`-terminated line, returning it (without the terminator)
/// and the number of bytes consumed including the terminator.
async fn read_line<R>(reader: &mut R) -> Result<(String, usize), RespReadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let read = reader.read_until(b'\n', &mut raw).await?;

    if read == 0 {
        return Err(RespReadError::Eof);
    }

    if raw.last() != Some(&b'\n') {
        return Err(RespReadError::Protocol("unterminated line".to_string()));
    }
    raw.pop();
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }

    let line = String::from_utf8(raw).map_err(|_| RespReadError::Protocol("invalid UTF-8".to_string()))?;
    let consumed = line.len() + 2;
    Ok((line, consumed))
}

async fn read_u8_or_eof<R>(reader: &mut R) -> Result<u8, RespReadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut byte = [0u8; 1];
    match reader.read_exact(&mut byte).await {
        Ok(_) => Ok(byte[0]),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Err(RespReadError::Eof),
        Err(err) => Err(RespReadError::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn parses_simple_request() {
        let mut reader = BufReader::new(&b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n"[..]);
        let (args, consumed) = read_request(&mut reader).await.unwrap();
        assert_eq!(args, vec![Bytes::from_static(b"ECHO"), Bytes::from_static(b"hi")]);
        assert_eq!(consumed, "*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n".len());
    }

    #[tokio::test]
    async fn rejects_non_array_header() {
        let mut reader = BufReader::new(&b"$4\r\nPING\r\n"[..]);
        match read_request(&mut reader).await {
            Err(RespReadError::Protocol(_)) => {}
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn eof_before_any_bytes() {
        let mut reader = BufReader::new(&b""[..]);
        match read_request(&mut reader).await {
            Err(RespReadError::Eof) => {}
            other => panic!("expected eof, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn reads_simple_string_reply() {
        let mut reader = BufReader::new(&b"+PONG\r\n"[..]);
        assert_eq!(read_reply(&mut reader).await.unwrap(), RespValue::Simple("PONG".to_string()));
    }

    #[tokio::test]
    async fn reads_rdb_payload_without_trailing_crlf() {
        let mut reader = BufReader::new(&b"$5\r\nhello"[..]);
        let payload = read_rdb_payload(&mut reader).await.unwrap();
        assert_eq!(payload, Bytes::from_static(b"hello"));
    }
}
