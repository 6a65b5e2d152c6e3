//! The fixed empty-database RDB payload sent as the bulk-string body of a
//! PSYNC `FULLRESYNC` reply. No RDB writer/reader lives here: every replica
//! starts from this one canned, empty snapshot.

use bytes::Bytes;

const EMPTY_RDB_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a72656469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d62617365c000fff06e3bfec0ff5aa2";

fn decode_hex(hex: &str) -> Vec<u8> {
    hex.as_bytes()
        .chunks_exact(2)
        .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap())
        .collect()
}

/// The 88-byte empty-RDB blob, ready to be framed as `$<len>\r\n<bytes>`
/// (no trailing CRLF) after a `+FULLRESYNC` line.
pub fn empty_rdb() -> Bytes {
    Bytes::from(decode_hex(EMPTY_RDB_HEX))
}

/// Encodes `empty_rdb()` as PSYNC's bulk-string framing.
pub fn empty_rdb_frame() -> Bytes {
    let payload = empty_rdb();
    let mut buf = Vec::with_capacity(payload.len() + 16);
    buf.push(b'$');
    buf.extend_from_slice(payload.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(&payload);
    Bytes::from(buf)
}
