use bytes::Bytes;

/// A single RESP value, either read off the wire or about to be written to it.
///
/// `Raw` only ever appears nested inside an `Array`: it holds a value that
/// has already been fully RESP-encoded (used for `EXEC`'s reply, which is an
/// array of the already-encoded replies of the queued commands).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<RespValue>),
    NullArray,
    Raw(Bytes),
}

impl RespValue {
    pub fn simple(value: impl Into<String>) -> Self {
        Self::Simple(value.into())
    }

    pub fn error(value: impl Into<String>) -> Self {
        Self::Error(value.into())
    }

    pub fn integer(value: i64) -> Self {
        Self::Integer(value)
    }

    pub fn bulk(value: impl Into<Bytes>) -> Self {
        Self::Bulk(value.into())
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        Self::Array(values)
    }

    pub fn null_array() -> Self {
        Self::NullArray
    }

    pub fn empty_array() -> Self {
        Self::Array(Vec::new())
    }

    /// Builds an array reply out of values that are already fully RESP-encoded
    /// (e.g. the per-command replies collected while running a transaction).
    pub fn array_of_already_encoded(values: Vec<Bytes>) -> Self {
        Self::Array(values.into_iter().map(Self::Raw).collect())
    }

    /// Builds a `*N\r\n$.. ..\r\n...` request/command array out of plain
    /// string arguments — used both to parse incoming requests in tests and
    /// to re-encode a `Command` for fan-out to replicas.
    pub fn command(parts: &[&[u8]]) -> Self {
        Self::Array(parts.iter().map(|p| Self::bulk(Bytes::copy_from_slice(p))).collect())
    }

    /// Renders this value to its exact on-wire byte representation.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// The exact on-wire byte length of this value once encoded.
    pub fn encoded_len(&self) -> usize {
        self.encode_to_vec().len()
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::Simple(s) => {
                buf.push(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.push(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Bulk(bytes) => {
                buf.push(b'$');
                buf.extend_from_slice(bytes.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(bytes);
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Null => buf.extend_from_slice(b"$-1\r\n"),
            RespValue::NullArray => buf.extend_from_slice(b"*-1\r\n"),
            RespValue::Array(values) => {
                buf.push(b'*');
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for value in values {
                    value.encode_into(buf);
                }
            }
            RespValue::Raw(bytes) => buf.extend_from_slice(bytes),
        }
    }
}

impl From<&str> for RespValue {
    fn from(value: &str) -> Self {
        RespValue::bulk(Bytes::copy_from_slice(value.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_simple_string() {
        assert_eq!(RespValue::simple("OK").encode_to_vec(), b"+OK\r\n");
    }

    #[test]
    fn encodes_error() {
        assert_eq!(
            RespValue::error("ERR bad").encode_to_vec(),
            b"-ERR bad\r\n"
        );
    }

    #[test]
    fn encodes_integer() {
        assert_eq!(RespValue::integer(42).encode_to_vec(), b":42\r\n");
    }

    #[test]
    fn encodes_bulk_string() {
        assert_eq!(RespValue::from("v").encode_to_vec(), b"$1\r\nv\r\n");
    }

    #[test]
    fn encodes_null_bulk_string() {
        assert_eq!(RespValue::Null.encode_to_vec(), b"$-1\r\n");
    }

    #[test]
    fn encodes_null_array() {
        assert_eq!(RespValue::null_array().encode_to_vec(), b"*-1\r\n");
    }

    #[test]
    fn encodes_nested_array() {
        let value = RespValue::array(vec![RespValue::from("a"), RespValue::integer(1)]);
        assert_eq!(value.encode_to_vec(), b"*2\r\n$1\r\na\r\n:1\r\n");
    }

    #[test]
    fn encodes_array_of_already_encoded() {
        let value = RespValue::array_of_already_encoded(vec![
            Bytes::from_static(b"+OK\r\n"),
            Bytes::from_static(b":1\r\n"),
        ]);
        assert_eq!(value.encode_to_vec(), b"*2\r\n+OK\r\n:1\r\n");
    }

    #[test]
    fn command_encodes_as_bulk_string_array() {
        let value = RespValue::command(&[b"SET", b"k", b"v"]);
        assert_eq!(value.encode_to_vec(), b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }
}
