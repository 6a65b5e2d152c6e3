use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use super::list::ListHandle;
use super::stream::Stream;

/// The kind tag returned by `TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Integer,
    List,
    Stream,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::List => "list",
            ValueKind::Stream => "stream",
        }
    }
}

/// A stored value, tagged by kind. A key's kind never changes in place:
/// write commands against the wrong kind fail WRONGTYPE instead of coercing.
#[derive(Debug, Clone)]
pub enum StoredValue {
    Str(Bytes),
    Int(i64),
    List(Arc<ListHandle>),
    Stream(Stream),
}

impl StoredValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            StoredValue::Str(_) => ValueKind::String,
            StoredValue::Int(_) => ValueKind::Integer,
            StoredValue::List(_) => ValueKind::List,
            StoredValue::Stream(_) => ValueKind::Stream,
        }
    }
}

/// One keyspace slot: the value plus its optional absolute expiry instant.
/// Only `Str`/`Int` values ever carry an expiry; lists and streams have none.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub value: StoredValue,
    pub expires_at: Option<Instant>,
}

impl KeyEntry {
    pub fn new(value: StoredValue, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if Instant::now() >= at)
    }
}
