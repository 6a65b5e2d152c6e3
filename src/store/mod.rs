//! The typed, expiry-aware, thread-safe keyspace.

mod list;
mod stream;
mod value;

pub use list::ListHandle;
pub use stream::{parse_range_bound, Entry, EntryId, RequestedId, Stream};
pub use value::{KeyEntry, StoredValue, ValueKind};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::CommandError;

/// Concurrent map of key → value with lazy expiry and typed accessors.
///
/// A single `RwLock` guards the map itself (shared for reads, exclusive for
/// writes and expiry-driven removal); each `List` carries its own inner lock
/// so BLPOP polling on one key never blocks operations on another.
#[derive(Default)]
pub struct Keyspace {
    map: RwLock<HashMap<String, KeyEntry>>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live value at `key`, lazily removing it first if expired.
    /// `None` covers both "absent" and "expired".
    async fn live_value(&self, key: &str) -> Option<StoredValue> {
        {
            let map = self.map.read().await;
            match map.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Expired: upgrade to a write lock and remove it lazily.
        let mut map = self.map.write().await;
        if matches!(map.get(key), Some(entry) if entry.is_expired()) {
            map.remove(key);
        }
        None
    }

    pub async fn type_of(&self, key: &str) -> &'static str {
        match self.live_value(key).await {
            Some(value) => value.kind().as_str(),
            None => "none",
        }
    }

    /// `GET`: bulk value for String/Integer, `None` if absent, expired, or
    /// the wrong kind (GET against a list/stream is WRONGTYPE, checked by
    /// the caller via `type_of` first if it needs the distinction — the
    /// command layer maps "wrong kind" to WRONGTYPE explicitly).
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, CommandError> {
        match self.live_value(key).await {
            None => Ok(None),
            Some(StoredValue::Str(bytes)) => Ok(Some(bytes)),
            Some(StoredValue::Int(n)) => Ok(Some(Bytes::from(n.to_string()))),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    /// `SET key value [PX ms]`. Stores as `Integer` if `value` parses as an
    /// i64, else as `String`.
    pub async fn set(&self, key: String, value: Bytes, expires_at: Option<Instant>) {
        let stored = match std::str::from_utf8(&value).ok().and_then(|s| s.parse::<i64>().ok()) {
            Some(n) => StoredValue::Int(n),
            None => StoredValue::Str(value),
        };

        self.map.write().await.insert(key, KeyEntry::new(stored, expires_at));
    }

    pub async fn del(&self, key: &str) -> bool {
        self.map.write().await.remove(key).is_some()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.map.read().await.keys().cloned().collect()
    }

    /// `INCR`/`DECR` (`delta` is `1` or `-1`). Absent keys initialize to 0.
    pub async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CommandError> {
        let mut map = self.map.write().await;

        let expires_at = match map.get(key) {
            Some(entry) if entry.is_expired() => None,
            Some(entry) => entry.expires_at,
            None => None,
        };

        let current = match map.get(key) {
            Some(entry) if !entry.is_expired() => match &entry.value {
                StoredValue::Int(n) => *n,
                StoredValue::Str(bytes) => std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or(CommandError::NotAnInteger)?,
                _ => return Err(CommandError::WrongType),
            },
            _ => 0,
        };

        let next = current.checked_add(delta).ok_or(CommandError::NotAnInteger)?;
        map.insert(key.to_string(), KeyEntry::new(StoredValue::Int(next), expires_at));
        Ok(next)
    }

    /// Fetches the list at `key`, creating an empty one if absent. Fails
    /// WRONGTYPE if the key holds a different kind.
    async fn list_handle(&self, key: &str, create_if_absent: bool) -> Result<Option<Arc<ListHandle>>, CommandError> {
        {
            let map = self.map.read().await;
            match map.get(key) {
                Some(entry) if entry.is_expired() => {}
                Some(KeyEntry { value: StoredValue::List(handle), .. }) => return Ok(Some(Arc::clone(handle))),
                Some(_) => return Err(CommandError::WrongType),
                None => {}
            }
        }

        if !create_if_absent {
            return Ok(None);
        }

        let mut map = self.map.write().await;
        match map.get(key) {
            Some(entry) if entry.is_expired() => {}
            Some(KeyEntry { value: StoredValue::List(handle), .. }) => return Ok(Some(Arc::clone(handle))),
            Some(_) => return Err(CommandError::WrongType),
            None => {}
        }

        let handle = ListHandle::new();
        map.insert(key.to_string(), KeyEntry::new(StoredValue::List(Arc::clone(&handle)), None));
        Ok(Some(handle))
    }

    pub async fn rpush(&self, key: &str, values: Vec<Bytes>) -> Result<usize, CommandError> {
        let handle = self.list_handle(key, true).await?.expect("created if absent");
        Ok(handle.append(values).await)
    }

    pub async fn lpush(&self, key: &str, values: Vec<Bytes>) -> Result<usize, CommandError> {
        let handle = self.list_handle(key, true).await?.expect("created if absent");
        Ok(handle.prepend(values).await)
    }

    pub async fn llen(&self, key: &str) -> Result<usize, CommandError> {
        match self.list_handle(key, false).await? {
            Some(handle) => Ok(handle.len().await),
            None => Ok(0),
        }
    }

    pub async fn lpop(&self, key: &str, count: usize) -> Result<Vec<Bytes>, CommandError> {
        match self.list_handle(key, false).await? {
            Some(handle) => Ok(handle.pop_front(count).await),
            None => Ok(vec![]),
        }
    }

    pub async fn lrange(&self, key: &str, start: i64, end: i64) -> Result<Vec<Bytes>, CommandError> {
        match self.list_handle(key, false).await? {
            Some(handle) => Ok(handle.range(start, end).await),
            None => Ok(vec![]),
        }
    }

    /// `BLPOP key timeout`: cooperative polling against the keyspace, ≈50ms
    /// granularity while the key doesn't exist yet, an immediate wakeup via
    /// the list's own `Notify` once it does.
    pub async fn blpop(&self, key: &str, timeout_secs: f64) -> Result<Option<Bytes>, CommandError> {
        use tokio::time::{Duration, Instant as TokioInstant};

        let deadline = (timeout_secs > 0.0)
            .then(|| TokioInstant::now() + Duration::from_secs_f64(timeout_secs));

        loop {
            if let Some(handle) = self.list_handle(key, false).await? {
                let remaining = match deadline {
                    Some(d) => {
                        let now = TokioInstant::now();
                        if now >= d {
                            0.0
                        } else {
                            (d - now).as_secs_f64()
                        }
                    }
                    None => 0.0, // 0.0 means "block indefinitely" to blocking_pop
                };

                if deadline.is_some() && remaining <= 0.0 {
                    return Ok(handle.pop_front(1).await.into_iter().next());
                }

                if let Some(value) = handle.blocking_pop(remaining).await {
                    return Ok(Some(value));
                }

                if deadline.is_some() {
                    return Ok(None);
                }
                // timeout==0 (block forever): blocking_pop only returns None
                // if woken spuriously; loop back and keep waiting.
                continue;
            }

            if let Some(d) = deadline {
                if TokioInstant::now() >= d {
                    return Ok(None);
                }
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// The one compound keyspace operation that must be atomic at the map
    /// level: entry-ID validation and append.
    pub async fn add_to_stream(
        &self,
        key: &str,
        requested: RequestedId,
        fields: Vec<(String, String)>,
    ) -> Result<EntryId, CommandError> {
        let mut map = self.map.write().await;

        let stream = match map.get_mut(key) {
            Some(entry) if entry.is_expired() => {
                map.remove(key);
                let stream = Stream::new();
                map.insert(key.to_string(), KeyEntry::new(StoredValue::Stream(stream), None));
                match &mut map.get_mut(key).unwrap().value {
                    StoredValue::Stream(s) => s,
                    _ => unreachable!(),
                }
            }
            Some(KeyEntry { value: StoredValue::Stream(s), .. }) => s,
            Some(_) => return Err(CommandError::WrongType),
            None => {
                map.insert(key.to_string(), KeyEntry::new(StoredValue::Stream(Stream::new()), None));
                match &mut map.get_mut(key).unwrap().value {
                    StoredValue::Stream(s) => s,
                    _ => unreachable!(),
                }
            }
        };

        stream.append(requested, fields)
    }

    pub async fn xrange(&self, key: &str, start: EntryId, end: EntryId) -> Result<Vec<Entry>, CommandError> {
        match self.live_value(key).await {
            None => Ok(vec![]),
            Some(StoredValue::Stream(stream)) => Ok(stream.range(start, end).into_iter().cloned().collect()),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    pub async fn xread_after(&self, key: &str, after: EntryId) -> Result<Vec<Entry>, CommandError> {
        match self.live_value(key).await {
            None => Ok(vec![]),
            Some(StoredValue::Stream(stream)) => Ok(stream.after(after).into_iter().cloned().collect()),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    /// Resolves the `$` token in `XREAD`: the last ID of this stream right
    /// now.
    pub async fn latest_stream_id(&self, key: &str) -> Result<EntryId, CommandError> {
        match self.live_value(key).await {
            None => Ok(EntryId::MIN),
            Some(StoredValue::Stream(stream)) => Ok(stream.last_entry_id()),
            Some(_) => Err(CommandError::WrongType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let ks = Keyspace::new();
        ks.set("k".into(), Bytes::from_static(b"v"), None).await;
        assert_eq!(ks.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn set_numeric_value_is_stored_as_integer() {
        let ks = Keyspace::new();
        ks.set("k".into(), Bytes::from_static(b"5"), None).await;
        assert_eq!(ks.type_of("k").await, "integer");
    }

    #[tokio::test]
    async fn expiry_makes_key_observationally_absent() {
        let ks = Keyspace::new();
        let past = Instant::now() - Duration::from_millis(1);
        ks.set("k".into(), Bytes::from_static(b"v"), Some(past)).await;
        assert_eq!(ks.get("k").await.unwrap(), None);
        assert_eq!(ks.type_of("k").await, "none");
    }

    #[tokio::test]
    async fn incr_initializes_absent_key_to_zero() {
        let ks = Keyspace::new();
        assert_eq!(ks.incr_by("counter", 1).await.unwrap(), 1);
        assert_eq!(ks.incr_by("counter", 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn incr_on_non_numeric_string_fails() {
        let ks = Keyspace::new();
        ks.set("k".into(), Bytes::from_static(b"abc"), None).await;
        assert_eq!(ks.incr_by("k", 1).await.unwrap_err(), CommandError::NotAnInteger);
    }

    #[tokio::test]
    async fn list_wrong_type_against_string() {
        let ks = Keyspace::new();
        ks.set("k".into(), Bytes::from_static(b"v"), None).await;
        assert_eq!(ks.rpush("k", vec![Bytes::from_static(b"x")]).await.unwrap_err(), CommandError::WrongType);
    }

    #[tokio::test]
    async fn rpush_lrange_roundtrip() {
        let ks = Keyspace::new();
        ks.rpush("list", vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]).await.unwrap();
        assert_eq!(ks.lrange("list", 0, -1).await.unwrap(), vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }

    #[tokio::test]
    async fn add_to_stream_rejects_decreasing_id() {
        let ks = Keyspace::new();
        ks.add_to_stream("s", RequestedId::Literal(EntryId::new(1, 1)), vec![]).await.unwrap();
        let err = ks.add_to_stream("s", RequestedId::Literal(EntryId::new(1, 1)), vec![]).await.unwrap_err();
        assert_eq!(err, CommandError::StreamIdTooSmall);
    }

    #[tokio::test]
    async fn xrange_over_missing_key_is_empty() {
        let ks = Keyspace::new();
        assert_eq!(ks.xrange("missing", EntryId::MIN, EntryId::MAX).await.unwrap(), vec![]);
    }

    #[tokio::test(start_paused = true)]
    async fn blpop_returns_none_on_timeout() {
        let ks = Keyspace::new();
        assert_eq!(ks.blpop("q", 0.05).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn blpop_wakes_up_on_rpush() {
        let ks = Arc::new(Keyspace::new());
        let waiter = {
            let ks = Arc::clone(&ks);
            tokio::spawn(async move { ks.blpop("q", 0.0).await })
        };

        tokio::task::yield_now().await;
        ks.rpush("q", vec![Bytes::from_static(b"item")]).await.unwrap();

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"item")));
    }
}
