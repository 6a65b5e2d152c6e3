use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::CommandError;
use crate::metadata::ServerMetadata;
use crate::resp::RespValue;
use crate::store::{parse_range_bound, EntryId, Keyspace, RequestedId};

use super::Command;

/// Runs a parsed `Command` against the shared keyspace and, for the handful
/// of commands that need it, the server's metadata. One `Dispatcher` is
/// shared across every connection; all the state it touches is behind its
/// own lock.
pub struct Dispatcher {
    keyspace: Arc<Keyspace>,
    metadata: Arc<ServerMetadata>,
}

impl Dispatcher {
    pub fn new(keyspace: Arc<Keyspace>, metadata: Arc<ServerMetadata>) -> Self {
        Self { keyspace, metadata }
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.keyspace
    }

    pub fn metadata(&self) -> &Arc<ServerMetadata> {
        &self.metadata
    }

    /// Executes one command, returning the reply to send back. `REPLCONF
    /// ACK` and the `PSYNC` handshake carry connection-specific state (which
    /// socket to upgrade, which replica id an ACK belongs to) that this
    /// dispatcher doesn't have; the connection handler intercepts those two
    /// before reaching here.
    pub async fn execute(&self, command: &Command) -> Result<RespValue, CommandError> {
        match command {
            Command::Ping(message) => Ok(match message {
                Some(msg) => RespValue::bulk(msg.clone()),
                None => RespValue::simple("PONG"),
            }),
            Command::Echo(message) => Ok(RespValue::bulk(message.clone())),
            Command::Get(key) => Ok(match self.keyspace.get(key).await? {
                Some(bytes) => RespValue::bulk(bytes),
                None => RespValue::Null,
            }),
            Command::Set { key, value, px_ms } => {
                let expires_at = px_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
                self.keyspace.set(key.clone(), value.clone(), expires_at).await;
                Ok(RespValue::simple("OK"))
            }
            Command::Incr(key) => self.keyspace.incr_by(key, 1).await.map(RespValue::integer),
            Command::Decr(key) => self.keyspace.incr_by(key, -1).await.map(RespValue::integer),
            Command::Del(keys) => {
                let mut removed = 0i64;
                for key in keys {
                    if self.keyspace.del(key).await {
                        removed += 1;
                    }
                }
                Ok(RespValue::integer(removed))
            }
            Command::Type(key) => Ok(RespValue::simple(self.keyspace.type_of(key).await)),
            Command::Keys => {
                let keys = self.keyspace.keys().await;
                Ok(RespValue::array(keys.iter().map(|k| RespValue::from(k.as_str())).collect()))
            }
            Command::Rpush { key, values } => {
                self.keyspace.rpush(key, values.clone()).await.map(|n| RespValue::integer(n as i64))
            }
            Command::Lpush { key, values } => {
                self.keyspace.lpush(key, values.clone()).await.map(|n| RespValue::integer(n as i64))
            }
            Command::Llen(key) => self.keyspace.llen(key).await.map(|n| RespValue::integer(n as i64)),
            Command::Lpop { key, count } => {
                let values = self.keyspace.lpop(key, count.unwrap_or(1)).await?;
                Ok(match count {
                    Some(_) => RespValue::array(values.into_iter().map(RespValue::bulk).collect()),
                    None => match values.into_iter().next() {
                        Some(v) => RespValue::bulk(v),
                        None => RespValue::Null,
                    },
                })
            }
            Command::Lrange { key, start, end } => {
                let values = self.keyspace.lrange(key, *start, *end).await?;
                Ok(RespValue::array(values.into_iter().map(RespValue::bulk).collect()))
            }
            Command::Blpop { key, timeout_secs } => {
                match self.keyspace.blpop(key, *timeout_secs).await? {
                    Some(value) => Ok(RespValue::array(vec![RespValue::from(key.as_str()), RespValue::bulk(value)])),
                    None => Ok(RespValue::null_array()),
                }
            }
            Command::Xadd { key, id, fields } => {
                let requested = RequestedId::parse(id)?;
                let id = self.keyspace.add_to_stream(key, requested, fields.clone()).await?;
                Ok(RespValue::from(id.to_string().as_str()))
            }
            Command::Xrange { key, start, end } => {
                let start = parse_range_bound(start, true)?;
                let end = parse_range_bound(end, false)?;
                let entries = self.keyspace.xrange(key, start, end).await?;
                Ok(RespValue::array(entries.iter().map(entry_reply).collect()))
            }
            Command::Xread { block_ms, keys, ids } => self.execute_xread(*block_ms, keys, ids).await,
            Command::Multi | Command::Exec | Command::Discard => {
                // Transaction control never reaches the dispatcher: the
                // connection handler intercepts these against its own
                // `TransactionState` before a command is ever parsed this far.
                Err(CommandError::Other("transaction commands must be handled by the connection".to_string()))
            }
            Command::Info(_) => {
                let role = if self.metadata.is_replica() { "slave" } else { "master" };
                let offset = self.metadata.master_repl_offset().await;
                let body = format!(
                    "# Replication\r\nrole:{role}\r\nmaster_replid:{}\r\nmaster_repl_offset:{offset}\r\n",
                    self.metadata.master_replid
                );
                Ok(RespValue::from(body.as_str()))
            }
            Command::ConfigGet(param) => {
                let value = match param.to_ascii_lowercase().as_str() {
                    "dir" => Some(self.metadata.dir.clone()),
                    "dbfilename" => Some(self.metadata.dbfilename.clone()),
                    _ => None,
                };
                Ok(match value {
                    Some(v) => RespValue::array(vec![RespValue::from(param.as_str()), RespValue::from(v.as_str())]),
                    None => RespValue::empty_array(),
                })
            }
            Command::Replconf(_) => Ok(RespValue::simple("OK")),
            Command::Psync => Err(CommandError::Other("PSYNC must be handled by the connection".to_string())),
            Command::Wait { num_replicas, timeout_ms } => self.execute_wait(*num_replicas, *timeout_ms).await,
        }
    }

    async fn execute_xread(
        &self,
        block_ms: Option<u64>,
        keys: &[String],
        ids: &[String],
    ) -> Result<RespValue, CommandError> {
        let mut after_ids = Vec::with_capacity(keys.len());
        for (key, id) in keys.iter().zip(ids) {
            after_ids.push(if id == "$" {
                self.keyspace.latest_stream_id(key).await?
            } else {
                id.parse()?
            });
        }

        match block_ms {
            None => {
                let streams = self.collect_xread(keys, &after_ids).await?;
                Ok(if streams.is_empty() { RespValue::null_array() } else { RespValue::array(streams) })
            }
            Some(0) => loop {
                let streams = self.collect_xread(keys, &after_ids).await?;
                if !streams.is_empty() {
                    return Ok(RespValue::array(streams));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
            Some(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                let streams = self.collect_xread(keys, &after_ids).await?;
                Ok(if streams.is_empty() { RespValue::null_array() } else { RespValue::array(streams) })
            }
        }
    }

    async fn collect_xread(&self, keys: &[String], after_ids: &[EntryId]) -> Result<Vec<RespValue>, CommandError> {
        let mut streams = Vec::new();
        for (key, after) in keys.iter().zip(after_ids) {
            let entries = self.keyspace.xread_after(key, *after).await?;
            if !entries.is_empty() {
                streams.push(RespValue::array(vec![
                    RespValue::from(key.as_str()),
                    RespValue::array(entries.iter().map(entry_reply).collect()),
                ]));
            }
        }
        Ok(streams)
    }

    async fn execute_wait(&self, num_replicas: i64, timeout_ms: i64) -> Result<RespValue, CommandError> {
        let connected = self.metadata.replica_count().await;

        if num_replicas <= 0 || connected == 0 {
            return Ok(RespValue::integer(0));
        }

        let required = (num_replicas as usize).min(connected);
        let (wait_id, target_offset, rx) = self.metadata.register_wait(required).await;

        if target_offset == 0 {
            // Nothing's been written since start; every connected replica
            // already satisfies an offset of zero.
            self.metadata.timeout_wait(wait_id).await;
            return Ok(RespValue::integer(connected as i64));
        }

        self.metadata.fan_out(RespValue::command(&[b"REPLCONF", b"GETACK", b"*"]).encode_to_vec().into()).await;

        let timeout = Duration::from_millis(timeout_ms.max(0) as u64);
        let satisfied = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(count)) => count,
            Ok(Err(_)) => self.metadata.timeout_wait(wait_id).await,
            Err(_) => self.metadata.timeout_wait(wait_id).await,
        };

        Ok(RespValue::integer(satisfied as i64))
    }
}

fn entry_reply(entry: &crate::store::Entry) -> RespValue {
    let fields = entry
        .fields
        .iter()
        .flat_map(|(k, v)| [RespValue::from(k.as_str()), RespValue::from(v.as_str())])
        .collect();
    RespValue::array(vec![RespValue::from(entry.id.to_string().as_str()), RespValue::array(fields)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Role;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(Keyspace::new()),
            Arc::new(ServerMetadata::new(Role::Primary, ".".into(), "dump.rdb".into())),
        )
    }

    #[tokio::test]
    async fn ping_without_message() {
        let d = dispatcher();
        assert_eq!(d.execute(&Command::Ping(None)).await.unwrap(), RespValue::simple("PONG"));
    }

    #[tokio::test]
    async fn set_then_get() {
        let d = dispatcher();
        d.execute(&Command::Set { key: "k".into(), value: Bytes::from_static(b"v"), px_ms: None }).await.unwrap();
        assert_eq!(d.execute(&Command::Get("k".into())).await.unwrap(), RespValue::bulk(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn incr_then_decr() {
        let d = dispatcher();
        assert_eq!(d.execute(&Command::Incr("c".into())).await.unwrap(), RespValue::integer(1));
        assert_eq!(d.execute(&Command::Decr("c".into())).await.unwrap(), RespValue::integer(0));
    }

    #[tokio::test]
    async fn xadd_then_xrange() {
        let d = dispatcher();
        d.execute(&Command::Xadd { key: "s".into(), id: "1-1".into(), fields: vec![("a".into(), "1".into())] })
            .await
            .unwrap();
        let reply = d
            .execute(&Command::Xrange { key: "s".into(), start: "-".into(), end: "+".into() })
            .await
            .unwrap();
        match reply {
            RespValue::Array(entries) => assert_eq!(entries.len(), 1),
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn xread_without_block_returns_null_array_when_nothing_matches() {
        let d = dispatcher();
        let reply = d
            .execute(&Command::Xread { block_ms: None, keys: vec!["s".into()], ids: vec!["0-0".into()] })
            .await
            .unwrap();
        assert_eq!(reply, RespValue::null_array());
    }

    #[tokio::test]
    async fn xread_returns_entries_past_the_given_id() {
        let d = dispatcher();
        d.execute(&Command::Xadd { key: "s".into(), id: "5-1".into(), fields: vec![("a".into(), "1".into())] })
            .await
            .unwrap();
        let reply = d
            .execute(&Command::Xread { block_ms: None, keys: vec!["s".into()], ids: vec!["0-0".into()] })
            .await
            .unwrap();
        match reply {
            RespValue::Array(streams) => assert_eq!(streams.len(), 1),
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn wait_with_no_replicas_returns_zero() {
        let d = dispatcher();
        assert_eq!(d.execute(&Command::Wait { num_replicas: 1, timeout_ms: 10 }).await.unwrap(), RespValue::integer(0));
    }

    #[tokio::test]
    async fn config_get_unknown_param_is_empty_array() {
        let d = dispatcher();
        assert_eq!(d.execute(&Command::ConfigGet("maxmemory".into())).await.unwrap(), RespValue::empty_array());
    }
}
