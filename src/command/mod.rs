//! The command set: per-command parsing, validation, and execution.

mod exec;
mod parse;

pub use exec::Dispatcher;
pub use parse::parse;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping(Option<bytes::Bytes>),
    Echo(bytes::Bytes),
    Get(String),
    Set { key: String, value: bytes::Bytes, px_ms: Option<u64> },
    Incr(String),
    Decr(String),
    Del(Vec<String>),
    Type(String),
    Keys,
    Rpush { key: String, values: Vec<bytes::Bytes> },
    Lpush { key: String, values: Vec<bytes::Bytes> },
    Llen(String),
    Lpop { key: String, count: Option<usize> },
    Lrange { key: String, start: i64, end: i64 },
    Blpop { key: String, timeout_secs: f64 },
    Xadd { key: String, id: String, fields: Vec<(String, String)> },
    Xrange { key: String, start: String, end: String },
    Xread { block_ms: Option<u64>, keys: Vec<String>, ids: Vec<String> },
    Multi,
    Exec,
    Discard,
    Info(Option<String>),
    ConfigGet(String),
    Replconf(Vec<String>),
    Psync,
    Wait { num_replicas: i64, timeout_ms: i64 },
}

impl Command {
    /// Commands flagged for replication fan-out to attached replicas. `RPOP`
    /// has no parsing or execution contract here (see `DESIGN.md`), so it's
    /// absent from this set.
    ///
    /// `MULTI`/`EXEC`/`DISCARD` are deliberately absent: they're control
    /// commands the connection handler routes around this check entirely
    /// (never reaching `Dispatcher::execute`), and a transaction's fan-out is
    /// the synthetic `MULTI`/`EXEC` wrapper `connection::run_exec` sends
    /// around its queued commands' own replication events, not the literal
    /// control command bytes a client sent.
    pub fn is_replicated(&self) -> bool {
        matches!(
            self,
            Command::Set { .. }
                | Command::Del(_)
                | Command::Incr(_)
                | Command::Decr(_)
                | Command::Lpush { .. }
                | Command::Rpush { .. }
                | Command::Lpop { .. }
                | Command::Xadd { .. }
        )
    }
}
