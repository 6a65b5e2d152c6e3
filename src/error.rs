use crate::resp::RespValue;

/// Errors that can surface as a RESP error reply.
///
/// Anything not representable here (I/O failure, internal invariant
/// violation) travels as `anyhow::Error` instead and is logged, never
/// rendered verbatim to a client.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR syntax error")]
    Syntax,

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    StreamIdZero,

    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("ERR MULTI calls can not be nested")]
    MultiNested,

    #[error("ERR transaction queue full")]
    QueueFull,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR {0}")]
    Other(String),
}

impl CommandError {
    pub fn to_resp(&self) -> RespValue {
        RespValue::error(self.to_string())
    }
}
