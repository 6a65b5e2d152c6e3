use bytes::Bytes;

use crate::error::CommandError;

use super::Command;

fn utf8(bytes: &Bytes) -> Result<&str, CommandError> {
    std::str::from_utf8(bytes).map_err(|_| CommandError::Syntax)
}

fn arity(name: &str, args: &[Bytes], exact: usize) -> Result<(), CommandError> {
    if args.len() != exact {
        return Err(CommandError::WrongArity(name.to_string()));
    }
    Ok(())
}

fn at_least(name: &str, args: &[Bytes], min: usize) -> Result<(), CommandError> {
    if args.len() < min {
        return Err(CommandError::WrongArity(name.to_string()));
    }
    Ok(())
}

/// Parses one RESP request (already split into bulk-string arguments) into a
/// `Command`, performing arity and syntax checks. Type errors (WRONGTYPE)
/// can't be known until execution and are left to the keyspace.
pub fn parse(args: &[Bytes]) -> Result<Command, CommandError> {
    let (name, rest) = args.split_first().ok_or(CommandError::Syntax)?;
    let name = utf8(name)?.to_ascii_uppercase();

    match name.as_str() {
        "PING" => {
            if rest.len() > 1 {
                return Err(CommandError::WrongArity("ping".to_string()));
            }
            Ok(Command::Ping(rest.first().cloned()))
        }
        "ECHO" => {
            arity("echo", rest, 1)?;
            Ok(Command::Echo(rest[0].clone()))
        }
        "GET" => {
            arity("get", rest, 1)?;
            Ok(Command::Get(utf8(&rest[0])?.to_string()))
        }
        "SET" => {
            at_least("set", rest, 2)?;
            let key = utf8(&rest[0])?.to_string();
            let value = rest[1].clone();
            let px_ms = parse_set_options(&rest[2..])?;
            Ok(Command::Set { key, value, px_ms })
        }
        "INCR" => {
            arity("incr", rest, 1)?;
            Ok(Command::Incr(utf8(&rest[0])?.to_string()))
        }
        "DECR" => {
            arity("decr", rest, 1)?;
            Ok(Command::Decr(utf8(&rest[0])?.to_string()))
        }
        "DEL" => {
            at_least("del", rest, 1)?;
            let keys = rest.iter().map(|k| utf8(k).map(str::to_string)).collect::<Result<_, _>>()?;
            Ok(Command::Del(keys))
        }
        "TYPE" => {
            arity("type", rest, 1)?;
            Ok(Command::Type(utf8(&rest[0])?.to_string()))
        }
        "KEYS" => {
            at_least("keys", rest, 1)?;
            Ok(Command::Keys)
        }
        "RPUSH" => {
            at_least("rpush", rest, 2)?;
            Ok(Command::Rpush { key: utf8(&rest[0])?.to_string(), values: rest[1..].to_vec() })
        }
        "LPUSH" => {
            at_least("lpush", rest, 2)?;
            Ok(Command::Lpush { key: utf8(&rest[0])?.to_string(), values: rest[1..].to_vec() })
        }
        "LLEN" => {
            arity("llen", rest, 1)?;
            Ok(Command::Llen(utf8(&rest[0])?.to_string()))
        }
        "LPOP" => {
            at_least("lpop", rest, 1)?;
            if rest.len() > 2 {
                return Err(CommandError::WrongArity("lpop".to_string()));
            }
            let key = utf8(&rest[0])?.to_string();
            let count = rest
                .get(1)
                .map(|c| utf8(c)?.parse::<usize>().map_err(|_| CommandError::NotAnInteger))
                .transpose()?;
            Ok(Command::Lpop { key, count })
        }
        "LRANGE" => {
            arity("lrange", rest, 3)?;
            let key = utf8(&rest[0])?.to_string();
            let start = utf8(&rest[1])?.parse().map_err(|_| CommandError::NotAnInteger)?;
            let end = utf8(&rest[2])?.parse().map_err(|_| CommandError::NotAnInteger)?;
            Ok(Command::Lrange { key, start, end })
        }
        "BLPOP" => {
            arity("blpop", rest, 2)?;
            let key = utf8(&rest[0])?.to_string();
            let timeout_secs = utf8(&rest[1])?.parse().map_err(|_| CommandError::NotAnInteger)?;
            Ok(Command::Blpop { key, timeout_secs })
        }
        "XADD" => {
            at_least("xadd", rest, 4)?;
            let key = utf8(&rest[0])?.to_string();
            let id = utf8(&rest[1])?.to_string();
            let field_args = &rest[2..];
            if field_args.len() % 2 != 0 {
                return Err(CommandError::WrongArity("xadd".to_string()));
            }
            let mut fields = Vec::with_capacity(field_args.len() / 2);
            for pair in field_args.chunks_exact(2) {
                fields.push((utf8(&pair[0])?.to_string(), utf8(&pair[1])?.to_string()));
            }
            Ok(Command::Xadd { key, id, fields })
        }
        "XRANGE" => {
            arity("xrange", rest, 3)?;
            Ok(Command::Xrange {
                key: utf8(&rest[0])?.to_string(),
                start: utf8(&rest[1])?.to_string(),
                end: utf8(&rest[2])?.to_string(),
            })
        }
        "XREAD" => parse_xread(rest),
        "MULTI" => {
            arity("multi", rest, 0)?;
            Ok(Command::Multi)
        }
        "EXEC" => {
            arity("exec", rest, 0)?;
            Ok(Command::Exec)
        }
        "DISCARD" => {
            arity("discard", rest, 0)?;
            Ok(Command::Discard)
        }
        "INFO" => {
            if rest.len() > 1 {
                return Err(CommandError::WrongArity("info".to_string()));
            }
            Ok(Command::Info(rest.first().map(|s| utf8(s)).transpose()?.map(str::to_string)))
        }
        "CONFIG" => {
            at_least("config", rest, 2)?;
            match utf8(&rest[0])?.to_ascii_uppercase().as_str() {
                "GET" => Ok(Command::ConfigGet(utf8(&rest[1])?.to_string())),
                _ => Err(CommandError::Syntax),
            }
        }
        "REPLCONF" => {
            let parts = rest.iter().map(|a| utf8(a).map(str::to_string)).collect::<Result<_, _>>()?;
            Ok(Command::Replconf(parts))
        }
        "PSYNC" => {
            arity("psync", rest, 2)?;
            Ok(Command::Psync)
        }
        "WAIT" => {
            arity("wait", rest, 2)?;
            let num_replicas = utf8(&rest[0])?.parse().map_err(|_| CommandError::NotAnInteger)?;
            let timeout_ms = utf8(&rest[1])?.parse().map_err(|_| CommandError::NotAnInteger)?;
            Ok(Command::Wait { num_replicas, timeout_ms })
        }
        other => Err(CommandError::UnknownCommand(other.to_ascii_lowercase())),
    }
}

fn parse_set_options(options: &[Bytes]) -> Result<Option<u64>, CommandError> {
    if options.is_empty() {
        return Ok(None);
    }
    if options.len() != 2 || !utf8(&options[0])?.eq_ignore_ascii_case("PX") {
        return Err(CommandError::Syntax);
    }
    let ms = utf8(&options[1])?.parse().map_err(|_| CommandError::NotAnInteger)?;
    Ok(Some(ms))
}

fn parse_xread(args: &[Bytes]) -> Result<Command, CommandError> {
    let mut block_ms = None;
    let mut rest = args;

    if rest.first().map(|a| utf8(a)).transpose()?.map(|s| s.eq_ignore_ascii_case("BLOCK")) == Some(true) {
        at_least("xread", rest, 2)?;
        block_ms = Some(utf8(&rest[1])?.parse().map_err(|_| CommandError::NotAnInteger)?);
        rest = &rest[2..];
    }

    at_least("xread", rest, 3)?;
    if !utf8(&rest[0])?.eq_ignore_ascii_case("STREAMS") {
        return Err(CommandError::Syntax);
    }
    let rest = &rest[1..];
    if rest.len() % 2 != 0 {
        return Err(CommandError::WrongArity("xread".to_string()));
    }

    let half = rest.len() / 2;
    let keys = rest[..half].iter().map(|k| utf8(k).map(str::to_string)).collect::<Result<_, _>>()?;
    let ids = rest[half..].iter().map(|k| utf8(k).map(str::to_string)).collect::<Result<_, _>>()?;

    Ok(Command::Xread { block_ms, keys, ids })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(values: &[&str]) -> Vec<Bytes> {
        values.iter().map(|v| Bytes::copy_from_slice(v.as_bytes())).collect()
    }

    #[test]
    fn parses_ping_without_message() {
        assert_eq!(parse(&bulk(&["PING"])).unwrap(), Command::Ping(None));
    }

    #[test]
    fn parses_set_with_px() {
        let cmd = parse(&bulk(&["SET", "k", "v", "PX", "100"])).unwrap();
        assert_eq!(cmd, Command::Set { key: "k".into(), value: Bytes::from_static(b"v"), px_ms: Some(100) });
    }

    #[test]
    fn set_rejects_unknown_option() {
        assert_eq!(parse(&bulk(&["SET", "k", "v", "EX", "1"])).unwrap_err(), CommandError::Syntax);
    }

    #[test]
    fn get_wrong_arity() {
        assert_eq!(parse(&bulk(&["GET"])).unwrap_err(), CommandError::WrongArity("get".to_string()));
    }

    #[test]
    fn parses_xadd_fields() {
        let cmd = parse(&bulk(&["XADD", "s", "1-1", "a", "1", "b", "2"])).unwrap();
        assert_eq!(
            cmd,
            Command::Xadd {
                key: "s".into(),
                id: "1-1".into(),
                fields: vec![("a".into(), "1".into()), ("b".into(), "2".into())],
            }
        );
    }

    #[test]
    fn parses_xread_with_block() {
        let cmd = parse(&bulk(&["XREAD", "BLOCK", "0", "STREAMS", "s1", "s2", "0-0", "1-0"])).unwrap();
        assert_eq!(
            cmd,
            Command::Xread {
                block_ms: Some(0),
                keys: vec!["s1".into(), "s2".into()],
                ids: vec!["0-0".into(), "1-0".into()],
            }
        );
    }

    #[test]
    fn unknown_command_is_reported_lowercase() {
        match parse(&bulk(&["FROB"])) {
            Err(CommandError::UnknownCommand(name)) => assert_eq!(name, "frob"),
            other => panic!("expected unknown command, got {:?}", other),
        }
    }
}
