use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CommandError;

/// A stream entry identifier: `(milliseconds, sequence)`, totally ordered
/// lexicographically on the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    pub const MIN: EntryId = EntryId { ms: 0, seq: 0 };
    pub const MAX: EntryId = EntryId { ms: u64::MAX, seq: u64::MAX };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    pub fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((ms, seq)) => {
                let ms = ms.parse().map_err(|_| CommandError::Other("Invalid stream ID specified as stream command argument".to_string()))?;
                let seq = seq.parse().map_err(|_| CommandError::Other("Invalid stream ID specified as stream command argument".to_string()))?;
                Ok(EntryId { ms, seq })
            }
            None => {
                let ms = s.parse().map_err(|_| CommandError::Other("Invalid stream ID specified as stream command argument".to_string()))?;
                Ok(EntryId { ms, seq: 0 })
            }
        }
    }
}

/// How an XADD caller requested the new entry's ID.
pub enum RequestedId {
    /// `*`: auto-generate both ms and seq.
    Auto,
    /// `ms-*`: caller-supplied ms, auto-generate seq.
    AutoSeq(u64),
    /// `ms-seq`: fully literal.
    Literal(EntryId),
}

impl RequestedId {
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        if raw == "*" {
            return Ok(RequestedId::Auto);
        }

        if let Some((ms, seq)) = raw.split_once('-') {
            if seq == "*" {
                let ms: u64 = ms
                    .parse()
                    .map_err(|_| CommandError::Other("Invalid stream ID specified as stream command argument".to_string()))?;
                return Ok(RequestedId::AutoSeq(ms));
            }
        }

        Ok(RequestedId::Literal(raw.parse()?))
    }
}

/// One append-only entry: an ID plus an insertion-ordered field→value map.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: EntryId,
    pub fields: Vec<(String, String)>,
}

/// An append-only, strictly-ordered sequence of entries.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    entries: Vec<Entry>,
}

impl Stream {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn last_id(&self) -> EntryId {
        self.entries.last().map(|e| e.id).unwrap_or(EntryId::MIN)
    }

    /// Resolves the effective ID for a new entry and, if valid, appends it.
    /// Entry-ID validation and append happen atomically under the caller's
    /// lock.
    pub fn append(&mut self, requested: RequestedId, fields: Vec<(String, String)>) -> Result<EntryId, CommandError> {
        let last = self.last_id();

        let id = match requested {
            RequestedId::Auto => {
                let ms = EntryId::now_ms();
                let seq = if ms == last.ms { last.seq + 1 } else { 0 };
                EntryId::new(ms, seq)
            }
            RequestedId::AutoSeq(ms) => {
                let seq = if ms == last.ms {
                    last.seq + 1
                } else if ms > last.ms {
                    if ms == 0 { 1 } else { 0 }
                } else {
                    return Err(CommandError::StreamIdTooSmall);
                };
                EntryId::new(ms, seq)
            }
            RequestedId::Literal(id) => {
                if id == EntryId::MIN {
                    return Err(CommandError::StreamIdZero);
                }
                if id <= last {
                    return Err(CommandError::StreamIdTooSmall);
                }
                id
            }
        };

        if id == EntryId::MIN {
            return Err(CommandError::StreamIdZero);
        }

        self.entries.push(Entry { id, fields });
        Ok(id)
    }

    /// Entries with `start <= id <= end`, as used by XRANGE.
    pub fn range(&self, start: EntryId, end: EntryId) -> Vec<&Entry> {
        self.entries
            .iter()
            .filter(|e| e.id >= start && e.id <= end)
            .collect()
    }

    /// Entries with `id > after`, as used by XREAD.
    pub fn after(&self, after: EntryId) -> Vec<&Entry> {
        self.entries.iter().filter(|e| e.id > after).collect()
    }

    pub fn last_entry_id(&self) -> EntryId {
        self.last_id()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses an XRANGE boundary token: `-`/`+`, a bare `ms`, or a literal
/// `ms-seq`.
pub fn parse_range_bound(raw: &str, is_start: bool) -> Result<EntryId, CommandError> {
    match raw {
        "-" => Ok(EntryId::MIN),
        "+" => Ok(EntryId::MAX),
        _ if !raw.contains('-') => {
            let ms: u64 = raw
                .parse()
                .map_err(|_| CommandError::Other("Invalid stream ID specified as stream command argument".to_string()))?;
            Ok(EntryId::new(ms, if is_start { 0 } else { u64::MAX }))
        }
        _ => raw.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_display_and_parse_round_trip() {
        let id = EntryId::new(5, 3);
        assert_eq!(id.to_string(), "5-3");
        assert_eq!("5-3".parse::<EntryId>().unwrap(), id);
    }

    #[test]
    fn append_rejects_non_increasing_literal() {
        let mut stream = Stream::new();
        stream.append(RequestedId::Literal(EntryId::new(1, 1)), vec![]).unwrap();
        let err = stream.append(RequestedId::Literal(EntryId::new(1, 1)), vec![]).unwrap_err();
        assert_eq!(err, CommandError::StreamIdTooSmall);
    }

    #[test]
    fn append_rejects_minimum_id() {
        let mut stream = Stream::new();
        let err = stream.append(RequestedId::Literal(EntryId::MIN), vec![]).unwrap_err();
        assert_eq!(err, CommandError::StreamIdZero);
    }

    #[test]
    fn auto_seq_increments_within_same_ms() {
        let mut stream = Stream::new();
        let first = stream.append(RequestedId::Literal(EntryId::new(5, 0)), vec![]).unwrap();
        let second = stream.append(RequestedId::AutoSeq(5), vec![]).unwrap();
        assert_eq!(first, EntryId::new(5, 0));
        assert_eq!(second, EntryId::new(5, 1));
    }

    #[test]
    fn auto_seq_on_new_ms_zero_enforces_min_id_rule() {
        let mut stream = Stream::new();
        let id = stream.append(RequestedId::AutoSeq(0), vec![]).unwrap();
        assert_eq!(id, EntryId::new(0, 1));
    }

    #[test]
    fn auto_seq_rejects_ms_smaller_than_last() {
        let mut stream = Stream::new();
        stream.append(RequestedId::Literal(EntryId::new(5, 0)), vec![]).unwrap();
        let err = stream.append(RequestedId::AutoSeq(3), vec![]).unwrap_err();
        assert_eq!(err, CommandError::StreamIdTooSmall);
    }

    #[test]
    fn range_is_inclusive() {
        let mut stream = Stream::new();
        stream.append(RequestedId::Literal(EntryId::new(1, 0)), vec![("a".into(), "1".into())]).unwrap();
        stream.append(RequestedId::Literal(EntryId::new(2, 0)), vec![("b".into(), "2".into())]).unwrap();
        let found = stream.range(EntryId::new(1, 0), EntryId::new(1, 0));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, EntryId::new(1, 0));
    }

    #[test]
    fn parse_range_bound_tokens() {
        assert_eq!(parse_range_bound("-", true).unwrap(), EntryId::MIN);
        assert_eq!(parse_range_bound("+", false).unwrap(), EntryId::MAX);
        assert_eq!(parse_range_bound("5", true).unwrap(), EntryId::new(5, 0));
        assert_eq!(parse_range_bound("5", false).unwrap(), EntryId::new(5, u64::MAX));
        assert_eq!(parse_range_bound("5-2", true).unwrap(), EntryId::new(5, 2));
    }
}
