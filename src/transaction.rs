//! Per-connection transaction buffer: MULTI queues commands, EXEC commits
//! them atomically against the shared keyspace.

use bytes::Bytes;

use crate::command::Command;
use crate::error::CommandError;

const QUEUE_CAP: usize = 200;

#[derive(Default)]
pub struct TransactionState {
    in_transaction: bool,
    queue: Vec<(Command, Vec<Bytes>)>,
}

impl TransactionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// `MULTI`.
    pub fn begin(&mut self) -> Result<(), CommandError> {
        if self.in_transaction {
            return Err(CommandError::MultiNested);
        }
        self.in_transaction = true;
        Ok(())
    }

    /// `DISCARD`: drops the queue.
    pub fn discard(&mut self) -> Result<(), CommandError> {
        if !self.in_transaction {
            return Err(CommandError::DiscardWithoutMulti);
        }
        self.in_transaction = false;
        self.queue.clear();
        Ok(())
    }

    /// Queues an already-validated command, replying `+QUEUED` on success.
    pub fn enqueue(&mut self, command: Command, raw_args: Vec<Bytes>) -> Result<(), CommandError> {
        if self.queue.len() >= QUEUE_CAP {
            return Err(CommandError::QueueFull);
        }
        self.queue.push((command, raw_args));
        Ok(())
    }

    /// `EXEC`: snapshots and clears the queue for the caller to run against
    /// the keyspace. Fails if not inside a transaction.
    pub fn take_for_exec(&mut self) -> Result<Vec<(Command, Vec<Bytes>)>, CommandError> {
        if !self.in_transaction {
            return Err(CommandError::ExecWithoutMulti);
        }
        self.in_transaction = false;
        Ok(std::mem::take(&mut self.queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    #[test]
    fn multi_then_multi_is_nested_error() {
        let mut tx = TransactionState::new();
        tx.begin().unwrap();
        assert_eq!(tx.begin().unwrap_err(), CommandError::MultiNested);
    }

    #[test]
    fn exec_without_multi_errors() {
        let mut tx = TransactionState::new();
        assert_eq!(tx.take_for_exec().unwrap_err(), CommandError::ExecWithoutMulti);
    }

    #[test]
    fn discard_without_multi_errors() {
        let mut tx = TransactionState::new();
        assert_eq!(tx.discard().unwrap_err(), CommandError::DiscardWithoutMulti);
    }

    #[test]
    fn discard_clears_queue() {
        let mut tx = TransactionState::new();
        tx.begin().unwrap();
        tx.enqueue(Command::Ping(None), vec![]).unwrap();
        tx.discard().unwrap();
        assert!(!tx.in_transaction());
        tx.begin().unwrap();
        assert_eq!(tx.take_for_exec().unwrap().len(), 0);
    }

    #[test]
    fn queue_cap_is_enforced() {
        let mut tx = TransactionState::new();
        tx.begin().unwrap();
        for _ in 0..200 {
            tx.enqueue(Command::Ping(None), vec![]).unwrap();
        }
        assert_eq!(tx.enqueue(Command::Ping(None), vec![]).unwrap_err(), CommandError::QueueFull);
    }
}
