//! Per-connection handling: one reader task parses requests and drives
//! execution, one writer task owns the socket's write half. The two are
//! joined by an unbounded channel of already-encoded replies, the same split
//! the acceptor's connections use whether the peer turns out to be an
//! ordinary client or, after PSYNC, a replica.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::command::{self, Command, Dispatcher};
use crate::error::CommandError;
use crate::rdb;
use crate::replication;
use crate::resp::{read_request, RespReadError, RespValue};
use crate::transaction::TransactionState;

pub fn spawn(socket: TcpStream, peer_addr: SocketAddr, dispatcher: Arc<Dispatcher>) {
    tokio::spawn(async move {
        let (read_half, write_half) = socket.into_split();
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();

        let writer_task = tokio::spawn(write_loop(write_half, rx));
        let reader_task = tokio::spawn(read_loop(read_half, peer_addr, dispatcher, tx));

        let _ = tokio::join!(reader_task, writer_task);
        info!(%peer_addr, "connection closed");
    });
}

async fn write_loop<W>(write_half: W, mut rx: mpsc::UnboundedReceiver<Bytes>)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(write_half);
    while let Some(payload) = rx.recv().await {
        if let Err(err) = tokio::io::AsyncWriteExt::write_all(&mut writer, &payload).await {
            warn!(%err, "error writing to connection");
            return;
        }
        if let Err(err) = tokio::io::AsyncWriteExt::flush(&mut writer).await {
            warn!(%err, "error flushing connection");
            return;
        }
    }
}

async fn read_loop<R>(
    read_half: R,
    peer_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    tx: mpsc::UnboundedSender<Bytes>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(read_half);
    let connection_id = Uuid::new_v4().simple().to_string();
    let mut transaction = TransactionState::new();
    let mut is_replication_conn = false;

    loop {
        let (args, _byte_len) = match read_request(&mut reader).await {
            Ok(parsed) => parsed,
            Err(RespReadError::Eof) => break,
            Err(err) => {
                warn!(%err, %peer_addr, "protocol error, closing connection");
                break;
            }
        };

        if args.is_empty() {
            continue;
        }

        if is_replication_conn && is_ack(&args) {
            if let Some(offset) = parse_ack_offset(&args) {
                dispatcher.metadata().record_ack(&connection_id, offset).await;
            }
            continue;
        }

        let command = match command::parse(&args) {
            Ok(command) => command,
            Err(err) => {
                let _ = tx.send(Bytes::from(err.to_resp().encode_to_vec()));
                continue;
            }
        };

        if matches!(command, Command::Psync) {
            if handle_psync(&dispatcher, &connection_id, &tx).await.is_ok() {
                is_replication_conn = true;
            }
            continue;
        }

        if matches!(command, Command::Replconf(_)) {
            is_replication_conn = true;
        }

        let was_queuing = transaction.in_transaction() && !matches!(command, Command::Multi | Command::Exec | Command::Discard);

        let reply = handle_request(&dispatcher, &mut transaction, &command, &args).await;
        let succeeded = !matches!(reply, RespValue::Error(_));

        if tx.send(Bytes::from(reply.encode_to_vec())).is_err() {
            break;
        }

        if succeeded && !was_queuing && command.is_replicated() && !dispatcher.metadata().is_replica() {
            dispatcher.metadata().fan_out(replication::encode_for_replication(&args)).await;
        }
    }
}

/// Runs one command against the dispatcher/transaction state, returning the
/// reply to send back.
async fn handle_request(
    dispatcher: &Dispatcher,
    transaction: &mut TransactionState,
    command: &Command,
    raw_args: &[Bytes],
) -> RespValue {
    match command {
        Command::Multi => resolve(transaction.begin().map(|_| RespValue::simple("OK"))),
        Command::Discard => resolve(transaction.discard().map(|_| RespValue::simple("OK"))),
        Command::Exec => run_exec(dispatcher, transaction).await,
        _ if transaction.in_transaction() => {
            resolve(transaction.enqueue(command.clone(), raw_args.to_vec()).map(|_| RespValue::simple("QUEUED")))
        }
        Command::Replconf(parts) => handle_replconf(dispatcher, parts).await,
        _ => resolve(dispatcher.execute(command).await),
    }
}

fn resolve(result: Result<RespValue, CommandError>) -> RespValue {
    result.unwrap_or_else(|err| err.to_resp())
}

/// Executes the queued commands in order, wrapping the replicated ones in
/// `MULTI`/`EXEC` markers on the wire so a replica applies them as the same
/// transaction.
async fn run_exec(dispatcher: &Dispatcher, transaction: &mut TransactionState) -> RespValue {
    match transaction.take_for_exec() {
        Ok(queued) => {
            let is_replica = dispatcher.metadata().is_replica();
            let replicated: Vec<_> = queued.iter().filter(|(c, _)| c.is_replicated()).collect();

            if !replicated.is_empty() && !is_replica {
                dispatcher.metadata().fan_out(replication::encode_for_replication(&[Bytes::from_static(b"MULTI")])).await;
            }

            let mut replies = Vec::with_capacity(queued.len());
            for (command, raw_args) in &queued {
                let reply = resolve(dispatcher.execute(command).await);
                let succeeded = !matches!(reply, RespValue::Error(_));
                replies.push(Bytes::from(reply.encode_to_vec()));

                if succeeded && command.is_replicated() && !is_replica {
                    dispatcher.metadata().fan_out(replication::encode_for_replication(raw_args)).await;
                }
            }

            if !replicated.is_empty() && !is_replica {
                dispatcher.metadata().fan_out(replication::encode_for_replication(&[Bytes::from_static(b"EXEC")])).await;
            }

            RespValue::array_of_already_encoded(replies)
        }
        Err(err) => err.to_resp(),
    }
}

async fn handle_replconf(dispatcher: &Dispatcher, parts: &[String]) -> RespValue {
    if parts.first().map(|s| s.eq_ignore_ascii_case("GETACK")).unwrap_or(false) {
        let offset = dispatcher.metadata().command_processed().await;
        return RespValue::command(&[b"REPLCONF", b"ACK", offset.to_string().as_bytes()]);
    }
    RespValue::simple("OK")
}

async fn handle_psync(dispatcher: &Dispatcher, connection_id: &str, tx: &mpsc::UnboundedSender<Bytes>) -> Result<(), ()> {
    let metadata = dispatcher.metadata();
    let offset = metadata.master_repl_offset().await;
    let header = format!("+FULLRESYNC {} {}\r\n", metadata.master_replid, offset);

    let mut payload = header.into_bytes();
    payload.extend_from_slice(&rdb::empty_rdb_frame());

    if tx.send(Bytes::from(payload)).is_err() {
        return Err(());
    }

    metadata.register_replica(connection_id.to_string(), tx.clone()).await;
    Ok(())
}

fn is_ack(args: &[Bytes]) -> bool {
    args.len() == 3 && args[0].eq_ignore_ascii_case(b"REPLCONF") && args[1].eq_ignore_ascii_case(b"ACK")
}

fn parse_ack_offset(args: &[Bytes]) -> Option<u64> {
    std::str::from_utf8(&args[2]).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Role, ServerMetadata};
    use crate::resp::write_value;
    use crate::store::Keyspace;

    fn peer_addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    /// A `MULTI; SET; EXEC` sequence must fan out to replicas exactly once
    /// each, wrapped by `run_exec`'s own `MULTI`/`EXEC` markers — not also as
    /// the literal control commands a client sent, which would double them.
    #[tokio::test]
    async fn transaction_fan_out_does_not_duplicate_multi_and_exec() {
        let keyspace = Arc::new(Keyspace::new());
        let metadata = Arc::new(ServerMetadata::new(Role::Primary, ".".into(), "dump.rdb".into()));
        let dispatcher = Arc::new(Dispatcher::new(keyspace, Arc::clone(&metadata)));

        let (replica_tx, mut replica_rx) = mpsc::unbounded_channel();
        metadata.register_replica("replica-1".into(), replica_tx).await;

        let (client, server) = tokio::io::duplex(8192);
        let (server_read, server_write) = tokio::io::split(server);
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();

        tokio::spawn(write_loop(server_write, rx));
        let reader = tokio::spawn(read_loop(server_read, peer_addr(), dispatcher, tx));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        write_value(&mut client_write, &RespValue::command(&[b"MULTI"])).await.unwrap();
        write_value(&mut client_write, &RespValue::command(&[b"SET", b"k", b"v"])).await.unwrap();
        write_value(&mut client_write, &RespValue::command(&[b"EXEC"])).await.unwrap();
        tokio::io::AsyncWriteExt::shutdown(&mut client_write).await.unwrap();

        // Drain the client's own replies so the writer task doesn't stall,
        // then wait for the reader to observe EOF and exit.
        let mut discard = Vec::new();
        let _ = tokio::io::AsyncReadExt::read_to_end(&mut client_read, &mut discard).await;
        let _ = reader.await;

        let mut fanned_out = Vec::new();
        while let Ok(payload) = replica_rx.try_recv() {
            fanned_out.push(payload);
        }

        assert_eq!(
            fanned_out,
            vec![
                Bytes::from_static(b"*1\r\n$5\r\nMULTI\r\n"),
                Bytes::from_static(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n"),
                Bytes::from_static(b"*1\r\n$4\r\nEXEC\r\n"),
            ]
        );
    }
}
