use std::sync::Arc;

use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::command::{self, Dispatcher};
use crate::error::CommandError;
use crate::metadata::ServerMetadata;
use crate::resp::{read_reply, read_rdb_payload, read_request, write_value, RespValue};
use crate::store::Keyspace;

/// Connects to `primary_addr`, runs the replication handshake, then applies
/// every command the primary sends forever. Returns only on a connection
/// error; the caller decides whether to retry.
pub async fn run(
    primary_addr: String,
    own_port: u16,
    keyspace: Arc<Keyspace>,
    metadata: Arc<ServerMetadata>,
) -> anyhow::Result<()> {
    let stream = TcpStream::connect(&primary_addr).await?;
    let (reader_half, writer_half) = stream.into_split();
    let mut reader = BufReader::new(reader_half);
    let mut writer = BufWriter::new(writer_half);

    handshake(&mut reader, &mut writer, own_port).await?;
    info!(primary = %primary_addr, "replication handshake complete");

    let dispatcher = Dispatcher::new(keyspace, Arc::clone(&metadata));

    loop {
        let (args, byte_len) = match read_request(&mut reader).await {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "primary connection closed");
                return Ok(());
            }
        };

        let command = match command::parse(&args) {
            Ok(command) => command,
            Err(err) => {
                warn!(%err, "primary sent an unparseable command");
                continue;
            }
        };

        if is_getack(&args) {
            let before = metadata.command_processed().await;
            metadata.advance_command_processed(byte_len as u64).await;
            let reply = RespValue::command(&[b"REPLCONF", b"ACK", before.to_string().as_bytes()]);
            write_value(&mut writer, &reply).await?;
            continue;
        }

        metadata.advance_command_processed(byte_len as u64).await;

        if let Err(err) = apply_silently(&dispatcher, &command).await {
            warn!(%err, "error applying replicated command");
        }
    }
}

fn is_getack(args: &[bytes::Bytes]) -> bool {
    args.len() == 3
        && args[0].eq_ignore_ascii_case(b"REPLCONF")
        && args[1].eq_ignore_ascii_case(b"GETACK")
}

/// Applies one replicated command, discarding its reply. `MULTI`/`EXEC` are
/// wire-level markers a primary wraps a transaction's commands in (see
/// `connection::run_exec`); a replica just applies the commands in between,
/// so they're no-ops here.
async fn apply_silently(dispatcher: &Dispatcher, command: &command::Command) -> Result<(), CommandError> {
    match command {
        command::Command::Multi | command::Command::Exec | command::Command::Discard => Ok(()),
        _ => dispatcher.execute(command).await.map(|_| ()),
    }
}

async fn handshake<R, W>(reader: &mut R, writer: &mut W, own_port: u16) -> anyhow::Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    send_and_expect_simple(reader, writer, RespValue::command(&[b"PING"])).await?;

    send_and_expect_simple(
        reader,
        writer,
        RespValue::command(&[b"REPLCONF", b"listening-port", own_port.to_string().as_bytes()]),
    )
    .await?;

    send_and_expect_simple(reader, writer, RespValue::command(&[b"REPLCONF", b"capa", b"psync2"])).await?;

    write_value(writer, &RespValue::command(&[b"PSYNC", b"?", b"-1"])).await?;
    let _fullresync = read_reply(reader).await?;
    let _rdb = read_rdb_payload(reader).await?;

    Ok(())
}

async fn send_and_expect_simple<R, W>(reader: &mut R, writer: &mut W, command: RespValue) -> anyhow::Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    write_value(writer, &command).await?;
    let _reply = read_reply(reader).await?;
    Ok(())
}
