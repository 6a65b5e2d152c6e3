//! Primary-side replica fan-out and the replica's own primary-facing
//! handshake. `ServerMetadata` (see `crate::metadata`) owns the shared
//! bookkeeping; this module owns the replica-facing connection code paths
//! built on top of it.

mod handshake;

pub use handshake::run as run_replica_handshake;

use bytes::Bytes;

use crate::resp::RespValue;

/// Re-encodes a request's original argument bytes as a RESP command array,
/// the exact wire form fanned out to attached replicas.
pub fn encode_for_replication(args: &[Bytes]) -> Bytes {
    let parts: Vec<&[u8]> = args.iter().map(|a| a.as_ref()).collect();
    Bytes::from(RespValue::command(&parts).encode_to_vec())
}
