//! Process-wide server metadata: role, replication identity and offsets,
//! opaque config, and the bookkeeping the replication manager needs — the
//! attached-replica registry and the pending `WAIT` requests. All of it sits
//! behind one lock.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica,
}

/// A registered replica connection: its id and the channel the replication
/// writer task uses to push encoded commands to its socket.
pub struct ReplicaConn {
    pub id: String,
    pub sender: tokio::sync::mpsc::UnboundedSender<Bytes>,
}

/// A pending `WAIT n timeout` request. `received_acks` tracks the highest
/// offset each replica has acknowledged; the request resolves exactly once,
/// either when enough replicas clear `target_offset` or on timeout.
pub struct WaitRequest {
    pub target_offset: u64,
    pub required_count: usize,
    pub received_acks: HashMap<String, u64>,
    responder: Option<oneshot::Sender<usize>>,
}

impl WaitRequest {
    fn satisfied_count(&self) -> usize {
        self.received_acks
            .values()
            .filter(|&&offset| offset >= self.target_offset)
            .count()
    }
}

struct Inner {
    master_repl_offset: u64,
    command_processed: u64,
    replicas: Vec<ReplicaConn>,
    wait_requests: HashMap<u64, WaitRequest>,
    next_wait_id: u64,
}

pub struct ServerMetadata {
    pub role: Role,
    pub master_replid: String,
    pub dir: String,
    pub dbfilename: String,
    inner: Mutex<Inner>,
}

impl ServerMetadata {
    pub fn new(role: Role, dir: String, dbfilename: String) -> Self {
        let combined = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let master_replid = combined[..40].to_string();

        Self {
            role,
            master_replid,
            dir,
            dbfilename,
            inner: Mutex::new(Inner {
                master_repl_offset: 0,
                command_processed: 0,
                replicas: Vec::new(),
                wait_requests: HashMap::new(),
                next_wait_id: 0,
            }),
        }
    }

    pub fn is_replica(&self) -> bool {
        self.role == Role::Replica
    }

    pub async fn master_repl_offset(&self) -> u64 {
        self.inner.lock().await.master_repl_offset
    }

    pub async fn command_processed(&self) -> u64 {
        self.inner.lock().await.command_processed
    }

    pub async fn advance_command_processed(&self, bytes: u64) {
        self.inner.lock().await.command_processed += bytes;
    }

    pub async fn replica_count(&self) -> usize {
        self.inner.lock().await.replicas.len()
    }

    pub async fn register_replica(&self, id: String, sender: tokio::sync::mpsc::UnboundedSender<Bytes>) {
        self.inner.lock().await.replicas.push(ReplicaConn { id, sender });
    }

    pub async fn drop_replica(&self, id: &str) {
        self.inner.lock().await.replicas.retain(|r| r.id != id);
    }

    /// Sends `payload` to every registered replica, dropping any whose
    /// socket has gone away, and if at least one replica received it,
    /// advances `master_repl_offset` by its exact encoded length.
    pub async fn fan_out(&self, payload: Bytes) {
        let mut inner = self.inner.lock().await;
        let mut delivered = false;

        inner.replicas.retain(|replica| {
            let ok = replica.sender.send(payload.clone()).is_ok();
            delivered |= ok;
            ok
        });

        if delivered {
            inner.master_repl_offset += payload.len() as u64;
        }
    }

    /// Registers a new `WaitRequest` targeting the current
    /// `master_repl_offset`, returning its id and a receiver that resolves
    /// with the satisfied-replica count.
    pub async fn register_wait(&self, required_count: usize) -> (u64, u64, oneshot::Receiver<usize>) {
        let mut inner = self.inner.lock().await;
        let target_offset = inner.master_repl_offset;
        let id = inner.next_wait_id;
        inner.next_wait_id += 1;

        let (tx, rx) = oneshot::channel();
        inner.wait_requests.insert(
            id,
            WaitRequest {
                target_offset,
                required_count,
                received_acks: HashMap::new(),
                responder: Some(tx),
            },
        );

        (id, target_offset, rx)
    }

    /// Records an ACK from replica `conn_id` at `offset`, resolving any
    /// `WaitRequest` that now has enough replicas past its target.
    pub async fn record_ack(&self, conn_id: &str, offset: u64) {
        let mut inner = self.inner.lock().await;
        let mut resolved = Vec::new();

        for (&id, req) in inner.wait_requests.iter_mut() {
            let entry = req.received_acks.entry(conn_id.to_string()).or_insert(0);
            *entry = (*entry).max(offset);

            if req.satisfied_count() >= req.required_count {
                resolved.push(id);
            }
        }

        for id in resolved {
            if let Some(mut req) = inner.wait_requests.remove(&id) {
                if let Some(responder) = req.responder.take() {
                    let _ = responder.send(req.satisfied_count());
                }
            }
        }
    }

    /// Called when a `WAIT`'s timeout fires: removes the request and reports
    /// however many replicas had acknowledged by then.
    pub async fn timeout_wait(&self, id: u64) -> usize {
        let mut inner = self.inner.lock().await;
        match inner.wait_requests.remove(&id) {
            Some(req) => req.satisfied_count(),
            None => 0, // already resolved by an ACK racing the timer
        }
    }
}
