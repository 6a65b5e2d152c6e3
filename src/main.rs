mod acceptor;
mod cli;
mod command;
mod connection;
mod error;
mod metadata;
mod rdb;
mod replication;
mod resp;
mod store;
mod transaction;

use std::sync::Arc;

use tracing::{error, info};

use cli::Cli;
use command::Dispatcher;
use metadata::{Role, ServerMetadata};
use store::Keyspace;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse_args();
    let role = if cli.primary_addr().is_some() { Role::Replica } else { Role::Primary };

    let keyspace = Arc::new(Keyspace::new());
    let metadata = Arc::new(ServerMetadata::new(role, cli.dir.clone(), cli.dbfilename.clone()));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&keyspace), Arc::clone(&metadata)));

    if let Some((host, port)) = cli.primary_addr() {
        let primary_addr = format!("{host}:{port}");
        let own_port = cli.port;
        let keyspace = Arc::clone(&keyspace);
        let metadata = Arc::clone(&metadata);
        tokio::spawn(async move {
            if let Err(err) = replication::run_replica_handshake(primary_addr, own_port, keyspace, metadata).await {
                error!(%err, "replication connection to primary failed");
            }
        });
    }

    tokio::select! {
        result = acceptor::run(cli.port, dispatcher) => {
            if let Err(err) = result {
                error!(%err, "accept loop failed");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
}
