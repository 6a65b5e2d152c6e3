//! The TCP accept loop: binds the listen port and spawns one connection
//! task per accepted socket.

use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::command::Dispatcher;
use crate::connection;

pub async fn run(port: u16, dispatcher: Arc<Dispatcher>) -> io::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    loop {
        let (socket, peer_addr) = listener.accept().await?;
        info!(%peer_addr, "accepted connection");
        connection::spawn(socket, peer_addr, Arc::clone(&dispatcher));
    }
}
