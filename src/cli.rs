//! Command-line flags the process is started with.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "ferrite-kv", about = "A Redis-protocol-compatible in-memory data server")]
pub struct Cli {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 6379)]
    pub port: u16,

    /// "<host> <port>" of a primary to replicate from. Absent means this
    /// process starts as a primary.
    #[arg(long, value_name = "HOST PORT", num_args = 2)]
    pub replicaof: Option<Vec<String>>,

    /// Directory the RDB file would live in.
    #[arg(long, default_value = ".")]
    pub dir: String,

    /// RDB file name.
    #[arg(long, default_value = "dump.rdb")]
    pub dbfilename: String,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// The `(host, port)` of the primary to replicate from, if `--replicaof`
    /// was given.
    pub fn primary_addr(&self) -> Option<(String, u16)> {
        let parts = self.replicaof.as_ref()?;
        let host = parts.first()?.clone();
        let port: u16 = parts.get(1)?.parse().ok()?;
        Some((host, port))
    }
}
