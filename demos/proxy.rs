//! Minimal runnable forward proxy: direct TCP to the origin, no relay hop.
//!
//! ```text
//! cargo run --example proxy -- --port 8118
//! curl -x http://127.0.0.1:8118 http://example.com/
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use http_proxy_utils::{serve_listener, DirectRelay, HandshakeOpts};
use tokio::net::TcpListener;

#[derive(Parser)]
struct Cli {
    /// Port to listen on (0 picks a free one).
    #[clap(short, long, default_value_t = 0)]
    port: u16,
    /// Header-section timeout in seconds.
    #[clap(long, default_value_t = 30)]
    header_timeout: u64,
    /// Upstream connect timeout in seconds.
    #[clap(long, default_value_t = 10)]
    connect_timeout: u64,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let opts = HandshakeOpts {
        header_timeout: Duration::from_secs(cli.header_timeout),
        connect_timeout: Duration::from_secs(cli.connect_timeout),
        ..Default::default()
    };
    let listener = TcpListener::bind(format!("127.0.0.1:{}", cli.port)).await?;
    println!("proxy listening on {}", listener.local_addr()?);
    tokio::select! {
        res = serve_listener(listener, Arc::new(DirectRelay), opts) => res,
        _ = tokio::signal::ctrl_c() => Ok(()),
    }
}
