//! The upstream transport boundary.
//!
//! The handshake does not open origin connections itself; it asks a
//! [`Relay`] for a session to the target authority. [`DirectRelay`] is the
//! plain-TCP implementation; alternative transports (an encrypted remote
//! hop, a test double) implement the same trait.

use std::{future::Future, io};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

/// Connects upstream sessions for established handshakes.
pub trait Relay: Send + Sync {
    /// The bidirectional byte stream toward the origin.
    type Session: AsyncRead + AsyncWrite + Send + Unpin;

    /// Resolves and connects to `host:port`.
    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = io::Result<Self::Session>> + Send;
}

/// Relay that connects straight to the origin over TCP.
#[derive(Debug, Clone, Default)]
pub struct DirectRelay;

impl Relay for DirectRelay {
    type Session = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        TcpStream::connect((host, port)).await
    }
}
