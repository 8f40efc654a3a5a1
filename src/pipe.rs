//! Raw bidirectional byte piping after the handshake.

use std::{io, time::Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Delivers `carry_over` to the upstream session and then copies bytes both
/// ways until either side closes.
///
/// Carry-over bytes are body or tunnel bytes that arrived in the same read
/// as the end of the header section; they must reach the origin exactly
/// once, ahead of everything the client sends next.
pub(crate) async fn start_pipe<C, U>(
    client: C,
    upstream: U,
    carry_over: Bytes,
) -> io::Result<(u64, u64)>
where
    C: AsyncRead + AsyncWrite + Send + Unpin,
    U: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (mut client_recv, mut client_send) = tokio::io::split(client);
    let (mut upstream_recv, mut upstream_send) = tokio::io::split(upstream);
    if !carry_over.is_empty() {
        upstream_send.write_all(&carry_over).await?;
    }
    forward_bidi(
        &mut client_recv,
        &mut client_send,
        &mut upstream_recv,
        &mut upstream_send,
    )
    .await
}

/// Bidirectionally forward data between two reader/writer pairs.
///
/// Shuts each writer down once the opposite reader reaches EOF, and returns
/// the byte counts copied (client-to-upstream, upstream-to-client).
async fn forward_bidi(
    client_recv: &mut (impl AsyncRead + Send + Unpin),
    client_send: &mut (impl AsyncWrite + Send + Unpin),
    upstream_recv: &mut (impl AsyncRead + Send + Unpin),
    upstream_send: &mut (impl AsyncWrite + Send + Unpin),
) -> io::Result<(u64, u64)> {
    let start = Instant::now();
    let (up, down) = tokio::join!(
        async {
            let res = tokio::io::copy(client_recv, upstream_send).await;
            upstream_send.shutdown().await.ok();
            trace!(?res, elapsed=?start.elapsed(), "pipe client-to-upstream finished");
            res
        },
        async {
            let res = tokio::io::copy(upstream_recv, client_send).await;
            client_send.shutdown().await.ok();
            trace!(?res, elapsed=?start.elapsed(), "pipe upstream-to-client finished");
            res
        }
    );
    Ok((up?, down?))
}
