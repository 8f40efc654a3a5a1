//! The HTTP proxy handshake path.
//!
//! [`handshake`] takes an accepted connection whose first packet classified
//! as HTTP, parses the request line and headers incrementally, opens the
//! origin session through a [`Relay`], answers CONNECT requests with a
//! synthetic success response or replays the rewritten request upstream, and
//! hands the connection to the raw pipe. [`serve_listener`] wraps that in an
//! accept loop with first-packet dispatch.

use std::{io, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error_span, warn, Instrument};

use crate::{
    lines::{LineError, LineReader, CRLF},
    parse::{Authority, ParseError, RequestParser},
    pipe,
    relay::Relay,
    sniff,
};

/// How much of the first packet the accept loop reads before dispatching.
const FIRST_PACKET_LEN: usize = 2048;

/// Configuration for the handshake path.
///
/// The header and connect deadlines bound the two suspension points the
/// handshake has before piping starts; the reference behavior had none.
#[derive(Debug, Clone)]
pub struct HandshakeOpts {
    /// Maximum time to wait for the complete header section.
    pub header_timeout: Duration,
    /// Maximum time to wait for the upstream connect.
    pub connect_timeout: Duration,
    /// Maximum bytes buffered while waiting for a line delimiter.
    pub max_header_section: usize,
    /// Value of the `Proxy-Agent` header in the CONNECT success response.
    pub proxy_agent: String,
}

impl Default for HandshakeOpts {
    fn default() -> Self {
        Self {
            header_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_header_section: 8192,
            proxy_agent: "http-proxy-utils".to_owned(),
        }
    }
}

/// Errors that terminate a handshake.
///
/// All of them are fatal for the connection: the client sees a bare TCP
/// close, with no response bytes, if nothing was sent yet.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The request line or a header line was malformed.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Line splitting failed (early EOF, oversized section, bad UTF-8).
    #[error(transparent)]
    Line(#[from] LineError),
    /// The header section completed without resolving a target host.
    #[error("headers completed without a target host")]
    UnknownHost,
    /// The header section did not complete within the deadline.
    #[error("timed out reading the header section")]
    HeaderTimeout,
    /// The relay failed to open the upstream session.
    #[error("failed to connect upstream to {authority}")]
    UpstreamConnect {
        authority: Authority,
        #[source]
        source: io::Error,
    },
    /// Sending or piping failed on either socket.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Runs the full handshake on one accepted connection and pipes it.
///
/// `first_packet` holds the bytes already read for protocol classification;
/// line parsing starts there and continues on `stream`. Returns the byte
/// counts moved by the pipe (client-to-upstream, upstream-to-client).
pub async fn handshake<S, R>(
    stream: S,
    first_packet: &[u8],
    relay: &R,
    opts: &HandshakeOpts,
) -> Result<(u64, u64), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
    R: Relay,
{
    let mut reader = LineReader::new(stream, first_packet, opts.max_header_section);
    let mut parser = RequestParser::new();
    // One deadline over the whole header section, so a client trickling one
    // line per interval cannot hold the handshake open indefinitely.
    let read_header_section = async {
        loop {
            let line = reader.next_line().await?;
            debug!(line = %line, "header line");
            if parser.on_line(&line)? {
                return Ok::<_, HandshakeError>(());
            }
        }
    };
    timeout(opts.header_timeout, read_header_section)
        .await
        .map_err(|_| HandshakeError::HeaderTimeout)??;

    let target = parser
        .target()
        .cloned()
        .ok_or(HandshakeError::UnknownHost)?;
    debug!(%target, connect = parser.is_connect(), "header section complete");

    let mut upstream = timeout(opts.connect_timeout, relay.connect(&target.host, target.port))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "upstream connect timed out"))
        .and_then(|res| res)
        .map_err(|source| HandshakeError::UpstreamConnect {
            authority: target.clone(),
            source,
        })?;

    // Whatever was read past the blank line belongs to the body or tunnel
    // stream and goes upstream ahead of the pipe.
    let (carry_over, mut stream) = reader.into_parts();

    if parser.is_connect() {
        stream
            .write_all(connect_response(&opts.proxy_agent).as_bytes())
            .await?;
        debug!("connect tunnel established");
    } else {
        let mut headers = parser.take_headers();
        while let Some(line) = headers.pop_front() {
            upstream.write_all(line.as_bytes()).await?;
            upstream.write_all(CRLF).await?;
        }
        debug!("request replayed upstream");
    }

    Ok(pipe::start_pipe(stream, upstream, carry_over).await?)
}

/// The fixed success response for CONNECT requests.
fn connect_response(agent: &str) -> String {
    format!(
        "HTTP/1.1 200 Connection established\r\n\
         Proxy-Connection: close\r\n\
         Proxy-Agent: {agent}\r\n\
         \r\n"
    )
}

/// Accepts connections and serves each HTTP proxy handshake in its own task.
///
/// The first packet of every connection is read and classified with
/// [`sniff::is_http`]; connections that do not look like HTTP are dropped.
/// Spawned connection tasks are cancelled when this future is dropped. Runs
/// until the listener fails.
pub async fn serve_listener<R>(
    listener: TcpListener,
    relay: Arc<R>,
    opts: HandshakeOpts,
) -> io::Result<()>
where
    R: Relay + 'static,
{
    let cancel_token = CancellationToken::new();
    let _cancel_guard = cancel_token.clone().drop_guard();
    let mut conn_id = 0u64;
    loop {
        let (mut stream, peer_addr) = listener.accept().await?;
        conn_id += 1;
        let relay = Arc::clone(&relay);
        let opts = opts.clone();
        let fut = async move {
            debug!(%peer_addr, "accepted connection");
            let mut first_packet = [0u8; FIRST_PACKET_LEN];
            let len = match stream.read(&mut first_packet).await {
                Ok(0) => {
                    debug!("closed before first packet");
                    return;
                }
                Ok(len) => len,
                Err(err) => {
                    debug!("failed to read first packet: {err}");
                    return;
                }
            };
            if !sniff::is_http(&first_packet[..len]) {
                debug!("first packet is not HTTP, dropping");
                return;
            }
            match handshake(stream, &first_packet[..len], relay.as_ref(), &opts).await {
                Ok((up, down)) => debug!(up, down, "connection closed"),
                Err(err) => warn!("connection failed: {err}"),
            }
        };
        tokio::spawn(
            cancel_token
                .child_token()
                .run_until_cancelled_owned(fut)
                .instrument(error_span!("conn", id = conn_id)),
        );
    }
}
