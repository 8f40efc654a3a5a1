//! Building blocks for a local HTTP forward-proxy endpoint.
//!
//! The crate covers the handshake path of a forward proxy: classifying a
//! freshly accepted connection as HTTP ([`is_http`]), incrementally parsing
//! the request line and headers ([`RequestParser`]), opening the origin
//! connection through a [`Relay`], and handing the connection off to a raw
//! bidirectional pipe. CONNECT requests get a synthetic `200 Connection
//! established` response; other requests have their request line rewritten
//! to origin-form and their headers replayed to the origin in order.
//!
//! [`serve_listener`] wires everything into an accept loop; [`handshake`]
//! drives a single already-accepted connection.

mod handshake;
mod lines;
mod parse;
mod pipe;
mod relay;
mod sniff;


pub use {
    handshake::{handshake, serve_listener, HandshakeError, HandshakeOpts},
    lines::{LineError, LineReader},
    parse::{Authority, ParseError, RequestParser},
    relay::{DirectRelay, Relay},
    sniff::is_http,
};
