//! First-packet protocol classification.

use memchr::memmem;

/// The token every HTTP/1.x request carries somewhere in its first packet.
const HTTP_TOKEN: &[u8] = b"HTTP";

/// Returns whether `first_packet` looks like the start of an HTTP proxy
/// request.
///
/// This is a plain substring search for the ASCII token `HTTP`, intended for
/// picking the HTTP handler over alternative protocol handlers from the first
/// received packet. False positives are fine: a misclassified connection
/// fails fast during request-line parsing and is closed.
pub fn is_http(first_packet: &[u8]) -> bool {
    memmem::find(first_packet, HTTP_TOKEN).is_some()
}
