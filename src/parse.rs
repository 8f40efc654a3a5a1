//! Incremental parsing of the proxy request header section.
//!
//! [`RequestParser`] is fed one line at a time and accumulates everything
//! needed to establish the origin connection: the target [`Authority`],
//! whether the request is a CONNECT tunnel, and the pending header lines to
//! replay upstream for plain-HTTP requests.

use std::{collections::VecDeque, str::FromStr};

use http::Uri;
use thiserror::Error;

/// Fatal protocol errors raised while parsing the header section.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The first line does not match `METHOD SP PATH SP HTTP/1.<digit>`.
    #[error("malformed request line: {0:?}")]
    BadRequestLine(String),
    /// A request target or `Host` value did not parse as `host[:port]`.
    #[error("bad host: {0:?}")]
    BadHost(String),
}

/// Target host and port resolved from the request.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
#[display("{host}:{port}")]
pub struct Authority {
    /// Hostname or IP literal without scheme.
    pub host: String,
    /// Port number, defaulting to 80 when the source had none.
    pub port: u16,
}

impl FromStr for Authority {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_host_port(s)
    }
}

impl Authority {
    /// Parses `host[:port]`.
    ///
    /// No colon means port 80. The port is the segment between the first and
    /// second colon; anything after a second colon is ignored. A non-numeric
    /// or out-of-range port segment fails with [`ParseError::BadHost`].
    pub fn from_host_port(s: &str) -> Result<Self, ParseError> {
        let mut parts = s.split(':');
        let host = parts.next().unwrap_or_default().to_owned();
        let port = match parts.next() {
            Some(segment) => segment
                .parse()
                .map_err(|_| ParseError::BadHost(s.to_owned()))?,
            None => 80,
        };
        Ok(Self { host, port })
    }
}

/// Streaming state machine over the request line and header lines.
///
/// Call [`on_line`](Self::on_line) once per CRLF-delimited line in arrival
/// order; it returns `true` when the header section is complete. Header
/// prefixes (`Proxy-`, `Proxy-Connection: `, `Host: `) are matched
/// case-sensitively, matching the observed proxy behavior rather than
/// RFC-style case-insensitive header names.
#[derive(Debug, Default)]
pub struct RequestParser {
    lines_seen: usize,
    connect: bool,
    target: Option<Authority>,
    headers: VecDeque<String>,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next line. Returns `true` once the empty end-of-headers
    /// line has been seen.
    pub fn on_line(&mut self, line: &str) -> Result<bool, ParseError> {
        if self.lines_seen == 0 {
            self.parse_request_line(line)?;
        } else {
            // Hop-specific Proxy-* headers are never forwarded as-is; only
            // Proxy-Connection survives, with the prefix stripped.
            if let Some(rest) = line.strip_prefix("Proxy-") {
                if rest.starts_with("Connection: ") {
                    self.headers.push_back(rest.to_owned());
                }
            } else {
                self.headers.push_back(line.to_owned());
            }

            if line.is_empty() {
                return Ok(true);
            }

            if !self.connect {
                if let Some(value) = line.strip_prefix("Host: ") {
                    // The Host header is authoritative for non-CONNECT
                    // requests; it overrides the request-line authority.
                    self.target = Some(Authority::from_host_port(value.trim())?);
                }
            }
        }
        self.lines_seen += 1;
        Ok(false)
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), ParseError> {
        let bad = || ParseError::BadRequestLine(line.to_owned());
        let mut fields = line.split(' ');
        let (Some(method), Some(path), Some(version), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(bad());
        };
        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(bad());
        }
        if path.is_empty() {
            return Err(bad());
        }
        let tail = version.strip_prefix("HTTP/1.").ok_or_else(bad)?;
        if !matches!(tail.as_bytes(), [digit] if digit.is_ascii_digit()) {
            return Err(bad());
        }

        if method == "CONNECT" {
            self.connect = true;
            self.target = Some(Authority::from_host_port(path)?);
        } else {
            let uri = Uri::from_str(path).map_err(|_| bad())?;
            let authority = uri
                .authority()
                .ok_or_else(|| ParseError::BadHost(path.to_owned()))?;
            self.target = Some(Authority::from_host_port(authority.as_str())?);
            // Rewrite to origin-form; the rewritten request line travels in
            // the header queue so it replays in position.
            let path_and_query = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .filter(|pq| !pq.is_empty())
                .unwrap_or("/");
            self.headers
                .push_back(format!("{method} {path_and_query} {version}"));
        }
        Ok(())
    }

    /// Whether the request line was a CONNECT tunnel request.
    pub fn is_connect(&self) -> bool {
        self.connect
    }

    /// The resolved target, if any line has produced one.
    pub fn target(&self) -> Option<&Authority> {
        self.target.as_ref()
    }

    /// Takes the pending header lines for replay, in insertion order.
    pub fn take_headers(&mut self) -> VecDeque<String> {
        std::mem::take(&mut self.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut RequestParser, lines: &[&str]) -> Result<bool, ParseError> {
        let mut done = false;
        for line in lines {
            done = parser.on_line(line)?;
        }
        Ok(done)
    }

    #[test]
    fn connect_request_line() {
        let mut p = RequestParser::new();
        assert!(!p.on_line("CONNECT example.com:443 HTTP/1.1").unwrap());
        assert!(p.is_connect());
        let target = p.target().unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 443);
    }

    #[test]
    fn connect_without_port_defaults_to_80() {
        let mut p = RequestParser::new();
        p.on_line("CONNECT example.com HTTP/1.0").unwrap();
        assert_eq!(p.target().unwrap().port, 80);
    }

    #[test]
    fn absolute_form_is_rewritten_to_origin_form() {
        let mut p = RequestParser::new();
        p.on_line("GET http://example.com/foo?q=1 HTTP/1.1").unwrap();
        assert!(!p.is_connect());
        assert_eq!(p.target().unwrap().to_string(), "example.com:80");
        assert_eq!(p.take_headers()[0], "GET /foo?q=1 HTTP/1.1");
    }

    #[test]
    fn absolute_form_without_path_gets_root() {
        let mut p = RequestParser::new();
        p.on_line("GET http://example.com HTTP/1.1").unwrap();
        assert_eq!(p.take_headers()[0], "GET / HTTP/1.1");
    }

    #[test]
    fn authority_port_from_request_line() {
        let mut p = RequestParser::new();
        p.on_line("GET http://example.com:8080/x HTTP/1.1").unwrap();
        assert_eq!(p.target().unwrap().port, 8080);
    }

    #[test]
    fn malformed_request_lines() {
        for line in [
            "",
            "GET /foo",
            "get http://x/ HTTP/1.1",
            "GET http://x/ HTTP/2",
            "GET http://x/ HTTP/1.",
            "GET http://x/ HTTP/1.11",
            "GET  http://x/ HTTP/1.1",
            "GET http://x/ HTTP/1.1 extra",
        ] {
            let mut p = RequestParser::new();
            assert!(
                matches!(p.on_line(line), Err(ParseError::BadRequestLine(_))),
                "accepted {line:?}"
            );
        }
    }

    #[test]
    fn origin_form_path_has_no_authority() {
        let mut p = RequestParser::new();
        assert!(matches!(
            p.on_line("GET /foo HTTP/1.1"),
            Err(ParseError::BadHost(_))
        ));
    }

    #[test]
    fn non_numeric_port_fails() {
        assert!(matches!(
            Authority::from_host_port("example.com:http"),
            Err(ParseError::BadHost(_))
        ));
        assert!(matches!(
            Authority::from_host_port("example.com:"),
            Err(ParseError::BadHost(_))
        ));
    }

    #[test]
    fn port_is_segment_between_first_and_second_colon() {
        let a = Authority::from_host_port("example.com:443:junk").unwrap();
        assert_eq!(a.host, "example.com");
        assert_eq!(a.port, 443);
    }

    #[test]
    fn header_replay_preserves_order() {
        let mut p = RequestParser::new();
        let done = feed(
            &mut p,
            &[
                "GET http://example.com/foo HTTP/1.1",
                "A: 1",
                "Proxy-Foo: x",
                "Proxy-Connection: keep-alive",
                "Host: example.com",
                "B: 2",
                "",
            ],
        )
        .unwrap();
        assert!(done);
        let headers: Vec<String> = p.take_headers().into();
        assert_eq!(
            headers,
            [
                "GET /foo HTTP/1.1",
                "A: 1",
                "Connection: keep-alive",
                "Host: example.com",
                "B: 2",
                "",
            ]
        );
    }

    #[test]
    fn host_header_overrides_request_line_target() {
        let mut p = RequestParser::new();
        feed(
            &mut p,
            &["GET http://example.com/ HTTP/1.1", "Host: other.net:8080 "],
        )
        .unwrap();
        assert_eq!(p.target().unwrap().to_string(), "other.net:8080");
    }

    #[test]
    fn host_header_is_ignored_for_connect() {
        let mut p = RequestParser::new();
        feed(
            &mut p,
            &["CONNECT example.com:443 HTTP/1.1", "Host: other.net:99"],
        )
        .unwrap();
        assert_eq!(p.target().unwrap().to_string(), "example.com:443");
    }

    #[test]
    fn malformed_host_header_fails() {
        let mut p = RequestParser::new();
        p.on_line("GET http://example.com/ HTTP/1.1").unwrap();
        assert!(matches!(
            p.on_line("Host: example.com:nan"),
            Err(ParseError::BadHost(_))
        ));
    }

    #[test]
    fn prefix_matching_is_case_sensitive() {
        let mut p = RequestParser::new();
        feed(
            &mut p,
            &[
                "GET http://example.com/ HTTP/1.1",
                "host: other.net:8080",
                "proxy-connection: keep-alive",
                "",
            ],
        )
        .unwrap();
        // Lowercase variants bypass the special handling entirely: the
        // target is untouched and both lines are forwarded verbatim.
        assert_eq!(p.target().unwrap().to_string(), "example.com:80");
        let headers: Vec<String> = p.take_headers().into();
        assert_eq!(
            headers,
            [
                "GET / HTTP/1.1",
                "host: other.net:8080",
                "proxy-connection: keep-alive",
                "",
            ]
        );
    }

    #[test]
    fn end_of_headers_line_is_enqueued() {
        let mut p = RequestParser::new();
        let done = feed(&mut p, &["GET http://example.com/ HTTP/1.1", ""]).unwrap();
        assert!(done);
        // The empty line replays too; it supplies the terminating CRLF.
        assert_eq!(p.take_headers().back().unwrap(), "");
    }
}
