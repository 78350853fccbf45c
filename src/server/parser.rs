//! Adaptor between the byte-level wire parser and `ServerRequest`
//!
//! The heavy lifting — request line, header splitting, chunk framing —
//! is `httparse`'s job; this module assembles its output into an owned
//! request and turns the framing scan into a body kind and a
//! keep-alive verdict.

use httparse;

use bytebuf::ByteBuffer;
use enums::Version;
use headers::{scan_framing, FramingFault, Headers};
use super::Error;
use super::request::ServerRequest;

/// Number of headers to allocate on a stack
const MIN_HEADERS: usize = 16;
/// A hard limit on the number of headers
const MAX_HEADERS: usize = 1024;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyKind {
    Fixed(u64),
    Chunked,
}

/// Everything the connection handler needs to know about one request
pub struct ParsedRequest {
    pub request: ServerRequest,
    pub body: BodyKind,
    pub keep_alive: bool,
    pub expect_continue: bool,
    pub is_head: bool,
}

/// Try to parse a complete request head from the buffer
///
/// Returns `None` when more bytes are needed. On success the head bytes
/// are consumed from the buffer, leaving any body bytes unread.
pub fn parse_request(buf: &mut ByteBuffer,
    peer: Option<::std::net::SocketAddr>)
    -> Result<Option<ParsedRequest>, Error>
{
    let (parsed, consumed) = {
        let mut vec;
        let mut header_array = [httparse::EMPTY_HEADER; MIN_HEADERS];
        let mut raw = httparse::Request::new(&mut header_array);
        let mut result = raw.parse(buf.bytes());
        if matches!(result, Err(httparse::Error::TooManyHeaders)) {
            vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
            raw = httparse::Request::new(&mut vec);
            result = raw.parse(buf.bytes());
        }
        match result? {
            httparse::Status::Complete(bytes) => {
                let scan = scan_framing(raw.headers)
                    .map_err(|fault| match fault {
                        FramingFault::SecondLength => {
                            Error::DuplicateContentLength
                        }
                        FramingFault::UnreadableLength => {
                            Error::ContentLengthInvalid
                        }
                    })?;
                let method = raw.method.expect("complete request has method");
                let target = raw.path.expect("complete request has target");
                let version = if raw.version
                    .expect("complete request has version") == 1
                {
                    Version::Http11
                } else {
                    Version::Http10
                };
                let mut header_map = Headers::new();
                for header in raw.headers.iter() {
                    header_map.append(header.name, header.value);
                }
                let body = if scan.chunked {
                    BodyKind::Chunked
                } else {
                    // a request with no framing headers has no body
                    BodyKind::Fixed(scan.length.unwrap_or(0))
                };
                // 1.1 stays open unless told otherwise; 1.0 needs an
                // explicit keep-alive token
                let keep_alive = match version {
                    Version::Http11 => !scan.close,
                    Version::Http10 => scan.keep_alive && !scan.close,
                };
                let parsed = ParsedRequest {
                    request: ServerRequest::new(method, target, version,
                        header_map, peer),
                    body: body,
                    keep_alive: keep_alive,
                    expect_continue: scan.expect_continue,
                    is_head: method == "HEAD",
                };
                (parsed, bytes)
            }
            httparse::Status::Partial => return Ok(None),
        }
    };
    buf.consume(consumed);
    Ok(Some(parsed))
}

#[cfg(test)]
mod test {
    use bytebuf::ByteBuffer;
    use enums::Version;
    use super::{parse_request, BodyKind};

    fn parse(data: &[u8]) -> Option<super::ParsedRequest> {
        let mut buf = ByteBuffer::new();
        buf.append(data);
        parse_request(&mut buf, None).unwrap()
    }

    #[test]
    fn simple_get() {
        let p = parse(b"GET /hello?a=1 HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(p.request.method(), "GET");
        assert_eq!(p.request.path(), "/hello");
        assert_eq!(p.request.query_string(), "a=1");
        assert_eq!(p.request.version(), Version::Http11);
        assert_eq!(p.body, BodyKind::Fixed(0));
        assert!(p.keep_alive);
        assert!(!p.is_head);
    }

    #[test]
    fn partial_head_needs_more() {
        let mut buf = ByteBuffer::new();
        buf.append(b"GET / HTT");
        assert!(parse_request(&mut buf, None).unwrap().is_none());
        assert_eq!(buf.remaining(), 9);
    }

    #[test]
    fn keep_alive_verdicts() {
        let p = parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!p.keep_alive);
        let p = parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!p.keep_alive);
        let p = parse(
            b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").unwrap();
        assert!(p.keep_alive);
    }

    #[test]
    fn body_kinds() {
        let p = parse(
            b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello").unwrap();
        assert_eq!(p.body, BodyKind::Fixed(5));
        let p = parse(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n").unwrap();
        assert_eq!(p.body, BodyKind::Chunked);
    }

    #[test]
    fn duplicate_content_length_is_rejected() {
        let mut buf = ByteBuffer::new();
        buf.append(
            b"POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 6\r\n\r\n");
        assert!(parse_request(&mut buf, None).is_err());
    }

    #[test]
    fn header_order_and_multiplicity_survive() {
        let p = parse(b"GET / HTTP/1.1\r\n\
            X-One: 1\r\nX-Two: 2\r\nX-One: 3\r\n\r\n").unwrap();
        let names: Vec<&str> = p.request.headers().iter()
            .map(|&(ref n, _)| &n[..]).collect();
        assert_eq!(names, vec!["X-One", "X-Two", "X-One"]);
        assert_eq!(p.request.headers().all("x-one").len(), 2);
    }

    #[test]
    fn expect_continue_is_flagged() {
        let p = parse(b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\
            Expect: 100-continue\r\n\r\n").unwrap();
        assert!(p.expect_continue);
    }
}
