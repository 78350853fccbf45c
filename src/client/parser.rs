//! Parsing of HTTP responses coming back to the client

use httparse;

use body_parser::BodyProgress;
use bytebuf::ByteBuffer;
use enums::Version;
use headers::{scan_framing, FramingFault, Headers};
use super::Error;

/// Number of headers to allocate on a stack
const MIN_HEADERS: usize = 16;
/// A hard limit on the number of headers
const MAX_HEADERS: usize = 1024;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyKind {
    Fixed(u64),
    Chunked,
    Eof,
}

/// An owned response head
pub struct ResponseHead {
    pub version: Version,
    pub code: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: BodyKind,
    pub close: bool,
}

/// Try to parse a complete response head from the buffer
///
/// Returns `None` when more bytes are needed; on success the head
/// bytes are consumed.
pub fn parse_response(buf: &mut ByteBuffer, is_head: bool)
    -> Result<Option<ResponseHead>, Error>
{
    let (head, consumed) = {
        let mut vec;
        let mut header_array = [httparse::EMPTY_HEADER; MIN_HEADERS];
        let mut raw = httparse::Response::new(&mut header_array);
        let mut result = raw.parse(buf.bytes());
        if matches!(result, Err(httparse::Error::TooManyHeaders)) {
            vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
            raw = httparse::Response::new(&mut vec);
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
                            Error::BadContentLength
                        }
                    })?;
                let code = raw.code.expect("complete response has code");
                let version = if raw.version
                    .expect("complete response has version") == 1
                {
                    Version::Http11
                } else {
                    Version::Http10
                };
                // responses to HEAD and the payload-free statuses keep
                // their framing headers but never grow a body; beyond
                // that, the scan decides, with read-to-close as the
                // fallback when nothing declares a length
                let suppressed = is_head
                    || (code > 100 && code < 200)
                    || code == 204 || code == 304;
                let body = if suppressed {
                    BodyKind::Fixed(0)
                } else if scan.chunked {
                    BodyKind::Chunked
                } else {
                    match scan.length {
                        Some(n) => BodyKind::Fixed(n),
                        None => BodyKind::Eof,
                    }
                };
                let mut header_map = Headers::new();
                for header in raw.headers.iter() {
                    header_map.append(header.name, header.value);
                }
                let head = ResponseHead {
                    version: version,
                    code: code,
                    reason: raw.reason.unwrap_or("").to_string(),
                    headers: header_map,
                    body: body,
                    close: scan.close || version == Version::Http10,
                };
                (head, bytes)
            }
            httparse::Status::Partial => return Ok(None),
        }
    };
    buf.consume(consumed);
    Ok(Some(head))
}

pub fn body_progress(kind: BodyKind) -> BodyProgress {
    match kind {
        BodyKind::Fixed(n) => BodyProgress::fixed(n),
        BodyKind::Chunked => BodyProgress::chunked(),
        BodyKind::Eof => BodyProgress::until_close(),
    }
}
