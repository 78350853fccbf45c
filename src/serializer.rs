//! Wire-level message serialisation shared by the server response path
//! and the client request path
//!
//! Both paths buffer a complete head before anything touches the
//! socket, so the writer's job is keeping the caller honest rather
//! than streaming: first line, then headers, then exactly one framing
//! decision, then body bytes that match it.

use std::fmt::Display;
use std::io::Write;

use bytebuf::ByteBuffer;
use enums::Version;

quick_error! {
    #[derive(Debug)]
    pub enum HeaderError {
        BadName {
            description("header name contains a line break")
        }
        BadValue {
            description("header value contains a line break")
        }
        ReservedHeader {
            description("body framing headers are set through \
                fixed_length or chunked, not as plain headers")
        }
        LengthTwice {
            description("the body length for this message is already fixed")
        }
        ChunkedTwice {
            description("chunked framing for this message is already chosen")
        }
        MixedFraming {
            description("a body cannot be fixed-length and chunked at once")
        }
        NoFraming {
            description("cannot finish a head with no body framing decision")
        }
        BodylessStatus {
            description("the status code forbids any message body")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    FirstLine,
    Headers,
    Body,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Undecided,
    Fixed { left: u64 },
    Chunked,
    /// 1xx, 204 and 304 responses never get a payload
    Forbidden,
}

/// Serialises one request or response into a `ByteBuffer`
///
/// The writer only moves forward: first line, headers, body, finish.
/// Ordering violations are caller bugs and panic; everything a remote
/// peer or an application can influence (header bytes, framing
/// conflicts) comes back as a `HeaderError` instead.
#[derive(Debug)]
pub struct WireWriter {
    phase: Phase,
    framing: Framing,
    is_request: bool,
    /// HEAD responses account for body bytes without emitting them
    silent_body: bool,
    close: bool,
}

fn has_line_break(bytes: &[u8]) -> bool {
    bytes.iter().any(|&x| x == b'\r' || x == b'\n')
}

impl WireWriter {
    /// Writer for a response; `close` adds `Connection: close` to the
    /// head, `is_head` swallows body bytes while counting them
    pub fn response(close: bool, is_head: bool) -> WireWriter {
        WireWriter {
            phase: Phase::FirstLine,
            framing: Framing::Undecided,
            is_request: false,
            silent_body: is_head,
            close: close,
        }
    }

    /// Writer for an outbound client request
    pub fn request() -> WireWriter {
        WireWriter {
            phase: Phase::FirstLine,
            framing: Framing::Undecided,
            is_request: true,
            silent_body: false,
            close: false,
        }
    }

    /// Put the status line into the buffer
    ///
    /// Statuses that forbid a payload (1xx, 204, 304) lock the framing
    /// so that no body can follow.
    ///
    /// # Panics
    ///
    /// When called twice, on a request writer, or with code 100: the
    /// interim continue line is raw bytes the connection handler emits
    /// itself, never a final status.
    pub fn status_line(&mut self, buf: &mut ByteBuffer, version: Version,
        code: u16, reason: &str)
    {
        assert!(self.phase == Phase::FirstLine && !self.is_request,
            "status line must open a response");
        assert!(code != 100);
        write!(buf, "{} {} {}\r\n", version, code, reason).unwrap();
        if (code >= 100 && code < 200) || code == 204 || code == 304 {
            self.framing = Framing::Forbidden;
        }
        self.phase = Phase::Headers;
    }

    /// Put the request line into the buffer
    ///
    /// # Panics
    ///
    /// When called twice or on a response writer.
    pub fn request_line(&mut self, buf: &mut ByteBuffer, method: &str,
        path: &str, version: Version)
    {
        assert!(self.phase == Phase::FirstLine && self.is_request,
            "request line must open a request");
        write!(buf, "{} {} {}\r\n", method, path, version).unwrap();
        self.phase = Phase::Headers;
    }

    fn raw_header(&mut self, buf: &mut ByteBuffer, name: &str,
        value: &[u8]) -> Result<(), HeaderError>
    {
        if has_line_break(name.as_bytes()) {
            return Err(HeaderError::BadName);
        }
        if has_line_break(value) {
            return Err(HeaderError::BadValue);
        }
        buf.append(name.as_bytes());
        buf.append(b": ");
        buf.append(value);
        buf.append(b"\r\n");
        Ok(())
    }

    /// Append one header line
    ///
    /// `Content-Length` and `Transfer-Encoding` are refused here; they
    /// carry framing meaning and go through `fixed_length`/`chunked`.
    ///
    /// # Panics
    ///
    /// When called before the first line or after the head is finished.
    pub fn header(&mut self, buf: &mut ByteBuffer, name: &str,
        value: &[u8]) -> Result<(), HeaderError>
    {
        assert!(self.phase == Phase::Headers,
            "headers go between the first line and finish_head");
        if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding")
        {
            return Err(HeaderError::ReservedHeader);
        }
        self.raw_header(buf, name, value)
    }

    /// Append a header whose value is formatted from any `Display`
    ///
    /// The value is rendered and validated before anything lands in
    /// the buffer, so a rejected header leaves no trace.
    pub fn header_formatted<D: Display>(&mut self, buf: &mut ByteBuffer,
        name: &str, value: D) -> Result<(), HeaderError>
    {
        let text = format!("{}", value);
        self.header(buf, name, text.as_bytes())
    }

    /// Declare a fixed-size body and emit its `Content-Length`
    pub fn fixed_length(&mut self, buf: &mut ByteBuffer, length: u64)
        -> Result<(), HeaderError>
    {
        assert!(self.phase == Phase::Headers,
            "framing is decided in the header section");
        match self.framing {
            Framing::Undecided => {}
            Framing::Fixed { .. } => return Err(HeaderError::LengthTwice),
            Framing::Chunked => return Err(HeaderError::MixedFraming),
            Framing::Forbidden => return Err(HeaderError::BodylessStatus),
        }
        self.raw_header(buf, "Content-Length",
            format!("{}", length).as_bytes())?;
        self.framing = Framing::Fixed { left: length };
        Ok(())
    }

    /// Declare a chunked body and emit its `Transfer-Encoding`
    pub fn chunked(&mut self, buf: &mut ByteBuffer)
        -> Result<(), HeaderError>
    {
        assert!(self.phase == Phase::Headers,
            "framing is decided in the header section");
        match self.framing {
            Framing::Undecided => {}
            Framing::Chunked => return Err(HeaderError::ChunkedTwice),
            Framing::Fixed { .. } => return Err(HeaderError::MixedFraming),
            Framing::Forbidden => return Err(HeaderError::BodylessStatus),
        }
        self.raw_header(buf, "Transfer-Encoding", b"chunked")?;
        self.framing = Framing::Chunked;
        Ok(())
    }

    /// Terminate the header block
    ///
    /// Adds the `Connection: close` line when requested at
    /// construction. Returns whether the caller should emit body bytes
    /// (`false` for HEAD responses and bodyless statuses). A request
    /// that never declared framing implies an empty body, the way bare
    /// GETs go out; a response must have decided by now.
    pub fn finish_head(&mut self, buf: &mut ByteBuffer)
        -> Result<bool, HeaderError>
    {
        assert!(self.phase == Phase::Headers,
            "finish_head closes the header section");
        if self.close {
            self.raw_header(buf, "Connection", b"close")
                .expect("static header is valid");
        }
        if self.framing == Framing::Undecided {
            if self.is_request {
                self.framing = Framing::Fixed { left: 0 };
            } else {
                return Err(HeaderError::NoFraming);
            }
        }
        buf.append(b"\r\n");
        self.phase = Phase::Body;
        Ok(!self.silent_body && self.framing != Framing::Forbidden)
    }

    /// Emit one piece of the body under the declared framing
    ///
    /// Chunked pieces get their size prefix here; empty chunked pieces
    /// are dropped so they cannot terminate the body early. For HEAD
    /// responses the bytes are counted against the declared length but
    /// not written.
    ///
    /// # Panics
    ///
    /// Before `finish_head`, on a bodyless message, or when a piece
    /// overruns the declared fixed length.
    pub fn body_chunk(&mut self, buf: &mut ByteBuffer, data: &[u8]) {
        assert!(self.phase == Phase::Body,
            "body bytes follow finish_head");
        match self.framing {
            Framing::Forbidden => {
                panic!("this message must stay bodyless");
            }
            Framing::Fixed { ref mut left } => {
                let len = data.len() as u64;
                if len > *left {
                    panic!("body overruns its declared length by {} bytes",
                        len - *left);
                }
                *left -= len;
                if !self.silent_body {
                    buf.append(data);
                }
            }
            Framing::Chunked => {
                if !self.silent_body && !data.is_empty() {
                    write!(buf, "{:x}\r\n", data.len()).unwrap();
                    buf.append(data);
                    buf.append(b"\r\n");
                }
            }
            Framing::Undecided => {
                unreachable!("framing was decided by finish_head");
            }
        }
    }

    /// Seal the message, emitting the chunked terminator if needed
    ///
    /// Calling it again on a finished message is fine.
    ///
    /// # Panics
    ///
    /// When the head is unfinished, or a fixed-length body came up
    /// short of its declared size.
    pub fn finish(&mut self, buf: &mut ByteBuffer) {
        match self.phase {
            Phase::Finished => return,
            Phase::Body => {}
            _ => panic!("finishing a message with an unfinished head"),
        }
        match self.framing {
            Framing::Fixed { left } if left > 0 && !self.silent_body => {
                panic!("{} declared body bytes were never written", left);
            }
            Framing::Chunked => {
                if !self.silent_body {
                    buf.append(b"0\r\n\r\n");
                }
            }
            _ => {}
        }
        self.phase = Phase::Finished;
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }
}

#[cfg(test)]
mod test {
    use bytebuf::ByteBuffer;
    use enums::Version;
    use super::WireWriter;

    fn emitted<F>(fun: F) -> String
        where F: FnOnce(&mut ByteBuffer)
    {
        let mut buf = ByteBuffer::new();
        fun(&mut buf);
        String::from_utf8_lossy(buf.bytes()).into_owned()
    }

    #[test]
    fn bare_request_implies_empty_body() {
        assert_eq!(emitted(|buf| {
            let mut w = WireWriter::request();
            w.request_line(buf, "GET", "/", Version::Http10);
            assert!(w.finish_head(buf).unwrap());
            w.finish(buf);
        }), "GET / HTTP/1.0\r\n\r\n");
    }

    #[test]
    fn empty_response() {
        assert_eq!(emitted(|buf| {
            let mut w = WireWriter::response(false, false);
            w.status_line(buf, Version::Http10, 200, "OK");
            w.fixed_length(buf, 0).unwrap();
            w.finish_head(buf).unwrap();
            w.finish(buf);
        }), "HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn close_marks_the_head() {
        assert_eq!(emitted(|buf| {
            let mut w = WireWriter::response(true, false);
            w.status_line(buf, Version::Http11, 200, "OK");
            w.fixed_length(buf, 0).unwrap();
            w.finish_head(buf).unwrap();
            w.finish(buf);
        }), concat!("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n",
                    "Connection: close\r\n\r\n"));
    }

    #[test]
    fn chunked_body_is_framed_and_terminated() {
        assert_eq!(emitted(|buf| {
            let mut w = WireWriter::response(false, false);
            w.status_line(buf, Version::Http11, 200, "OK");
            w.chunked(buf).unwrap();
            assert!(w.finish_head(buf).unwrap());
            w.body_chunk(buf, b"Hello");
            w.body_chunk(buf, b"");
            w.finish(buf);
        }), concat!("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked",
                    "\r\n\r\n5\r\nHello\r\n0\r\n\r\n"));
    }

    #[test]
    fn request_body_goes_out_verbatim() {
        assert_eq!(emitted(|buf| {
            let mut w = WireWriter::request();
            w.request_line(buf, "PUT", "/x", Version::Http11);
            w.fixed_length(buf, 5).unwrap();
            assert!(w.finish_head(buf).unwrap());
            w.body_chunk(buf, b"Hello");
            w.finish(buf);
        }), "PUT /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nHello");
    }

    #[test]
    fn head_response_counts_but_never_emits() {
        assert_eq!(emitted(|buf| {
            let mut w = WireWriter::response(false, true);
            w.status_line(buf, Version::Http11, 200, "OK");
            w.fixed_length(buf, 500).unwrap();
            assert!(!w.finish_head(buf).unwrap());
            w.body_chunk(buf, &[0; 120]);
            w.finish(buf);
        }), "HTTP/1.1 200 OK\r\nContent-Length: 500\r\n\r\n");
    }

    #[test]
    fn bodyless_status_refuses_framing() {
        assert_eq!(emitted(|buf| {
            let mut w = WireWriter::response(false, false);
            w.status_line(buf, Version::Http11, 204, "No Content");
            w.fixed_length(buf, 4).unwrap_err();
            assert!(!w.finish_head(buf).unwrap());
            w.finish(buf);
        }), "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn framing_conflicts_are_rejected() {
        emitted(|buf| {
            let mut w = WireWriter::response(false, false);
            w.status_line(buf, Version::Http11, 200, "OK");
            w.fixed_length(buf, 1).unwrap();
            w.fixed_length(buf, 2).unwrap_err();
            w.chunked(buf).unwrap_err();
        });
    }

    #[test]
    fn framing_headers_are_reserved() {
        emitted(|buf| {
            let mut w = WireWriter::response(false, false);
            w.status_line(buf, Version::Http11, 200, "OK");
            w.header(buf, "content-length", b"4").unwrap_err();
            w.header(buf, "transfer-encoding", b"chunked").unwrap_err();
        });
    }

    #[test]
    fn header_injection_is_rejected_without_a_trace() {
        assert_eq!(emitted(|buf| {
            let mut w = WireWriter::response(false, false);
            w.status_line(buf, Version::Http11, 200, "OK");
            w.header_formatted(buf, "X-Bad", "a\r\nInjected: yes")
                .unwrap_err();
            w.fixed_length(buf, 0).unwrap();
            w.finish_head(buf).unwrap();
            w.finish(buf);
        }), "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    }
}
