use bytebuf::ByteBuffer;
use enums::{reason, Version};
use headers::{self, Headers};
use serializer::WireWriter;
use super::Error;

/// Write-side companion of a request
///
/// The delegate mutates status and headers, appends body bytes through
/// [`write`](#method.write) and finishes with [`end`](#method.end).
/// Headers freeze at the first body byte; a second `end` is an error.
/// Everything is buffered and hits the socket once the delegate
/// returns, with `Content-Length` filled in from the buffered size
/// unless the delegate opted into `Transfer-Encoding: chunked`.
#[derive(Debug)]
pub struct ServerResponse {
    status: u16,
    headers: Headers,
    body: ByteBuffer,
    headers_frozen: bool,
    ended: bool,
}

impl ServerResponse {
    pub(crate) fn new() -> ServerResponse {
        ServerResponse {
            status: 200,
            headers: Headers::new(),
            body: ByteBuffer::new(),
            headers_frozen: false,
            ended: false,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, code: u16) -> Result<(), Error> {
        if self.headers_frozen {
            return Err(Error::HeadersSent);
        }
        self.status = code;
        Ok(())
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Replace all values of a header
    pub fn set_header<V: AsRef<[u8]>>(&mut self, name: &str, value: V)
        -> Result<(), Error>
    {
        if self.headers_frozen {
            return Err(Error::HeadersSent);
        }
        self.headers.set(name, value);
        Ok(())
    }

    /// Add a header value, keeping previous ones
    pub fn append_header<V: AsRef<[u8]>>(&mut self, name: &str, value: V)
        -> Result<(), Error>
    {
        if self.headers_frozen {
            return Err(Error::HeadersSent);
        }
        self.headers.append(name, value);
        Ok(())
    }

    /// Set a `Date` header with the current time
    #[cfg(feature="date_header")]
    pub fn set_date_header(&mut self) -> Result<(), Error> {
        use httpdate::HttpDate;
        use std::time::SystemTime;
        let date = format!("{}", HttpDate::from(SystemTime::now()));
        self.set_header("Date", date)
    }

    /// Append body bytes; the first call freezes status and headers
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.ended {
            return Err(Error::ResponseEnded);
        }
        self.headers_frozen = true;
        self.body.append(data);
        Ok(())
    }

    /// Finish the response
    ///
    /// The first call succeeds and marks the response complete; any
    /// further call is a contract violation and errors.
    pub fn end(&mut self) -> Result<(), Error> {
        if self.ended {
            return Err(Error::ResponseEnded);
        }
        self.ended = true;
        self.headers_frozen = true;
        Ok(())
    }

    /// Write the final chunk of body and end in one step
    pub fn end_with(&mut self, data: &[u8]) -> Result<(), Error> {
        self.write(data)?;
        self.end()
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    /// True once body bytes have been accepted
    pub(crate) fn body_written(&self) -> bool {
        self.body.count() > 0
    }

    /// Whether the delegate asked to close the connection
    pub(crate) fn wants_close(&self) -> bool {
        self.headers.get("Connection").map_or(false, headers::is_close)
    }

    /// Serialise status line, headers and body into the egress buffer
    ///
    /// `close` adds `Connection: close`; `is_head` suppresses body
    /// bytes while keeping the real `Content-Length`.
    pub(crate) fn serialize_into(&mut self, out: &mut ByteBuffer,
        version: Version, close: bool, is_head: bool)
        -> Result<(), Error>
    {
        let mut writer = WireWriter::response(close, is_head);
        writer.status_line(out, version, self.status, reason(self.status));

        let chunked = self.headers.get("Transfer-Encoding")
            .map_or(false, headers::is_chunked);
        let declared = self.headers.get_str("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok());
        for &(ref name, ref value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("Content-Length")
                || name.eq_ignore_ascii_case("Transfer-Encoding")
                || name.eq_ignore_ascii_case("Connection")
            {
                continue;
            }
            match writer.header(out, name, value) {
                Ok(()) => {}
                Err(e) => {
                    warn!("dropping invalid header {:?}: {}", name, e);
                }
            }
        }

        let body_len = self.body.remaining() as u64;
        let bodyless = (self.status >= 100 && self.status < 200)
            || self.status == 204 || self.status == 304;
        if !bodyless {
            if chunked {
                writer.chunked(out)?;
            } else {
                let length = match declared {
                    // responses to HEAD may declare the length of the
                    // body they did not materialise
                    Some(n) if is_head || n == body_len => n,
                    Some(n) => {
                        warn!("declared Content-Length {} does not match \
                            buffered body of {} bytes", n, body_len);
                        body_len
                    }
                    None => body_len,
                };
                writer.fixed_length(out, length)?;
            }
        }
        let expect_body = writer.finish_head(out)?;
        if expect_body {
            let mut data = Vec::new();
            self.body.fill_into_vec(&mut data);
            writer.body_chunk(out, &data);
        }
        writer.finish(out);
        debug_assert!(writer.is_finished());
        Ok(())
    }
}

/// Emit a complete minimal error response for early failures
///
/// Used when a request never reached the delegate (unparsable head,
/// oversized body) or when the delegate failed before writing anything.
pub(crate) fn error_page(code: u16, out: &mut ByteBuffer,
    version: Version)
{
    let mut response = ServerResponse::new();
    response.set_status(code).expect("fresh response accepts a status");
    response.set_header("Content-Type", "text/html")
        .expect("fresh response accepts headers");
    let body = format!("\
        <!DOCTYPE html>\
        <html>\
            <head><title>{code:03} {status}</title></head>\
            <body><h1>{code:03} {status}</h1></body>\
        </html>",
        code=code, status=reason(code));
    response.write(body.as_bytes())
        .expect("fresh response accepts body");
    response.end().expect("fresh response can end");
    response.serialize_into(out, version, true, false)
        .expect("error page serializes");
}

#[cfg(test)]
mod test {
    use bytebuf::ByteBuffer;
    use enums::Version;
    use super::{error_page, ServerResponse};

    fn serialized(response: &mut ServerResponse, close: bool,
        is_head: bool) -> String
    {
        let mut out = ByteBuffer::new();
        response.serialize_into(&mut out, Version::Http11, close, is_head)
            .unwrap();
        String::from_utf8_lossy(out.bytes()).into_owned()
    }

    #[test]
    fn default_is_200_with_length() {
        let mut response = ServerResponse::new();
        response.write(b"ok").unwrap();
        response.end().unwrap();
        assert_eq!(serialized(&mut response, false, false),
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    }

    #[test]
    fn close_adds_connection_header() {
        let mut response = ServerResponse::new();
        response.end().unwrap();
        assert_eq!(serialized(&mut response, true, false),
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    }

    #[test]
    fn chunked_when_delegate_opts_in() {
        let mut response = ServerResponse::new();
        response.set_header("Transfer-Encoding", "chunked").unwrap();
        response.write(b"hello").unwrap();
        response.end().unwrap();
        assert_eq!(serialized(&mut response, false, false),
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
             5\r\nhello\r\n0\r\n\r\n");
    }

    #[test]
    fn head_suppresses_body() {
        let mut response = ServerResponse::new();
        response.write(b"hello").unwrap();
        response.end().unwrap();
        assert_eq!(serialized(&mut response, false, true),
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n");
    }

    #[test]
    fn end_twice_is_an_error() {
        let mut response = ServerResponse::new();
        response.end().unwrap();
        assert!(response.end().is_err());
        assert!(response.write(b"late").is_err());
    }

    #[test]
    fn headers_freeze_at_first_body_byte() {
        let mut response = ServerResponse::new();
        response.set_header("X-Early", "yes").unwrap();
        response.write(b"data").unwrap();
        assert!(response.set_header("X-Late", "no").is_err());
        assert!(response.set_status(404).is_err());
    }

    #[test]
    fn bodyless_status_has_no_length() {
        let mut response = ServerResponse::new();
        response.set_status(204).unwrap();
        response.end().unwrap();
        assert_eq!(serialized(&mut response, false, false),
            "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn error_page_is_complete_and_closing() {
        let mut out = ByteBuffer::new();
        error_page(500, &mut out, Version::Http11);
        let text = String::from_utf8_lossy(out.bytes()).into_owned();
        assert!(text.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("<h1>500 Internal Server Error</h1>"));
    }
}
