//! A small callback-style HTTP/1.x client
//!
//! A [`ClientRequest`](struct.ClientRequest.html) is built from a URL
//! string or an option list, fed body bytes with
//! [`write`](struct.ClientRequest.html#method.write) and fired with
//! [`end`](struct.ClientRequest.html#method.end); the callback then
//! runs exactly once with either the
//! [`ClientResponse`](struct.ClientResponse.html) or `None` on failure.
//! Redirects are followed up to `max_redirects` (default 10).
mod errors;
mod parser;

pub use self::errors::Error;
pub use self::parser::{BodyKind, ResponseHead};

use std::io::{self, Read, Write};
use std::net::TcpStream;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use native_tls::{HandshakeError, TlsConnector, TlsStream};
use url::Url;

use bytebuf::ByteBuffer;
use enums::Version;
use headers::Headers;
use serializer::WireWriter;

/// Construction options mirroring the URL components plus transport
/// tweaks; later options override earlier ones
pub enum Options {
    Method(String),
    Schema(String),
    Hostname(String),
    Port(u16),
    Path(String),
    Headers(Vec<(String, String)>),
    Username(String),
    Password(String),
    MaxRedirects(usize),
    DisableSSLVerification,
}

type Callback = Box<FnOnce(Option<ClientResponse>) + Send>;

/// One outbound request, terminated by [`end`](#method.end)
pub struct ClientRequest {
    url: Url,
    method: String,
    headers: Vec<(String, String)>,
    username: Option<String>,
    password: Option<String>,
    max_redirects: usize,
    disable_ssl_verification: bool,
    body: ByteBuffer,
    callback: Option<Callback>,
}

/// The response handed to the request callback
pub struct ClientResponse {
    version: Version,
    status: u16,
    reason: String,
    headers: Headers,
    body: ByteBuffer,
}

/// Build a request from a URL string
pub fn request<F>(url: &str, callback: F) -> Result<ClientRequest, Error>
    where F: FnOnce(Option<ClientResponse>) + Send + 'static
{
    let url = Url::parse(url)?;
    Ok(ClientRequest::new(url, Box::new(callback)))
}

/// Build a request from an option list
pub fn request_with_options<F>(options: Vec<Options>, callback: F)
    -> Result<ClientRequest, Error>
    where F: FnOnce(Option<ClientResponse>) + Send + 'static
{
    let mut schema = "http".to_string();
    let mut hostname = "localhost".to_string();
    let mut port = None;
    let mut path = "/".to_string();
    let mut method = "GET".to_string();
    let mut headers = Vec::new();
    let mut username = None;
    let mut password = None;
    let mut max_redirects = None;
    let mut disable_ssl_verification = false;
    for option in options {
        match option {
            Options::Method(value) => method = value,
            Options::Schema(value) => {
                schema = value.trim_end_matches("://").to_string();
            }
            Options::Hostname(value) => hostname = value,
            Options::Port(value) => port = Some(value),
            Options::Path(value) => {
                path = if value.starts_with('/') {
                    value
                } else {
                    format!("/{}", value)
                };
            }
            Options::Headers(value) => headers.extend(value),
            Options::Username(value) => username = Some(value),
            Options::Password(value) => password = Some(value),
            Options::MaxRedirects(value) => max_redirects = Some(value),
            Options::DisableSSLVerification => {
                disable_ssl_verification = true;
            }
        }
    }
    let url = Url::parse(&match port {
        Some(port) => format!("{}://{}:{}{}", schema, hostname, port, path),
        None => format!("{}://{}{}", schema, hostname, path),
    })?;
    let mut built = ClientRequest::new(url, Box::new(callback));
    built.method = method;
    built.headers = headers;
    built.username = username;
    built.password = password;
    if let Some(limit) = max_redirects {
        built.max_redirects = limit;
    }
    built.disable_ssl_verification = disable_ssl_verification;
    Ok(built)
}

impl ClientRequest {
    fn new(url: Url, callback: Callback) -> ClientRequest {
        ClientRequest {
            url: url,
            method: "GET".to_string(),
            headers: Vec::new(),
            username: None,
            password: None,
            max_redirects: 10,
            disable_ssl_verification: false,
            body: ByteBuffer::new(),
            callback: Some(callback),
        }
    }

    pub fn set_method(&mut self, method: &str) -> &mut Self {
        self.method = method.to_string();
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Accumulate body bytes to send
    pub fn write<V: AsRef<[u8]>>(&mut self, data: V) -> &mut Self {
        self.body.append(data.as_ref());
        self
    }

    /// Send the request and invoke the callback exactly once
    ///
    /// Failures of any kind (resolution, connect, TLS, malformed
    /// response, redirect chain too long) surface as `None`.
    pub fn end(mut self) {
        let callback = self.callback.take()
            .expect("callback taken before end");
        match self.perform() {
            Ok(response) => callback(Some(response)),
            Err(e) => {
                debug!("request to {} failed: {}", self.url, e);
                callback(None);
            }
        }
    }

    fn perform(&mut self) -> Result<ClientResponse, Error> {
        let mut url = self.url.clone();
        let mut method = self.method.clone();
        let mut body = Vec::new();
        self.body.fill_into_vec(&mut body);
        let mut hops = 0;
        loop {
            let response = self.single_exchange(&url, &method, &body)?;
            let redirect = matches!(response.status,
                301 | 302 | 303 | 307 | 308);
            let location = response.headers.get_str("Location")
                .map(|l| l.to_string());
            match (redirect, location) {
                (true, Some(location)) => {
                    hops += 1;
                    if hops > self.max_redirects {
                        return Err(Error::TooManyRedirects);
                    }
                    url = url.join(&location)?;
                    // history levels the method down to GET except for
                    // the explicitly method-preserving 307/308
                    if response.status == 303
                        || (matches!(response.status, 301 | 302)
                            && method != "GET" && method != "HEAD")
                    {
                        method = "GET".to_string();
                        body.clear();
                    }
                }
                _ => return Ok(response),
            }
        }
    }

    fn single_exchange(&self, url: &Url, method: &str, body: &[u8])
        -> Result<ClientResponse, Error>
    {
        let host = url.host_str().ok_or(Error::InvalidUrl)?;
        let port = url.port_or_known_default().ok_or(Error::InvalidUrl)?;
        let tcp = TcpStream::connect((host, port))?;
        let mut stream = if url.scheme() == "https" {
            let mut builder = TlsConnector::builder();
            if self.disable_ssl_verification {
                builder.danger_accept_invalid_certs(true);
                builder.danger_accept_invalid_hostnames(true);
            }
            let connector = builder.build()?;
            match connector.connect(host, tcp) {
                Ok(tls) => Transport::Tls(tls),
                Err(HandshakeError::Failure(e)) => {
                    return Err(Error::Tls(e));
                }
                Err(HandshakeError::WouldBlock(..)) => {
                    return Err(Error::BlockedHandshake);
                }
            }
        } else {
            Transport::Plain(tcp)
        };

        let mut out = ByteBuffer::new();
        self.serialize(&mut out, url, method, body, host)?;
        stream.write_all(out.bytes())?;
        stream.flush()?;

        let is_head = method.eq_ignore_ascii_case("HEAD");
        let mut buf = ByteBuffer::new();
        let head = loop {
            match parser::parse_response(&mut buf, is_head)? {
                Some(head) => break head,
                None => {
                    if buf.read_from(&mut stream)? == 0 {
                        return Err(Error::UnexpectedEof);
                    }
                }
            }
        };

        let mut progress = parser::body_progress(head.body);
        let mut body_buf = ByteBuffer::new();
        let mut eof = false;
        loop {
            progress.decode(&mut buf)?;
            let (bytes, done) = progress.ready(&buf, eof);
            if bytes > 0 {
                body_buf.append(&buf.bytes()[..bytes]);
                progress.advance(&mut buf, bytes);
            }
            if done {
                break;
            }
            if eof {
                return Err(Error::UnexpectedEof);
            }
            if buf.read_from(&mut stream)? == 0 {
                eof = true;
            }
        }

        Ok(ClientResponse {
            version: head.version,
            status: head.code,
            reason: head.reason,
            headers: head.headers,
            body: body_buf,
        })
    }

    fn serialize(&self, out: &mut ByteBuffer, url: &Url, method: &str,
        body: &[u8], host: &str) -> Result<(), Error>
    {
        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }
        let mut writer = WireWriter::request();
        writer.request_line(out, method, &target, Version::Http11);
        let host_value = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let header_error = |e| Error::Io(
            io::Error::new(io::ErrorKind::InvalidInput,
                format!("bad request header: {}", e)));
        writer.header_formatted(out, "Host", &host_value)
            .map_err(&header_error)?;
        let username = self.username.as_ref().map(|u| &u[..])
            .unwrap_or_else(|| self.url.username());
        let password = self.password.as_ref().map(|p| &p[..])
            .or_else(|| self.url.password());
        if !username.is_empty() || password.is_some() {
            let credentials = format!("{}:{}",
                username, password.unwrap_or(""));
            let value = format!("Basic {}", BASE64.encode(credentials));
            writer.header(out, "Authorization", value.as_bytes())
                .map_err(&header_error)?;
        }
        for &(ref name, ref value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("Content-Length")
                || name.eq_ignore_ascii_case("Transfer-Encoding")
                || name.eq_ignore_ascii_case("Connection")
                || name.eq_ignore_ascii_case("Host")
            {
                continue;
            }
            writer.header(out, name, value.as_bytes())
                .map_err(&header_error)?;
        }
        // one exchange per connection: no pooling here
        writer.header(out, "Connection", b"close")
            .map_err(&header_error)?;
        writer.fixed_length(out, body.len() as u64)
            .map_err(&header_error)?;
        writer.finish_head(out).map_err(&header_error)?;
        writer.body_chunk(out, body);
        writer.finish(out);
        Ok(())
    }
}

impl ClientResponse {
    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn http_version(&self) -> (u8, u8) {
        self.version.pair()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Bytes of body not yet consumed by a reader
    pub fn body_len(&self) -> usize {
        self.body.remaining()
    }

    pub fn read_all(&mut self, dst: &mut Vec<u8>) -> usize {
        self.body.fill_into_vec(dst)
    }

    pub fn read_string(&mut self) -> String {
        let mut data = Vec::new();
        self.body.fill_into_vec(&mut data);
        String::from_utf8_lossy(&data).into_owned()
    }
}

impl Read for ClientResponse {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.body.fill_into(buf))
    }
}

enum Transport {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            Transport::Plain(ref mut s) => s.read(buf),
            Transport::Tls(ref mut s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            Transport::Plain(ref mut s) => s.write(buf),
            Transport::Tls(ref mut s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match *self {
            Transport::Plain(ref mut s) => s.flush(),
            Transport::Tls(ref mut s) => s.flush(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{request, request_with_options, Options};

    #[test]
    fn url_construction_from_options() {
        let req = request_with_options(vec![
            Options::Schema("http".to_string()),
            Options::Hostname("example.org".to_string()),
            Options::Port(8080),
            Options::Path("status".to_string()),
            Options::Method("POST".to_string()),
            Options::MaxRedirects(3),
        ], |_| {}).unwrap();
        assert_eq!(req.url.as_str(), "http://example.org:8080/status");
        assert_eq!(req.method, "POST");
        assert_eq!(req.max_redirects, 3);
    }

    #[test]
    fn invalid_url_is_rejected_up_front() {
        assert!(request("not a url", |_| {}).is_err());
    }

    #[test]
    fn request_line_serialization() {
        let mut req = request("http://example.org/a?b=1", |_| {}).unwrap();
        req.set_header("X-Probe", "1");
        req.write(b"payload");
        let url = req.url.clone();
        let mut out = ::bytebuf::ByteBuffer::new();
        req.serialize(&mut out, &url, "POST", b"payload", "example.org")
            .unwrap();
        let text = String::from_utf8_lossy(out.bytes()).into_owned();
        assert!(text.starts_with("POST /a?b=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.org\r\n"));
        assert!(text.contains("X-Probe: 1\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("Content-Length: 7\r\n"));
        assert!(text.ends_with("\r\n\r\npayload"));
    }

    #[test]
    fn basic_auth_header() {
        let mut req = request("http://example.org/", |_| {}).unwrap();
        req.username = Some("user".to_string());
        req.password = Some("pass".to_string());
        let url = req.url.clone();
        let mut out = ::bytebuf::ByteBuffer::new();
        req.serialize(&mut out, &url, "GET", b"", "example.org").unwrap();
        let text = String::from_utf8_lossy(out.bytes()).into_owned();
        // dXNlcjpwYXNz is "user:pass"
        assert!(text.contains("Authorization: Basic dXNlcjpwYXNz\r\n"));
    }
}
