use std::io;
use std::net::SocketAddr;

use bytebuf::ByteBuffer;
use enums::Version;
use headers::Headers;
use query::QueryParameters;

/// Read-only view of one inbound HTTP message
///
/// Constructed by the connection handler once the request head is
/// parsed; the delegate receives it with the body fully decoded
/// (chunked transfer coding already stripped). The body is drained
/// through the `io::Read` impl or one of the convenience readers.
#[derive(Debug)]
pub struct ServerRequest {
    method: String,
    url: Vec<u8>,
    path: String,
    query: String,
    version: Version,
    headers: Headers,
    body: ByteBuffer,
    peer: Option<SocketAddr>,
}

impl ServerRequest {
    pub(crate) fn new(method: &str, target: &str, version: Version,
        headers: Headers, peer: Option<SocketAddr>)
        -> ServerRequest
    {
        let (path, query) = split_target(target);
        ServerRequest {
            method: method.to_string(),
            url: target.as_bytes().to_vec(),
            path: path,
            query: query,
            version: version,
            headers: headers,
            body: ByteBuffer::new(),
            peer: peer,
        }
    }

    pub(crate) fn append_body(&mut self, data: &[u8]) {
        self.body.append(data);
    }

    /// Request method as it appeared on the wire (e.g. `GET`)
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The raw request target bytes, before any splitting
    pub fn url_bytes(&self) -> &[u8] {
        &self.url
    }

    /// Path component of the request target
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query component of the request target, still unparsed
    pub fn query_string(&self) -> &str {
        &self.query
    }

    /// Parse the query string into structured parameters
    ///
    /// Parsing happens on every call; grab the result once if you need
    /// several lookups.
    pub fn query_parameters(&self) -> QueryParameters {
        QueryParameters::from(&self.query)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// HTTP version as a `(major, minor)` pair
    pub fn http_version(&self) -> (u8, u8) {
        self.version.pair()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Address of the connected peer, when known
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Bytes of body not yet consumed by a reader
    pub fn body_len(&self) -> usize {
        self.body.remaining()
    }

    /// Read the remaining body into a vector, returning the byte count
    pub fn read_all(&mut self, dst: &mut Vec<u8>) -> usize {
        self.body.fill_into_vec(dst)
    }

    /// Read the remaining body as a lossy utf-8 string
    pub fn read_string(&mut self) -> String {
        let mut data = Vec::new();
        self.body.fill_into_vec(&mut data);
        String::from_utf8_lossy(&data).into_owned()
    }
}

impl io::Read for ServerRequest {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.body.fill_into(buf))
    }
}

/// Split a request target into path and query
///
/// Absolute-form targets (sent by proxies) are reduced to their
/// path-and-query part first.
fn split_target(target: &str) -> (String, String) {
    let rest = match target.find("://") {
        Some(idx) => {
            match target[idx + 3..].find('/') {
                Some(slash) => &target[idx + 3 + slash..],
                None => "/",
            }
        }
        None => target,
    };
    match rest.find('?') {
        Some(q) => (rest[..q].to_string(), rest[q + 1..].to_string()),
        None => (rest.to_string(), String::new()),
    }
}
