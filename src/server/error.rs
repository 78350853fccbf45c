use std::io;
use std::error;

use httparse;
use native_tls;

use serializer::HeaderError;

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        Bind(err: io::Error) {
            description("failed to bind listening socket")
            display("bind failed: {}", err)
            cause(err)
        }
        Accept(err: io::Error) {
            description("failed to accept connection")
            display("accept failed: {}", err)
            cause(err)
        }
        TlsHandshake(err: native_tls::Error) {
            description("TLS handshake failed")
            display("TLS handshake failed: {}", err)
            cause(err)
        }
        Disconnected {
            description("client disconnected mid-message")
        }
        Parse(err: httparse::Error) {
            description("request parse error")
            display("parse error: {:?}", err)
            from()
        }
        ChunkParse(err: httparse::InvalidChunkSize) {
            description("chunk size parse error")
            from()
        }
        DuplicateContentLength {
            description("duplicate content length header")
        }
        ContentLengthInvalid {
            description("invalid content-length header")
        }
        RequestTooLarge {
            description("request body exceeds the configured limit")
        }
        Header(err: HeaderError) {
            description("header serialization error")
            display("header error: {}", err)
            cause(err)
            from()
        }
        Delegate(err: Box<error::Error + Send + Sync>) {
            description("delegate raised an error")
            display("delegate error: {}", err)
        }
        Write(err: io::Error) {
            description("write to client failed")
            display("write failed: {}", err)
            cause(err)
        }
        IdleTimeout {
            description("connection idle for too long")
        }
        ResponseEnded {
            description("response was already ended")
        }
        HeadersSent {
            description("headers may not change after the body started")
        }
    }
}
