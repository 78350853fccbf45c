use std::io;

use httparse;
use native_tls;
use url;

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        InvalidUrl {
            description("the request URL is missing or malformed")
        }
        Url(err: url::ParseError) {
            description("URL parse error")
            display("URL parse error: {}", err)
            from()
        }
        Io(err: io::Error) {
            description("I/O error")
            display("I/O error: {}", err)
            from()
        }
        Header(err: httparse::Error) {
            description("response parse error")
            display("response parse error: {:?}", err)
            from()
        }
        ChunkSize(err: httparse::InvalidChunkSize) {
            description("chunk size parse error")
            from()
        }
        DuplicateContentLength {
            description("duplicate content length header")
        }
        BadContentLength {
            description("invalid content-length header")
        }
        Tls(err: native_tls::Error) {
            description("TLS error")
            display("TLS error: {}", err)
            from()
        }
        BlockedHandshake {
            description("TLS handshake interrupted on a blocking socket")
        }
        TooManyRedirects {
            description("redirect chain over the configured limit")
        }
        UnexpectedEof {
            description("connection closed before the response finished")
        }
    }
}
