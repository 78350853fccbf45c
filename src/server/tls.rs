use native_tls;
use tokio_io::{AsyncRead, AsyncWrite};
use tokio_tls::{self, Accept};

/// Opaque TLS engine attached to a server before `listen`
///
/// When present, the engine wraps every accepted socket in a handshake
/// before the connection handler sees any bytes. Handshake failures are
/// reported through the lifecycle fail callbacks and drop the
/// connection; they never reach the delegate.
pub struct TlsEngine {
    acceptor: tokio_tls::TlsAcceptor,
}

impl TlsEngine {
    pub fn new(acceptor: native_tls::TlsAcceptor) -> TlsEngine {
        TlsEngine {
            acceptor: tokio_tls::TlsAcceptor::from(acceptor),
        }
    }

    pub(crate) fn accept<S>(&self, stream: S) -> Accept<S>
        where S: AsyncRead + AsyncWrite
    {
        self.acceptor.accept(stream)
    }
}

impl From<native_tls::TlsAcceptor> for TlsEngine {
    fn from(acceptor: native_tls::TlsAcceptor) -> TlsEngine {
        TlsEngine::new(acceptor)
    }
}
