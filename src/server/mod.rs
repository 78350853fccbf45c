//! HTTP server protocol implementation
//!
//! The moving parts, bottom to top: a per-connection
//! [`IncomingSocketHandler`](struct.IncomingSocketHandler.html) state
//! machine, an [`IncomingSocketManager`](struct.IncomingSocketManager.html)
//! owning the worker pool the handlers run on, and
//! [`HTTPServer`](struct.HTTPServer.html) which binds the listening
//! socket and drives the accept loop on a dedicated thread. A running
//! instance is represented by [`Server`](struct.Server.html).
mod error;
mod handler;
mod lifecycle;
mod listener;
mod manager;
mod parser;
mod request;
mod response;
mod tls;

pub use self::error::Error;
pub use self::handler::IncomingSocketHandler;
pub use self::lifecycle::{ServerLifecycleDelegate, ServerLifecycleListener};
pub use self::listener::{ListenerGroup, ListenerToken};
pub use self::manager::IncomingSocketManager;
pub use self::parser::{BodyKind, ParsedRequest};
pub use self::request::ServerRequest;
pub use self::response::ServerResponse;
pub use self::tls::TlsEngine;

use std::error as std_error;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener as StdTcpListener};
use std::net::TcpStream as StdTcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use socket2::{Domain, Socket, Type};

/// What a delegate returns; an `Err` is captured by the handler and
/// turned into a 500 when the response has not started yet
pub type DelegateResult =
    Result<(), Box<std_error::Error + Send + Sync>>;

/// The application-side half of the server
///
/// `handle` is invoked exactly once per completed request message.
/// Calls for one connection are serialised; calls for different
/// connections run concurrently on different workers, so implementations
/// must be `Send + Sync` and the same delegate value is shared by every
/// handler.
pub trait ServerDelegate: Send + Sync {
    fn handle(&self, request: &mut ServerRequest,
        response: &mut ServerResponse) -> DelegateResult;
}

impl<F> ServerDelegate for F
    where F: Fn(&mut ServerRequest, &mut ServerResponse) -> DelegateResult
        + Send + Sync
{
    fn handle(&self, request: &mut ServerRequest,
        response: &mut ServerResponse) -> DelegateResult
    {
        (self)(request, response)
    }
}

/// Fine-grained configuration of the HTTP server
#[derive(Debug, Clone)]
pub struct Config {
    worker_threads: usize,
    idle_timeout: Duration,
    backlog: i32,
    max_request_body: usize,
    connections_per_worker: usize,
}

impl Config {
    /// Create a config with defaults
    pub fn new() -> Config {
        Config {
            worker_threads: thread::available_parallelism()
                .map(|n| n.get()).unwrap_or(4),
            idle_timeout: Duration::from_secs(60),
            backlog: 100,
            max_request_body: 10_485_760,
            connections_per_worker: 10_000,
        }
    }
    /// Number of worker threads, each running its own event loop
    ///
    /// Defaults to the machine's available parallelism.
    pub fn worker_threads(&mut self, value: usize) -> &mut Self {
        assert!(value > 0);
        self.worker_threads = value;
        self
    }
    /// How long a connection may sit without any bytes arriving
    pub fn idle_timeout(&mut self, value: Duration) -> &mut Self {
        self.idle_timeout = value;
        self
    }
    /// Backlog passed to `listen(2)`
    pub fn backlog(&mut self, value: i32) -> &mut Self {
        self.backlog = value;
        self
    }
    /// Upper bound on a buffered request body
    pub fn max_request_body(&mut self, value: usize) -> &mut Self {
        self.max_request_body = value;
        self
    }
    /// Connections one worker drives concurrently
    pub fn connections_per_worker(&mut self, value: usize) -> &mut Self {
        self.connections_per_worker = value;
        self
    }
    /// Create an Arc'd config clone to pass to the constructor
    ///
    /// This is just a convenience method.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }
}

/// Builder for a server: configuration, TLS and lifecycle callbacks
pub struct HTTPServer {
    config: Config,
    tls: Option<Arc<TlsEngine>>,
    lifecycle: Arc<ServerLifecycleListener>,
}

impl HTTPServer {
    pub fn new() -> HTTPServer {
        HTTPServer {
            config: Config::new(),
            tls: None,
            lifecycle: Arc::new(ServerLifecycleListener::new()),
        }
    }

    pub fn set_config(&mut self, config: Config) -> &mut Self {
        self.config = config;
        self
    }

    /// Attach an opaque TLS engine; it wraps every accepted socket
    pub fn set_tls_engine<E: Into<TlsEngine>>(&mut self, engine: E)
        -> &mut Self
    {
        self.tls = Some(Arc::new(engine.into()));
        self
    }

    /// The callback lists fired on start, stop and failure
    pub fn lifecycle(&self) -> &ServerLifecycleListener {
        &self.lifecycle
    }

    /// Register a delegate object for all three lifecycle events
    pub fn set_lifecycle_delegate(&mut self,
        delegate: Arc<ServerLifecycleDelegate>) -> &mut Self
    {
        self.lifecycle.attach_delegate(delegate);
        self
    }

    /// Bind, listen and start accepting connections
    ///
    /// Binds `0.0.0.0:port` (`port` 0 picks a free one — see
    /// [`Server::port`](struct.Server.html#method.port)), spawns the
    /// worker pool and dispatches the accept loop onto a dedicated
    /// thread registered with the process-wide
    /// [`ListenerGroup`](struct.ListenerGroup.html).
    ///
    /// Bind failures fire the lifecycle fail callbacks and are returned
    /// to the caller.
    pub fn listen(&self, port: u16, delegate: Arc<ServerDelegate>)
        -> Result<Server, Error>
    {
        let config = Arc::new(self.config.clone());
        let lifecycle = self.lifecycle.clone();
        let (listener, stopper) = bind_listener(port, config.backlog)
            .map_err(|e| {
                let err = Error::Bind(e);
                lifecycle.fire_fail(port, &err);
                err
            })?;
        let addr = listener.local_addr().map_err(Error::Bind)?;
        let manager = Arc::new(
            IncomingSocketManager::new(&config, self.tls.clone(),
                &lifecycle, addr.port())
            .map_err(Error::Bind)?);
        let stopped = Arc::new(AtomicBool::new(false));
        let token = ListenerGroup::shared().enqueue();
        {
            let manager = manager.clone();
            let lifecycle = lifecycle.clone();
            let stopped = stopped.clone();
            thread::Builder::new()
                .name(format!("http-accept-{}", addr.port()))
                .spawn(move || {
                    accept_loop(listener, addr, manager, delegate,
                        lifecycle, stopped, token)
                })
                .map_err(Error::Bind)?;
        }
        Ok(Server {
            addr: addr,
            stopped: stopped,
            stopper: stopper,
            manager: manager,
        })
    }
}

/// Shortcut for `HTTPServer::new().listen(port, delegate)`
pub fn listen(port: u16, delegate: Arc<ServerDelegate>)
    -> Result<Server, Error>
{
    HTTPServer::new().listen(port, delegate)
}

/// A running server instance
///
/// Dropping the server stops it and joins the worker pool.
pub struct Server {
    addr: SocketAddr,
    stopped: Arc<AtomicBool>,
    stopper: Socket,
    manager: Arc<IncomingSocketManager>,
}

impl Server {
    /// The actual bound port, useful after `listen(0, ..)`
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Connections currently owned by the worker pool
    pub fn active_connections(&self) -> usize {
        self.manager.active_connections()
    }

    /// Stop accepting and let open connections drain
    ///
    /// Closes the listening socket, which unblocks the accept loop; the
    /// loop fires the stop callbacks and exits. In-flight exchanges
    /// complete, keep-alive connections close at their next idle point.
    /// Calling `stop` again is a no-op.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping server on {}", self.addr);
        if let Err(e) = self.stopper.shutdown(Shutdown::Both) {
            debug!("listener shutdown: {}", e);
        }
        // a blocked accept may survive the shutdown on some platforms;
        // a throwaway connection wakes it for the flag check
        let _ = StdTcpStream::connect(("127.0.0.1", self.addr.port()));
        self.manager.stop();
    }

    /// Block until every accept loop in the process has finished
    pub fn wait_for_listeners() {
        ListenerGroup::shared().wait_for_listeners();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Create the listening socket with an explicit backlog
///
/// The second return value is a clone whose only job is unblocking
/// `accept` from another thread when the server stops.
fn bind_listener(port: u16, backlog: i32)
    -> io::Result<(StdTcpListener, Socket)>
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    let stopper = socket.try_clone()?;
    Ok((socket.into(), stopper))
}

fn accept_loop(listener: StdTcpListener, addr: SocketAddr,
    manager: Arc<IncomingSocketManager>, delegate: Arc<ServerDelegate>,
    lifecycle: Arc<ServerLifecycleListener>, stopped: Arc<AtomicBool>,
    token: ListenerToken)
{
    // releases the listener group registration even on panic
    let _token = token;
    let port = addr.port();
    lifecycle.fire_start(port, &addr);
    info!("listening on {}", addr);
    let mut backoff = Duration::from_millis(10);
    loop {
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((socket, peer)) => {
                if stopped.load(Ordering::SeqCst) {
                    // the wake-up connection from stop()
                    break;
                }
                backoff = Duration::from_millis(10);
                trace!("accepted connection from {}", peer);
                if let Err(e) = manager.handle(socket, peer,
                    delegate.clone())
                {
                    error!("failed to dispatch connection from {}: {}",
                        peer, e);
                }
            }
            Err(e) => {
                if stopped.load(Ordering::SeqCst) {
                    debug!("accept unblocked by stop: {}", e);
                    break;
                }
                // transient failures (fd exhaustion above all) must not
                // spin the loop
                error!("accept failed: {}", e);
                thread::sleep(backoff);
                backoff = (backoff * 2).min(Duration::from_secs(1));
            }
        }
    }
    debug!("accept loop on port {} exiting", port);
    lifecycle.fire_stop(port);
}
