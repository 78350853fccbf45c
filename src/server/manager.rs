use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpStream as StdTcpStream};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use futures::{Future, Stream};
use futures::future::{self, Shared};
use futures::sync::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::sync::oneshot;
use tokio_core::net::TcpStream;
use tokio_core::reactor::{Core, Handle};

use super::{Config, Error, ServerDelegate};
use super::handler::IncomingSocketHandler;
use super::lifecycle::ServerLifecycleListener;
use super::tls::TlsEngine;

/// A socket on its way to a worker's event loop
struct Registration {
    socket: StdTcpStream,
    peer: SocketAddr,
    id: u64,
    delegate: Arc<ServerDelegate>,
}

struct Worker {
    sender: Mutex<Option<UnboundedSender<Registration>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Owner of the connection handlers and the worker pool that runs them
///
/// Each worker is an OS thread running its own event core; accepted
/// sockets are distributed round-robin and stay on their worker for the
/// lifetime of the connection. The socket map is only bookkeeping: the
/// handler futures own the actual per-connection state.
pub struct IncomingSocketManager {
    workers: Vec<Worker>,
    next_worker: AtomicUsize,
    next_id: AtomicUsize,
    connections: Arc<Mutex<HashMap<u64, SocketAddr>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl IncomingSocketManager {
    pub(crate) fn new(config: &Arc<Config>, tls: Option<Arc<TlsEngine>>,
        lifecycle: &Arc<ServerLifecycleListener>, port: u16)
        -> io::Result<IncomingSocketManager>
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let shutdown = shutdown_rx.shared();
        let connections = Arc::new(Mutex::new(HashMap::new()));
        let mut workers = Vec::with_capacity(config.worker_threads);
        for index in 0..config.worker_threads {
            let (tx, rx) = unbounded::<Registration>();
            let config = config.clone();
            let tls = tls.clone();
            let lifecycle = lifecycle.clone();
            let connections = connections.clone();
            let shutdown = shutdown.clone();
            let thread = thread::Builder::new()
                .name(format!("http-worker-{}", index))
                .spawn(move || {
                    worker_main(rx, config, tls, lifecycle, connections,
                        shutdown, port)
                })?;
            workers.push(Worker {
                sender: Mutex::new(Some(tx)),
                thread: Mutex::new(Some(thread)),
            });
        }
        Ok(IncomingSocketManager {
            workers: workers,
            next_worker: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0),
            connections: connections,
            shutdown: Mutex::new(Some(shutdown_tx)),
        })
    }

    /// Register an accepted socket with the next worker in line
    pub(crate) fn handle(&self, socket: StdTcpStream, peer: SocketAddr,
        delegate: Arc<ServerDelegate>) -> Result<(), Error>
    {
        socket.set_nonblocking(true).map_err(Error::Accept)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) as u64;
        self.connections.lock()
            .expect("connections lock poisoned")
            .insert(id, peer);
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed)
            % self.workers.len();
        let sender = self.workers[index].sender.lock()
            .expect("worker sender lock poisoned");
        let sent = match sender.as_ref() {
            Some(tx) => tx.unbounded_send(Registration {
                socket: socket,
                peer: peer,
                id: id,
                delegate: delegate,
            }).is_ok(),
            None => false,
        };
        if !sent {
            // the pool is shutting down; the socket just closes
            self.connections.lock()
                .expect("connections lock poisoned")
                .remove(&id);
            debug!("dropping connection from {}: workers stopped", peer);
        }
        Ok(())
    }

    /// Number of connections currently tracked
    pub fn active_connections(&self) -> usize {
        self.connections.lock()
            .expect("connections lock poisoned")
            .len()
    }

    /// Ask the workers to drain: no new sockets are admitted, idle
    /// keep-alive connections close, in-flight exchanges finish
    pub(crate) fn stop(&self) {
        self.shutdown.lock()
            .expect("shutdown lock poisoned")
            .take();
        for worker in self.workers.iter() {
            worker.sender.lock()
                .expect("worker sender lock poisoned")
                .take();
        }
    }
}

impl Drop for IncomingSocketManager {
    fn drop(&mut self) {
        self.stop();
        for worker in self.workers.iter() {
            let thread = worker.thread.lock()
                .expect("worker thread lock poisoned")
                .take();
            if let Some(thread) = thread {
                if thread.join().is_err() {
                    error!("a worker thread panicked");
                }
            }
        }
    }
}

fn worker_main(rx: UnboundedReceiver<Registration>, config: Arc<Config>,
    tls: Option<Arc<TlsEngine>>, lifecycle: Arc<ServerLifecycleListener>,
    connections: Arc<Mutex<HashMap<u64, SocketAddr>>>,
    shutdown: Shared<oneshot::Receiver<()>>, port: u16)
{
    let mut core = match Core::new() {
        Ok(core) => core,
        Err(e) => {
            error!("worker could not start an event loop: {}", e);
            return;
        }
    };
    let handle = core.handle();
    let limit = config.connections_per_worker;
    let served = rx
        .map(move |registration| {
            conn_future(registration, &handle, &config, &tls, &lifecycle,
                &connections, &shutdown, port)
        })
        .buffer_unordered(limit)
        .for_each(|()| Ok(()));
    // returns once the manager drops our sender and every connection
    // assigned here has drained
    if core.run(served).is_err() {
        error!("worker loop failed");
    }
}

fn conn_future(registration: Registration, handle: &Handle,
    config: &Arc<Config>, tls: &Option<Arc<TlsEngine>>,
    lifecycle: &Arc<ServerLifecycleListener>,
    connections: &Arc<Mutex<HashMap<u64, SocketAddr>>>,
    shutdown: &Shared<oneshot::Receiver<()>>, port: u16)
    -> Box<Future<Item=(), Error=()>>
{
    let Registration { socket, peer, id, delegate } = registration;
    let connections = connections.clone();
    let cleanup = move |result: Result<(), Error>| -> Result<(), ()> {
        connections.lock()
            .expect("connections lock poisoned")
            .remove(&id);
        if let Err(e) = result {
            debug!("connection from {} closed: {}", peer, e);
        }
        Ok(())
    };
    let stream = match TcpStream::from_stream(socket, handle) {
        Ok(stream) => stream,
        Err(e) => {
            debug!("could not register {} with the event loop: {}", peer, e);
            return Box::new(future::result(cleanup(Err(Error::Accept(e)))));
        }
    };
    match *tls {
        None => {
            match IncomingSocketHandler::new(stream, Some(peer), delegate,
                config, handle, shutdown.clone())
            {
                Ok(handler) => Box::new(handler.then(cleanup)),
                Err(e) => {
                    Box::new(future::result(cleanup(Err(Error::Accept(e)))))
                }
            }
        }
        Some(ref engine) => {
            let config = config.clone();
            let handle = handle.clone();
            let shutdown = shutdown.clone();
            let lifecycle = lifecycle.clone();
            let handshake = engine.accept(stream);
            Box::new(handshake.then(move |result|
                -> Box<Future<Item=(), Error=()>>
            {
                match result {
                    Ok(stream) => {
                        match IncomingSocketHandler::new(stream, Some(peer),
                            delegate, &config, &handle, shutdown)
                        {
                            Ok(handler) => Box::new(handler.then(cleanup)),
                            Err(e) => Box::new(future::result(
                                cleanup(Err(Error::Accept(e))))),
                        }
                    }
                    Err(e) => {
                        let err = Error::TlsHandshake(e);
                        warn!("TLS handshake with {} failed: {}", peer, err);
                        lifecycle.fire_fail(port, &err);
                        Box::new(future::result(cleanup(Err(err))))
                    }
                }
            }))
        }
    }
}
