use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::Error;

/// Callbacks for server lifecycle events
///
/// All methods default to no-ops, so a delegate implements only what it
/// cares about. The server holds the delegate by shared reference and
/// never owns it.
pub trait ServerLifecycleDelegate: Send + Sync {
    /// The listening socket is bound and the accept loop is starting
    fn started(&self, _port: u16, _addr: &SocketAddr) {}
    /// The accept loop has exited
    fn stopped(&self, _port: u16) {}
    /// Binding failed, or a connection-level failure like a rejected
    /// TLS handshake occurred
    fn failed(&self, _port: u16, _error: &Error) {}
}

type StartCallback = Box<Fn(u16, &SocketAddr) + Send + Sync>;
type StopCallback = Box<Fn(u16) + Send + Sync>;
type FailCallback = Box<Fn(u16, &Error) + Send + Sync>;

/// Ordered lists of lifecycle callbacks
///
/// Callbacks are appended before `listen` and invoked on the accept
/// worker in registration order. Start and stop fire at most once per
/// server; fail fires once per failure event.
pub struct ServerLifecycleListener {
    start: Mutex<Vec<StartCallback>>,
    stop: Mutex<Vec<StopCallback>>,
    fail: Mutex<Vec<FailCallback>>,
    start_fired: AtomicBool,
    stop_fired: AtomicBool,
}

impl ServerLifecycleListener {
    pub fn new() -> ServerLifecycleListener {
        ServerLifecycleListener {
            start: Mutex::new(Vec::new()),
            stop: Mutex::new(Vec::new()),
            fail: Mutex::new(Vec::new()),
            start_fired: AtomicBool::new(false),
            stop_fired: AtomicBool::new(false),
        }
    }

    pub fn add_start_callback<F>(&self, callback: F)
        where F: Fn(u16, &SocketAddr) + Send + Sync + 'static
    {
        self.start.lock().expect("lifecycle lock poisoned")
            .push(Box::new(callback));
    }

    pub fn add_stop_callback<F>(&self, callback: F)
        where F: Fn(u16) + Send + Sync + 'static
    {
        self.stop.lock().expect("lifecycle lock poisoned")
            .push(Box::new(callback));
    }

    pub fn add_fail_callback<F>(&self, callback: F)
        where F: Fn(u16, &Error) + Send + Sync + 'static
    {
        self.fail.lock().expect("lifecycle lock poisoned")
            .push(Box::new(callback));
    }

    /// Register all three methods of a delegate object
    pub fn attach_delegate(&self, delegate: Arc<ServerLifecycleDelegate>) {
        let d = delegate.clone();
        self.add_start_callback(move |port, addr| d.started(port, addr));
        let d = delegate.clone();
        self.add_stop_callback(move |port| d.stopped(port));
        self.add_fail_callback(move |port, err| delegate.failed(port, err));
    }

    pub(crate) fn fire_start(&self, port: u16, addr: &SocketAddr) {
        if self.start_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        for callback in self.start.lock()
            .expect("lifecycle lock poisoned").iter()
        {
            callback(port, addr);
        }
    }

    pub(crate) fn fire_stop(&self, port: u16) {
        if self.stop_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        for callback in self.stop.lock()
            .expect("lifecycle lock poisoned").iter()
        {
            callback(port);
        }
    }

    pub(crate) fn fire_fail(&self, port: u16, error: &Error) {
        for callback in self.fail.lock()
            .expect("lifecycle lock poisoned").iter()
        {
            callback(port, error);
        }
    }
}
