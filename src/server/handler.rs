use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures::{Async, Future, Poll};
use futures::future::Shared;
use futures::sync::oneshot;
use tokio_core::reactor::{Handle, Timeout};
use tokio_io::{AsyncRead, AsyncWrite};

use body_parser::BodyProgress;
use bytebuf::ByteBuffer;
use enums::Version;
use super::{Config, Error, ServerDelegate};
use super::parser::{self, BodyKind, ParsedRequest};
use super::response::{error_page, ServerResponse};

enum State {
    /// Between requests on a keep-alive connection
    Idle,
    /// The head of the next request is incomplete
    ReadingHeaders,
    /// Head parsed, body bytes still arriving
    ReadingBody {
        parsed: ParsedRequest,
        progress: BodyProgress,
    },
    /// Delegate has returned, the serialized response is draining
    Writing { keep_alive: bool },
    /// Drain what is buffered, then drop the socket
    Closing,
    Void,
}

/// Per-connection state machine
///
/// One handler owns one accepted socket for the socket's whole life,
/// across any number of keep-alive exchanges. It reads into its ingress
/// buffer, drives the parser, invokes the delegate exactly once per
/// completed message and flushes the serialized response, byte order in
/// equalling byte order out.
///
/// The future resolves when the connection is done; errors carry the
/// reason but are not propagated beyond the worker that polls it.
pub struct IncomingSocketHandler<S> {
    io: S,
    peer: Option<SocketAddr>,
    in_buf: ByteBuffer,
    out_buf: ByteBuffer,
    delegate: Arc<ServerDelegate>,
    config: Arc<Config>,
    timeout: Timeout,
    shutdown: Shared<oneshot::Receiver<()>>,
    stop_requested: bool,
    state: State,
}

impl<S: AsyncRead + AsyncWrite> IncomingSocketHandler<S> {
    pub(crate) fn new(io: S, peer: Option<SocketAddr>,
        delegate: Arc<ServerDelegate>, config: &Arc<Config>,
        handle: &Handle, shutdown: Shared<oneshot::Receiver<()>>)
        -> io::Result<IncomingSocketHandler<S>>
    {
        let timeout = Timeout::new(config.idle_timeout, handle)?;
        Ok(IncomingSocketHandler {
            io: io,
            peer: peer,
            in_buf: ByteBuffer::new(),
            out_buf: ByteBuffer::new(),
            delegate: delegate,
            config: config.clone(),
            timeout: timeout,
            shutdown: shutdown,
            stop_requested: false,
            state: State::Idle,
        })
    }

    /// Push the idle deadline forward; called whenever bytes arrive
    fn touch_timeout(&mut self) {
        self.timeout.reset(Instant::now() + self.config.idle_timeout);
    }

    fn check_shutdown(&mut self) {
        if self.stop_requested {
            return;
        }
        // both a signal and a dropped sender mean the server stopped
        if !matches!(self.shutdown.poll(), Ok(Async::NotReady)) {
            self.stop_requested = true;
        }
    }

    /// One read from the socket into the ingress buffer
    fn fill_from_socket(&mut self) -> Result<Async<usize>, Error> {
        match self.in_buf.read_from(&mut self.io) {
            Ok(n) => Ok(Async::Ready(n)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                Ok(Async::NotReady)
            }
            Err(e) => {
                debug!("read error from {:?}: {}", self.peer, e);
                Err(Error::Disconnected)
            }
        }
    }

    /// Flush the egress buffer as far as the socket allows
    fn flush(&mut self) -> Result<(), Error> {
        if self.out_buf.is_empty() {
            return Ok(());
        }
        match self.out_buf.write_to(&mut self.io) {
            Ok(_) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(Error::Write(e)),
        }
    }

    /// Park the task, converting an expired idle deadline into an error
    fn finish_not_ready(&mut self) -> Poll<(), Error> {
        match self.timeout.poll() {
            Ok(Async::Ready(())) => {
                debug!("connection from {:?} idled out", self.peer);
                Err(Error::IdleTimeout)
            }
            Ok(Async::NotReady) => Ok(Async::NotReady),
            Err(e) => Err(Error::Write(e)),
        }
    }

    /// Emit a canned error response and drain towards close
    fn emit_error_and_close(&mut self, code: u16, version: Version) {
        error_page(code, &mut self.out_buf, version);
        self.state = State::Closing;
    }

    /// Run the delegate for a completed message
    ///
    /// Returns the final keep-alive verdict; an error means the
    /// connection must be dropped without a response.
    fn dispatch(&mut self, parsed: ParsedRequest) -> Result<bool, Error> {
        let ParsedRequest { mut request, keep_alive, is_head, .. } = parsed;
        let version = request.version();
        let mut response = ServerResponse::new();
        match self.delegate.handle(&mut request, &mut response) {
            Ok(()) => {
                if !response.ended() {
                    // the delegate walked away: finish the exchange with
                    // whatever was buffered
                    response.end().expect("unended response can end");
                }
            }
            Err(err) => {
                error!("delegate error for {} {}: {}",
                    request.method(), request.path(), err);
                if response.body_written() {
                    return Err(Error::Delegate(err));
                }
                error_page(500, &mut self.out_buf, version);
                return Ok(false);
            }
        }
        let keep_alive = keep_alive
            && !response.wants_close()
            && !self.stop_requested;
        response.serialize_into(&mut self.out_buf, version,
            !keep_alive, is_head)?;
        Ok(keep_alive)
    }

    fn turn(&mut self) -> Poll<(), Error> {
        loop {
            // egress first: pending response bytes take priority over
            // parsing more input
            self.flush()?;
            match mem::replace(&mut self.state, State::Void) {
                State::Void => unreachable!("handler polled reentrantly"),
                State::Idle => {
                    if self.stop_requested && self.in_buf.is_empty() {
                        self.state = State::Closing;
                        continue;
                    }
                    if !self.in_buf.is_empty() {
                        // pipelined bytes of the next request
                        self.state = State::ReadingHeaders;
                        continue;
                    }
                    match self.fill_from_socket()? {
                        Async::Ready(0) => {
                            // clean FIN between requests
                            self.state = State::Closing;
                        }
                        Async::Ready(_) => {
                            self.touch_timeout();
                            self.state = State::ReadingHeaders;
                        }
                        Async::NotReady => {
                            self.state = State::Idle;
                            return self.finish_not_ready();
                        }
                    }
                }
                State::ReadingHeaders => {
                    match parser::parse_request(&mut self.in_buf, self.peer) {
                        Ok(Some(parsed)) => {
                            let progress = match parsed.body {
                                BodyKind::Fixed(n) => BodyProgress::fixed(n),
                                BodyKind::Chunked => BodyProgress::chunked(),
                            };
                            if progress.exceeds(self.config.max_request_body) {
                                debug!("{:?}: declared request body over \
                                    limit", self.peer);
                                self.emit_error_and_close(413,
                                    parsed.request.version());
                                continue;
                            }
                            if parsed.expect_continue
                                && parsed.request.version() == Version::Http11
                            {
                                self.out_buf.append(
                                    b"HTTP/1.1 100 Continue\r\n\r\n");
                            }
                            self.state = State::ReadingBody {
                                parsed: parsed,
                                progress: progress,
                            };
                        }
                        Ok(None) => {
                            match self.fill_from_socket()? {
                                Async::Ready(0) => {
                                    return Err(Error::Disconnected);
                                }
                                Async::Ready(_) => {
                                    self.touch_timeout();
                                    self.state = State::ReadingHeaders;
                                }
                                Async::NotReady => {
                                    self.state = State::ReadingHeaders;
                                    return self.finish_not_ready();
                                }
                            }
                        }
                        Err(e) => {
                            debug!("bad request from {:?}: {}", self.peer, e);
                            self.emit_error_and_close(400, Version::Http11);
                        }
                    }
                }
                State::ReadingBody { mut parsed, mut progress } => {
                    if let Err(e) = progress.decode(&mut self.in_buf) {
                        debug!("bad chunk framing from {:?}: {:?}",
                            self.peer, e);
                        self.emit_error_and_close(400,
                            parsed.request.version());
                        continue;
                    }
                    let (bytes, done) = progress.ready(&self.in_buf, false);
                    if bytes > 0 {
                        let mut chunk = Vec::with_capacity(bytes);
                        chunk.extend_from_slice(
                            &self.in_buf.bytes()[..bytes]);
                        parsed.request.append_body(&chunk);
                        progress.advance(&mut self.in_buf, bytes);
                        if progress.exceeds(self.config.max_request_body) {
                            debug!("{:?}: body over limit after {} bytes",
                                self.peer, progress.received());
                            self.emit_error_and_close(413,
                                parsed.request.version());
                            continue;
                        }
                    }
                    if done {
                        if self.in_buf.is_empty() {
                            // reclaim the drained ingress buffer before
                            // the next exchange
                            self.in_buf.reset();
                        }
                        let keep_alive = self.dispatch(parsed)?;
                        self.state = State::Writing {
                            keep_alive: keep_alive,
                        };
                        continue;
                    }
                    match self.fill_from_socket()? {
                        Async::Ready(0) => return Err(Error::Disconnected),
                        Async::Ready(_) => {
                            self.touch_timeout();
                            self.state = State::ReadingBody {
                                parsed: parsed,
                                progress: progress,
                            };
                        }
                        Async::NotReady => {
                            self.state = State::ReadingBody {
                                parsed: parsed,
                                progress: progress,
                            };
                            return self.finish_not_ready();
                        }
                    }
                }
                State::Writing { keep_alive } => {
                    if self.out_buf.is_empty() {
                        if keep_alive && !self.stop_requested {
                            self.out_buf.reset();
                            if self.in_buf.is_empty() {
                                self.in_buf.reset();
                            }
                            self.touch_timeout();
                            self.state = State::Idle;
                        } else {
                            self.state = State::Closing;
                        }
                        continue;
                    }
                    self.state = State::Writing { keep_alive: keep_alive };
                    return self.finish_not_ready();
                }
                State::Closing => {
                    if self.out_buf.is_empty() {
                        return Ok(Async::Ready(()));
                    }
                    self.state = State::Closing;
                    return self.finish_not_ready();
                }
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite> Future for IncomingSocketHandler<S> {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        self.check_shutdown();
        self.turn()
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::Arc;

    use futures::Future;
    use futures::sync::oneshot;
    use tokio_core::reactor::Core;
    use tokio_io::{AsyncRead, AsyncWrite};

    use futures::Poll;
    use server::{Config, Error};
    use server::request::ServerRequest;
    use server::response::ServerResponse;
    use super::IncomingSocketHandler;

    /// Socket stand-in: reads scripted segments, then reports EOF
    struct MockStream {
        input: VecDeque<Vec<u8>>,
        output: Vec<u8>,
        write_limit: usize,
    }

    impl MockStream {
        fn new(segments: &[&[u8]]) -> MockStream {
            MockStream {
                input: segments.iter().map(|s| s.to_vec()).collect(),
                output: Vec::new(),
                write_limit: usize::max_value(),
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.input.pop_front() {
                Some(mut segment) => {
                    if segment.len() > buf.len() {
                        let rest = segment.split_off(buf.len());
                        self.input.push_front(rest);
                    }
                    buf[..segment.len()].copy_from_slice(&segment);
                    Ok(segment.len())
                }
                None => Ok(0),
            }
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.write_limit);
            self.output.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl AsyncRead for MockStream {}
    impl AsyncWrite for MockStream {
        fn shutdown(&mut self) -> Poll<(), io::Error> {
            Ok(::futures::Async::Ready(()))
        }
    }

    fn ok_delegate(_req: &mut ServerRequest, res: &mut ServerResponse)
        -> Result<(), Box<::std::error::Error + Send + Sync>>
    {
        res.write(b"ok").unwrap();
        res.end().unwrap();
        Ok(())
    }

    fn run(segments: &[&[u8]]) -> (Result<(), Error>, String) {
        run_with(segments, ok_delegate)
    }

    fn run_with<D>(segments: &[&[u8]], delegate: D)
        -> (Result<(), Error>, String)
        where D: Fn(&mut ServerRequest, &mut ServerResponse)
                -> Result<(), Box<::std::error::Error + Send + Sync>>
            + Send + Sync + 'static
    {
        let mut core = Core::new().unwrap();
        let handle = core.handle();
        let (_tx, rx) = oneshot::channel::<()>();
        let mut handler = IncomingSocketHandler::new(
            MockStream::new(segments), None, Arc::new(delegate),
            &Config::new().done(), &handle, rx.shared()).unwrap();
        let result = core.run(::futures::future::poll_fn(|| {
            handler.poll()
        }));
        let output = String::from_utf8_lossy(&handler.io.output)
            .into_owned();
        (result, output)
    }

    #[test]
    fn single_request_clean_close() {
        let (result, output) = run(&[b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"]);
        result.unwrap();
        assert_eq!(output,
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    }

    #[test]
    fn head_split_across_reads() {
        let (result, output) = run(&[
            b"GET / HT", b"TP/1.1\r\nHo", b"st: x\r\n\r\n"]);
        result.unwrap();
        assert!(output.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn pipelined_requests_answered_in_order() {
        let (result, output) = run(&[
            b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n"]);
        result.unwrap();
        let responses: Vec<&str> = output.matches("HTTP/1.1 200 OK").collect();
        assert_eq!(responses.len(), 2);
    }

    #[test]
    fn connection_close_ends_after_one_response() {
        let (result, output) = run(&[
            b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n",
            b"GET /ignored HTTP/1.1\r\n\r\n"]);
        result.unwrap();
        assert_eq!(output.matches("HTTP/1.1 200 OK").count(), 1);
        assert!(output.contains("Connection: close\r\n"));
    }

    #[test]
    fn fixed_body_reaches_delegate() {
        let (result, output) = run_with(
            &[b"POST /in HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello"],
            |req: &mut ServerRequest, res: &mut ServerResponse| {
                assert_eq!(req.read_string(), "hello");
                res.end_with(b"got it").unwrap();
                Ok(())
            });
        result.unwrap();
        assert!(output.ends_with("got it"));
    }

    #[test]
    fn chunked_body_is_decoded() {
        let (result, _) = run_with(
            &[b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n",
              b"5\r\nhello\r\n0\r\n\r\n"],
            |req: &mut ServerRequest, res: &mut ServerResponse| {
                assert_eq!(req.read_string(), "hello");
                res.end().unwrap();
                Ok(())
            });
        result.unwrap();
    }

    #[test]
    fn delegate_error_turns_into_500() {
        let (result, output) = run_with(
            &[b"GET / HTTP/1.1\r\n\r\n"],
            |_req: &mut ServerRequest, _res: &mut ServerResponse| {
                Err("boom".into())
            });
        result.unwrap();
        assert!(output.starts_with("HTTP/1.1 500 Internal Server Error"));
    }

    #[test]
    fn delegate_without_end_gets_an_empty_end() {
        let (result, output) = run_with(
            &[b"GET / HTTP/1.1\r\n\r\n"],
            |_req: &mut ServerRequest, res: &mut ServerResponse| {
                res.write(b"partial").unwrap();
                Ok(())
            });
        result.unwrap();
        assert!(output.contains("Content-Length: 7\r\n"));
    }

    #[test]
    fn malformed_head_gets_400() {
        let (result, output) = run(&[b"NOT A REQUEST\r\n\r\n"]);
        result.unwrap();
        assert!(output.starts_with("HTTP/1.1 400 Bad Request"));
    }

    #[test]
    fn partial_writes_are_retried() {
        let mut core = Core::new().unwrap();
        let handle = core.handle();
        let (_tx, rx) = oneshot::channel::<()>();
        let mut stream = MockStream::new(&[b"GET / HTTP/1.1\r\n\r\n"]);
        stream.write_limit = 3;
        let mut handler = IncomingSocketHandler::new(
            stream, None, Arc::new(ok_delegate),
            &Config::new().done(), &handle, rx.shared()).unwrap();
        core.run(::futures::future::poll_fn(|| handler.poll())).unwrap();
        let output = String::from_utf8_lossy(&handler.io.output)
            .into_owned();
        assert!(output.ends_with("\r\n\r\nok"));
    }
}
