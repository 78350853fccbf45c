extern crate portico;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use portico::client;
use portico::server::{Config, DelegateResult, HTTPServer, Server};
use portico::server::{ServerRequest, ServerResponse};

fn ok_delegate(_req: &mut ServerRequest, res: &mut ServerResponse)
    -> DelegateResult
{
    res.end_with(b"ok")?;
    Ok(())
}

fn echo_path(req: &mut ServerRequest, res: &mut ServerResponse)
    -> DelegateResult
{
    let path = req.path().to_string();
    res.end_with(path.as_bytes())?;
    Ok(())
}

fn start(delegate: fn(&mut ServerRequest, &mut ServerResponse)
    -> DelegateResult) -> Server
{
    HTTPServer::new().listen(0, Arc::new(delegate)).unwrap()
}

fn connect(server: &Server) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn lifecycle_start_serve_stop() {
    let started = Arc::new(AtomicUsize::new(0));
    let stopped = Arc::new(AtomicUsize::new(0));
    let mut builder = HTTPServer::new();
    {
        let started = started.clone();
        builder.lifecycle().add_start_callback(move |_, _| {
            started.fetch_add(1, Ordering::SeqCst);
        });
        let stopped = stopped.clone();
        builder.lifecycle().add_stop_callback(move |_| {
            stopped.fetch_add(1, Ordering::SeqCst);
        });
    }
    let server = builder.listen(0, Arc::new(ok_delegate)).unwrap();
    {
        let started = started.clone();
        wait_until("start callback", move || {
            started.load(Ordering::SeqCst) == 1
        });
    }

    let mut stream = connect(&server);
    stream.write_all(
        b"GET /any HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n")
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"),
        "unexpected response: {}", response);
    assert!(response.ends_with("\r\n\r\nok"));
    // the server was started before the delegate ever ran
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert!(!server.is_stopped());

    server.stop();
    assert!(server.is_stopped());
    {
        let stopped = stopped.clone();
        wait_until("stop callback", move || {
            stopped.load(Ordering::SeqCst) == 1
        });
    }
    // stop is idempotent and the callback fired exactly once
    server.stop();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
}

#[test]
fn keep_alive_pipelined_responses_in_order() {
    let server = start(echo_path);
    let mut stream = connect(&server);
    stream.write_all(
        b"GET /one HTTP/1.1\r\nHost: t\r\n\r\n\
          GET /two HTTP/1.1\r\nHost: t\r\n\r\n")
        .unwrap();
    let expected = "HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\n/one\
                    HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\n/two";
    let mut collected = Vec::new();
    while collected.len() < expected.len() {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed early");
        collected.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(String::from_utf8_lossy(&collected), expected);
    server.stop();
}

#[test]
fn connection_close_gets_fin_after_one_response() {
    let server = start(ok_delegate);
    let mut stream = connect(&server);
    stream.write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    let mut response = String::new();
    // read_to_string only returns once the server sends FIN
    stream.read_to_string(&mut response).unwrap();
    assert_eq!(response.matches("HTTP/1.1 200 OK").count(), 1);
    assert!(response.contains("Connection: close\r\n"));
    server.stop();
}

#[test]
fn idle_connection_is_evicted() {
    let mut builder = HTTPServer::new();
    let mut config = Config::new();
    config.idle_timeout(Duration::from_millis(300));
    builder.set_config(config);
    let server = builder.listen(0, Arc::new(ok_delegate)).unwrap();
    let mut stream = connect(&server);
    stream.write_all(b"GET / HTTP/1.1\r\nHost: t\r\n\r\n").unwrap();
    let expected = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
    let mut response = vec![0u8; expected.len()];
    stream.read_exact(&mut response).unwrap();
    assert_eq!(&response[..], &expected[..]);
    // no second request: the server should close on idle timeout
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert_eq!(rest.len(), 0);
    server.stop();
}

#[test]
fn delegate_error_yields_500() {
    fn failing(_req: &mut ServerRequest, _res: &mut ServerResponse)
        -> DelegateResult
    {
        Err("expected test failure".into())
    }
    let server = start(failing);
    let mut stream = connect(&server);
    stream.write_all(b"GET / HTTP/1.1\r\nHost: t\r\n\r\n").unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error"));
    server.stop();
}

#[test]
fn post_body_and_query_reach_the_delegate() {
    fn reflect(req: &mut ServerRequest, res: &mut ServerResponse)
        -> DelegateResult
    {
        let q = req.query_parameters();
        let tag = q["tag"]["name"].as_str().unwrap_or("?").to_string();
        let body = req.read_string();
        res.end_with(format!("{}:{}", tag, body).as_bytes())?;
        Ok(())
    }
    let server = start(reflect);
    let mut stream = connect(&server);
    stream.write_all(
        b"POST /submit?tag[name]=probe HTTP/1.1\r\nHost: t\r\n\
          Content-Length: 5\r\nConnection: close\r\n\r\nhello")
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.ends_with("\r\n\r\nprobe:hello"),
        "unexpected response: {}", response);
    server.stop();
}

#[test]
fn client_round_trip_against_own_server() {
    let server = start(ok_delegate);
    let result = Arc::new(Mutex::new(None));
    let slot = result.clone();
    let request = client::request(
        &format!("http://127.0.0.1:{}/probe", server.port()),
        move |response| {
            let mut response = response.expect("response expected");
            let body = response.read_string();
            *slot.lock().unwrap() = Some((response.status_code(), body));
        }).unwrap();
    request.end();
    let captured = result.lock().unwrap().take().unwrap();
    assert_eq!(captured, (200, "ok".to_string()));
    server.stop();
}

#[test]
fn client_follows_redirects() {
    fn redirecting(req: &mut ServerRequest, res: &mut ServerResponse)
        -> DelegateResult
    {
        if req.path() == "/old" {
            res.set_status(302)?;
            res.set_header("Location", "/new")?;
            res.end()?;
        } else {
            res.end_with(b"moved here")?;
        }
        Ok(())
    }
    let server = start(redirecting);
    let result = Arc::new(Mutex::new(None));
    let slot = result.clone();
    client::request(
        &format!("http://127.0.0.1:{}/old", server.port()),
        move |response| {
            let mut response = response.expect("response expected");
            let body = response.read_string();
            *slot.lock().unwrap() = Some((response.status_code(), body));
        }).unwrap().end();
    let captured = result.lock().unwrap().take().unwrap();
    assert_eq!(captured, (200, "moved here".to_string()));
    server.stop();
}

#[test]
fn distinct_connections_are_served_concurrently() {
    fn slow(_req: &mut ServerRequest, res: &mut ServerResponse)
        -> DelegateResult
    {
        thread::sleep(Duration::from_millis(100));
        res.end_with(b"slow")?;
        Ok(())
    }
    let mut builder = HTTPServer::new();
    let mut config = Config::new();
    config.worker_threads(4);
    builder.set_config(config);
    let server = builder.listen(0, Arc::new(slow
        as fn(&mut ServerRequest, &mut ServerResponse) -> DelegateResult))
        .unwrap();
    let port = server.port();
    let begun = Instant::now();
    let clients: Vec<_> = (0..4).map(|_| {
        thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port))
                .unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            stream.write_all(
                b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).unwrap();
            assert!(response.ends_with("slow"));
        })
    }).collect();
    for client in clients {
        client.join().unwrap();
    }
    // four 100ms handlers on a multi-worker pool finish well inside
    // the serial worst case
    assert!(begun.elapsed() < Duration::from_millis(390),
        "requests were serialised: {:?}", begun.elapsed());
    server.stop();
}
