extern crate portico;
extern crate env_logger;

use std::env;
use std::sync::Arc;

use portico::server::{self, DelegateResult, Server};
use portico::server::{ServerRequest, ServerResponse};

const BODY: &'static str = "Hello World!\n";

fn hello(_req: &mut ServerRequest, res: &mut ServerResponse)
    -> DelegateResult
{
    res.set_header("Content-Type", "text/plain")?;
    res.set_date_header()?;
    res.end_with(BODY.as_bytes())?;
    Ok(())
}

fn main() {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init().expect("init logging");

    let server = server::listen(8080,
        Arc::new(hello
            as fn(&mut ServerRequest, &mut ServerResponse)
                -> DelegateResult))
        .expect("listen on 8080");
    println!("serving on http://127.0.0.1:{}/", server.port());
    Server::wait_for_listeners();
}
