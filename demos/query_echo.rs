extern crate portico;
extern crate env_logger;

use std::env;
use std::sync::Arc;

use portico::server::{self, DelegateResult, Server};
use portico::server::{ServerRequest, ServerResponse};

/// Echoes the structured form of the query string, e.g.
/// `curl 'localhost:8080/?a=1&b[c][]=true'`
fn echo(req: &mut ServerRequest, res: &mut ServerResponse)
    -> DelegateResult
{
    let parameters = req.query_parameters();
    res.set_header("Content-Type", "text/plain")?;
    res.write(format!("{:#?}\n", parameters.root()).as_bytes())?;
    res.end()?;
    Ok(())
}

fn main() {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init().expect("init logging");

    let server = server::listen(8080,
        Arc::new(echo
            as fn(&mut ServerRequest, &mut ServerResponse)
                -> DelegateResult))
        .expect("listen on 8080");
    println!("serving on http://127.0.0.1:{}/", server.port());
    Server::wait_for_listeners();
}
