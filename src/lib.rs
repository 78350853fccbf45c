//! Server-side HTTP networking built on `tokio` tools
//!
//! The crate accepts TCP (optionally TLS) connections on a dedicated
//! accept thread, distributes them across a pool of worker event loops,
//! and hands every completed request to a user-supplied
//! [`ServerDelegate`](server/trait.ServerDelegate.html) as a
//! `ServerRequest`/`ServerResponse` pair.
#![recursion_limit="100"]

extern crate futures;
extern crate url;
extern crate percent_encoding;
extern crate httparse;
extern crate tokio_core;
extern crate tokio_io;
extern crate indexmap;
extern crate socket2;
extern crate once_cell;
extern crate base64;
extern crate native_tls;
extern crate tokio_tls;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;
#[cfg(feature="date_header")] extern crate httpdate;

pub mod server;
pub mod client;
pub mod query;
mod bytebuf;
mod enums;
mod headers;
mod serializer;
mod chunked;
mod body_parser;

pub use bytebuf::ByteBuffer;
pub use enums::Version;
pub use headers::Headers;
pub use query::{QueryParser, QueryValue};
