use std::fmt;
use std::slice;
use std::str::from_utf8;

use httparse::Header;

// header value is a byte sequence
// we need case insensitive comparison and strip out of the whitespace
fn token_matches(val: &[u8], token: &[u8]) -> bool {
    let mut iter = val.iter();
    for (idx, &ch) in iter.by_ref().enumerate() {
        match ch {
            b'\r' | b'\n' | b' ' | b'\t' => continue,
            ch if ch.to_ascii_lowercase() == token[0] => {
                if idx + token.len() > val.len() {
                    return false;
                }
                break;
            }
            _ => return false,
        }
    }
    for (idx, ch) in iter.by_ref().take(token.len() - 1).enumerate() {
        if token[idx + 1] != ch.to_ascii_lowercase() {
            return false;
        }
    }
    for &ch in iter {
        if !matches!(ch, b'\r' | b'\n' | b' ' | b'\t') {
            return false;
        }
    }
    return true;
}

pub fn is_close(val: &[u8]) -> bool {
    val.len() >= 5 && token_matches(val, b"close")
}

pub fn is_keep_alive(val: &[u8]) -> bool {
    val.len() >= 10 && token_matches(val, b"keep-alive")
}

pub fn is_chunked(val: &[u8]) -> bool {
    val.len() >= 7 && token_matches(val, b"chunked")
}

pub fn is_continue(val: &[u8]) -> bool {
    val.len() >= 12 && token_matches(val, b"100-continue")
}

quick_error! {
    #[derive(Debug)]
    pub enum FramingFault {
        SecondLength {
            description("message carries two content lengths")
        }
        UnreadableLength {
            description("content length is not a number")
        }
    }
}

/// Framing-relevant facts pulled out of a header block in one pass
///
/// Used for requests and responses alike; what the facts mean for the
/// body (empty, fixed, chunked, read-to-close) is the caller's call.
#[derive(Debug, Default)]
pub struct FramingScan {
    /// The final transfer coding is chunked
    pub chunked: bool,
    /// A usable `Content-Length`; cleared when chunking overrides it
    pub length: Option<u64>,
    /// A `close` token appeared in `Connection`
    pub close: bool,
    /// A `keep-alive` token appeared in `Connection`
    pub keep_alive: bool,
    /// The peer sent `Expect: 100-continue`
    pub expect_continue: bool,
}

/// Walk a header block once, collecting everything that decides body
/// length and connection reuse
///
/// Chunking only counts when `chunked` is the last listed coding. A
/// message naming both a chunked coding and a content length is served
/// chunked, but the contradiction disqualifies it from keep-alive.
pub fn scan_framing(headers: &[Header]) -> Result<FramingScan, FramingFault> {
    let mut scan = FramingScan::default();
    let mut saw_length = false;
    for header in headers.iter() {
        if header.name.eq_ignore_ascii_case("Transfer-Encoding") {
            if let Some(last) = header.value.split(|&x| x == b',').last() {
                if is_chunked(last) {
                    scan.chunked = true;
                }
            }
        } else if header.name.eq_ignore_ascii_case("Content-Length") {
            if saw_length {
                return Err(FramingFault::SecondLength);
            }
            saw_length = true;
            let text = from_utf8(header.value)
                .map_err(|_| FramingFault::UnreadableLength)?;
            let length = text.trim().parse()
                .map_err(|_| FramingFault::UnreadableLength)?;
            scan.length = Some(length);
        } else if header.name.eq_ignore_ascii_case("Connection") {
            for token in header.value.split(|&x| x == b',') {
                if is_close(token) {
                    scan.close = true;
                } else if is_keep_alive(token) {
                    scan.keep_alive = true;
                }
            }
        } else if header.name.eq_ignore_ascii_case("Expect") {
            if is_continue(header.value) {
                scan.expect_continue = true;
            }
        }
    }
    if scan.chunked && saw_length {
        scan.close = true;
        scan.length = None;
    }
    Ok(scan)
}

/// A multimap of HTTP headers
///
/// Names compare case-insensitively; both the relative order of distinct
/// names and the order of repeated values within one name are the order
/// of insertion, which for a parsed message is wire order.
#[derive(Debug)]
pub struct Headers {
    entries: Vec<(String, Vec<u8>)>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Add a value, keeping any previous values of the same name
    pub fn append<V: AsRef<[u8]>>(&mut self, name: &str, value: V) {
        self.entries.push((name.to_string(), value.as_ref().to_vec()));
    }

    /// Replace all values of `name` with a single one
    pub fn set<V: AsRef<[u8]>>(&mut self, name: &str, value: V) {
        self.remove(name);
        self.append(name, value);
    }

    /// Drop all values of `name`, returning whether any existed
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|&(ref n, _)| !n.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    /// First value of `name`, if any
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
    }

    /// First value of `name` as utf-8, if any and valid
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| from_utf8(v).ok())
    }

    /// All values of `name` in insertion order
    pub fn all<'x>(&'x self, name: &'x str) -> Vec<&'x [u8]> {
        self.entries.iter()
            .filter(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate over `(name, value)` pairs in insertion order
    pub fn iter(&self) -> slice::Iter<(String, Vec<u8>)> {
        self.entries.iter()
    }

    /// Number of entries (repeated names count each time)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for &(ref n, ref v) in self.entries.iter() {
            writeln!(f, "{}: {}", n, String::from_utf8_lossy(v))?;
        }
        Ok(())
    }
}
