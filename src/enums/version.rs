use std::fmt;

/// The HTTP protocol version of a message.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// The `(major, minor)` pair of the version
    pub fn pair(&self) -> (u8, u8) {
        match *self {
            Version::Http10 => (1, 0),
            Version::Http11 => (1, 1),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Version::Http10 => f.write_str("HTTP/1.0"),
            Version::Http11 => f.write_str("HTTP/1.1"),
        }
    }
}
