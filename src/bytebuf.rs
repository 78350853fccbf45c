use std::io;

/// How much spare room we make when reading from a socket
const READ_CHUNK: usize = 8192;

/// An append-and-consume byte store with a read cursor
///
/// The buffer backs both request ingress framing and response egress
/// buffering. Bytes are `append`ed at the tail and drained in FIFO order
/// through `fill_into` and friends, which advance an internal cursor.
/// `reset` drops everything, `rewind` moves the cursor back to the start
/// while keeping the content, so a consumer can re-read.
///
/// The type is deliberately not thread-safe: every buffer is owned by a
/// single connection handler which serialises access.
#[derive(Debug)]
pub struct ByteBuffer {
    data: Vec<u8>,
    read: usize,
}

impl ByteBuffer {
    /// New empty buffer, does not allocate until first append
    pub fn new() -> ByteBuffer {
        ByteBuffer {
            data: Vec::new(),
            read: 0,
        }
    }

    /// Copy `data` to the tail of the buffer
    ///
    /// Growth is amortised (the underlying storage grows geometrically)
    /// and unread content is always preserved.
    pub fn append(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Total number of bytes held (read and unread alike)
    ///
    /// Only `reset` makes this smaller.
    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// Copies `min(dst.len(), remaining)` bytes into `dst`
    ///
    /// Advances the cursor by the returned amount. Returns 0 iff the
    /// buffer is fully drained.
    pub fn fill_into(&mut self, dst: &mut [u8]) -> usize {
        let n = (self.data.len() - self.read).min(dst.len());
        dst[..n].copy_from_slice(&self.data[self.read..self.read + n]);
        self.read += n;
        n
    }

    /// Same as `fill_into` but appends all remaining bytes to a vector
    pub fn fill_into_vec(&mut self, dst: &mut Vec<u8>) -> usize {
        let n = self.data.len() - self.read;
        dst.extend_from_slice(&self.data[self.read..]);
        self.read = self.data.len();
        n
    }

    /// Drop all content and move the cursor to the start
    pub fn reset(&mut self) {
        self.data.clear();
        self.read = 0;
    }

    /// Move the cursor back to the start, keeping content
    pub fn rewind(&mut self) {
        self.read = 0;
    }

    /// The unread tail of the buffer
    pub fn bytes(&self) -> &[u8] {
        &self.data[self.read..]
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read
    }

    /// True when every appended byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.read == self.data.len()
    }

    /// Advance the cursor without copying
    ///
    /// This is the zero-copy sibling of `fill_into`, used by the parsing
    /// code which borrows `bytes()` first.
    ///
    /// # Panics
    ///
    /// Panics when `n` is larger than the number of unread bytes.
    pub fn consume(&mut self, n: usize) {
        assert!(self.read + n <= self.data.len());
        self.read += n;
    }

    /// Remove a range of unread bytes, indexed relative to the cursor
    ///
    /// Used to strip wire framing (chunk size lines) in place so that
    /// the remaining unread bytes are pure payload.
    pub(crate) fn remove_range(&mut self, start: usize, end: usize) {
        assert!(start <= end && self.read + end <= self.data.len());
        self.data.drain(self.read + start..self.read + end);
    }

    /// Read once from `r` into the tail of the buffer
    ///
    /// Returns the number of bytes read; 0 means end-of-stream.
    pub fn read_from<R: io::Read>(&mut self, r: &mut R) -> io::Result<usize> {
        let start = self.data.len();
        self.data.resize(start + READ_CHUNK, 0);
        match r.read(&mut self.data[start..]) {
            Ok(n) => {
                self.data.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.data.truncate(start);
                Err(e)
            }
        }
    }

    /// Write unread bytes into `w` until drained or the sink errors
    ///
    /// Bytes actually written are consumed even when the call ends with
    /// an error, so a `WouldBlock` in the middle of a flush does not
    /// replay data.
    pub fn write_to<W: io::Write>(&mut self, w: &mut W) -> io::Result<usize> {
        let mut total = 0;
        while self.read < self.data.len() {
            match w.write(&self.data[self.read..]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero,
                        "failed to write buffered bytes"));
                }
                Ok(n) => {
                    self.read += n;
                    total += n;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }
}

impl io::Write for ByteBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::ByteBuffer;

    #[test]
    fn fifo_order() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello");
        buf.append(b" world");
        let mut dst = [0u8; 3];
        assert_eq!(buf.fill_into(&mut dst), 3);
        assert_eq!(&dst, b"hel");
        let mut rest = Vec::new();
        assert_eq!(buf.fill_into_vec(&mut rest), 8);
        assert_eq!(&rest[..], b"lo world");
        assert_eq!(buf.fill_into(&mut dst), 0);
    }

    #[test]
    fn fill_output_is_prefix_of_appends() {
        // Invariant: concatenated fills == prefix of concatenated appends
        let chunks: &[&[u8]] = &[b"a", b"bc", b"", b"defg", b"hi"];
        let mut buf = ByteBuffer::new();
        let mut appended = Vec::new();
        let mut filled = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            buf.append(chunk);
            appended.extend_from_slice(chunk);
            let mut dst = [0u8; 2];
            let n = buf.fill_into(&mut dst[..i % 3]);
            filled.extend_from_slice(&dst[..n]);
        }
        assert!(appended.starts_with(&filled));
    }

    #[test]
    fn rewind_replays_content() {
        let mut buf = ByteBuffer::new();
        buf.append(b"abc");
        let mut dst = [0u8; 3];
        assert_eq!(buf.fill_into(&mut dst), 3);
        assert_eq!(buf.remaining(), 0);
        buf.rewind();
        assert_eq!(buf.count(), 3);
        assert_eq!(buf.fill_into(&mut dst), 3);
        assert_eq!(&dst, b"abc");
    }

    #[test]
    fn reset_clears() {
        let mut buf = ByteBuffer::new();
        buf.append(b"abc");
        buf.reset();
        assert_eq!(buf.count(), 0);
        let mut dst = [0u8; 4];
        assert_eq!(buf.fill_into(&mut dst), 0);
        buf.append(b"xy");
        assert_eq!(buf.fill_into(&mut dst), 2);
        assert_eq!(&dst[..2], b"xy");
    }

    #[test]
    fn consume_then_fill() {
        let mut buf = ByteBuffer::new();
        buf.append(b"GET / HTTP/1.1");
        assert_eq!(&buf.bytes()[..3], b"GET");
        buf.consume(4);
        let mut rest = Vec::new();
        buf.fill_into_vec(&mut rest);
        assert_eq!(&rest[..], b"/ HTTP/1.1");
    }

    #[test]
    fn write_to_drains() {
        let mut buf = ByteBuffer::new();
        buf.append(b"response bytes");
        let mut sink = Vec::new();
        assert_eq!(buf.write_to(&mut sink).unwrap(), 14);
        assert!(buf.is_empty());
        assert_eq!(&sink[..], b"response bytes");
    }
}
