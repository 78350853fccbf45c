use httparse::{InvalidChunkSize, parse_chunk_size};

use bytebuf::ByteBuffer;

/// Incremental decoder for a chunked transfer-coded body
///
/// Framing bytes (size lines, inter-chunk CRLFs, trailers) are removed
/// from the buffer in place, so the first `buffered()` unread bytes are
/// always pure payload.
#[derive(Debug, Clone)]
pub struct State {
    buffered: usize,
    pending: usize,
    after_data: bool,
    trailers: bool,
    done: bool,
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

impl State {
    pub fn new() -> State {
        State {
            buffered: 0,
            pending: 0,
            after_data: false,
            trailers: false,
            done: false,
        }
    }
    pub fn parse(&mut self, buf: &mut ByteBuffer)
        -> Result<(), InvalidChunkSize>
    {
        while !self.done {
            if self.trailers {
                // discard trailer lines up to the terminating empty line
                match find_crlf(&buf.bytes()[self.buffered..]) {
                    Some(0) => {
                        buf.remove_range(self.buffered, self.buffered + 2);
                        self.done = true;
                    }
                    Some(n) => {
                        buf.remove_range(self.buffered, self.buffered + n + 2);
                    }
                    None => return Ok(()),
                }
                continue;
            }
            if self.buffered >= buf.remaining() {
                return Ok(());
            }
            if self.pending == 0 {
                if self.after_data {
                    // CRLF closing the previous chunk's data
                    if buf.remaining() < self.buffered + 2 {
                        return Ok(());
                    }
                    if &buf.bytes()[self.buffered..self.buffered + 2]
                        != b"\r\n"
                    {
                        return Err(InvalidChunkSize);
                    }
                    buf.remove_range(self.buffered, self.buffered + 2);
                    self.after_data = false;
                    continue;
                }
                use httparse::Status::*;
                match parse_chunk_size(&buf.bytes()[self.buffered..])? {
                    Complete((framing, 0)) => {
                        buf.remove_range(self.buffered,
                            self.buffered + framing);
                        self.trailers = true;
                    }
                    Complete((framing, chunk_size)) => {
                        buf.remove_range(self.buffered,
                            self.buffered + framing);
                        self.pending = chunk_size as usize;
                    }
                    Partial => {
                        return Ok(());
                    }
                }
            } else {
                let available = buf.remaining() - self.buffered;
                if self.pending <= available {
                    self.buffered += self.pending;
                    self.pending = 0;
                    self.after_data = true;
                } else {
                    self.pending -= available;
                    self.buffered = buf.remaining();
                }
            }
        }
        Ok(())
    }
    pub fn buffered(&self) -> usize {
        self.buffered
    }
    pub fn is_done(&self) -> bool {
        self.done
    }
    pub fn consume(&mut self, n: usize) {
        assert!(self.buffered >= n);
        self.buffered -= n;
    }
}

#[cfg(test)]
mod test {
    use bytebuf::ByteBuffer;
    use super::State;

    #[test]
    fn two_chunks() {
        let mut buf = ByteBuffer::new();
        buf.append(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
        let mut state = State::new();
        state.parse(&mut buf).unwrap();
        assert!(state.is_done());
        assert_eq!(state.buffered(), 11);
        assert_eq!(&buf.bytes()[..11], b"hello world");
    }

    #[test]
    fn split_mid_chunk() {
        let mut buf = ByteBuffer::new();
        let mut state = State::new();
        buf.append(b"5\r\nhel");
        state.parse(&mut buf).unwrap();
        assert!(!state.is_done());
        assert_eq!(state.buffered(), 3);
        buf.append(b"lo\r\n0\r\n\r\nleftover");
        state.parse(&mut buf).unwrap();
        assert!(state.is_done());
        assert_eq!(state.buffered(), 5);
        assert_eq!(&buf.bytes()[..], b"helloleftover");
    }

    #[test]
    fn trailers_are_discarded() {
        let mut buf = ByteBuffer::new();
        buf.append(b"2\r\nok\r\n0\r\nX-Sum: 1\r\n\r\n");
        let mut state = State::new();
        state.parse(&mut buf).unwrap();
        assert!(state.is_done());
        assert_eq!(&buf.bytes()[..], b"ok");
    }
}
