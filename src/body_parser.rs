use httparse::InvalidChunkSize;

use bytebuf::ByteBuffer;
use chunked;

/// Tracks one inbound message body through the ingress buffer
///
/// Besides walking the wire framing, the tracker owns the payload-size
/// accounting: a fixed body can be refused the moment its declared
/// length is known, while chunked and read-to-close bodies trip the
/// limit as accepted bytes accumulate. The server uses this for its
/// 413 cut-off; the client reads without a limit.
#[derive(Debug, Clone)]
pub struct BodyProgress {
    framing: Framing,
    received: u64,
}

#[derive(Debug, Clone)]
enum Framing {
    Fixed { left: u64 },
    Chunked(chunked::State),
    /// Body runs until the peer closes; client responses only
    UntilClose,
}

impl BodyProgress {
    /// Body of a declared size, possibly zero
    pub fn fixed(length: u64) -> BodyProgress {
        BodyProgress {
            framing: Framing::Fixed { left: length },
            received: 0,
        }
    }

    /// Chunk-framed body of unknown size
    pub fn chunked() -> BodyProgress {
        BodyProgress {
            framing: Framing::Chunked(chunked::State::new()),
            received: 0,
        }
    }

    /// Unframed body delimited by end of stream
    pub fn until_close() -> BodyProgress {
        BodyProgress {
            framing: Framing::UntilClose,
            received: 0,
        }
    }

    /// True when the payload cannot fit into `limit` bytes
    ///
    /// A fixed body answers up front from its declared size; the
    /// open-ended framings answer from what has been accepted so far,
    /// so the caller should re-ask as bytes arrive.
    pub fn exceeds(&self, limit: usize) -> bool {
        let total = match self.framing {
            Framing::Fixed { left } => self.received.saturating_add(left),
            _ => self.received,
        };
        total > limit as u64
    }

    /// Payload bytes accepted so far
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Strip wire framing in place; only chunked bodies have any
    pub fn decode(&mut self, buf: &mut ByteBuffer)
        -> Result<(), InvalidChunkSize>
    {
        match self.framing {
            Framing::Chunked(ref mut state) => state.parse(buf),
            _ => Ok(()),
        }
    }

    /// Payload bytes ready at the front of the buffer, and whether the
    /// body is complete once they are taken
    pub fn ready(&self, buf: &ByteBuffer, eof: bool) -> (usize, bool) {
        match self.framing {
            Framing::Fixed { left } if left <= buf.remaining() as u64 => {
                (left as usize, true)
            }
            Framing::Fixed { .. } => (buf.remaining(), false),
            Framing::Chunked(ref state) => (state.buffered(), state.is_done()),
            Framing::UntilClose => (buf.remaining(), eof),
        }
    }

    /// Hand `n` ready bytes over to the caller
    pub fn advance(&mut self, buf: &mut ByteBuffer, n: usize) {
        buf.consume(n);
        self.received += n as u64;
        match self.framing {
            Framing::Fixed { ref mut left } => {
                assert!(*left >= n as u64);
                *left -= n as u64;
            }
            Framing::Chunked(ref mut state) => state.consume(n),
            Framing::UntilClose => {}
        }
    }
}
