//! Demultiplexer for Docker's attached stdout/stderr stream
//!
//! Without a TTY the engine interleaves both streams on one connection,
//! prefixing every chunk with an 8-byte header:
//!
//! ```text
//! ┌────────┬────────────┬──────────────────────┐
//! │ stream │  reserved  │  payload length (BE) │ payload ...
//! │ 1 byte │  3 bytes   │       4 bytes        │
//! └────────┴────────────┴──────────────────────┘
//!   0 = stdin, 1 = stdout, 2 = stderr
//! ```
//!
//! Network reads don't line up with frames, so the parser keeps whatever
//! part of a header or payload it has seen until the rest arrives.

use hyper::body::Bytes;

const HEADER_LEN: usize = 8;

/// Which output stream a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One demultiplexed chunk of output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFrame {
    pub stream: OutputStream,
    pub payload: Bytes,
}

/// Incremental frame parser
#[derive(Debug, Default)]
pub struct Demuxer {
    buffer: Vec<u8>,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk read from the connection
    ///
    /// Returns every frame completed by this chunk, in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<OutputFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut offset = 0;
        while self.buffer.len() - offset >= HEADER_LEN {
            let header = &self.buffer[offset..offset + HEADER_LEN];
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            if self.buffer.len() - offset - HEADER_LEN < len {
                break;
            }

            let stream = match header[0] {
                2 => OutputStream::Stderr,
                _ => OutputStream::Stdout,
            };
            let start = offset + HEADER_LEN;
            frames.push(OutputFrame {
                stream,
                payload: Bytes::copy_from_slice(&self.buffer[start..start + len]),
            });
            offset = start + len;
        }

        self.buffer.drain(..offset);
        frames
    }

    /// Bytes held for an incomplete trailing frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// End of stream; returns the number of bytes of a truncated frame
    pub fn finish(self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![stream, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_whole_frames_in_one_chunk() {
        let mut data = frame(1, b"hello\n");
        data.extend(frame(2, b"oops\n"));
        data.extend(frame(1, b"bye\n"));

        let mut demux = Demuxer::new();
        let frames = demux.push(&data);

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].stream, OutputStream::Stdout);
        assert_eq!(&frames[0].payload[..], b"hello\n");
        assert_eq!(frames[1].stream, OutputStream::Stderr);
        assert_eq!(&frames[1].payload[..], b"oops\n");
        assert_eq!(&frames[2].payload[..], b"bye\n");
        assert_eq!(demux.finish(), 0);
    }

    #[test]
    fn test_split_header_and_payload() {
        let data = frame(2, b"split across reads");
        let mut demux = Demuxer::new();

        assert!(demux.push(&data[..3]).is_empty());
        assert!(demux.push(&data[3..10]).is_empty());
        assert_eq!(demux.pending(), 10);

        let frames = demux.push(&data[10..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stream, OutputStream::Stderr);
        assert_eq!(&frames[0].payload[..], b"split across reads");
        assert_eq!(demux.pending(), 0);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut data = frame(1, b"abc");
        data.extend(frame(2, b"de"));

        let mut demux = Demuxer::new();
        let mut frames = Vec::new();
        for byte in &data {
            frames.extend(demux.push(std::slice::from_ref(byte)));
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].payload[..], b"abc");
        assert_eq!(&frames[1].payload[..], b"de");
    }

    #[test]
    fn test_stdin_selector_goes_to_stdout_and_empty_payloads() {
        let mut data = frame(0, b"echo");
        data.extend(frame(1, b""));

        let frames = Demuxer::new().push(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].stream, OutputStream::Stdout);
        assert!(frames[1].payload.is_empty());
    }

    #[test]
    fn test_truncated_trailing_frame_is_reported() {
        let data = frame(1, b"0123456789");
        let mut demux = Demuxer::new();
        assert!(demux.push(&data[..12]).is_empty());
        assert_eq!(demux.finish(), 12);
    }
}
