use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Byte-source decorator that appends every byte it hands out into an owned
/// buffer, so the bytes consumed while sniffing the handshake can be replayed
/// to the backend before live relaying begins.
pub struct RecordingReader<R> {
    inner: R,
    recorded: Vec<u8>,
}

impl<R> RecordingReader<R> {
    pub fn new(inner: R) -> RecordingReader<R> {
        RecordingReader {
            inner,
            recorded: Vec::new(),
        }
    }

    pub fn recorded(&self) -> &[u8] {
        &self.recorded
    }

    /// Consume the reader, keeping only the captured bytes.
    pub fn into_recorded(self) -> Vec<u8> {
        self.recorded
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for RecordingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = self.get_mut();
        let filled = buf.filled().len();
        match Pin::new(&mut me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                me.recorded.extend_from_slice(&buf.filled()[filled..]);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
