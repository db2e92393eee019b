use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Reader that copies every byte it yields into a sink.
///
/// Bytes are handed to the caller first and written to the sink before the
/// next read, so a slow sink holds back the reader. At end of stream the
/// sink is shut down once. Sink errors surface as read errors.
pub struct TeeReader<R, W> {
    inner: R,
    sink: W,
    pending: Vec<u8>,
    written: usize,
    eof: bool,
    shut_down: bool,
}

impl<R, W> TeeReader<R, W> {
    pub fn new(inner: R, sink: W) -> Self {
        Self {
            inner,
            sink,
            pending: Vec::new(),
            written: 0,
            eof: false,
            shut_down: false,
        }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.inner, self.sink)
    }
}

impl<R, W> TeeReader<R, W>
where
    W: AsyncWrite + Unpin,
{
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.written < self.pending.len() {
            let n = ready!(Pin::new(&mut self.sink).poll_write(cx, &self.pending[self.written..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.written += n;
        }
        self.pending.clear();
        self.written = 0;
        Poll::Ready(Ok(()))
    }

    fn poll_finish(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if !self.shut_down {
            ready!(Pin::new(&mut self.sink).poll_shutdown(cx))?;
            self.shut_down = true;
        }
        Poll::Ready(Ok(()))
    }
}

impl<R, W> AsyncRead for TeeReader<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        ready!(this.poll_drain(cx))?;
        if this.eof {
            return this.poll_finish(cx);
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let fresh = &buf.filled()[before..];
        if fresh.is_empty() {
            this.eof = true;
            return this.poll_finish(cx);
        }

        this.pending.extend_from_slice(fresh);
        // The caller already owns these bytes; whatever the sink does not
        // take now is drained on the next read.
        if let Poll::Ready(Err(err)) = this.poll_drain(cx) {
            return Poll::Ready(Err(err));
        }
        Poll::Ready(Ok(()))
    }
}
