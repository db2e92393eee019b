use std::io::{self, Write};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use flate2::write::MultiGzDecoder;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::PollSender;
use tracing::debug;

use crate::latch::ErrorLatch;

/// Blocks buffered between the sink and the decoding task.
const COUNTER_QUEUE_DEPTH: usize = 4;

/// Write sink that only counts what it is given.
#[derive(Default)]
struct CountingWriter {
    count: u64,
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.count += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Measures the decompressed size of a gzip stream written into its sink.
///
/// [`spawn`](Self::spawn) returns the write half ([`CounterSink`]) and this
/// handle. Blocks written to the sink travel over a bounded queue to a
/// blocking task running a multi-member gzip decoder whose output is counted
/// and thrown away.
pub struct DecompressionCounter {
    task: Option<JoinHandle<u64>>,
    latch: ErrorLatch<io::Error>,
    size: Option<u64>,
}

impl DecompressionCounter {
    /// Start the decoding task. Must be called inside a Tokio runtime.
    pub fn spawn() -> (CounterSink, Self) {
        let (tx, rx) = mpsc::channel(COUNTER_QUEUE_DEPTH);
        let latch = ErrorLatch::new();
        let task_latch = latch.clone();
        let task = tokio::task::spawn_blocking(move || count_decompressed(rx, &task_latch));
        let sink = CounterSink {
            tx: PollSender::new(tx),
            latch: latch.clone(),
        };
        let counter = Self {
            task: Some(task),
            latch,
            size: None,
        };
        (sink, counter)
    }

    /// Wait for the decoder to drain and report its first error.
    ///
    /// The sink must have been shut down or dropped, otherwise this waits
    /// for it forever.
    pub async fn close(&mut self) -> io::Result<()> {
        if let Some(task) = self.task.take() {
            let count = task.await.map_err(io::Error::other)?;
            if let Some(err) = self.latch.io_error() {
                return Err(err);
            }
            self.size = Some(count);
        }
        match self.latch.io_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Decompressed byte count, known once [`close`](Self::close) succeeded.
    pub fn size(&self) -> Option<u64> {
        self.size
    }
}

fn count_decompressed(mut rx: mpsc::Receiver<Bytes>, latch: &ErrorLatch<io::Error>) -> u64 {
    let mut decoder = MultiGzDecoder::new(CountingWriter::default());
    while let Some(block) = rx.blocking_recv() {
        if let Err(err) = decoder.write_all(&block) {
            debug!(error = %err, "decompression counter failed");
            latch.set(err);
            return 0;
        }
    }
    match decoder.finish() {
        Ok(writer) => writer.count,
        Err(err) => {
            debug!(error = %err, "decompression counter failed at end of stream");
            latch.set(err);
            0
        }
    }
}

/// Write half of a [`DecompressionCounter`].
///
/// Shutting the sink down marks the end of the gzip stream.
pub struct CounterSink {
    tx: PollSender<Bytes>,
    latch: ErrorLatch<io::Error>,
}

impl CounterSink {
    fn closed_error(&self) -> io::Error {
        self.latch
            .io_error()
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "decompression counter closed"))
    }
}

impl AsyncWrite for CounterSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        if let Some(err) = this.latch.io_error() {
            return Poll::Ready(Err(err));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        if ready!(this.tx.poll_reserve(cx)).is_err() {
            return Poll::Ready(Err(this.closed_error()));
        }
        if this.tx.send_item(Bytes::copy_from_slice(buf)).is_err() {
            return Poll::Ready(Err(this.closed_error()));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx.close();
        Poll::Ready(Ok(()))
    }
}
