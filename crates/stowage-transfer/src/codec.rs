use std::io::{self, Write};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use flate2::write::{GzEncoder, MultiGzDecoder};
use flate2::Compression;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::latch::ErrorLatch;

/// gzip level used for on-the-fly compression.
pub const GZIP_LEVEL: u32 = 6;

/// Blocks buffered on each side of the codec task.
const PUMP_QUEUE_DEPTH: usize = 4;
/// Bytes pulled from the source per read.
const PUMP_READ_SIZE: usize = 64 * 1024;

enum Codec {
    Gzip(GzEncoder<Vec<u8>>),
    Gunzip(MultiGzDecoder<Vec<u8>>),
}

impl Codec {
    fn name(&self) -> &'static str {
        match self {
            Self::Gzip(_) => "gzip",
            Self::Gunzip(_) => "gunzip",
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Gzip(enc) => enc.write_all(data),
            Self::Gunzip(dec) => dec.write_all(data),
        }
    }

    /// Drain whatever output the codec has produced so far.
    fn take_output(&mut self) -> Vec<u8> {
        match self {
            Self::Gzip(enc) => std::mem::take(enc.get_mut()),
            Self::Gunzip(dec) => std::mem::take(dec.get_mut()),
        }
    }

    fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            Self::Gzip(enc) => enc.finish(),
            Self::Gunzip(dec) => dec.finish(),
        }
    }
}

/// Byte source that gzips or gunzips another source as it is read.
///
/// A feeder task reads the wrapped source and passes raw blocks to a
/// blocking task that runs the codec; output blocks come back to this reader
/// over a bounded queue, so neither the input nor the output is ever held
/// whole. The first error from either task is latched and returned by every
/// later read.
///
/// [`close`](Self::close) consumes the reader, stops both tasks if the
/// consumer quit early and reports the latched error. Dropping the reader
/// without closing aborts the feeder, which in turn ends the codec task.
///
/// Must be created inside a Tokio runtime.
pub struct CodecReader {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
    latch: ErrorLatch<io::Error>,
    feeder: Option<JoinHandle<()>>,
    codec: Option<JoinHandle<()>>,
    eof: bool,
}

impl CodecReader {
    /// Compress `source` with gzip.
    pub fn gzip<R>(source: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::spawn(
            source,
            Codec::Gzip(GzEncoder::new(Vec::new(), Compression::new(GZIP_LEVEL))),
        )
    }

    /// Decompress a (possibly multi-member) gzip `source`.
    pub fn gunzip<R>(source: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::spawn(source, Codec::Gunzip(MultiGzDecoder::new(Vec::new())))
    }

    fn spawn<R>(source: R, codec: Codec) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (in_tx, in_rx) = mpsc::channel(PUMP_QUEUE_DEPTH);
        let (out_tx, rx) = mpsc::channel(PUMP_QUEUE_DEPTH);
        let latch = ErrorLatch::new();

        let feeder_latch = latch.clone();
        let feeder = tokio::spawn(async move {
            if let Err(err) = run_feeder(source, &in_tx).await {
                debug!(error = %err, "codec source failed");
                feeder_latch.set(err);
            }
            // `in_tx` drops here, after the latch is set, so the codec task
            // seeing the end of its input also sees the error.
        });

        let codec_latch = latch.clone();
        let codec = tokio::task::spawn_blocking(move || {
            let name = codec.name();
            if let Err(err) = run_codec(codec, in_rx, &out_tx, &codec_latch) {
                debug!(codec = name, error = %err, "codec failed");
                codec_latch.set(err);
            }
        });

        Self {
            rx,
            pending: Bytes::new(),
            latch,
            feeder: Some(feeder),
            codec: Some(codec),
            eof: false,
        }
    }

    /// Shut the reader down and return the first error, if any.
    pub async fn close(mut self) -> io::Result<()> {
        self.rx.close();
        if let Some(feeder) = self.feeder.take() {
            if !self.eof {
                feeder.abort();
            }
            join_quietly(feeder).await?;
        }
        if let Some(codec) = self.codec.take() {
            join_quietly(codec).await?;
        }
        match self.latch.io_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn join_quietly(task: JoinHandle<()>) -> io::Result<()> {
    match task.await {
        Err(err) if !err.is_cancelled() => Err(io::Error::other(err)),
        _ => Ok(()),
    }
}

async fn run_feeder<R>(mut source: R, tx: &mpsc::Sender<Bytes>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; PUMP_READ_SIZE];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
            // Codec task is gone; it latched the reason.
            return Ok(());
        }
    }
}

fn run_codec(
    mut codec: Codec,
    mut rx: mpsc::Receiver<Bytes>,
    tx: &mpsc::Sender<Bytes>,
    latch: &ErrorLatch<io::Error>,
) -> io::Result<()> {
    while let Some(block) = rx.blocking_recv() {
        codec.write_all(&block)?;
        let out = codec.take_output();
        if !out.is_empty() && tx.blocking_send(Bytes::from(out)).is_err() {
            // Reader closed early; nothing left to deliver to.
            return Ok(());
        }
    }
    if latch.is_set() {
        // The source failed; a codec trailer would only dress up a truncated stream.
        return Ok(());
    }
    let tail = codec.finish()?;
    if !tail.is_empty() && tx.blocking_send(Bytes::from(tail)).is_err() {
        debug!("reader closed before the codec trailer");
    }
    Ok(())
}

impl AsyncRead for CodecReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if let Some(err) = this.latch.io_error() {
            return Poll::Ready(Err(err));
        }
        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if this.eof {
                return Poll::Ready(Ok(()));
            }
            match ready!(this.rx.poll_recv(cx)) {
                Some(block) => this.pending = block,
                None => {
                    this.eof = true;
                    if let Some(err) = this.latch.io_error() {
                        return Poll::Ready(Err(err));
                    }
                }
            }
        }
    }
}

impl Drop for CodecReader {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}
