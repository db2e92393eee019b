use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Reader that keeps a running MD5 and byte count of what passes through.
pub struct DigestReader<R> {
    inner: R,
    context: md5::Context,
    bytes: u64,
}

impl<R> DigestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            context: md5::Context::new(),
            bytes: 0,
        }
    }

    /// Bytes read so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Lowercase hex MD5 of the bytes read so far.
    pub fn hex_digest(&self) -> String {
        hex::encode(self.context.clone().compute().0)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DigestReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let fresh = &buf.filled()[before..];
        this.context.consume(fresh);
        this.bytes += fresh.len() as u64;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn hello_world_digest() {
        let mut reader = DigestReader::new(&b"hello world"[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(reader.hex_digest(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(reader.bytes(), 11);
    }

    #[tokio::test]
    async fn empty_input_digest() {
        let mut reader = DigestReader::new(tokio::io::empty());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(reader.hex_digest(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(reader.bytes(), 0);
    }

    #[tokio::test]
    async fn digest_is_independent_of_read_size() {
        let input: Vec<u8> = (0..10_000u32).map(|i| (i % 97) as u8).collect();
        let mut reader = DigestReader::new(std::io::Cursor::new(input.clone()));
        let mut small = [0u8; 7];
        loop {
            let n = reader.read(&mut small).await.unwrap();
            if n == 0 {
                break;
            }
        }
        assert_eq!(reader.hex_digest(), format!("{:x}", md5::compute(&input)));
    }
}
