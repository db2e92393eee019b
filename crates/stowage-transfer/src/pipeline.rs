use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tracing::debug;

use crate::codec::CodecReader;
use crate::counter::DecompressionCounter;
use crate::digest::DigestReader;
use crate::tee::TeeReader;

/// Suffix added by gzip and removed by gunzip.
pub const GZIP_SUFFIX: &str = ".gz";

/// Which transforms to apply on the way to the uploader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Transforms {
    /// Decompress the source.
    pub gunzip: bool,
    /// Compress after any decompression.
    pub gzip: bool,
    /// Count the decompressed size of the (gzip) source without altering it.
    pub count_decompressed: bool,
}

/// What a finished pipeline measured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineOutput {
    /// Bytes that left the pipeline.
    pub bytes_post_transform: u64,
    /// Lowercase hex MD5 over those bytes.
    pub md5_hex: String,
    /// Decompressed size of the source, when counting was requested.
    pub decompressed_size: Option<u64>,
}

enum Stage {
    Source(Box<dyn AsyncRead + Send + Unpin>),
    Codec(CodecReader),
}

impl AsyncRead for Stage {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Source(src) => Pin::new(src).poll_read(cx, buf),
            Self::Codec(codec) => Pin::new(codec).poll_read(cx, buf),
        }
    }
}

/// A source wrapped in the transforms one upload needs.
///
/// Order is fixed: the optional counter tee sits on the raw source, then
/// gunzip, then gzip, and the MD5 digest always comes last so it sees
/// exactly the bytes the uploader receives. Read it to the end, then call
/// [`finish`](Self::finish).
pub struct TransformPipeline {
    reader: DigestReader<Stage>,
    counter: Option<DecompressionCounter>,
    target_leaf: String,
}

impl TransformPipeline {
    /// Compose the pipeline. `leaf` is the source file name; the target
    /// name follows the transforms. Must be called inside a Tokio runtime.
    pub fn build<R>(source: R, leaf: &str, transforms: Transforms) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut target_leaf = leaf.to_string();
        let (mut stage, counter) = if transforms.count_decompressed {
            let (sink, counter) = DecompressionCounter::spawn();
            let tee: Box<dyn AsyncRead + Send + Unpin> = Box::new(TeeReader::new(source, sink));
            (Stage::Source(tee), Some(counter))
        } else {
            (Stage::Source(Box::new(source)), None)
        };

        if transforms.gunzip {
            stage = Stage::Codec(CodecReader::gunzip(stage));
            if let Some(stripped) = target_leaf.strip_suffix(GZIP_SUFFIX) {
                target_leaf = stripped.to_string();
            }
        }
        if transforms.gzip {
            stage = Stage::Codec(CodecReader::gzip(stage));
            target_leaf.push_str(GZIP_SUFFIX);
        }
        debug!(leaf, target = %target_leaf, ?transforms, "built transform pipeline");

        Self {
            reader: DigestReader::new(stage),
            counter,
            target_leaf,
        }
    }

    /// File name of the object this pipeline produces.
    pub fn target_leaf(&self) -> &str {
        &self.target_leaf
    }

    /// Close every stage and collect the measurements.
    pub async fn finish(self) -> io::Result<PipelineOutput> {
        let Self { reader, counter, .. } = self;
        let bytes_post_transform = reader.bytes();
        let md5_hex = reader.hex_digest();

        match reader.into_inner() {
            Stage::Codec(codec) => codec.close().await?,
            Stage::Source(source) => drop(source),
        }

        let decompressed_size = match counter {
            Some(mut counter) => {
                counter.close().await?;
                counter.size()
            }
            None => None,
        };

        Ok(PipelineOutput {
            bytes_post_transform,
            md5_hex,
            decompressed_size,
        })
    }
}

impl AsyncRead for TransformPipeline {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}
