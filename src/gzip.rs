// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Streaming gzip compression for object writes.

use crate::streaming_source::{Seek, StreamingSource};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;

/// The error type for a gzip-compressed source.
#[derive(thiserror::Error, Debug)]
pub enum GzipError<E> {
    #[error(transparent)]
    Source(E),

    #[error("gzip compression failed: {0}")]
    Compress(#[source] std::io::Error),
}

/// Compresses the bytes of an inner source on the fly.
///
/// Compression is deterministic for a fixed input, so a rewound source
/// produces the same compressed byte sequence. Only rewinds to the start of
/// the stream are supported; the write pipeline never needs more.
pub(crate) struct GzippedSource<S> {
    source: S,
    encoder: Option<GzEncoder<Vec<u8>>>,
}

impl<S> GzippedSource<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            encoder: Some(new_encoder()),
        }
    }
}

fn new_encoder() -> GzEncoder<Vec<u8>> {
    GzEncoder::new(Vec::new(), Compression::default())
}

impl<S> StreamingSource for GzippedSource<S>
where
    S: StreamingSource + Send + Sync,
{
    type Error = GzipError<S::Error>;

    async fn next(&mut self) -> Option<Result<bytes::Bytes, Self::Error>> {
        loop {
            self.encoder.as_ref()?;
            match self.source.next().await {
                Some(Ok(chunk)) => {
                    let encoder = self.encoder.as_mut()?;
                    if let Err(e) = encoder.write_all(&chunk) {
                        return Some(Err(GzipError::Compress(e)));
                    }
                    let produced = std::mem::take(encoder.get_mut());
                    if !produced.is_empty() {
                        return Some(Ok(bytes::Bytes::from(produced)));
                    }
                    // The encoder buffered everything, feed it more input.
                }
                Some(Err(e)) => return Some(Err(GzipError::Source(e))),
                None => {
                    let encoder = self.encoder.take()?;
                    return match encoder.finish() {
                        Ok(produced) => Some(Ok(bytes::Bytes::from(produced))),
                        Err(e) => Some(Err(GzipError::Compress(e))),
                    };
                }
            }
        }
    }
}

impl<S> Seek for GzippedSource<S>
where
    S: StreamingSource + Seek + Send + Sync,
{
    type Error = GzipError<<S as Seek>::Error>;

    async fn seek(&mut self, offset: u64) -> Result<(), Self::Error> {
        if offset != 0 {
            return Err(GzipError::Compress(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "gzip sources only rewind to the start of the stream",
            )));
        }
        self.source.seek(0).await.map_err(GzipError::Source)?;
        self.encoder = Some(new_encoder());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming_source::IterSource;
    use crate::streaming_source::tests::collect;
    use std::io::Read;

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn roundtrip() -> anyhow::Result<()> {
        let chunks = ["the ", "quick ", "brown ", "fox ", "jumps ", "over ", "the lazy dog"]
            .map(|s| bytes::Bytes::from_static(s.as_bytes()));
        let source = GzippedSource::new(IterSource::new(chunks));
        let compressed = collect(source).await?;
        assert_eq!(gunzip(&compressed), b"the quick brown fox jumps over the lazy dog");
        Ok(())
    }

    #[tokio::test]
    async fn rewind_is_deterministic() -> anyhow::Result<()> {
        let payload = bytes::Bytes::from(vec![42_u8; 128 * 1024]);
        let mut source = GzippedSource::new(crate::streaming_source::BytesSource::new(
            payload.clone(),
        ));
        let mut first = Vec::new();
        while let Some(b) = source.next().await.transpose()? {
            first.extend_from_slice(&b);
        }
        source.seek(0).await?;
        let mut second = Vec::new();
        while let Some(b) = source.next().await.transpose()? {
            second.extend_from_slice(&b);
        }
        assert_eq!(first, second);
        assert_eq!(gunzip(&second), payload);
        Ok(())
    }

    #[tokio::test]
    async fn seek_not_to_start() {
        let source = IterSource::new(vec![bytes::Bytes::from_static(b"abc")]);
        let mut source = GzippedSource::new(source);
        let err = source.seek(1).await.unwrap_err();
        assert!(matches!(err, GzipError::Compress(_)), "{err:?}");
    }
}
