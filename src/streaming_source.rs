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

//! Defines upload data sources.

use std::collections::VecDeque;

/// Provides bytes for an upload from single-pass sources.
pub trait StreamingSource {
    /// The error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Gets the next set of data to upload.
    fn next(&mut self) -> impl Future<Output = Option<Result<bytes::Bytes, Self::Error>>> + Send;

    /// An estimate of the upload size.
    ///
    /// Returns the expected size as a `(min, max)` pair, where `None`
    /// represents an unknown upper bound.
    fn size_hint(&self) -> impl Future<Output = Result<(u64, Option<u64>), Self::Error>> + Send {
        std::future::ready(Ok((0_u64, None)))
    }
}

/// Provides bytes for an upload from sources that support seek.
///
/// The write pipeline restarts interrupted uploads, which requires resetting
/// the stream to an arbitrary point. Implementations must guarantee that
/// `seek(N)` followed by `next()` always returns the same data.
pub trait Seek {
    /// The error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Resets the stream to start from `offset`.
    fn seek(&mut self, offset: u64) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// The payload for object writes.
///
/// The write functions consume any type that can be converted to this type,
/// including buffers, strings, files, and custom [StreamingSource]
/// implementations.
pub struct Payload<T> {
    payload: T,
}

impl<T> Payload<T>
where
    T: StreamingSource,
{
    pub(crate) fn into_inner(self) -> T {
        self.payload
    }
}

impl From<bytes::Bytes> for Payload<BytesSource> {
    fn from(value: bytes::Bytes) -> Self {
        Self {
            payload: BytesSource::new(value),
        }
    }
}

impl From<&'static str> for Payload<BytesSource> {
    fn from(value: &'static str) -> Self {
        Payload::from(bytes::Bytes::from_static(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Payload<BytesSource> {
    fn from(value: Vec<u8>) -> Self {
        Payload::from(bytes::Bytes::from(value))
    }
}

impl From<Vec<bytes::Bytes>> for Payload<IterSource> {
    fn from(value: Vec<bytes::Bytes>) -> Self {
        Self {
            payload: IterSource::new(value),
        }
    }
}

impl From<tokio::fs::File> for Payload<FileSource> {
    fn from(value: tokio::fs::File) -> Self {
        Self {
            payload: FileSource::new(value),
        }
    }
}

impl<S> From<S> for Payload<S>
where
    S: StreamingSource,
{
    fn from(value: S) -> Self {
        Self { payload: value }
    }
}

const READ_SIZE: usize = 256 * 1024;

/// Wraps a `bytes::Bytes` to support [StreamingSource].
pub struct BytesSource {
    contents: bytes::Bytes,
    current: Option<bytes::Bytes>,
}

impl BytesSource {
    pub(crate) fn new(contents: bytes::Bytes) -> Self {
        let current = Some(contents.clone());
        Self { contents, current }
    }
}

impl StreamingSource for BytesSource {
    type Error = std::io::Error;

    async fn next(&mut self) -> Option<Result<bytes::Bytes, Self::Error>> {
        self.current.take().filter(|b| !b.is_empty()).map(Ok)
    }

    async fn size_hint(&self) -> Result<(u64, Option<u64>), Self::Error> {
        let s = self.contents.len() as u64;
        Ok((s, Some(s)))
    }
}

impl Seek for BytesSource {
    type Error = std::io::Error;

    async fn seek(&mut self, offset: u64) -> Result<(), Self::Error> {
        let pos = std::cmp::min(offset as usize, self.contents.len());
        self.current = Some(self.contents.slice(pos..));
        Ok(())
    }
}

/// Streams a sequence of buffers, preserving the original chunking.
pub struct IterSource {
    contents: Vec<bytes::Bytes>,
    current: VecDeque<bytes::Bytes>,
}

impl IterSource {
    pub(crate) fn new<I>(iterator: I) -> Self
    where
        I: IntoIterator<Item = bytes::Bytes>,
    {
        let contents: Vec<bytes::Bytes> = iterator.into_iter().collect();
        let current: VecDeque<bytes::Bytes> = contents.iter().cloned().collect();
        Self { contents, current }
    }
}

impl StreamingSource for IterSource {
    type Error = std::io::Error;

    async fn next(&mut self) -> Option<Result<bytes::Bytes, Self::Error>> {
        self.current.pop_front().map(Ok)
    }

    async fn size_hint(&self) -> Result<(u64, Option<u64>), Self::Error> {
        let total = self.contents.iter().map(|b| b.len() as u64).sum();
        Ok((total, Some(total)))
    }
}

impl Seek for IterSource {
    type Error = std::io::Error;

    async fn seek(&mut self, offset: u64) -> Result<(), Self::Error> {
        let mut remainder = offset;
        self.current = self.contents.iter().cloned().collect();
        while let Some(front) = self.current.front_mut() {
            let len = front.len() as u64;
            if remainder < len {
                let _ = front.split_to(remainder as usize);
                return Ok(());
            }
            remainder -= len;
            self.current.pop_front();
        }
        Ok(())
    }
}

/// Streams the contents of a file.
pub struct FileSource {
    inner: tokio::fs::File,
}

impl FileSource {
    fn new(inner: tokio::fs::File) -> Self {
        Self { inner }
    }
}

impl StreamingSource for FileSource {
    type Error = std::io::Error;

    async fn next(&mut self) -> Option<Result<bytes::Bytes, Self::Error>> {
        let mut buffer = vec![0_u8; READ_SIZE];
        match tokio::io::AsyncReadExt::read(&mut self.inner, &mut buffer).await {
            Err(e) => Some(Err(e)),
            Ok(0) => None,
            Ok(n) => {
                buffer.resize(n, 0_u8);
                Some(Ok(bytes::Bytes::from_owner(buffer)))
            }
        }
    }

    async fn size_hint(&self) -> Result<(u64, Option<u64>), Self::Error> {
        let m = self.inner.metadata().await?;
        Ok((m.len(), Some(m.len())))
    }
}

impl Seek for FileSource {
    type Error = std::io::Error;

    async fn seek(&mut self, offset: u64) -> Result<(), Self::Error> {
        use tokio::io::AsyncSeekExt;
        let _ = self.inner.seek(std::io::SeekFrom::Start(offset)).await?;
        Ok(())
    }
}
