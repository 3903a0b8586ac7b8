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

//! Computes and compares object digests.
//!
//! The transfer pipelines hash bytes as they flow, without buffering beyond
//! what the consumer pulls. The engines are offset-aware: a retried upload
//! re-reads its payload from the start, and bytes that were already hashed
//! must not be hashed again.

use crate::error::ChecksumMismatch;
use crate::model::ObjectChecksums;
use crate::streaming_source::{Seek, StreamingSource};

/// Selects which digests a transfer computes and validates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Validation {
    /// No digests are computed, and none are validated.
    None,
    /// Compute and validate only the CRC32C checksum.
    Crc32c,
    /// Compute and validate only the MD5 hash.
    Md5,
    /// Compute and validate both digests.
    #[default]
    Both,
}

impl Validation {
    pub(crate) fn is_enabled(&self) -> bool {
        !matches!(self, Validation::None)
    }
}

/// A running digest over a byte stream.
#[derive(Clone, Debug)]
pub(crate) enum ChecksumEngine {
    Null,
    Crc32c(Crc32cEngine),
    Md5(Md5Engine),
    Both(Crc32cEngine, Md5Engine),
}

impl ChecksumEngine {
    pub fn new(validation: Validation) -> Self {
        match validation {
            Validation::None => Self::Null,
            Validation::Crc32c => Self::Crc32c(Crc32cEngine::default()),
            Validation::Md5 => Self::Md5(Md5Engine::default()),
            Validation::Both => Self::Both(Crc32cEngine::default(), Md5Engine::default()),
        }
    }

    /// Consumes `data`, which starts at `offset` within the stream.
    ///
    /// Bytes before the engine's current position are skipped, so re-reads
    /// after a seek do not corrupt the digest.
    pub fn update(&mut self, offset: u64, data: &bytes::Bytes) {
        match self {
            Self::Null => {}
            Self::Crc32c(c) => c.update(offset, data),
            Self::Md5(m) => m.update(offset, data),
            Self::Both(c, m) => {
                c.update(offset, data);
                m.update(offset, data);
            }
        }
    }

    pub fn finalize(&self) -> ObjectChecksums {
        match self {
            Self::Null => ObjectChecksums::new(),
            Self::Crc32c(c) => ObjectChecksums::new().set_crc32c(c.checksum),
            Self::Md5(m) => ObjectChecksums::new().set_md5_hash(m.digest()),
            Self::Both(c, m) => ObjectChecksums::new()
                .set_crc32c(c.checksum)
                .set_md5_hash(m.digest()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Crc32cEngine {
    checksum: u32,
    offset: u64,
}

impl Crc32cEngine {
    fn update(&mut self, offset: u64, data: &bytes::Bytes) {
        self.offset = checked_update(self.offset, offset, data, |data| {
            self.checksum = crc32c::crc32c_append(self.checksum, data);
        });
    }
}

#[derive(Clone)]
pub(crate) struct Md5Engine {
    context: md5::Context,
    offset: u64,
}

impl Default for Md5Engine {
    fn default() -> Self {
        Self {
            context: md5::Context::new(),
            offset: 0,
        }
    }
}

impl Md5Engine {
    fn update(&mut self, offset: u64, data: &bytes::Bytes) {
        self.offset = checked_update(self.offset, offset, data, |data| {
            self.context.consume(data);
        });
    }

    fn digest(&self) -> bytes::Bytes {
        bytes::Bytes::from_owner(self.context.clone().finalize().0)
    }
}

impl std::fmt::Debug for Md5Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Md5Engine")
            .field("context", &"[skipped]")
            .field("offset", &self.offset)
            .finish()
    }
}

fn checked_update<F>(current: u64, offset: u64, data: &bytes::Bytes, updater: F) -> u64
where
    F: FnOnce(&bytes::Bytes),
{
    let end = offset + data.len() as u64;
    if (offset..end).contains(&current) {
        let data = data.clone().split_off((current - offset) as usize);
        updater(&data);
        end
    } else {
        current
    }
}

/// Compares the computed digests against the service-reported values.
///
/// Digests that one side did not produce do not participate in the
/// comparison. That accounts for disabled validation modes on the client and
/// for missing MD5 hashes on the server (common with composed objects).
pub(crate) fn validate(
    computed: &ObjectChecksums,
    received: &ObjectChecksums,
) -> Result<(), ChecksumMismatch> {
    let crc32c = match (computed.crc32c, received.crc32c) {
        (Some(got), Some(want)) if got != want => Some((got, want)),
        _ => None,
    };
    let md5 = match (&computed.md5_hash, &received.md5_hash) {
        (got, want) if got.is_empty() || want.is_empty() || got == want => None,
        (got, want) => Some((got.clone(), want.clone())),
    };
    match (crc32c, md5) {
        (None, None) => Ok(()),
        (Some((got, want)), None) => Err(ChecksumMismatch::Crc32c { got, want }),
        (None, Some((got, want))) => Err(ChecksumMismatch::Md5 { got, want }),
        (Some(crc32c), Some(md5)) => {
            let got = ObjectChecksums::new()
                .set_crc32c(crc32c.0)
                .set_md5_hash(md5.0);
            let want = ObjectChecksums::new()
                .set_crc32c(crc32c.1)
                .set_md5_hash(md5.1);
            Err(ChecksumMismatch::Both {
                got: Box::new(got),
                want: Box::new(want),
            })
        }
    }
}

/// A pass-through source that hashes the bytes it yields.
pub(crate) struct ChecksummedSource<S> {
    offset: u64,
    engine: ChecksumEngine,
    source: S,
}

impl<S> ChecksummedSource<S> {
    pub fn new(engine: ChecksumEngine, source: S) -> Self {
        Self {
            offset: 0,
            engine,
            source,
        }
    }

    pub fn final_checksums(&self) -> ObjectChecksums {
        self.engine.finalize()
    }
}

impl<S> StreamingSource for ChecksummedSource<S>
where
    S: StreamingSource + Send + Sync,
{
    type Error = S::Error;

    async fn next(&mut self) -> Option<Result<bytes::Bytes, Self::Error>> {
        match self.source.next().await {
            None => None,
            Some(Ok(b)) => {
                self.engine.update(self.offset, &b);
                self.offset += b.len() as u64;
                Some(Ok(b))
            }
            Some(Err(e)) => Some(Err(e)),
        }
    }

    async fn size_hint(&self) -> Result<(u64, Option<u64>), Self::Error> {
        self.source.size_hint().await
    }
}

impl<S> Seek for ChecksummedSource<S>
where
    S: StreamingSource + Seek + Send + Sync,
{
    type Error = <S as Seek>::Error;

    async fn seek(&mut self, offset: u64) -> Result<(), Self::Error> {
        match self.source.seek(offset).await {
            Ok(_) => {
                self.offset = offset;
                Ok(())
            }
            Err(e) => {
                // With the offset in an unknown state, ignore all future data.
                self.offset = u64::MAX;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming_source::IterSource;
    use test_case::test_case;

    fn data() -> bytes::Bytes {
        bytes::Bytes::from_static(b"the quick brown fox jumps over the lazy dog")
    }

    fn both() -> ObjectChecksums {
        ObjectChecksums::new()
            .set_crc32c(0x01020304_u32)
            .set_md5_hash(bytes::Bytes::from_static(b"abc"))
    }

    fn crc32c_only() -> ObjectChecksums {
        ObjectChecksums::new().set_crc32c(0x01020304_u32)
    }

    fn md5_only() -> ObjectChecksums {
        ObjectChecksums::new().set_md5_hash(bytes::Bytes::from_static(b"abc"))
    }

    #[test_case(both(), ObjectChecksums::new())]
    #[test_case(both(), both())]
    #[test_case(both(), crc32c_only())]
    #[test_case(both(), md5_only())]
    #[test_case(crc32c_only(), both())]
    #[test_case(crc32c_only(), md5_only())]
    #[test_case(md5_only(), both())]
    #[test_case(md5_only(), crc32c_only())]
    #[test_case(ObjectChecksums::new(), both())]
    fn validate_ok(computed: ObjectChecksums, received: ObjectChecksums) {
        let compare = super::validate(&computed, &received);
        assert!(compare.is_ok(), "{compare:?}");
    }

    #[test_case(crc32c_only(), crc32c_only().set_crc32c(0_u32))]
    #[test_case(both(), crc32c_only().set_crc32c(0_u32))]
    fn validate_bad_crc32c(computed: ObjectChecksums, received: ObjectChecksums) {
        let err = super::validate(&computed, &received).expect_err("values should not match");
        assert!(matches!(&err, &ChecksumMismatch::Crc32c { .. }), "{err:?}");
    }

    #[test_case(md5_only(), md5_only().set_md5_hash(bytes::Bytes::from_static(b"cde")))]
    #[test_case(both(), md5_only().set_md5_hash(bytes::Bytes::from_static(b"cde")))]
    fn validate_bad_md5(computed: ObjectChecksums, received: ObjectChecksums) {
        let err = super::validate(&computed, &received).expect_err("values should not match");
        assert!(matches!(&err, &ChecksumMismatch::Md5 { .. }), "{err:?}");
    }

    #[test]
    fn validate_bad_both() {
        let received = both()
            .set_crc32c(0_u32)
            .set_md5_hash(bytes::Bytes::from_static(b"cde"));
        let err = super::validate(&both(), &received).expect_err("values should not match");
        assert!(matches!(&err, &ChecksumMismatch::Both { .. }), "{err:?}");
    }

    #[test]
    fn null_engine() {
        let mut engine = ChecksumEngine::new(Validation::None);
        engine.update(0, &data());
        assert_eq!(engine.finalize(), ObjectChecksums::new());
    }

    #[test]
    fn crc32c_engine() {
        let mut engine = ChecksumEngine::new(Validation::Crc32c);
        engine.update(0, &data());
        let want = crc32c::crc32c(&data());
        assert_eq!(engine.finalize(), ObjectChecksums::new().set_crc32c(want));
    }

    #[test]
    fn md5_engine() {
        let mut engine = ChecksumEngine::new(Validation::Md5);
        engine.update(0, &data());
        let want = bytes::Bytes::from_owner(md5::compute(&data()).0);
        assert_eq!(engine.finalize(), ObjectChecksums::new().set_md5_hash(want));
    }

    #[test]
    fn both_in_parts_with_rereads() {
        let input = data();
        let mut engine = ChecksumEngine::new(Validation::Both);

        engine.update(0, &input.slice(0..4));
        engine.update(0, &input.slice(0..4));
        engine.update(4, &input.slice(4..8));
        engine.update(6, &input.slice(6..12));
        engine.update(0, &input.slice(0..4));
        engine.update(8, &input.slice(8..));
        // Out of range data is ignored.
        engine.update(100, &input.slice(0..));

        let want = ObjectChecksums::new()
            .set_crc32c(crc32c::crc32c(&input))
            .set_md5_hash(bytes::Bytes::from_owner(md5::compute(&input).0));
        assert_eq!(engine.finalize(), want);
    }

    #[tokio::test]
    async fn checksummed_source() -> anyhow::Result<()> {
        let input = [
            "the ", "quick ", "brown ", "fox ", "jumps ", "over ", "the ", "lazy ", "dog",
        ];
        let source = IterSource::new(input.map(|s| bytes::Bytes::from_static(s.as_bytes())));
        let mut source = ChecksummedSource::new(ChecksumEngine::new(Validation::Crc32c), source);
        assert_eq!(source.size_hint().await?, (43, Some(43)));

        for expected in input.iter().take(3) {
            let got = source.next().await.transpose()?;
            assert_eq!(got, Some(bytes::Bytes::from_static(expected.as_bytes())));
        }
        // Rewind and replay, the digest must still cover each byte once.
        source.seek(0).await?;
        while source.next().await.transpose()?.is_some() {}

        let want = crc32c::crc32c(data().as_ref());
        assert_eq!(
            source.final_checksums(),
            ObjectChecksums::new().set_crc32c(want)
        );
        Ok(())
    }

    #[tokio::test]
    async fn checksummed_source_seek_error() {
        use crate::streaming_source::tests::FaultySource;
        let mut inner = FaultySource::new(vec![data()]);
        inner.fail_seek = true;
        let mut source = ChecksummedSource::new(ChecksumEngine::new(Validation::Crc32c), inner);
        let err = source.seek(0).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotSeekable, "{err:?}");
        assert_eq!(source.offset, u64::MAX);
    }
}
