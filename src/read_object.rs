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

//! The download pipeline.
//!
//! Integrity is defined over what the service stored, not what the consumer
//! receives: the digests cover the on-wire (possibly gzip-compressed) bytes,
//! while the consumer sees transparently decompressed data. Ranged reads
//! cannot be validated, requesting both is an input error.

use crate::checksum::{ChecksumEngine, Validation, validate};
use crate::client::{StorageInner, enc, to_http_error};
use crate::error::{CONTENT_DOWNLOAD_MISMATCH, ReadError};
use crate::model::{Object, ObjectChecksums, headers_to_checksums};
use crate::{Error, Result};
use std::io::Write;
use std::sync::Arc;

/// The request builder for object reads.
///
/// The network request is only initiated by [send()][ReadObject::send].
pub struct ReadObject {
    inner: Arc<StorageInner>,
    bucket: String,
    name: String,
    generation: Option<i64>,
    start: Option<i64>,
    end: Option<i64>,
    validation: Option<Validation>,
}

impl ReadObject {
    pub(crate) fn new(
        inner: Arc<StorageInner>,
        bucket: String,
        name: String,
        generation: Option<i64>,
    ) -> Self {
        Self {
            inner,
            bucket,
            name,
            generation,
            start: None,
            end: None,
            validation: None,
        }
    }

    /// The offset of the first byte to return.
    ///
    /// Setting an offset makes this a range request and disables integrity
    /// checks.
    pub fn with_start(mut self, v: i64) -> Self {
        self.start = Some(v);
        self
    }

    /// The offset of the last byte to return, inclusive.
    ///
    /// A negative value without a start offset requests the trailing `|v|`
    /// bytes of the object. Setting an end offset makes this a range request
    /// and disables integrity checks.
    pub fn with_end(mut self, v: i64) -> Self {
        self.end = Some(v);
        self
    }

    /// Selects the digests validated at the end of the download.
    ///
    /// Defaults to [Validation::Both]. Combining an explicit selection other
    /// than [Validation::None] with a range request is an error.
    pub fn with_validation(mut self, v: Validation) -> Self {
        self.validation = Some(v);
        self
    }

    /// Sends the request.
    pub async fn send(self) -> Result<ReadObjectResponse> {
        if self.name.is_empty() {
            return Err(Error::invalid_input("an object name is required"));
        }
        if self.bucket.is_empty() {
            return Err(Error::invalid_input("a bucket name is required"));
        }
        let is_range = self.start.is_some() || self.end.is_some();
        if is_range && self.validation.is_some_and(|v| v.is_enabled()) {
            return Err(Error::invalid_input(ReadError::ValidationWithRange));
        }
        let validation = if is_range {
            Validation::None
        } else {
            self.validation.unwrap_or_default()
        };

        let builder = self.http_request_builder()?;
        let builder = self.inner.apply_auth_headers(builder).await?;
        let response = builder.send().await.map_err(Error::io)?;
        if !response.status().is_success() {
            return to_http_error(response).await;
        }
        ReadObjectResponse::new(response, validation)
    }

    fn http_request_builder(&self) -> Result<reqwest::RequestBuilder> {
        let builder = self
            .inner
            .client
            .request(
                reqwest::Method::GET,
                format!(
                    "{}/{}/{}",
                    &self.inner.download_endpoint,
                    &self.bucket,
                    enc(&self.name)
                ),
            )
            .header("accept-encoding", "gzip");

        let builder = self
            .generation
            .iter()
            .fold(builder, |b, v| b.query(&[("generation", v)]));

        match (self.start, self.end) {
            (Some(s), _) if s < 0 => Err(Error::invalid_input(ReadError::NegativeStart(s))),
            (Some(_), Some(e)) if e < 0 => Err(Error::invalid_input(
                "a negative end offset cannot be combined with a start offset",
            )),
            (None, None) => Ok(builder),
            // A tail request for the last |e| bytes.
            (None, Some(e)) if e < 0 => Ok(builder.header("range", format!("bytes={e}"))),
            (None, Some(e)) => Ok(builder.header("range", format!("bytes=0-{e}"))),
            (Some(s), None) => Ok(builder.header("range", format!("bytes={s}-"))),
            (Some(s), Some(e)) => Ok(builder.header("range", format!("bytes={s}-{e}"))),
        }
    }
}

/// A response to an object read.
///
/// Dropping the response aborts the underlying request and releases the
/// connection.
pub struct ReadObjectResponse {
    response: Option<reqwest::Response>,
    object: Object,
    expected: Option<ObjectChecksums>,
    engine: ChecksumEngine,
    offset: u64,
    decoder: Option<flate2::write::GzDecoder<Vec<u8>>>,
    finished: bool,
}

impl std::fmt::Debug for ReadObjectResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadObjectResponse")
            .field("object", &self.object)
            .field("expected", &self.expected)
            .field("engine", &self.engine)
            .field("offset", &self.offset)
            .field("finished", &self.finished)
            .finish()
    }
}

impl ReadObjectResponse {
    fn new(response: reqwest::Response, validation: Validation) -> Result<Self> {
        let status = response.status();
        let headers = response.headers();
        let object = object_from_headers(headers);

        let content_encoding = header_str(headers, "content-encoding");
        let stored_encoding = header_str(headers, "x-goog-stored-content-encoding");

        // The digests only apply when the full stored content is observed:
        // not for partial responses, and not when the service decompressed
        // the object on the way out.
        let transcoded = stored_encoding == "gzip" && content_encoding != "gzip";
        let expected = if !validation.is_enabled()
            || status == reqwest::StatusCode::PARTIAL_CONTENT
            || transcoded
        {
            None
        } else {
            Some(headers_to_checksums(headers))
        };
        let engine = match &expected {
            Some(_) => ChecksumEngine::new(validation),
            None => ChecksumEngine::new(Validation::None),
        };
        let decoder = match content_encoding.as_str() {
            "gzip" => Some(flate2::write::GzDecoder::new(Vec::new())),
            _ => None,
        };
        Ok(Self {
            response: Some(response),
            object,
            expected,
            engine,
            offset: 0,
            decoder,
            finished: false,
        })
    }

    /// A snapshot of the object metadata carried in the response headers.
    pub fn object(&self) -> Object {
        self.object.clone()
    }

    /// Gets the full contents as bytes.
    pub async fn all_bytes(mut self) -> Result<bytes::Bytes> {
        let mut contents = Vec::new();
        while let Some(b) = self.next().await.transpose()? {
            contents.extend_from_slice(&b);
        }
        Ok(bytes::Bytes::from_owner(contents))
    }

    /// Streams the next bytes of the object.
    ///
    /// Returns `None` when the response is exhausted. The integrity
    /// comparison runs when the last byte arrives; a mismatch surfaces as an
    /// error with code `CONTENT_DOWNLOAD_MISMATCH`.
    pub async fn next(&mut self) -> Option<Result<bytes::Bytes>> {
        loop {
            if self.finished {
                return None;
            }
            let response = self.response.as_mut()?;
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    self.engine.update(self.offset, &chunk);
                    self.offset += chunk.len() as u64;
                    match self.decode(chunk) {
                        Ok(out) if out.is_empty() => continue,
                        Ok(out) => return Some(Ok(out)),
                        Err(e) => {
                            self.response = None;
                            return Some(Err(e));
                        }
                    }
                }
                Ok(None) => {
                    self.finished = true;
                    let tail = match self.finish_decode() {
                        Ok(tail) => tail,
                        Err(e) => {
                            self.response = None;
                            return Some(Err(e));
                        }
                    };
                    if let Err(e) = self.verify() {
                        self.response = None;
                        return Some(Err(e));
                    }
                    if tail.is_empty() {
                        return None;
                    }
                    return Some(Ok(tail));
                }
                Err(e) => {
                    self.response = None;
                    return Some(Err(Error::io(e)));
                }
            }
        }
    }

    fn decode(&mut self, chunk: bytes::Bytes) -> Result<bytes::Bytes> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(chunk);
        };
        decoder.write_all(&chunk).map_err(Error::deser)?;
        decoder.flush().map_err(Error::deser)?;
        let produced = std::mem::take(decoder.get_mut());
        Ok(bytes::Bytes::from(produced))
    }

    fn finish_decode(&mut self) -> Result<bytes::Bytes> {
        let Some(decoder) = self.decoder.take() else {
            return Ok(bytes::Bytes::new());
        };
        let produced = decoder.finish().map_err(Error::deser)?;
        Ok(bytes::Bytes::from(produced))
    }

    fn verify(&self) -> Result<()> {
        let Some(expected) = &self.expected else {
            return Ok(());
        };
        validate(&self.engine.finalize(), expected).map_err(|mismatch| {
            Error::integrity(
                CONTENT_DOWNLOAD_MISMATCH,
                ReadError::ChecksumMismatch(mismatch),
            )
        })
    }
}

fn header_str(headers: &http::HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn object_from_headers(headers: &http::HeaderMap) -> Object {
    let get_as_i64 = |name: &str| -> Option<i64> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
    };
    let checksums = headers_to_checksums(headers);
    let mut object = Object::new();
    object.generation = get_as_i64("x-goog-generation");
    object.metageneration = get_as_i64("x-goog-metageneration");
    object.size = get_as_i64("x-goog-stored-content-length").map(|v| v as u64);
    object.content_encoding = header_str(headers, "x-goog-stored-content-encoding");
    object.content_type = header_str(headers, "content-type");
    object.etag = header_str(headers, "etag");
    if let Some(crc) = checksums.crc32c {
        object.crc32c = base64::Engine::encode(
            &base64::prelude::BASE64_STANDARD,
            crc.to_be_bytes(),
        );
    }
    if !checksums.md5_hash.is_empty() {
        object.md5_hash =
            base64::Engine::encode(&base64::prelude::BASE64_STANDARD, &checksums.md5_hash);
    }
    object
}
