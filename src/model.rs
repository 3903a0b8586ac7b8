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

//! The resource model for the Cloud Storage JSON API.

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde_with::{DisplayFromStr, serde_as};
use std::collections::BTreeMap;

/// An object resource, as returned by the JSON API.
///
/// The service encodes 64-bit integers as decimal strings, the `serde`
/// annotations account for that. Fields this crate does not interpret are
/// preserved in `extra` so metadata patches and echoes do not lose data.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Object {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bucket: String,

    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,

    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metageneration: Option<i64>,

    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_encoding: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_disposition: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_language: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cache_control: String,

    /// Base64-encoded big-endian CRC32C, as sent by the service.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub crc32c: String,

    /// Base64-encoded MD5 digest, as sent by the service.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub md5_hash: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_link: String,

    /// User-provided metadata key/value pairs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_name<T: Into<String>>(mut self, v: T) -> Self {
        self.name = v.into();
        self
    }

    pub fn set_content_type<T: Into<String>>(mut self, v: T) -> Self {
        self.content_type = v.into();
        self
    }

    pub fn set_content_encoding<T: Into<String>>(mut self, v: T) -> Self {
        self.content_encoding = v.into();
        self
    }

    pub fn set_cache_control<T: Into<String>>(mut self, v: T) -> Self {
        self.cache_control = v.into();
        self
    }

    pub fn set_metadata<I, K, V>(mut self, iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata = Some(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// The digests the service recorded for this object, decoded.
    pub fn checksums(&self) -> ObjectChecksums {
        let crc32c = match self.crc32c.as_str() {
            "" => None,
            v => decode_crc32c_digest(v),
        };
        let md5_hash = BASE64_STANDARD
            .decode(&self.md5_hash)
            .map(bytes::Bytes::from)
            .unwrap_or_default();
        ObjectChecksums { crc32c, md5_hash }
    }
}

/// The decoded digests of an object's content.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectChecksums {
    pub crc32c: Option<u32>,
    pub md5_hash: bytes::Bytes,
}

impl ObjectChecksums {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_crc32c(mut self, v: u32) -> Self {
        self.crc32c = Some(v);
        self
    }

    pub fn set_md5_hash<T: Into<bytes::Bytes>>(mut self, v: T) -> Self {
        self.md5_hash = v.into();
        self
    }
}

/// Extracts the digests advertised in a `x-goog-hash` header.
///
/// The header carries comma-separated `name=base64value` entries, e.g.
/// `crc32c=PBj01g==,md5=d63R1fQSI9VYL8pzalyzNQ==`.
pub(crate) fn headers_to_checksums(headers: &http::HeaderMap) -> ObjectChecksums {
    let entry = |name: &str| -> Option<String> {
        headers
            .get("x-goog-hash")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| {
                h.split(',')
                    .map(str::trim)
                    .find_map(|e| e.strip_prefix(&format!("{name}=")))
            })
            .map(str::to_string)
    };
    let crc32c = entry("crc32c").and_then(|v| decode_crc32c_digest(&v));
    let md5_hash = entry("md5")
        .and_then(|v| BASE64_STANDARD.decode(v).ok())
        .map(bytes::Bytes::from)
        .unwrap_or_default();
    ObjectChecksums { crc32c, md5_hash }
}

/// Decodes a base64 CRC32C digest.
///
/// Some service responses prefix the digest with extra bytes; only the
/// trailing four bytes of the decoded value carry the big-endian checksum.
pub(crate) fn decode_crc32c_digest(value: &str) -> Option<u32> {
    let decoded = BASE64_STANDARD.decode(value).ok()?;
    let tail: [u8; 4] = decoded.get(decoded.len().checked_sub(4)?..)?.try_into().ok()?;
    Some(u32::from_be_bytes(tail))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Encodes a CRC32C checksum the way the service does.
    pub fn encode_crc32c(value: u32) -> String {
        BASE64_STANDARD.encode(value.to_be_bytes())
    }

    /// Encodes an MD5 digest the way the service does.
    pub fn encode_md5(data: &[u8]) -> String {
        BASE64_STANDARD.encode(md5::compute(data).0)
    }
}
