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

//! Creates signed POST policy documents.
//!
//! A policy document authorizes browser-side POST uploads: it lists the
//! constraints a form submission must satisfy, and the signature proves the
//! service account approved them. The signature covers the base64 rendering
//! of the policy JSON, byte for byte.

use crate::client::StorageInner;
use crate::error::SigningError;
use crate::signer::sign_rsa_sha256;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use chrono::SecondsFormat;
use std::sync::Arc;

/// A signed policy document.
#[derive(Clone, Debug, PartialEq)]
pub struct SignedPolicy {
    /// The policy JSON.
    pub string: String,
    /// The base64 rendering of the policy JSON. This is the exact signing
    /// input; forms submit it verbatim.
    pub base64: String,
    /// The base64-encoded RSA-SHA256 signature of `base64`.
    pub signature: String,
}

/// The request builder for signed POST policy documents.
///
/// # Example
/// ```no_run
/// # use gcs_client::client::Storage;
/// # async fn sample(client: &Storage) -> anyhow::Result<()> {
/// let policy = client
///     .object("my-bucket", "uploads/photo.jpg")
///     .policy_document()
///     .with_expiration(1893456000)
///     .add_equals("$content-type", "image/jpeg")
///     .with_content_length_range(0, 10_000_000)
///     .sign()
///     .await?;
/// println!("policy: {}", policy.base64);
/// # Ok(()) }
/// ```
pub struct PolicyDocument {
    inner: Arc<StorageInner>,
    bucket: String,
    name: String,
    expiration: Option<i64>,
    equals: Vec<Vec<String>>,
    starts_with: Vec<Vec<String>>,
    acl: Option<String>,
    success_redirect: Option<String>,
    success_status: Option<String>,
    content_length_range: Option<(i64, i64)>,
    #[cfg(test)]
    current_time: Option<i64>,
}

impl PolicyDocument {
    pub(crate) fn new(inner: Arc<StorageInner>, bucket: String, name: String) -> Self {
        Self {
            inner,
            bucket,
            name,
            expiration: None,
            equals: Vec::new(),
            starts_with: Vec::new(),
            acl: None,
            success_redirect: None,
            success_status: None,
            content_length_range: None,
            #[cfg(test)]
            current_time: None,
        }
    }

    /// When the policy stops working, in Unix seconds. Must lie in the
    /// future.
    pub fn with_expiration(mut self, v: i64) -> Self {
        self.expiration = Some(v);
        self
    }

    /// Requires a form field to equal a value.
    pub fn add_equals<F: Into<String>, V: Into<String>>(mut self, field: F, value: V) -> Self {
        self.equals.push(vec![field.into(), value.into()]);
        self
    }

    /// Replaces the equality conditions with raw `[field, value]` pairs.
    ///
    /// Pairs of any other length are rejected when signing.
    pub fn with_equals(mut self, pairs: Vec<Vec<String>>) -> Self {
        self.equals = pairs;
        self
    }

    /// Requires a form field to start with a value.
    pub fn add_starts_with<F: Into<String>, V: Into<String>>(mut self, field: F, value: V) -> Self {
        self.starts_with.push(vec![field.into(), value.into()]);
        self
    }

    /// Replaces the prefix conditions with raw `[field, value]` pairs.
    ///
    /// Pairs of any other length are rejected when signing.
    pub fn with_starts_with(mut self, pairs: Vec<Vec<String>>) -> Self {
        self.starts_with = pairs;
        self
    }

    /// Requires the submitted `acl` field to equal this value.
    pub fn with_acl<T: Into<String>>(mut self, v: T) -> Self {
        self.acl = Some(v.into());
        self
    }

    /// Requires the `success_action_redirect` field to equal this value.
    pub fn with_success_redirect<T: Into<String>>(mut self, v: T) -> Self {
        self.success_redirect = Some(v.into());
        self
    }

    /// Requires the `success_action_status` field to equal this value.
    pub fn with_success_status<T: Into<String>>(mut self, v: T) -> Self {
        self.success_status = Some(v.into());
        self
    }

    /// Bounds the size of the uploaded content, inclusive.
    pub fn with_content_length_range(mut self, min: i64, max: i64) -> Self {
        self.content_length_range = Some((min, max));
        self
    }

    #[cfg(test)]
    fn with_current_time(mut self, v: i64) -> Self {
        self.current_time = Some(v);
        self
    }

    fn now(&self) -> i64 {
        #[cfg(test)]
        if let Some(now) = self.current_time {
            return now;
        }
        chrono::Utc::now().timestamp()
    }

    /// Produces the signed policy document.
    pub async fn sign(self) -> std::result::Result<SignedPolicy, SigningError> {
        if self.name.is_empty() {
            return Err(SigningError::invalid_parameter("name", "is required"));
        }
        if self.bucket.is_empty() {
            return Err(SigningError::invalid_parameter("bucket", "is required"));
        }
        let expiration = self
            .expiration
            .ok_or_else(|| SigningError::invalid_parameter("expiration", "is required"))?;
        if expiration <= self.now() {
            return Err(SigningError::invalid_parameter(
                "expiration",
                "must be in the future",
            ));
        }
        let expiration = chrono::DateTime::from_timestamp(expiration, 0)
            .ok_or_else(|| SigningError::invalid_parameter("expiration", "is out of range"))?
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut conditions = vec![
            serde_json::json!(["eq", "$key", self.name]),
            serde_json::json!({"bucket": self.bucket}),
        ];
        for pair in &self.equals {
            let (field, value) = pair_elements(pair, "equals")?;
            conditions.push(serde_json::json!(["eq", field, value]));
        }
        for pair in &self.starts_with {
            let (field, value) = pair_elements(pair, "startsWith")?;
            conditions.push(serde_json::json!(["starts-with", field, value]));
        }
        if let Some(acl) = &self.acl {
            conditions.push(serde_json::json!({"acl": acl}));
        }
        if let Some(redirect) = &self.success_redirect {
            conditions.push(serde_json::json!({"success_action_redirect": redirect}));
        }
        if let Some(status) = &self.success_status {
            conditions.push(serde_json::json!({"success_action_status": status}));
        }
        if let Some((min, max)) = self.content_length_range {
            conditions.push(serde_json::json!(["content-length-range", min, max]));
        }

        let policy = PolicyText {
            expiration,
            conditions,
        };
        let string = serde_json::to_string(&policy)
            .map_err(|e| SigningError::invalid_parameter("policy", e))?;
        let base64 = BASE64_STANDARD.encode(&string);

        let credentials = self
            .inner
            .cred
            .signing_credentials()
            .await
            .map_err(SigningError::signing)?;
        let signature = sign_rsa_sha256(&credentials.private_key_pem, base64.as_bytes())?;
        let signature = BASE64_STANDARD.encode(signature);

        Ok(SignedPolicy {
            string,
            base64,
            signature,
        })
    }
}

/// Serialized in declaration order: `expiration` first, then `conditions`.
#[derive(serde::Serialize)]
struct PolicyText {
    expiration: String,
    conditions: Vec<serde_json::Value>,
}

fn pair_elements<'p>(
    pair: &'p [String],
    parameter: &'static str,
) -> std::result::Result<(&'p str, &'p str), SigningError> {
    match pair {
        [field, value] => Ok((field.as_str(), value.as_str())),
        _ => Err(SigningError::invalid_parameter(
            parameter,
            format!("conditions take exactly two elements, got {}", pair.len()),
        )),
    }
}
