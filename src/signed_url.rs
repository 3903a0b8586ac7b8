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

//! Creates signed URLs.
//!
//! A signed URL proves possession of the service account private key for a
//! bounded time. The signature covers a canonical string derived from the
//! request; anyone holding the URL can perform exactly the signed action
//! until it expires.

use crate::client::{StorageInner, enc};
use crate::error::SigningError;
use crate::signer::sign_rsa_sha256;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The operation a signed URL permits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UrlAction {
    /// Permits a GET of the object.
    #[default]
    Read,
    /// Permits a PUT of the object.
    Write,
    /// Permits a DELETE of the object.
    Delete,
}

impl UrlAction {
    fn verb(&self) -> &'static str {
        match self {
            UrlAction::Read => "GET",
            UrlAction::Write => "PUT",
            UrlAction::Delete => "DELETE",
        }
    }
}

/// The request builder for signed URLs.
///
/// # Example
/// ```no_run
/// # use gcs_client::client::Storage;
/// # use gcs_client::signed_url::UrlAction;
/// # async fn sample(client: &Storage) -> anyhow::Result<()> {
/// let url = client
///     .object("my-bucket", "my-object.txt")
///     .signed_url()
///     .with_action(UrlAction::Read)
///     .with_expires(1893456000)
///     .sign()
///     .await?;
/// println!("download with: {url}");
/// # Ok(()) }
/// ```
pub struct SignedUrl {
    inner: Arc<StorageInner>,
    bucket: String,
    name: String,
    action: UrlAction,
    expires: Option<i64>,
    content_md5: Option<String>,
    content_type: Option<String>,
    extension_headers: BTreeMap<String, String>,
    response_type: Option<String>,
    response_disposition: Option<String>,
    prompt_save_as: Option<String>,
    #[cfg(test)]
    current_time: Option<i64>,
}

impl SignedUrl {
    pub(crate) fn new(inner: Arc<StorageInner>, bucket: String, name: String) -> Self {
        Self {
            inner,
            bucket,
            name,
            action: UrlAction::default(),
            expires: None,
            content_md5: None,
            content_type: None,
            extension_headers: BTreeMap::new(),
            response_type: None,
            response_disposition: None,
            prompt_save_as: None,
            #[cfg(test)]
            current_time: None,
        }
    }

    /// The permitted operation. Defaults to [UrlAction::Read].
    pub fn with_action(mut self, v: UrlAction) -> Self {
        self.action = v;
        self
    }

    /// When the URL stops working, in Unix seconds. Must lie in the future.
    pub fn with_expires(mut self, v: i64) -> Self {
        self.expires = Some(v);
        self
    }

    /// Requires requests to carry this `Content-MD5` header.
    pub fn with_content_md5<T: Into<String>>(mut self, v: T) -> Self {
        self.content_md5 = Some(v.into());
        self
    }

    /// Requires requests to carry this `Content-Type` header.
    pub fn with_content_type<T: Into<String>>(mut self, v: T) -> Self {
        self.content_type = Some(v.into());
        self
    }

    /// Adds an extension header covered by the signature.
    ///
    /// Requests using the URL must send the header with the same value.
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.extension_headers
            .insert(key.into().to_lowercase(), value.into());
        self
    }

    /// Overrides the `Content-Type` of the response.
    pub fn with_response_type<T: Into<String>>(mut self, v: T) -> Self {
        self.response_type = Some(v.into());
        self
    }

    /// Overrides the `Content-Disposition` of the response.
    ///
    /// Takes precedence over [with_prompt_save_as][SignedUrl::with_prompt_save_as].
    pub fn with_response_disposition<T: Into<String>>(mut self, v: T) -> Self {
        self.response_disposition = Some(v.into());
        self
    }

    /// Serves the response as an attachment saved under this name.
    pub fn with_prompt_save_as<T: Into<String>>(mut self, v: T) -> Self {
        self.prompt_save_as = Some(v.into());
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

    /// Produces the signed URL.
    pub async fn sign(self) -> std::result::Result<String, SigningError> {
        let components = self.sign_components().await?;
        Ok(components.url)
    }

    async fn sign_components(self) -> std::result::Result<SignedUrlComponents, SigningError> {
        if self.name.is_empty() {
            return Err(SigningError::invalid_parameter("name", "is required"));
        }
        if self.bucket.is_empty() {
            return Err(SigningError::invalid_parameter("bucket", "is required"));
        }
        let expires = self
            .expires
            .ok_or_else(|| SigningError::invalid_parameter("expires", "is required"))?;
        if expires <= self.now() {
            return Err(SigningError::invalid_parameter(
                "expires",
                "must be in the future",
            ));
        }

        let resource = format!("/{}/{}", self.bucket, enc(&self.name));
        let extension_headers = self
            .extension_headers
            .iter()
            .fold(String::new(), |mut acc, (k, v)| {
                acc.push_str(k);
                acc.push(':');
                acc.push_str(canonical_header_value(v).as_str());
                acc.push('\n');
                acc
            });
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}\n{}{}",
            self.action.verb(),
            self.content_md5.as_deref().unwrap_or(""),
            self.content_type.as_deref().unwrap_or(""),
            expires,
            extension_headers,
            resource,
        );

        let credentials = self
            .inner
            .cred
            .signing_credentials()
            .await
            .map_err(SigningError::signing)?;
        let signature = sign_rsa_sha256(&credentials.private_key_pem, string_to_sign.as_bytes())?;
        let signature = BASE64_STANDARD.encode(signature);

        let mut url = format!(
            "{}{}?GoogleAccessId={}&Expires={}&Signature={}",
            self.inner.download_endpoint,
            resource,
            enc(&credentials.client_email),
            expires,
            enc(&signature),
        );
        if let Some(response_type) = &self.response_type {
            url.push_str("&response-content-type=");
            url.push_str(enc(response_type).as_str());
        }
        let disposition = self.response_disposition.clone().or_else(|| {
            self.prompt_save_as
                .as_ref()
                .map(|name| format!("attachment; filename=\"{}\"", enc(name)))
        });
        if let Some(disposition) = disposition {
            url.push_str("&response-content-disposition=");
            url.push_str(enc(&disposition).as_str());
        }

        Ok(SignedUrlComponents {
            #[cfg(test)]
            string_to_sign,
            url,
        })
    }
}

/// Collapses runs of whitespace, the canonical form for signed headers.
fn canonical_header_value(value: &str) -> String {
    value
        .replace('\t', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

struct SignedUrlComponents {
    #[cfg(test)]
    string_to_sign: String,
    url: String,
}
