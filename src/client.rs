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

//! The client for the Cloud Storage object pipeline.

use crate::backoff::ExponentialBackoff;
use crate::credentials::Credentials;
use crate::model::Object;
use crate::object::ObjectHandle;
use crate::session_store::SessionStore;
use crate::{Error, Result};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::sync::Arc;

/// The JSON API and resumable/multipart upload base.
const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com";

/// The direct download host.
const DEFAULT_DOWNLOAD_ENDPOINT: &str = "https://storage.googleapis.com";

/// Characters percent-encoded when embedding values in URLs.
///
/// Matches JavaScript's `encodeURIComponent`: everything except
/// alphanumerics and `- _ . ! ~ * ' ( )` is escaped, including `/`.
pub(crate) const ENCODED_CHARS: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub(crate) fn enc(value: &str) -> String {
    utf8_percent_encode(value, &ENCODED_CHARS).to_string()
}

/// Implements a client for Cloud Storage objects.
///
/// # Example
/// ```no_run
/// # use gcs_client::client::Storage;
/// # async fn sample() -> gcs_client::Result<()> {
/// let client = Storage::builder().build()?;
/// let object = client.object("my-bucket", "my-object");
/// let contents = object.download().await?;
/// # Ok(()) }
/// ```
///
/// # Pooling and cloning
///
/// `Storage` holds a connection pool internally. Create one and reuse it;
/// cloning is cheap and clones share the pool.
#[derive(Clone, Debug)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

#[derive(Debug)]
pub(crate) struct StorageInner {
    pub client: reqwest::Client,
    pub cred: Credentials,
    pub endpoint: String,
    pub download_endpoint: String,
    pub session_store: SessionStore,
    pub options: RequestOptions,
}

/// Per-operation knobs, shared by all operations of a client.
#[derive(Clone, Debug)]
pub(crate) struct RequestOptions {
    pub retry_limit: u32,
    pub backoff: ExponentialBackoff,
}

impl std::default::Default for RequestOptions {
    fn default() -> Self {
        Self {
            retry_limit: 5,
            backoff: ExponentialBackoff::default(),
        }
    }
}

impl Storage {
    /// Returns a builder for [Storage].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Returns a handle for an object.
    ///
    /// The handle identifies the object; no request is made until one of its
    /// operations is invoked.
    pub fn object<B, O>(&self, bucket: B, name: O) -> ObjectHandle
    where
        B: Into<String>,
        O: Into<String>,
    {
        ObjectHandle::new(self.inner.clone(), bucket.into(), name.into())
    }
}

impl StorageInner {
    /// Applies the authentication headers to a request in progress.
    pub async fn apply_auth_headers(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        let headers = self.cred.headers().await?;
        Ok(builder.headers(headers))
    }
}

/// Converts an error response into an [Error], preserving the payload.
pub(crate) async fn to_http_error<T>(response: reqwest::Response) -> Result<T> {
    let status = response.status().as_u16();
    let payload = response.bytes().await.unwrap_or_default();
    Err(Error::http(status, payload))
}

/// Parses a response carrying an object resource.
pub(crate) async fn handle_object_response(response: reqwest::Response) -> Result<Object> {
    if !response.status().is_success() {
        return to_http_error(response).await;
    }
    response.json::<Object>().await.map_err(Error::deser)
}

/// Classifies a send error: body failures are the application's payload,
/// everything else is transport.
pub(crate) fn send_err(e: reqwest::Error) -> Error {
    if e.is_body() {
        Error::ser(e)
    } else {
        Error::io(e)
    }
}

/// A builder for [Storage].
///
/// ```no_run
/// # use gcs_client::client::Storage;
/// # use gcs_client::credentials::Credentials;
/// # fn sample() -> gcs_client::Result<()> {
/// let client = Storage::builder()
///     .with_credentials(Credentials::from_access_token("token"))
///     .build()?;
/// # Ok(()) }
/// ```
pub struct ClientBuilder {
    endpoint: String,
    download_endpoint: String,
    credentials: Credentials,
    session_store: Option<SessionStore>,
    options: RequestOptions,
}

impl ClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            download_endpoint: DEFAULT_DOWNLOAD_ENDPOINT.to_string(),
            credentials: Credentials::anonymous(),
            session_store: None,
            options: RequestOptions::default(),
        }
    }

    /// Creates a new client.
    pub fn build(self) -> Result<Storage> {
        // Disable all automatic decompression. Integrity checks are defined
        // over the on-wire bytes, the client must observe them unmodified.
        let client = reqwest::Client::builder()
            .no_brotli()
            .no_deflate()
            .no_gzip()
            .no_zstd()
            .build()
            .map_err(Error::io)?;
        let session_store = match self.session_store {
            Some(s) => s,
            None => SessionStore::new()?,
        };
        Ok(Storage {
            inner: Arc::new(StorageInner {
                client,
                cred: self.credentials,
                endpoint: self.endpoint,
                download_endpoint: self.download_endpoint,
                session_store,
                options: self.options,
            }),
        })
    }

    /// Sets the JSON API and upload endpoint.
    pub fn with_endpoint<V: Into<String>>(mut self, v: V) -> Self {
        self.endpoint = v.into();
        self
    }

    /// Sets the direct download endpoint.
    pub fn with_download_endpoint<V: Into<String>>(mut self, v: V) -> Self {
        self.download_endpoint = v.into();
        self
    }

    /// Configures the authentication credentials.
    pub fn with_credentials<V: Into<Credentials>>(mut self, v: V) -> Self {
        self.credentials = v.into();
        self
    }

    /// Overrides the file backing the resumable session store.
    pub fn with_session_store_path<P: Into<std::path::PathBuf>>(mut self, path: P) -> Self {
        self.session_store = Some(SessionStore::with_path(path));
        self
    }

    /// Limits the retries absorbed by a resumable upload.
    pub fn with_retry_limit(mut self, v: u32) -> Self {
        self.options.retry_limit = v;
        self
    }

    /// The backoff policy for retried upload attempts.
    pub fn with_backoff_policy(mut self, v: ExponentialBackoff) -> Self {
        self.options.backoff = v;
        self
    }
}
