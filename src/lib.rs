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

//! A streaming client for Google Cloud Storage objects.
//!
//! This crate implements the object-level pipeline of a Cloud Storage
//! client: integrity-checked streaming downloads, resumable streaming
//! uploads that survive transient failures and process restarts, the
//! metadata and lifecycle operations of a single object, and RSA-SHA256
//! signed URLs and POST policy documents.
//!
//! Most applications start with [Storage][client::Storage] and the
//! [ObjectHandle][object::ObjectHandle] it hands out:
//!
//! ```no_run
//! # use gcs_client::client::Storage;
//! # async fn sample() -> anyhow::Result<()> {
//! let client = Storage::builder().build()?;
//! let object = client.object("my-bucket", "my-object");
//!
//! object.write("hello world").send().await?;
//! let contents = object.download().await?;
//! assert_eq!(contents, "hello world");
//! # Ok(()) }
//! ```
//!
//! # Integrity
//!
//! Downloads and uploads compute CRC32C checksums and MD5 hashes over the
//! bytes the service stores, and compare them with the service-advertised
//! values. Mismatches fail the operation with a stable code, see
//! [Error::code][crate::Error::code].
//!
//! # Resumable uploads
//!
//! Writes default to the resumable protocol. Session state persists in a
//! per-user file, so a restarted process resumes an interrupted upload
//! where it left off, and a changed payload is detected before any byte
//! reaches the stale session.
//!
//! # Authentication
//!
//! Token acquisition is out of scope. Bring a token (or a full
//! [CredentialsProvider][credentials::CredentialsProvider]) and, for
//! signing, a service account key. See the [credentials] module.

pub mod backoff;
mod checksum;
pub mod client;
pub mod credentials;
pub mod error;
mod gzip;
pub mod model;
pub mod object;
pub mod policy_document;
pub mod read_object;
mod session_store;
mod signer;
pub mod signed_url;
pub mod streaming_source;
pub mod write_object;

pub use crate::checksum::Validation;
pub use crate::error::{Error, Result};
