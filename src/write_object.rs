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

//! The upload pipeline entry point.
//!
//! Uploads default to the resumable protocol. The payload flows through the
//! optional gzip transform and then a checksum engine, so the digests always
//! cover the bytes the service stores. When the service reports different
//! digests for the finalized object, the object is deleted again and the
//! upload fails with one of the stable integrity codes.

use crate::checksum::{ChecksumEngine, ChecksummedSource, Validation, validate};
use crate::client::StorageInner;
use crate::error::{FILE_NO_UPLOAD, FILE_NO_UPLOAD_DELETE, WriteError};
use crate::gzip::GzippedSource;
use crate::model::Object;
use crate::streaming_source::{Payload, Seek, StreamingSource};
use crate::{Error, Result};
use futures::stream::unfold;
use std::sync::Arc;
use tokio::sync::Mutex;

mod resumable;
mod single_shot;

/// The request builder for object writes.
pub struct WriteObject<S> {
    request: UploadRequest,
    handle_metadata: Arc<std::sync::Mutex<Option<Object>>>,
    payload: S,
    resumable: bool,
    gzip: bool,
    validation: Validation,
}

/// The parts of a write shared by the single-shot and resumable paths.
pub(crate) struct UploadRequest {
    pub inner: Arc<StorageInner>,
    pub bucket: String,
    pub name: String,
    pub if_generation_match: Option<i64>,
    pub metadata: Object,
}

impl<S> WriteObject<S>
where
    S: StreamingSource + Seek + Send + Sync + 'static,
{
    pub(crate) fn new<T: Into<Payload<S>>>(
        inner: Arc<StorageInner>,
        bucket: String,
        name: String,
        if_generation_match: Option<i64>,
        handle_metadata: Arc<std::sync::Mutex<Option<Object>>>,
        payload: T,
    ) -> Self {
        Self {
            request: UploadRequest {
                inner,
                bucket,
                name,
                if_generation_match,
                metadata: Object::new(),
            },
            handle_metadata,
            payload: payload.into().into_inner(),
            resumable: true,
            gzip: false,
            validation: Validation::default(),
        }
    }

    /// The metadata sent when the upload starts.
    pub fn with_metadata(mut self, v: Object) -> Self {
        self.request.metadata = v;
        self
    }

    /// Selects between the resumable protocol (the default) and a
    /// single-shot multipart upload.
    pub fn with_resumable(mut self, v: bool) -> Self {
        self.resumable = v;
        self
    }

    /// Compresses the payload and stores the object with
    /// `contentEncoding: gzip`.
    pub fn with_gzip(mut self, v: bool) -> Self {
        self.gzip = v;
        self
    }

    /// Selects the digests computed over the stored bytes and compared with
    /// the service's values when the object is finalized. Defaults to
    /// [Validation::Both].
    pub fn with_validation(mut self, v: Validation) -> Self {
        self.validation = v;
        self
    }

    /// Performs the upload.
    ///
    /// On success the returned metadata also replaces the handle's cached
    /// metadata.
    pub async fn send(self) -> Result<Object> {
        let Self {
            mut request,
            handle_metadata,
            payload,
            resumable,
            gzip,
            validation,
        } = self;
        if request.name.is_empty() {
            return Err(Error::invalid_input("an object name is required"));
        }
        if request.bucket.is_empty() {
            return Err(Error::invalid_input("a bucket name is required"));
        }

        let engine = ChecksumEngine::new(validation);
        let object = if gzip {
            request.metadata.content_encoding = "gzip".to_string();
            let source = ChecksummedSource::new(engine, GzippedSource::new(payload));
            upload(&request, source, resumable, validation).await?
        } else {
            let source = ChecksummedSource::new(engine, payload);
            upload(&request, source, resumable, validation).await?
        };

        *handle_metadata.lock().expect("metadata mutex poisoned") = Some(object.clone());
        Ok(object)
    }
}

async fn upload<T>(
    request: &UploadRequest,
    source: ChecksummedSource<T>,
    resumable: bool,
    validation: Validation,
) -> Result<Object>
where
    T: StreamingSource + Seek + Send + Sync + 'static,
{
    let payload = Arc::new(Mutex::new(source));
    let object = if resumable {
        resumable::send(request, payload.clone()).await?
    } else {
        single_shot::send(request, payload.clone()).await?
    };
    if !validation.is_enabled() {
        return Ok(object);
    }
    let computed = payload.lock().await.final_checksums();
    match validate(&computed, &object.checksums()) {
        Ok(()) => Ok(object),
        Err(mismatch) => Err(cleanup_failed_upload(request, &object, mismatch).await),
    }
}

/// Best-effort removal of an object whose digests do not match.
async fn cleanup_failed_upload(
    request: &UploadRequest,
    object: &Object,
    mismatch: crate::error::ChecksumMismatch,
) -> Error {
    tracing::warn!(
        bucket = %request.bucket,
        object = %request.name,
        "upload checksum mismatch, deleting the remote object"
    );
    let delete = crate::object::delete_object(
        &request.inner,
        &request.bucket,
        &request.name,
        object.generation,
    )
    .await;
    match delete {
        Ok(()) => Error::integrity(FILE_NO_UPLOAD, WriteError::UploadMismatch(mismatch)),
        Err(delete_error) => Error::integrity(
            FILE_NO_UPLOAD_DELETE,
            WriteError::UploadMismatchDeleteFailed {
                mismatch,
                delete_error: Box::new(delete_error),
            },
        ),
    }
}

/// Adapts a shared payload into a request body.
///
/// The body pulls from the source as the connection accepts bytes, so the
/// producer never runs ahead of the consumer.
pub(crate) fn payload_to_body<T>(payload: Arc<Mutex<ChecksummedSource<T>>>) -> reqwest::Body
where
    T: StreamingSource + Send + Sync + 'static,
{
    let stream = Box::pin(unfold(Some(payload), move |state| async move {
        if let Some(payload) = state {
            let mut guard = payload.lock().await;
            if let Some(next) = guard.next().await {
                drop(guard);
                return Some((next, Some(payload)));
            }
        }
        None
    }));
    reqwest::Body::wrap_stream(stream)
}
