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

//! The resumable upload protocol.
//!
//! A resumable upload is a server-tracked session: a metadata POST returns a
//! session URI, data PUTs append bytes to it, and the final response carries
//! the object resource. Sessions are persisted across process restarts, so
//! an interrupted upload resumes where it left off. Three states drive the
//! protocol:
//!
//! - **Start**: create a session and persist its URI.
//! - **Probe**: ask an existing session how many bytes it has.
//! - **Transmit**: stream the remaining payload suffix.
//!
//! A resumed session may be handed a different payload than the one that
//! created it. The persisted record carries the first bytes of the original
//! payload; when they differ from the new payload the stale session is
//! abandoned and a fresh one is created before any byte goes on the wire.

use super::UploadRequest;
use crate::checksum::ChecksummedSource;
use crate::client::{handle_object_response, send_err, to_http_error};
use crate::error::WriteError;
use crate::model::Object;
use crate::session_store::{SessionRecord, SessionStore};
use crate::streaming_source::{Seek, StreamingSource};
use crate::{Error, Result};
use futures::stream::unfold;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The number of payload bytes recorded for divergence detection.
const FIRST_CHUNK_LEN: usize = 16;

const RESUME_INCOMPLETE: reqwest::StatusCode = reqwest::StatusCode::PERMANENT_REDIRECT;

enum State {
    Start,
    Probe(SessionRecord),
    Transmit(SessionRecord, u64),
}

enum TransmitOutcome {
    Finalized(Box<Object>),
    Divergence,
}

enum Recovery {
    NewSession,
    Reprobe,
}

pub(crate) async fn send<T>(
    request: &UploadRequest,
    payload: Arc<Mutex<ChecksummedSource<T>>>,
) -> Result<Object>
where
    T: StreamingSource + Seek + Send + Sync + 'static,
{
    let store = request.inner.session_store.clone();
    let mut retries = 0_u32;
    let mut state = match store.get(&request.name).await {
        Ok(Some(record)) => State::Probe(record),
        Ok(None) => State::Start,
        Err(e) => {
            tracing::warn!("cannot read the resumable session store: {e}");
            State::Start
        }
    };
    loop {
        state = match state {
            State::Start => match start_session(request).await {
                Ok(uri) => {
                    tracing::debug!(object = %request.name, "resumable session created");
                    let record = SessionRecord {
                        uri,
                        first_chunk: None,
                    };
                    store.put(&request.name, record.clone()).await?;
                    State::Transmit(record, 0)
                }
                Err(e) => {
                    recover(request, e, &mut retries).await?;
                    State::Start
                }
            },
            State::Probe(record) => match probe(request, &record.uri).await {
                Ok(ProbeOutcome::Finalized(object)) => {
                    remove_record(&store, &request.name).await;
                    return Ok(*object);
                }
                Ok(ProbeOutcome::Persisted(persisted)) => {
                    tracing::debug!(object = %request.name, persisted, "resumable session probed");
                    State::Transmit(record, persisted)
                }
                Err(e) => match recover(request, e, &mut retries).await? {
                    Recovery::NewSession => {
                        store.remove(&request.name).await?;
                        State::Start
                    }
                    Recovery::Reprobe => State::Probe(record),
                },
            },
            State::Transmit(record, persisted) => {
                match transmit(request, &record, persisted, &payload, &store).await {
                    Ok(TransmitOutcome::Finalized(object)) => {
                        remove_record(&store, &request.name).await;
                        return Ok(*object);
                    }
                    Ok(TransmitOutcome::Divergence) => {
                        tracing::debug!(
                            object = %request.name,
                            "payload diverges from the persisted session, starting over"
                        );
                        store.remove(&request.name).await?;
                        State::Start
                    }
                    Err(e) => match recover(request, e, &mut retries).await? {
                        Recovery::NewSession => {
                            store.remove(&request.name).await?;
                            State::Start
                        }
                        Recovery::Reprobe => State::Probe(record),
                    },
                }
            }
        };
    }
}

/// Applies the error policy for the resumable protocol.
///
/// A 404 means the session vanished, start a fresh one. Service errors and
/// transport failures back off and then query the session for the last byte
/// it persisted. Anything else, or an exhausted retry budget, surfaces the
/// error to the caller.
async fn recover(request: &UploadRequest, error: Error, retries: &mut u32) -> Result<Recovery> {
    let options = &request.inner.options;
    if *retries >= options.retry_limit {
        return Err(error);
    }
    match error.http_status_code() {
        Some(404) => {
            *retries += 1;
            Ok(Recovery::NewSession)
        }
        Some(status) if (500..600).contains(&status) => {
            *retries += 1;
            let delay = options.backoff.delay(*retries);
            tracing::debug!(status, ?delay, "retrying the resumable upload");
            tokio::time::sleep(delay).await;
            Ok(Recovery::Reprobe)
        }
        None if error.is_io() => {
            *retries += 1;
            let delay = options.backoff.delay(*retries);
            tracing::debug!(?delay, "retrying the resumable upload after a transport error");
            tokio::time::sleep(delay).await;
            Ok(Recovery::Reprobe)
        }
        _ => Err(error),
    }
}

/// A successful completion keeps the object; a failed record cleanup is not
/// worth failing the upload over.
async fn remove_record(store: &SessionStore, name: &str) {
    if let Err(e) = store.remove(name).await {
        tracing::warn!("cannot remove the completed session record: {e}");
    }
}

async fn start_session(request: &UploadRequest) -> Result<String> {
    let builder = request
        .inner
        .client
        .request(
            reqwest::Method::POST,
            format!(
                "{}/upload/storage/v1/b/{}/o",
                &request.inner.endpoint, &request.bucket
            ),
        )
        .query(&[("uploadType", "resumable")])
        .query(&[("name", request.name.as_str())])
        .header("content-type", "application/json");
    let builder = request
        .if_generation_match
        .iter()
        .fold(builder, |b, v| b.query(&[("ifGenerationMatch", v)]));
    let builder = match request.metadata.content_type.as_str() {
        "" => builder,
        v => builder.header("X-Upload-Content-Type", v),
    };
    let builder = request.inner.apply_auth_headers(builder).await?;
    let builder = builder.json(&request.metadata);
    let response = builder.send().await.map_err(Error::io)?;
    if !response.status().is_success() {
        return to_http_error(response).await;
    }
    let location = response
        .headers()
        .get("Location")
        .ok_or_else(|| Error::deser(WriteError::MissingSessionUri))?;
    location.to_str().map_err(Error::deser).map(str::to_string)
}

enum ProbeOutcome {
    Finalized(Box<Object>),
    Persisted(u64),
}

/// Queries a session for the last byte it persisted.
async fn probe(request: &UploadRequest, uri: &str) -> Result<ProbeOutcome> {
    let builder = request
        .inner
        .client
        .request(reqwest::Method::PUT, uri)
        .header("content-length", "0")
        .header("Content-Range", "bytes */*");
    let builder = request.inner.apply_auth_headers(builder).await?;
    let response = builder.send().await.map_err(Error::io)?;
    if response.status() == RESUME_INCOMPLETE {
        return Ok(ProbeOutcome::Persisted(persisted_bytes(response.headers())));
    }
    if response.status().is_success() {
        // The session already finalized; an object resource is the best
        // answer. Anything unparseable restarts from byte zero.
        return match response.json::<Object>().await {
            Ok(object) => Ok(ProbeOutcome::Finalized(Box::new(object))),
            Err(_) => Ok(ProbeOutcome::Persisted(0)),
        };
    }
    to_http_error(response).await
}

/// Parses the `Range` header of a 308 response into a persisted byte count.
///
/// The header is inclusive, `Range: bytes=0-999` means 1000 bytes are
/// persisted. A missing or malformed header means the session holds nothing
/// and the upload restarts from byte zero.
fn persisted_bytes(headers: &reqwest::header::HeaderMap) -> u64 {
    let end = headers
        .get("range")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("bytes=").unwrap_or(v))
        .and_then(|v| v.strip_prefix("0-"))
        .and_then(|v| v.parse::<u64>().ok());
    match end {
        None | Some(0) => 0,
        Some(end) => end + 1,
    }
}

async fn transmit<T>(
    request: &UploadRequest,
    record: &SessionRecord,
    persisted: u64,
    payload: &Arc<Mutex<ChecksummedSource<T>>>,
    store: &SessionStore,
) -> Result<TransmitOutcome>
where
    T: StreamingSource + Seek + Send + Sync + 'static,
{
    payload
        .lock()
        .await
        .seek(0)
        .await
        .map_err(Error::ser)?;

    // Read the head of the payload before opening the connection. The
    // divergence check must complete before any byte reaches a stale URI.
    let mut replay = VecDeque::new();
    let mut head = Vec::new();
    {
        let mut guard = payload.lock().await;
        while head.len() < FIRST_CHUNK_LEN {
            match guard.next().await {
                None => break,
                Some(Ok(chunk)) => {
                    head.extend_from_slice(&chunk[..chunk.len().min(FIRST_CHUNK_LEN - head.len())]);
                    replay.push_back(chunk);
                }
                Some(Err(e)) => return Err(Error::ser(e)),
            }
        }
    }
    match &record.first_chunk {
        None => {
            store
                .put(
                    &request.name,
                    SessionRecord {
                        uri: record.uri.clone(),
                        first_chunk: Some(head),
                    },
                )
                .await?;
        }
        Some(cached) if *cached != head => return Ok(TransmitOutcome::Divergence),
        Some(_) => {}
    }

    let gate = OffsetGate {
        replay,
        payload: payload.clone(),
        skip: persisted,
    };
    let stream = Box::pin(unfold(gate, |mut gate| async move {
        gate.next().await.map(|item| (item, gate))
    }));

    let builder = request
        .inner
        .client
        .request(reqwest::Method::PUT, &record.uri)
        .header("content-type", "application/octet-stream")
        .header("Content-Range", format!("bytes {persisted}-*/*"));
    let builder = request.inner.apply_auth_headers(builder).await?;
    let response = builder
        .body(reqwest::Body::wrap_stream(stream))
        .send()
        .await
        .map_err(send_err)?;
    let object = handle_object_response(response).await?;
    Ok(TransmitOutcome::Finalized(Box::new(object)))
}

/// Forwards the payload suffix past the server-acknowledged byte count.
///
/// The gate counts bytes, not chunks: it drops whole chunks while they fall
/// inside the persisted prefix and splits the chunk that straddles the
/// boundary. The buffered head chunks are replayed first, they are part of
/// the same byte sequence.
struct OffsetGate<T> {
    replay: VecDeque<bytes::Bytes>,
    payload: Arc<Mutex<ChecksummedSource<T>>>,
    skip: u64,
}

impl<T> OffsetGate<T>
where
    T: StreamingSource + Send + Sync,
{
    async fn next(&mut self) -> Option<std::result::Result<bytes::Bytes, T::Error>> {
        loop {
            let chunk = match self.replay.pop_front() {
                Some(chunk) => chunk,
                None => match self.payload.lock().await.next().await {
                    None => return None,
                    Some(Err(e)) => return Some(Err(e)),
                    Some(Ok(chunk)) => chunk,
                },
            };
            if self.skip >= chunk.len() as u64 {
                self.skip -= chunk.len() as u64;
                continue;
            }
            let out = chunk.slice(self.skip as usize..);
            self.skip = 0;
            if out.is_empty() {
                continue;
            }
            return Some(Ok(out));
        }
    }
}
