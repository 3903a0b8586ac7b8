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

//! Single-shot multipart uploads.
//!
//! The whole object goes out in one `multipart/related` request: a JSON
//! metadata part followed by the media part. No session state is created or
//! persisted, an interrupted upload simply fails.

use super::{UploadRequest, payload_to_body};
use crate::checksum::ChecksummedSource;
use crate::client::{handle_object_response, send_err};
use crate::model::Object;
use crate::streaming_source::{Seek, StreamingSource};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) async fn send<T>(
    request: &UploadRequest,
    payload: Arc<Mutex<ChecksummedSource<T>>>,
) -> Result<Object>
where
    T: StreamingSource + Seek + Send + Sync + 'static,
{
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
        .query(&[("uploadType", "multipart")])
        .query(&[("name", request.name.as_str())]);
    let builder = request
        .if_generation_match
        .iter()
        .fold(builder, |b, v| b.query(&[("ifGenerationMatch", v)]));
    let builder = request.inner.apply_auth_headers(builder).await?;

    let metadata = serde_json::to_string(&request.metadata).map_err(Error::ser)?;
    let metadata = reqwest::multipart::Part::text(metadata)
        .mime_str("application/json; charset=UTF-8")
        .map_err(Error::ser)?;

    {
        let mut guard = payload.lock().await;
        guard.seek(0).await.map_err(Error::ser)?;
    }
    let hint = payload.lock().await.size_hint().await.map_err(Error::ser)?;
    let body = payload_to_body(payload);
    let media = match hint {
        (min, Some(max)) if min == max => {
            reqwest::multipart::Part::stream_with_length(body, max)
        }
        _ => reqwest::multipart::Part::stream(body),
    };
    let form = reqwest::multipart::Form::new()
        .part("metadata", metadata)
        .part("media", media);

    let builder = builder.header(
        "content-type",
        format!("multipart/related; boundary={}", form.boundary()),
    );
    let response = builder
        .body(reqwest::Body::wrap_stream(form.into_stream()))
        .send()
        .await
        .map_err(send_err)?;
    handle_object_response(response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Storage;
    use crate::client::tests::test_builder;
    use crate::model::testing::{encode_crc32c, encode_md5};
    use httptest::{Expectation, Server, matchers::*, responders::status_code};
    use serde_json::json;

    type TestResult = anyhow::Result<()>;

    fn client(server: &Server, dir: &tempfile::TempDir) -> Storage {
        test_builder(server, dir).build().expect("client builds")
    }

    fn object_response(contents: &[u8]) -> serde_json::Value {
        json!({
            "name": "test-object",
            "bucket": "test-bucket",
            "generation": "1",
            "crc32c": encode_crc32c(crc32c::crc32c(contents)),
            "md5Hash": encode_md5(contents),
        })
    }

    #[tokio::test]
    async fn single_shot_sends_metadata_and_media() -> TestResult {
        const PAYLOAD: &[u8] = b"hello world";
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/upload/storage/v1/b/test-bucket/o"),
                request::query(url_decoded(contains(("uploadType", "multipart")))),
                request::query(url_decoded(contains(("name", "test-object")))),
                request::headers(contains(("content-type", matches("^multipart/related; boundary=")))),
                // Both parts travel in the one request.
                request::body(matches("application/json")),
                request::body(matches("hello world")),
                request::body(matches("\"contentType\":\"text/plain\"")),
            ])
            .times(1)
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(object_response(PAYLOAD).to_string()),
            ),
        );

        let dir = tempfile::tempdir()?;
        let object = client(&server, &dir)
            .object("test-bucket", "test-object")
            .write(bytes::Bytes::from_static(PAYLOAD))
            .with_resumable(false)
            .with_metadata(Object::new().set_content_type("text/plain"))
            .send()
            .await?;
        assert_eq!(object.name, "test-object");
        assert_eq!(object.generation, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn single_shot_generation_precondition() -> TestResult {
        const PAYLOAD: &[u8] = b"guarded";
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/upload/storage/v1/b/test-bucket/o"),
                request::query(url_decoded(contains(("uploadType", "multipart")))),
                request::query(url_decoded(contains(("ifGenerationMatch", "42")))),
            ])
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(object_response(PAYLOAD).to_string()),
            ),
        );

        let dir = tempfile::tempdir()?;
        client(&server, &dir)
            .object("test-bucket", "test-object")
            .with_generation(42)
            .write(bytes::Bytes::from_static(PAYLOAD))
            .with_resumable(false)
            .send()
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn single_shot_http_error() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "POST",
                "/upload/storage/v1/b/test-bucket/o",
            ))
            .respond_with(status_code(409).body("precondition failed")),
        );

        let dir = tempfile::tempdir()?;
        let err = client(&server, &dir)
            .object("test-bucket", "test-object")
            .write("data")
            .with_resumable(false)
            .send()
            .await
            .expect_err("expected the service error");
        assert_eq!(err.http_status_code(), Some(409));
        Ok(())
    }

    #[tokio::test]
    async fn single_shot_bad_response_body() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "POST",
                "/upload/storage/v1/b/test-bucket/o",
            ))
            .respond_with(status_code(200).body("not json")),
        );

        let dir = tempfile::tempdir()?;
        let err = client(&server, &dir)
            .object("test-bucket", "test-object")
            .write("data")
            .with_resumable(false)
            .send()
            .await
            .expect_err("expected a deserialization error");
        assert!(err.is_deserialization(), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn single_shot_source_error() -> TestResult {
        use crate::streaming_source::tests::FaultySource;
        let server = Server::run();
        // The request may or may not reach the server before the body fails.
        server.expect(
            Expectation::matching(any())
                .times(0..2)
                .respond_with(status_code(200).body("{}")),
        );

        let dir = tempfile::tempdir()?;
        let mut source = FaultySource::new(vec![bytes::Bytes::from_static(b"abc")]);
        source.fail_next_at = Some(1);
        let err = client(&server, &dir)
            .object("test-bucket", "test-object")
            .write(source)
            .with_resumable(false)
            .with_validation(crate::checksum::Validation::None)
            .send()
            .await
            .expect_err("a failing source must fail the upload");
        assert!(err.is_serialization() || err.is_io(), "{err:?}");
        Ok(())
    }
}
