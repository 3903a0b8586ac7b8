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

//! Object handles: metadata and lifecycle operations.

use crate::client::{StorageInner, enc, handle_object_response, to_http_error};
use crate::model::Object;
use crate::policy_document::PolicyDocument;
use crate::read_object::ReadObject;
use crate::signed_url::SignedUrl;
use crate::streaming_source::{Payload, Seek, StreamingSource};
use crate::write_object::WriteObject;
use crate::{Error, Result};
use std::sync::{Arc, Mutex};

/// Identifies a remote object and carries its last known metadata.
///
/// Handles are cheap to create and clone, and make no requests on their own.
/// Operations that return object metadata refresh the handle's cached copy.
///
/// # Example
/// ```no_run
/// # use gcs_client::client::Storage;
/// # async fn sample(client: &Storage) -> gcs_client::Result<()> {
/// let object = client.object("my-bucket", "my-object");
/// let metadata = object.get_metadata().await?;
/// println!("generation={:?}", metadata.generation);
/// # Ok(()) }
/// ```
#[derive(Clone, Debug)]
pub struct ObjectHandle {
    inner: Arc<StorageInner>,
    bucket: String,
    name: String,
    generation: Option<i64>,
    metadata: Arc<Mutex<Option<Object>>>,
}

/// The destination of a copy.
///
/// A bare name targets the same bucket, a bucket targets the same name, and
/// an object reference targets both.
#[derive(Clone, Debug, PartialEq)]
pub enum CopyDestination {
    /// A different name in the source's bucket.
    Name(String),
    /// The source's name in a different bucket.
    Bucket(String),
    /// An arbitrary bucket and name.
    Object { bucket: String, name: String },
}

impl From<&str> for CopyDestination {
    fn from(value: &str) -> Self {
        CopyDestination::Name(value.to_string())
    }
}

impl From<String> for CopyDestination {
    fn from(value: String) -> Self {
        CopyDestination::Name(value)
    }
}

impl From<&ObjectHandle> for CopyDestination {
    fn from(value: &ObjectHandle) -> Self {
        CopyDestination::Object {
            bucket: value.bucket().to_string(),
            name: value.name().to_string(),
        }
    }
}

impl ObjectHandle {
    pub(crate) fn new(inner: Arc<StorageInner>, bucket: String, name: String) -> Self {
        Self {
            inner,
            bucket,
            name,
            generation: None,
            metadata: Arc::new(Mutex::new(None)),
        }
    }

    /// The bucket containing the object.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scopes all operations on this handle to a specific generation.
    pub fn with_generation(mut self, v: i64) -> Self {
        self.generation = Some(v);
        self
    }

    /// The last metadata observed by this handle, if any.
    pub fn metadata(&self) -> Option<Object> {
        self.metadata.lock().expect("metadata mutex poisoned").clone()
    }

    fn set_metadata(&self, object: &Object) {
        *self.metadata.lock().expect("metadata mutex poisoned") = Some(object.clone());
    }

    fn require_names(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(Error::invalid_input("a bucket name is required"));
        }
        if self.name.is_empty() {
            return Err(Error::invalid_input("an object name is required"));
        }
        Ok(())
    }

    fn object_url(&self) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            &self.inner.endpoint,
            &self.bucket,
            enc(&self.name)
        )
    }

    /// Starts a streaming read of the object's contents.
    pub fn read(&self) -> ReadObject {
        ReadObject::new(
            self.inner.clone(),
            self.bucket.clone(),
            self.name.clone(),
            self.generation,
        )
    }

    /// Starts a write of the object's contents.
    ///
    /// The handle's generation, when set, becomes an `ifGenerationMatch`
    /// precondition on the write.
    pub fn write<T, S>(&self, payload: T) -> WriteObject<S>
    where
        T: Into<Payload<S>>,
        S: StreamingSource + Seek + Send + Sync + 'static,
    {
        WriteObject::new(
            self.inner.clone(),
            self.bucket.clone(),
            self.name.clone(),
            self.generation,
            self.metadata.clone(),
            payload,
        )
    }

    /// Builds a signed URL granting time-limited access to this object.
    pub fn signed_url(&self) -> SignedUrl {
        SignedUrl::new(self.inner.clone(), self.bucket.clone(), self.name.clone())
    }

    /// Builds a signed POST policy document for this object.
    pub fn policy_document(&self) -> PolicyDocument {
        PolicyDocument::new(self.inner.clone(), self.bucket.clone(), self.name.clone())
    }

    /// Fetches the object metadata and refreshes the handle's cached copy.
    pub async fn get_metadata(&self) -> Result<Object> {
        self.require_names()?;
        let builder = self.inner.client.get(self.object_url());
        let builder = self
            .generation
            .iter()
            .fold(builder, |b, v| b.query(&[("generation", v)]));
        let builder = self.inner.apply_auth_headers(builder).await?;
        let response = builder.send().await.map_err(Error::io)?;
        let object = handle_object_response(response).await?;
        self.set_metadata(&object);
        Ok(object)
    }

    /// Patches the object metadata.
    ///
    /// The patch uses JSON merge semantics: fields present in `patch`
    /// replace the stored values, and a `null` unsets a field.
    pub async fn update_metadata(&self, patch: serde_json::Value) -> Result<Object> {
        self.require_names()?;
        let builder = self.inner.client.patch(self.object_url()).json(&patch);
        let builder = self.inner.apply_auth_headers(builder).await?;
        let response = builder.send().await.map_err(Error::io)?;
        let object = handle_object_response(response).await?;
        self.set_metadata(&object);
        Ok(object)
    }

    /// Deletes the object.
    pub async fn delete(&self) -> Result<()> {
        self.require_names()?;
        delete_object(&self.inner, &self.bucket, &self.name, self.generation).await
    }

    /// Copies the object.
    ///
    /// Returns a handle for the destination with its metadata populated.
    pub async fn copy<D: Into<CopyDestination>>(&self, destination: D) -> Result<ObjectHandle> {
        self.require_names()?;
        let (dest_bucket, dest_name) = match destination.into() {
            CopyDestination::Name(name) => (self.bucket.clone(), name),
            CopyDestination::Bucket(bucket) => (bucket, self.name.clone()),
            CopyDestination::Object { bucket, name } => (bucket, name),
        };
        if dest_name.is_empty() || dest_bucket.is_empty() {
            return Err(Error::invalid_input("a copy destination is required"));
        }
        let builder = self.inner.client.post(format!(
            "{}/storage/v1/b/{}/o/{}/copyTo/b/{}/o/{}",
            &self.inner.endpoint,
            &self.bucket,
            enc(&self.name),
            &dest_bucket,
            enc(&dest_name),
        ));
        let builder = self
            .generation
            .iter()
            .fold(builder, |b, v| b.query(&[("sourceGeneration", v)]));
        let builder = self.inner.apply_auth_headers(builder).await?;
        let response = builder.send().await.map_err(Error::io)?;
        let object = handle_object_response(response).await?;
        let handle = ObjectHandle::new(self.inner.clone(), dest_bucket, dest_name);
        handle.set_metadata(&object);
        Ok(handle)
    }

    /// Moves the object by copying it and deleting the source.
    ///
    /// The composition is not atomic. When the copy succeeds but the delete
    /// fails this returns the delete error, and the object exists under both
    /// names.
    pub async fn move_to<D: Into<CopyDestination>>(&self, destination: D) -> Result<ObjectHandle> {
        let copied = self.copy(destination).await?;
        self.delete().await?;
        Ok(copied)
    }

    /// Reads the whole object into memory.
    pub async fn download(&self) -> Result<bytes::Bytes> {
        self.read().send().await?.all_bytes().await
    }

    /// Streams the object into a local file.
    ///
    /// A failed download removes the partial file.
    pub async fn download_to_path<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut response = self.read().send().await?;
        let mut file = tokio::fs::File::create(path).await.map_err(Error::io)?;
        loop {
            match response.next().await.transpose() {
                Ok(None) => break,
                Ok(Some(chunk)) => {
                    if let Err(e) = tokio::io::AsyncWriteExt::write_all(&mut file, &chunk).await {
                        drop(file);
                        let _ = tokio::fs::remove_file(path).await;
                        return Err(Error::io(e));
                    }
                }
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(path).await;
                    return Err(e);
                }
            }
        }
        tokio::io::AsyncWriteExt::flush(&mut file).await.map_err(Error::io)?;
        Ok(())
    }

    /// Removes ACL entries, leaving a predefined restricted ACL.
    ///
    /// With `strict` only the owner retains access (`private`), otherwise
    /// project team members keep theirs (`projectPrivate`). The service
    /// forbids combining `predefinedAcl` with an explicit ACL list, so the
    /// patch clears it.
    pub async fn make_private(&self, strict: bool) -> Result<Object> {
        self.require_names()?;
        let predefined = if strict { "private" } else { "projectPrivate" };
        let builder = self
            .inner
            .client
            .patch(self.object_url())
            .query(&[("predefinedAcl", predefined)])
            .json(&serde_json::json!({"acl": null}));
        let builder = self.inner.apply_auth_headers(builder).await?;
        let response = builder.send().await.map_err(Error::io)?;
        let object = handle_object_response(response).await?;
        self.set_metadata(&object);
        Ok(object)
    }

    /// Grants read access to everyone by inserting an `allUsers` ACL entry.
    pub async fn make_public(&self) -> Result<()> {
        self.require_names()?;
        let builder = self
            .inner
            .client
            .post(format!("{}/acl", self.object_url()))
            .json(&serde_json::json!({"entity": "allUsers", "role": "READER"}));
        let builder = self.inner.apply_auth_headers(builder).await?;
        let response = builder.send().await.map_err(Error::io)?;
        if !response.status().is_success() {
            return to_http_error(response).await;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn inner_for_tests(&self) -> Arc<StorageInner> {
        self.inner.clone()
    }
}

/// Deletes an object, optionally scoped to a generation.
pub(crate) async fn delete_object(
    inner: &StorageInner,
    bucket: &str,
    name: &str,
    generation: Option<i64>,
) -> Result<()> {
    let builder = inner.client.delete(format!(
        "{}/storage/v1/b/{}/o/{}",
        &inner.endpoint,
        bucket,
        enc(name)
    ));
    let builder = generation
        .iter()
        .fold(builder, |b, v| b.query(&[("generation", v)]));
    let builder = inner.apply_auth_headers(builder).await?;
    let response = builder.send().await.map_err(Error::io)?;
    if !response.status().is_success() {
        return to_http_error(response).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Storage;
    use crate::client::tests::test_builder;
    use httptest::{Expectation, Server, matchers::*, responders::status_code};
    use serde_json::json;

    type TestResult = anyhow::Result<()>;

    fn client(server: &Server, dir: &tempfile::TempDir) -> Storage {
        test_builder(server, dir).build().expect("client builds")
    }

    fn object_body() -> serde_json::Value {
        json!({
            "name": "test-object",
            "bucket": "test-bucket",
            "generation": "123",
            "metageneration": "2",
        })
    }

    #[tokio::test]
    async fn get_metadata() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/storage/v1/b/test-bucket/o/test-object",
            ))
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(object_body().to_string()),
            ),
        );

        let dir = tempfile::tempdir()?;
        let handle = client(&server, &dir).object("test-bucket", "test-object");
        assert_eq!(handle.metadata(), None);
        let object = handle.get_metadata().await?;
        assert_eq!(object.generation, Some(123));
        assert_eq!(
            handle.metadata().map(|o| o.metageneration),
            Some(Some(2)),
            "the handle caches the fetched metadata"
        );
        Ok(())
    }

    #[tokio::test]
    async fn get_metadata_generation_query() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/storage/v1/b/test-bucket/o/test-object"),
                request::query(url_decoded(contains(("generation", "7")))),
            ])
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(object_body().to_string()),
            ),
        );

        let dir = tempfile::tempdir()?;
        client(&server, &dir)
            .object("test-bucket", "test-object")
            .with_generation(7)
            .get_metadata()
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn object_name_is_encoded_in_paths() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/storage/v1/b/test-bucket/o/folder%2Ffile%20name.txt",
            ))
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(object_body().to_string()),
            ),
        );

        let dir = tempfile::tempdir()?;
        client(&server, &dir)
            .object("test-bucket", "folder/file name.txt")
            .get_metadata()
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn update_metadata_patch() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("PATCH", "/storage/v1/b/test-bucket/o/test-object"),
                request::body(json_decoded(eq(json!({
                    "contentType": "text/plain",
                    "metadata": {"stale": null}
                })))),
            ])
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(object_body().to_string()),
            ),
        );

        let dir = tempfile::tempdir()?;
        let handle = client(&server, &dir).object("test-bucket", "test-object");
        handle
            .update_metadata(json!({
                "contentType": "text/plain",
                "metadata": {"stale": null}
            }))
            .await?;
        assert!(handle.metadata().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn delete_scoped_to_generation() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("DELETE", "/storage/v1/b/test-bucket/o/test-object"),
                request::query(url_decoded(contains(("generation", "9")))),
            ])
            .respond_with(status_code(204)),
        );

        let dir = tempfile::tempdir()?;
        client(&server, &dir)
            .object("test-bucket", "test-object")
            .with_generation(9)
            .delete()
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn copy_to_bare_name() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "POST",
                "/storage/v1/b/test-bucket/o/test-object/copyTo/b/test-bucket/o/backup",
            ))
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(json!({"name": "backup", "bucket": "test-bucket"}).to_string()),
            ),
        );

        let dir = tempfile::tempdir()?;
        let copied = client(&server, &dir)
            .object("test-bucket", "test-object")
            .copy("backup")
            .await?;
        assert_eq!(copied.bucket(), "test-bucket");
        assert_eq!(copied.name(), "backup");
        assert_eq!(copied.metadata().map(|o| o.name), Some("backup".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn copy_to_other_bucket_keeps_name() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "POST",
                "/storage/v1/b/test-bucket/o/test-object/copyTo/b/other-bucket/o/test-object",
            ))
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(json!({"name": "test-object", "bucket": "other-bucket"}).to_string()),
            ),
        );

        let dir = tempfile::tempdir()?;
        let copied = client(&server, &dir)
            .object("test-bucket", "test-object")
            .copy(CopyDestination::Bucket("other-bucket".to_string()))
            .await?;
        assert_eq!(copied.bucket(), "other-bucket");
        assert_eq!(copied.name(), "test-object");
        Ok(())
    }

    #[tokio::test]
    async fn copy_source_generation() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path(
                    "POST",
                    "/storage/v1/b/test-bucket/o/test-object/copyTo/b/test-bucket/o/backup",
                ),
                request::query(url_decoded(contains(("sourceGeneration", "5")))),
            ])
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(json!({"name": "backup", "bucket": "test-bucket"}).to_string()),
            ),
        );

        let dir = tempfile::tempdir()?;
        client(&server, &dir)
            .object("test-bucket", "test-object")
            .with_generation(5)
            .copy("backup")
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn copy_missing_destination() -> TestResult {
        let server = Server::run();
        let dir = tempfile::tempdir()?;
        let err = client(&server, &dir)
            .object("test-bucket", "test-object")
            .copy("")
            .await
            .expect_err("an empty destination must fail");
        assert!(err.is_invalid_input(), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn move_copies_then_deletes() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "POST",
                "/storage/v1/b/test-bucket/o/test-object/copyTo/b/test-bucket/o/renamed",
            ))
            .times(1)
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(json!({"name": "renamed", "bucket": "test-bucket"}).to_string()),
            ),
        );
        server.expect(
            Expectation::matching(request::method_path(
                "DELETE",
                "/storage/v1/b/test-bucket/o/test-object",
            ))
            .times(1)
            .respond_with(status_code(204)),
        );

        let dir = tempfile::tempdir()?;
        let moved = client(&server, &dir)
            .object("test-bucket", "test-object")
            .move_to("renamed")
            .await?;
        assert_eq!(moved.name(), "renamed");
        Ok(())
    }

    #[tokio::test]
    async fn move_surfaces_delete_failure() -> TestResult {
        // The copy lands but the source cannot be deleted: the move fails
        // and the destination object exists.
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "POST",
                "/storage/v1/b/test-bucket/o/test-object/copyTo/b/test-bucket/o/renamed",
            ))
            .times(1)
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(json!({"name": "renamed", "bucket": "test-bucket"}).to_string()),
            ),
        );
        server.expect(
            Expectation::matching(request::method_path(
                "DELETE",
                "/storage/v1/b/test-bucket/o/test-object",
            ))
            .times(1)
            .respond_with(status_code(403).body("forbidden")),
        );

        let dir = tempfile::tempdir()?;
        let err = client(&server, &dir)
            .object("test-bucket", "test-object")
            .move_to("renamed")
            .await
            .expect_err("the delete failure must surface");
        assert_eq!(err.http_status_code(), Some(403));
        Ok(())
    }

    #[tokio::test]
    async fn make_private_request_shape() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("PATCH", "/storage/v1/b/test-bucket/o/test-object"),
                request::query(url_decoded(contains(("predefinedAcl", "private")))),
                request::body(json_decoded(eq(json!({"acl": null})))),
            ])
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(object_body().to_string()),
            ),
        );

        let dir = tempfile::tempdir()?;
        client(&server, &dir)
            .object("test-bucket", "test-object")
            .make_private(true)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn make_private_relaxed() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("PATCH", "/storage/v1/b/test-bucket/o/test-object"),
                request::query(url_decoded(contains(("predefinedAcl", "projectPrivate")))),
            ])
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(object_body().to_string()),
            ),
        );

        let dir = tempfile::tempdir()?;
        client(&server, &dir)
            .object("test-bucket", "test-object")
            .make_private(false)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn make_public_inserts_acl_entry() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/storage/v1/b/test-bucket/o/test-object/acl"),
                request::body(json_decoded(eq(json!({
                    "entity": "allUsers",
                    "role": "READER"
                })))),
            ])
            .respond_with(
                status_code(200)
                    .append_header("content-type", "application/json")
                    .body(json!({"entity": "allUsers", "role": "READER"}).to_string()),
            ),
        );

        let dir = tempfile::tempdir()?;
        client(&server, &dir)
            .object("test-bucket", "test-object")
            .make_public()
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn download_to_path_writes_file() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/test-bucket/test-object"))
                .respond_with(status_code(200).body("file contents")),
        );

        let dir = tempfile::tempdir()?;
        let target = dir.path().join("downloaded.txt");
        client(&server, &dir)
            .object("test-bucket", "test-object")
            .download_to_path(&target)
            .await?;
        assert_eq!(std::fs::read_to_string(&target)?, "file contents");
        Ok(())
    }

    #[tokio::test]
    async fn download_to_path_removes_partial_file() -> TestResult {
        use crate::model::testing::{encode_crc32c, encode_md5};
        // The download fails its integrity check after bytes were written;
        // the partial local file must not survive.
        let server = Server::run();
        let hash = format!(
            "crc32c={},md5={}",
            encode_crc32c(crc32c::crc32c(b"expected")),
            encode_md5(b"expected")
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/test-bucket/test-object"))
                .respond_with(
                    status_code(200)
                        .body("tampered")
                        .append_header("x-goog-hash", hash),
                ),
        );

        let dir = tempfile::tempdir()?;
        let target = dir.path().join("downloaded.txt");
        let err = client(&server, &dir)
            .object("test-bucket", "test-object")
            .download_to_path(&target)
            .await
            .expect_err("the integrity failure must surface");
        assert_eq!(err.code(), Some("CONTENT_DOWNLOAD_MISMATCH"));
        assert!(!target.exists(), "partial downloads are removed");
        Ok(())
    }
}
