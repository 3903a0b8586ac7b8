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

//! Persists resumable upload sessions across process restarts.
//!
//! Records live in a single JSON file under the user's configuration
//! directory, keyed by object name. Writes go through a temporary file and a
//! rename, so a crashed process never leaves a torn file behind.

use crate::{Error, Result};
use serde_with::base64::Base64;
use serde_with::serde_as;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = ".config/gcs-client";
const STORE_FILE: &str = "resumable-sessions.json";

/// A persisted resumable session.
#[serde_as]
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionRecord {
    /// The session URL assigned by the service.
    pub uri: String,

    /// The first bytes of the payload, recorded once the session has
    /// accepted data. Absent means the session has accepted no data yet.
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_chunk: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub(crate) struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Opens the default per-user store.
    pub fn new() -> Result<Self> {
        let home = home::home_dir()
            .ok_or_else(|| Error::invalid_input("cannot determine the home directory"))?;
        Ok(Self::with_path(home.join(CONFIG_DIR).join(STORE_FILE)))
    }

    /// Opens a store backed by a specific file.
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub async fn get(&self, key: &str) -> Result<Option<SessionRecord>> {
        let mut records = self.load().await?;
        Ok(records.remove(key))
    }

    pub async fn put(&self, key: &str, record: SessionRecord) -> Result<()> {
        let mut records = self.load().await?;
        records.insert(key.to_string(), record);
        self.save(&records).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let mut records = self.load().await?;
        if records.remove(key).is_some() {
            self.save(&records).await?;
        }
        Ok(())
    }

    async fn load(&self) -> Result<BTreeMap<String, SessionRecord>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(Error::io(e)),
        };
        serde_json::from_slice(&contents).map_err(Error::deser)
    }

    async fn save(&self, records: &BTreeMap<String, SessionRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::io)?;
        }
        let contents = serde_json::to_vec_pretty(records).map_err(Error::ser)?;
        let tmp = temp_sibling(&self.path);
        tokio::fs::write(&tmp, &contents).await.map_err(Error::io)?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::io(e));
        }
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| STORE_FILE.to_string());
    path.with_file_name(format!(".{name}.tmp.{}", std::process::id()))
}
