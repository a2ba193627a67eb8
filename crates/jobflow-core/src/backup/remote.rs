//! Remote object storage for off-site backup copies.
//!
//! Minimal HTTP object contract: `PUT`/`GET`/`DELETE` on
//! `{base}/{family}/{name}` with an optional bearer token. Upload failures
//! are reported to the caller, which treats them as non-fatal.

use crate::config::BackupConfig;
use crate::error::{CoreError, Result};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub struct RemoteStore {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl RemoteStore {
    /// Remote store from config; `None` when no base URL is set.
    pub fn from_config(config: &BackupConfig) -> Option<Self> {
        let base_url = config.remote_base_url.clone()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: config.remote_token.clone(),
            client,
        })
    }

    fn url(&self, family: &str, name: &str) -> String {
        format!("{}/{}/{}", self.base_url, family, name)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    pub async fn put_file(&self, family: &str, name: &str, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        let res = self
            .authorize(self.client.put(self.url(family, name)))
            .body(bytes)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(CoreError::Backup(format!("remote upload {}: {}", name, res.status())));
        }
        debug!(target: "jobflow::backup", family, name, "uploaded to remote store");
        Ok(())
    }

    pub async fn get(&self, family: &str, name: &str) -> Result<Vec<u8>> {
        let res = self.authorize(self.client.get(self.url(family, name))).send().await?;
        if !res.status().is_success() {
            return Err(CoreError::Backup(format!("remote download {}: {}", name, res.status())));
        }
        Ok(res.bytes().await?.to_vec())
    }

    pub async fn delete(&self, family: &str, name: &str) -> Result<()> {
        let res = self.authorize(self.client.delete(self.url(family, name))).send().await?;
        if !res.status().is_success() && res.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::Backup(format!("remote delete {}: {}", name, res.status())));
        }
        Ok(())
    }
}
