//! OneDrive uploads through Microsoft Graph.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use super::{TestFile, UploadState, Uploader, check, domain_of, http_logger, join_url};
use crate::config::{ConfigStore, Settings};
use crate::error::{AppError, Result};
use crate::http_logger::HttpLogger;
use crate::logger::UploadLogger;
use crate::path::segments;

pub const UPLOADER_NAME: &str = "OneDrive";
const DEFAULT_API_BASE: &str = "https://graph.microsoft.com/v1.0";

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: String,
}

pub struct OneDriveUploader {
    http: HttpLogger,
    store: ConfigStore,
    api_base: String,
    access_token: String,
    state: UploadState,
}

impl OneDriveUploader {
    pub fn new(
        store: ConfigStore,
        logger: Arc<dyn UploadLogger>,
        settings: &Settings,
    ) -> Result<Self> {
        let cfg = &settings.methods.onedrive;
        if cfg.access_token.is_empty() {
            return Err(AppError::Auth(
                "OneDrive is not linked, no access token configured".to_string(),
            ));
        }
        let api_base = cfg
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http: http_logger(settings)?,
            store,
            state: UploadState::new(UPLOADER_NAME, domain_of(&api_base), logger),
            access_token: cfg.access_token.clone(),
            api_base,
        })
    }

    /// `.../me/drive/root:/<folder>/<name>:/content`
    fn content_url(&self, remote_dir: &str, name: &str) -> Result<reqwest::Url> {
        let item = format!("{name}:");
        let path = ["me", "drive", "root:"]
            .into_iter()
            .chain(segments(remote_dir))
            .chain([item.as_str(), "content"]);
        join_url(&self.api_base, path)
    }

    async fn try_test(&self, file: &Path) -> Result<()> {
        let file = TestFile::read(file).await?;
        let remote_dir = self.store.snapshot().remote_directory;

        let url = self.content_url(&remote_dir, &file.name)?;
        tracing::debug!("Uploading {} to OneDrive ({} bytes)", url, file.data.len());
        let request = self
            .http
            .client()
            .put(url)
            .bearer_auth(&self.access_token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(file.data);
        let item: DriveItem = check(self.http.send(request).await?).await?.json().await?;

        let url = join_url(&self.api_base, ["me", "drive", "items", item.id.as_str()])?;
        let request = self.http.client().delete(url).bearer_auth(&self.access_token);
        check(self.http.send(request).await?).await?;
        Ok(())
    }
}

#[async_trait]
impl Uploader for OneDriveUploader {
    fn name(&self) -> &'static str {
        UPLOADER_NAME
    }

    async fn test(&mut self, file: &Path) {
        self.state.begin();
        let result = self.try_test(file).await;
        self.state.finish(result);
    }

    fn is_error_while_uploading(&self) -> bool {
        self.state.error_while_uploading()
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLogger;

    fn uploader() -> OneDriveUploader {
        let mut settings = Settings::default();
        settings.methods.onedrive.enabled = true;
        settings.methods.onedrive.access_token = "token".to_string();
        let store = ConfigStore::from_settings(settings.clone());
        OneDriveUploader::new(store, Arc::new(MemoryLogger::new()), &settings).unwrap()
    }

    #[test]
    fn test_content_url_normalises_folder() {
        let u = uploader();
        for dir in ["", "/", "./"] {
            assert_eq!(
                u.content_url(dir, "f.txt").unwrap().as_str(),
                "https://graph.microsoft.com/v1.0/me/drive/root:/f.txt:/content"
            );
        }
        assert_eq!(
            u.content_url("./T/sub/", "f.txt").unwrap().as_str(),
            "https://graph.microsoft.com/v1.0/me/drive/root:/T/sub/f.txt:/content"
        );
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let settings = Settings::default();
        let store = ConfigStore::from_settings(settings.clone());
        let result = OneDriveUploader::new(store, Arc::new(MemoryLogger::new()), &settings);
        assert!(matches!(result, Err(AppError::Auth(_))));
    }
}
