//! WebDAV and Nextcloud uploads.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use std::path::Path;
use std::sync::Arc;

use super::{TestFile, UploadState, Uploader, check, domain_of, http_logger, join_url};
use crate::config::{ConfigStore, Settings, WebDavSettings};
use crate::error::{AppError, Result};
use crate::http_logger::HttpLogger;
use crate::logger::UploadLogger;
use crate::path::segments;

pub const WEBDAV_NAME: &str = "WebDAV";
pub const NEXTCLOUD_NAME: &str = "Nextcloud";

/// Uploads over plain WebDAV. Nextcloud is the same protocol rooted at the
/// user's files collection.
pub struct WebDavUploader {
    name: &'static str,
    http: HttpLogger,
    store: ConfigStore,
    root: String,
    username: String,
    password: String,
    state: UploadState,
}

impl WebDavUploader {
    pub fn webdav(
        store: ConfigStore,
        logger: Arc<dyn UploadLogger>,
        settings: &Settings,
    ) -> Result<Self> {
        let cfg = &settings.methods.webdav;
        Self::build(WEBDAV_NAME, cfg.url.clone(), cfg, store, logger, settings)
    }

    pub fn nextcloud(
        store: ConfigStore,
        logger: Arc<dyn UploadLogger>,
        settings: &Settings,
    ) -> Result<Self> {
        let cfg = &settings.methods.nextcloud;
        if cfg.username.is_empty() {
            return Err(AppError::Config("Nextcloud username is not set".to_string()));
        }
        let root = join_url(
            &cfg.url,
            ["remote.php", "dav", "files", cfg.username.as_str()],
        )?;
        Self::build(NEXTCLOUD_NAME, root.to_string(), cfg, store, logger, settings)
    }

    fn build(
        name: &'static str,
        root: String,
        cfg: &WebDavSettings,
        store: ConfigStore,
        logger: Arc<dyn UploadLogger>,
        settings: &Settings,
    ) -> Result<Self> {
        if root.is_empty() {
            return Err(AppError::Config(format!("{name} URL is not set")));
        }
        Ok(Self {
            name,
            http: http_logger(settings)?,
            store,
            state: UploadState::new(name, domain_of(&root), logger),
            root,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
        })
    }

    fn request(&self, method: Method, url: reqwest::Url) -> RequestBuilder {
        let req = self.http.client().request(method, url);
        if self.username.is_empty() {
            req
        } else {
            req.basic_auth(&self.username, Some(&self.password))
        }
    }

    /// Create every collection along `folders`. Existing ones answer 405.
    async fn make_collections(&self, folders: &[&str]) -> Result<()> {
        let mkcol = Method::from_bytes(b"MKCOL")
            .map_err(|e| AppError::Internal(format!("MKCOL method: {e}")))?;
        for depth in 1..=folders.len() {
            let url = join_url(&self.root, folders[..depth].iter().copied())?;
            let response = self.http.send(self.request(mkcol.clone(), url)).await?;
            if response.status() == StatusCode::METHOD_NOT_ALLOWED {
                continue;
            }
            check(response).await?;
        }
        Ok(())
    }

    async fn try_test(&self, file: &Path) -> Result<()> {
        let file = TestFile::read(file).await?;
        let remote_dir = self.store.snapshot().remote_directory;
        let folders = segments(&remote_dir);
        self.make_collections(&folders).await?;

        let url = join_url(
            &self.root,
            folders.iter().copied().chain([file.name.as_str()]),
        )?;
        let request = self.request(Method::PUT, url.clone()).body(file.data);
        check(self.http.send(request).await?).await?;

        check(self.http.send(self.request(Method::DELETE, url)).await?).await?;
        Ok(())
    }
}

#[async_trait]
impl Uploader for WebDavUploader {
    fn name(&self) -> &'static str {
        self.name
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

    #[test]
    fn test_nextcloud_root() {
        let mut settings = Settings::default();
        settings.methods.nextcloud.enabled = true;
        settings.methods.nextcloud.url = "https://cloud.example.com/".to_string();
        settings.methods.nextcloud.username = "jo doe".to_string();
        let store = ConfigStore::from_settings(settings.clone());

        let u = WebDavUploader::nextcloud(store, Arc::new(MemoryLogger::new()), &settings).unwrap();
        assert_eq!(u.name(), "Nextcloud");
        assert_eq!(
            u.root,
            "https://cloud.example.com/remote.php/dav/files/jo%20doe"
        );
    }

    #[test]
    fn test_missing_url_is_rejected() {
        let settings = Settings::default();
        let store = ConfigStore::from_settings(settings.clone());
        let result = WebDavUploader::webdav(store, Arc::new(MemoryLogger::new()), &settings);
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
