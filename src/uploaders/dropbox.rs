//! Dropbox uploads through the v2 HTTP API.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use super::{TestFile, UploadState, Uploader, check, domain_of, http_logger};
use crate::config::{ConfigStore, Settings};
use crate::error::{AppError, Result};
use crate::http_logger::HttpLogger;
use crate::logger::UploadLogger;
use crate::path::segments;

pub const UPLOADER_NAME: &str = "Dropbox";
const DEFAULT_API_BASE: &str = "https://api.dropboxapi.com/2";
const DEFAULT_UPLOAD_BASE: &str = "https://content.dropboxapi.com/2";

pub struct DropboxUploader {
    http: HttpLogger,
    store: ConfigStore,
    api_base: String,
    upload_base: String,
    access_token: String,
    state: UploadState,
}

/// Dropbox path of `name` inside `remote_dir`; the root is `/`.
fn dropbox_path(remote_dir: &str, name: &str) -> String {
    let mut parts = segments(remote_dir);
    parts.push(name);
    format!("/{}", parts.join("/"))
}

/// HTTP headers must be ASCII, so `Dropbox-API-Arg` escapes everything else.
fn header_safe_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    for c in value.to_string().chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

impl DropboxUploader {
    pub fn new(
        store: ConfigStore,
        logger: Arc<dyn UploadLogger>,
        settings: &Settings,
    ) -> Result<Self> {
        let cfg = &settings.methods.dropbox;
        if cfg.access_token.is_empty() {
            return Err(AppError::Auth(
                "Dropbox is not linked, no access token configured".to_string(),
            ));
        }
        let api_base = cfg
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();
        let upload_base = cfg
            .upload_base
            .as_deref()
            .unwrap_or(DEFAULT_UPLOAD_BASE)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http: http_logger(settings)?,
            store,
            state: UploadState::new(UPLOADER_NAME, domain_of(&upload_base), logger),
            access_token: cfg.access_token.clone(),
            api_base,
            upload_base,
        })
    }

    async fn try_test(&self, file: &Path) -> Result<()> {
        let file = TestFile::read(file).await?;
        let remote_dir = self.store.snapshot().remote_directory;
        let path = dropbox_path(&remote_dir, &file.name);

        let arg = json!({
            "path": path,
            "mode": "overwrite",
            "autorename": false,
            "mute": true,
        });
        let request = self
            .http
            .client()
            .post(format!("{}/files/upload", self.upload_base))
            .bearer_auth(&self.access_token)
            .header("Dropbox-API-Arg", header_safe_json(&arg))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(file.data);
        check(self.http.send(request).await?).await?;

        let request = self
            .http
            .client()
            .post(format!("{}/files/delete_v2", self.api_base))
            .bearer_auth(&self.access_token)
            .json(&json!({ "path": path }));
        check(self.http.send(request).await?).await?;
        Ok(())
    }
}

#[async_trait]
impl Uploader for DropboxUploader {
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

    #[test]
    fn test_dropbox_path() {
        assert_eq!(dropbox_path("", "f.txt"), "/f.txt");
        assert_eq!(dropbox_path("/", "f.txt"), "/f.txt");
        assert_eq!(dropbox_path("./T/sub/", "f.txt"), "/T/sub/f.txt");
        assert_eq!(dropbox_path("alt//T", "f.txt"), "/alt/T/f.txt");
    }

    #[test]
    fn test_header_safe_json() {
        let v = json!({"path": "/bäckup/😀"});
        assert_eq!(
            header_safe_json(&v),
            r#"{"path":"/b\u00e4ckup/\ud83d\ude00"}"#
        );
    }
}
