//! Google Drive uploads through the Drive v3 REST API.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use super::{TestFile, UploadState, Uploader, check, domain_of, http_logger};
use crate::config::{ConfigStore, Settings};
use crate::error::{AppError, Result};
use crate::http_logger::HttpLogger;
use crate::logger::UploadLogger;
use crate::path::segments;

pub const UPLOADER_NAME: &str = "Google Drive";
const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const ROOT_FOLDER_ID: &str = "root";
const MULTIPART_BOUNDARY: &str = "drivebackup-multipart-boundary";

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Quote a value for use inside a Drive search query.
fn query_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn folder_query(name: &str, parent_id: &str) -> String {
    format!(
        "name = {} and {} in parents and mimeType = '{}' and trashed = false",
        query_literal(name),
        query_literal(parent_id),
        FOLDER_MIME_TYPE
    )
}

/// `multipart/related` body carrying the metadata followed by the content.
fn multipart_body(metadata: &serde_json::Value, data: &[u8]) -> Bytes {
    let mut body = BytesMut::with_capacity(data.len() + 512);
    body.put_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.put_slice(metadata.to_string().as_bytes());
    body.put_slice(format!("\r\n--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.put_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.put_slice(data);
    body.put_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body.freeze()
}

pub struct GoogleDriveUploader {
    http: HttpLogger,
    store: ConfigStore,
    api_base: String,
    upload_base: String,
    access_token: String,
    state: UploadState,
}

impl GoogleDriveUploader {
    pub fn new(
        store: ConfigStore,
        logger: Arc<dyn UploadLogger>,
        settings: &Settings,
    ) -> Result<Self> {
        let cfg = &settings.methods.googledrive;
        if cfg.access_token.is_empty() {
            return Err(AppError::Auth(
                "Google Drive is not linked, no access token configured".to_string(),
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
            state: UploadState::new(UPLOADER_NAME, domain_of(&api_base), logger),
            access_token: cfg.access_token.clone(),
            api_base,
            upload_base,
        })
    }

    async fn find_folder(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
        let request = self
            .http
            .client()
            .get(format!("{}/files", self.api_base))
            .bearer_auth(&self.access_token)
            .query(&[
                ("q", folder_query(name, parent_id)),
                ("fields", "files(id)".to_string()),
                ("spaces", "drive".to_string()),
            ]);
        let list: FileList = check(self.http.send(request).await?).await?.json().await?;
        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        let request = self
            .http
            .client()
            .post(format!("{}/files", self.api_base))
            .bearer_auth(&self.access_token)
            .query(&[("fields", "id")])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent_id],
            }));
        let folder: DriveFile = check(self.http.send(request).await?).await?.json().await?;
        tracing::debug!("Created Google Drive folder {} (id={})", name, folder.id);
        Ok(folder.id)
    }

    /// Walk `remote_dir` from the root, creating missing folders.
    async fn ensure_folder(&self, remote_dir: &str) -> Result<String> {
        let mut parent_id = ROOT_FOLDER_ID.to_string();
        for name in segments(remote_dir) {
            parent_id = match self.find_folder(name, &parent_id).await? {
                Some(id) => id,
                None => self.create_folder(name, &parent_id).await?,
            };
        }
        Ok(parent_id)
    }

    async fn try_test(&self, file: &Path) -> Result<()> {
        let file = TestFile::read(file).await?;
        let remote_dir = self.store.snapshot().remote_directory;
        let folder_id = self.ensure_folder(&remote_dir).await?;

        let metadata = json!({ "name": file.name, "parents": [folder_id] });
        let request = self
            .http
            .client()
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(&self.access_token)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(multipart_body(&metadata, &file.data));
        let uploaded: DriveFile = check(self.http.send(request).await?).await?.json().await?;

        let request = self
            .http
            .client()
            .delete(format!("{}/files/{}", self.api_base, uploaded.id))
            .bearer_auth(&self.access_token);
        check(self.http.send(request).await?).await?;
        Ok(())
    }
}

#[async_trait]
impl Uploader for GoogleDriveUploader {
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
