//! Upload backends and the selection of one by method name.

mod dropbox;
mod ftp;
mod googledrive;
mod onedrive;
mod s3;
mod webdav;

pub use dropbox::DropboxUploader;
pub use ftp::FtpUploader;
pub use googledrive::GoogleDriveUploader;
pub use onedrive::OneDriveUploader;
pub use s3::S3Uploader;
pub use webdav::WebDavUploader;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::api_error::decode_failure;
use crate::config::{ConfigStore, Settings};
use crate::error::{AppError, Result};
use crate::http_logger::HttpLogger;
use crate::logger::UploadLogger;
use crate::net;

const HTTP_TIMEOUT_SECS: u64 = 60;
const USER_AGENT: &str = concat!("drivebackup/", env!("CARGO_PKG_VERSION"));

/// A connection to one remote storage backend.
///
/// Failures never escape `test`: they are logged and recorded in the flag
/// returned by [`Uploader::is_error_while_uploading`].
#[async_trait]
pub trait Uploader: Send {
    /// Human-readable backend name.
    fn name(&self) -> &'static str;

    /// Upload `file` into the configured remote save directory, then remove
    /// the remote copy again.
    async fn test(&mut self, file: &Path);

    /// Whether the most recent `test` failed.
    fn is_error_while_uploading(&self) -> bool;

    /// Release held connections. Safe to call more than once.
    async fn close(&mut self);
}

/// Backup method identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMethod {
    GoogleDrive,
    OneDrive,
    Dropbox,
    WebDav,
    Nextcloud,
    S3,
    Ftp,
}

impl std::str::FromStr for UploadMethod {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "googledrive" => Ok(Self::GoogleDrive),
            "onedrive" => Ok(Self::OneDrive),
            "dropbox" => Ok(Self::Dropbox),
            "webdav" => Ok(Self::WebDav),
            "nextcloud" => Ok(Self::Nextcloud),
            "s3" => Ok(Self::S3),
            "ftp" => Ok(Self::Ftp),
            _ => Err(()),
        }
    }
}

impl UploadMethod {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::GoogleDrive => googledrive::UPLOADER_NAME,
            Self::OneDrive => onedrive::UPLOADER_NAME,
            Self::Dropbox => dropbox::UPLOADER_NAME,
            Self::WebDav => webdav::WEBDAV_NAME,
            Self::Nextcloud => webdav::NEXTCLOUD_NAME,
            Self::S3 => s3::UPLOADER_NAME,
            Self::Ftp => ftp::UPLOADER_NAME,
        }
    }

    pub fn is_enabled(&self, settings: &Settings) -> bool {
        let methods = &settings.methods;
        match self {
            Self::GoogleDrive => methods.googledrive.enabled,
            Self::OneDrive => methods.onedrive.enabled,
            Self::Dropbox => methods.dropbox.enabled,
            Self::WebDav => methods.webdav.enabled,
            Self::Nextcloud => methods.nextcloud.enabled,
            Self::S3 => methods.s3.enabled,
            Self::Ftp => methods.ftp.enabled,
        }
    }
}

/// Build the uploader for `method` when that backend is enabled.
///
/// Unknown and disabled methods are reported to `logger` and yield `None`.
pub fn get_uploader(
    method: &str,
    store: &ConfigStore,
    logger: Arc<dyn UploadLogger>,
) -> Option<Box<dyn Uploader>> {
    let Ok(kind) = method.parse::<UploadMethod>() else {
        logger.initiator_error(&format!("{method} is not a valid backup method"));
        return None;
    };

    let settings = store.snapshot();
    if !kind.is_enabled(&settings) {
        logger.log(&format!(
            "{} backups are not enabled",
            kind.display_name()
        ));
        return None;
    }

    let built: Result<Box<dyn Uploader>> = match kind {
        UploadMethod::GoogleDrive => {
            GoogleDriveUploader::new(store.clone(), logger.clone(), &settings).map(box_uploader)
        }
        UploadMethod::OneDrive => {
            OneDriveUploader::new(store.clone(), logger.clone(), &settings).map(box_uploader)
        }
        UploadMethod::Dropbox => {
            DropboxUploader::new(store.clone(), logger.clone(), &settings).map(box_uploader)
        }
        UploadMethod::WebDav => {
            WebDavUploader::webdav(store.clone(), logger.clone(), &settings).map(box_uploader)
        }
        UploadMethod::Nextcloud => {
            WebDavUploader::nextcloud(store.clone(), logger.clone(), &settings).map(box_uploader)
        }
        UploadMethod::S3 => S3Uploader::new(store.clone(), logger.clone(), &settings).map(box_uploader),
        UploadMethod::Ftp => Ok(box_uploader(FtpUploader::new(
            store.clone(),
            logger.clone(),
            &settings,
        ))),
    };

    match built {
        Ok(uploader) => Some(uploader),
        Err(e) => {
            e.report(kind.display_name());
            logger.log(&format!(
                "{} could not be set up: {}",
                kind.display_name(),
                e
            ));
            None
        }
    }
}

fn box_uploader<U: Uploader + 'static>(uploader: U) -> Box<dyn Uploader> {
    Box::new(uploader)
}

/// Error flag plus the reporting every backend shares.
pub(crate) struct UploadState {
    name: &'static str,
    domain: String,
    logger: Arc<dyn UploadLogger>,
    error_while_uploading: bool,
}

impl UploadState {
    pub(crate) fn new(name: &'static str, domain: String, logger: Arc<dyn UploadLogger>) -> Self {
        Self {
            name,
            domain,
            logger,
            error_while_uploading: false,
        }
    }

    pub(crate) fn begin(&mut self) {
        self.error_while_uploading = false;
    }

    pub(crate) fn finish(&mut self, result: Result<()>) {
        match result {
            Ok(()) => tracing::debug!("{} test upload succeeded", self.name),
            Err(e) => {
                self.error_while_uploading = true;
                e.report(self.name);
                net::catch_error(&e, &self.domain, self.logger.as_ref());
            }
        }
    }

    pub(crate) fn error_while_uploading(&self) -> bool {
        self.error_while_uploading
    }
}

/// Contents and remote name of the file under test.
pub(crate) struct TestFile {
    pub name: String,
    pub data: Bytes,
}

impl TestFile {
    pub(crate) async fn read(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::Internal(format!("No file name in {}", path.display())))?;
        let data = Bytes::from(tokio::fs::read(path).await?);
        Ok(Self { name, data })
    }
}

pub(crate) fn http_logger(settings: &Settings) -> Result<HttpLogger> {
    let client = Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()?;
    Ok(HttpLogger::new(client, settings.advanced.debug))
}

/// Pass successful responses through; decode failures into an [`AppError`].
pub(crate) async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(decode_failure(status.as_u16(), &body))
}

/// Host name of `url`, used when reporting connection problems.
pub(crate) fn domain_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

/// Append percent-encoded path segments to `base`.
pub(crate) fn join_url<'a>(
    base: &str,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| AppError::Config(format!("Invalid URL '{}': {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| AppError::Config(format!("URL cannot have a path: {}", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
