//! S3-compatible object storage uploads, signed with AWS Signature Version 4.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

use super::{TestFile, UploadState, Uploader, check, domain_of, http_logger};
use crate::config::{ConfigStore, S3Settings, Settings};
use crate::error::{AppError, Result};
use crate::http_logger::HttpLogger;
use crate::logger::UploadLogger;
use crate::path::segments;

type HmacSha256 = Hmac<Sha256>;

pub const UPLOADER_NAME: &str = "S3";
const SERVICE: &str = "s3";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AppError::Internal(format!("HMAC init failed: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the per-day signing key.
fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date)?;
    let k_region = hmac_sha256(&k_date, region)?;
    let k_service = hmac_sha256(&k_region, service)?;
    hmac_sha256(&k_service, "aws4_request")
}

/// Percent-encode everything but RFC 3986 unreserved characters.
fn uri_encode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(char::from(b))
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Object key for `name` inside `remote_dir`.
fn object_key(remote_dir: &str, name: &str) -> String {
    let mut parts = segments(remote_dir);
    parts.push(name);
    parts.join("/")
}

/// Headers to attach to a signed request.
struct SignedHeaders {
    amz_date: String,
    content_sha256: String,
    authorization: String,
}

pub struct S3Uploader {
    http: HttpLogger,
    store: ConfigStore,
    settings: S3Settings,
    endpoint: reqwest::Url,
    state: UploadState,
}

impl S3Uploader {
    pub fn new(
        store: ConfigStore,
        logger: Arc<dyn UploadLogger>,
        settings: &Settings,
    ) -> Result<Self> {
        let cfg = settings.methods.s3.clone();
        if cfg.bucket.is_empty() {
            return Err(AppError::Config("S3 bucket is not set".to_string()));
        }
        if cfg.access_key.is_empty() || cfg.secret_key.is_empty() {
            return Err(AppError::Auth("S3 credentials are not set".to_string()));
        }
        let endpoint = reqwest::Url::parse(cfg.endpoint.trim_end_matches('/')).map_err(|e| {
            AppError::Config(format!("Invalid S3 endpoint '{}': {}", cfg.endpoint, e))
        })?;

        Ok(Self {
            http: http_logger(settings)?,
            store,
            state: UploadState::new(UPLOADER_NAME, domain_of(endpoint.as_str()), logger),
            endpoint,
            settings: cfg,
        })
    }

    /// Path-style object path: `/<bucket>/<key>`, each segment encoded once.
    fn canonical_uri(&self, key: &str) -> String {
        let mut uri = String::new();
        let base = self.endpoint.path().trim_end_matches('/');
        uri.push_str(base);
        uri.push('/');
        uri.push_str(&uri_encode(&self.settings.bucket));
        for part in key.split('/') {
            uri.push('/');
            uri.push_str(&uri_encode(part));
        }
        uri
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    fn sign(
        &self,
        method: &Method,
        canonical_uri: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SignedHeaders> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let content_sha256 = sha256_hex(payload);

        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
            self.host(),
            content_sha256,
            amz_date
        );
        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_headers,
            SIGNED_HEADERS,
            content_sha256
        );

        let scope = format!("{}/{}/{}/aws4_request", date, self.settings.region, SERVICE);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let key = signing_key(&self.settings.secret_key, &date, &self.settings.region, SERVICE)?;
        let signature = hex::encode(hmac_sha256(&key, &string_to_sign)?);
        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.settings.access_key, scope, SIGNED_HEADERS, signature
        );

        Ok(SignedHeaders {
            amz_date,
            content_sha256,
            authorization,
        })
    }

    async fn send_signed(&self, method: Method, key: &str, body: Bytes) -> Result<()> {
        let canonical_uri = self.canonical_uri(key);
        let signed = self.sign(&method, &canonical_uri, &body, Utc::now())?;
        let url = format!(
            "{}://{}{}",
            self.endpoint.scheme(),
            self.host(),
            canonical_uri
        );

        let request = self
            .http
            .client()
            .request(method, url)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("Authorization", signed.authorization)
            .body(body);
        check(self.http.send(request).await?).await?;
        Ok(())
    }

    async fn try_test(&self, file: &Path) -> Result<()> {
        let file = TestFile::read(file).await?;
        let remote_dir = self.store.snapshot().remote_directory;
        let key = object_key(&remote_dir, &file.name);

        self.send_signed(Method::PUT, &key, file.data).await?;
        self.send_signed(Method::DELETE, &key, Bytes::new()).await?;
        Ok(())
    }
}

#[async_trait]
impl Uploader for S3Uploader {
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
