//! Error types for the drivebackup application.

use crate::api_error::ApiError;

/// Application-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Provider error decoded from a JSON error envelope
    #[error("{0}")]
    Api(ApiError),

    /// Non-success response whose body could not be interpreted
    #[error("Remote request failed: status={status}, body={body}")]
    Remote { status: u16, body: String },

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// FTP protocol error (unexpected reply)
    #[error("FTP error: {0}")]
    Ftp(String),

    /// Could not open a connection to the server, including host lookup
    #[error("Connection failed: {0}")]
    Connect(#[source] std::io::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        AppError::Api(e)
    }
}

impl AppError {
    /// Report the error at the uploader boundary, where it is turned into the
    /// error-while-uploading flag.
    pub fn report(&self, uploader: &str) {
        match self {
            AppError::Api(e) => {
                tracing::error!(
                    "{} API error: status={}, code={}, message={}, inner={:?}",
                    uploader,
                    e.status_code,
                    e.error_code,
                    e.error_message,
                    e.inner_error_codes
                );
                for detail in &e.details {
                    tracing::error!(
                        "{} API error detail: code={}, message={}",
                        uploader,
                        detail.error_code,
                        detail.error_message
                    );
                }
            }
            AppError::Remote { status, body } => {
                tracing::error!("{} remote error: status={}, body={}", uploader, status, body);
            }
            AppError::HttpClient(e) => {
                tracing::error!("{} HTTP client error: {}", uploader, e);
            }
            AppError::Auth(msg) => {
                tracing::error!("{} auth error: {}", uploader, msg);
            }
            AppError::Config(msg) => {
                tracing::error!("{} configuration error: {}", uploader, msg);
            }
            AppError::Ftp(msg) => {
                tracing::error!("{} FTP error: {}", uploader, msg);
            }
            AppError::Connect(e) => {
                tracing::error!("{} connection error: {}", uploader, e);
            }
            AppError::Io(e) => {
                tracing::error!("{} IO error: {}", uploader, e);
            }
            AppError::Internal(msg) => {
                tracing::error!("{} internal error: {}", uploader, msg);
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
