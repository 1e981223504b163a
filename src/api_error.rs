//! Decoding of provider JSON error envelopes.
//!
//! Providers in the Microsoft Graph family answer failed calls with
//! `{"error": {"code", "message", "innererror": {...}, "details": [{"error": {...}}]}}`.
//! Missing or oddly typed fields decode to empty values; only a body that is
//! not JSON at all is rejected.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::AppError;

/// Status code assigned to errors decoded from a `details` entry.
pub const DETAIL_STATUS_CODE: i32 = -1;

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: for<'a> Deserialize<'a> + Default,
{
    let v = Value::deserialize(deserializer)?;
    Ok(T::deserialize(v).unwrap_or_default())
}

fn lenient_details<'de, D>(deserializer: D) -> Result<Vec<DetailEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::Array(items) => items
            .into_iter()
            .map(|item| DetailEntry::deserialize(item).unwrap_or_default())
            .collect(),
        _ => Vec::new(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default, deserialize_with = "lenient")]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default, deserialize_with = "lenient")]
    code: String,
    #[serde(default, deserialize_with = "lenient")]
    message: String,
    #[serde(default, alias = "innerError", deserialize_with = "lenient")]
    innererror: Option<Box<InnerError>>,
    #[serde(default, deserialize_with = "lenient_details")]
    details: Vec<DetailEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct InnerError {
    #[serde(default, deserialize_with = "lenient")]
    code: String,
    #[serde(default, alias = "innerError", deserialize_with = "lenient")]
    innererror: Option<Box<InnerError>>,
}

#[derive(Debug, Default, Deserialize)]
struct DetailEntry {
    #[serde(default, deserialize_with = "lenient")]
    error: ErrorBody,
}

/// A decoded provider error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("API error {error_code}: {error_message} (status={status_code}, inner={inner_error_codes:?}, details={})", .details.len())]
pub struct ApiError {
    /// HTTP status of the failed call, [`DETAIL_STATUS_CODE`] for detail entries.
    pub status_code: i32,
    pub error_code: String,
    pub error_message: String,
    /// Codes of the `innererror` chain, outermost first.
    pub inner_error_codes: Vec<String>,
    pub details: Vec<ApiError>,
}

impl ApiError {
    /// Decode `body` received with `status_code`.
    pub fn parse(status_code: i32, body: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(body)?;
        let envelope = Envelope::deserialize(value).unwrap_or_default();
        Ok(Self::from_body(status_code, envelope.error))
    }

    fn from_body(status_code: i32, body: ErrorBody) -> Self {
        let mut inner_error_codes = Vec::new();
        let mut next = body.innererror;
        while let Some(inner) = next {
            inner_error_codes.push(inner.code);
            next = inner.innererror;
        }

        let details = body
            .details
            .into_iter()
            .map(|d| Self::from_body(DETAIL_STATUS_CODE, d.error))
            .collect();

        Self {
            status_code,
            error_code: body.code,
            error_message: body.message,
            inner_error_codes,
            details,
        }
    }
}

/// Turn a failed response into an [`AppError`], keeping the raw body when it
/// cannot be interpreted as an error envelope.
pub fn decode_failure(status: u16, body: &str) -> AppError {
    match ApiError::parse(i32::from(status), body) {
        Ok(e) => AppError::Api(e),
        Err(e) => {
            tracing::debug!("Could not interpret provider error ({}), keeping raw body", e);
            AppError::Remote {
                status,
                body: body.to_string(),
            }
        }
    }
}
