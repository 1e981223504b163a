//! Request/response trace logging for backend HTTP calls.
//!
//! With debug logging off, requests go straight to the client. With it on,
//! the URL, timing and both bodies are logged, and the response is handed
//! back with its body re-attached so the caller can still read it once.

use bytes::{Bytes, BytesMut};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Request, RequestBuilder, Response, ResponseBuilderExt};
use serde_json::Value;
use std::time::Instant;

const TARGET: &str = "drivebackup::http";

/// Response body returned while waiting for an OAuth device code to be authorised.
const NOT_AUTHENTICATED_MSG: &str = "code_not_authenticated";

/// Wraps a [`Client`] and traces every exchange when debug logging is enabled.
#[derive(Debug, Clone)]
pub struct HttpLogger {
    client: Client,
    debug: bool,
}

impl HttpLogger {
    pub fn new(client: Client, debug: bool) -> Self {
        Self { client, debug }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Build and send `builder`.
    pub async fn send(&self, builder: RequestBuilder) -> reqwest::Result<Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    pub async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        if !self.debug {
            return self.client.execute(request).await;
        }

        // The request is moved into the client, so describe its body up front.
        let request_line = describe_request(&request);

        let start = Instant::now();
        tracing::info!(target: TARGET, "Sending request {}", request.url());
        let response = self.client.execute(request).await?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        tracing::info!(
            target: TARGET,
            "Received response for {} in {:.1}ms",
            response.url(),
            elapsed_ms
        );

        tracing::info!(target: TARGET, "{}", request_line);
        Ok(log_response(response).await)
    }
}

/// Read the response body once, log it and rebuild an equivalent response.
async fn log_response(mut response: Response) -> Response {
    let status = response.status();
    let version = response.version();
    let url = response.url().clone();
    let headers = response.headers().clone();

    let mut buf = BytesMut::new();
    let read_error = loop {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) => break None,
            Err(e) => break Some(e),
        }
    };
    let bytes = buf.freeze();

    let body = match read_error {
        None => {
            tracing::info!(
                target: TARGET,
                "{}",
                describe_response_body(content_type(&headers), &bytes)
            );
            reqwest::Body::from(bytes)
        }
        Some(e) => {
            tracing::info!(target: TARGET, "Resp: Error reading response body: {}", e);
            // Hand the caller what was received, followed by the same failure.
            let replay = futures_util::stream::iter(vec![Ok::<Bytes, reqwest::Error>(bytes), Err(e)]);
            reqwest::Body::wrap_stream(replay)
        }
    };

    let mut rebuilt = http::Response::new(body);
    *rebuilt.status_mut() = status;
    *rebuilt.version_mut() = version;
    *rebuilt.headers_mut() = headers;
    if let Ok(marker) = http::Response::builder().url(url).body(()) {
        let (parts, ()) = marker.into_parts();
        rebuilt.extensions_mut().extend(parts.extensions);
    }
    Response::from(rebuilt)
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

/// Media type without parameters, lowercased.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
    })
}

pub fn is_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| {
        let essence = essence(ct);
        essence == "application/json" || essence.ends_with("+json")
    })
}

fn is_text(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| {
        let essence = essence(ct);
        essence.starts_with("text/")
            || essence.ends_with("/xml")
            || essence.ends_with("+xml")
            || essence == "application/x-www-form-urlencoded"
    })
}

/// Decode a body for logging. Bodies without a declared charset are UTF-8.
pub fn decode_text(bytes: &[u8], content_type: Option<&str>) -> String {
    match content_type.and_then(charset).as_deref() {
        Some("iso-8859-1") | Some("latin1") | Some("us-ascii") => {
            bytes.iter().map(|&b| char::from(b)).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Log line for a response body.
pub fn describe_response_body(content_type: Option<&str>, bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "Resp: No Body".to_string();
    }
    let text = decode_text(bytes, content_type);

    if is_json(content_type) {
        return match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map))
                if map.get("msg").and_then(Value::as_str) != Some(NOT_AUTHENTICATED_MSG) =>
            {
                let pretty = serde_json::to_string_pretty(&map).unwrap_or_else(|_| text.clone());
                format!("Resp: {}", pretty)
            }
            _ => format!("Resp: {}", text),
        };
    }

    if content_type.is_none() || is_text(content_type) {
        format!("Resp: {}", text)
    } else {
        format!(
            "Resp: {} bytes of {}",
            bytes.len(),
            content_type.unwrap_or_default()
        )
    }
}

/// Log line for an outgoing request body. Never touches the request itself.
pub fn describe_request(request: &Request) -> String {
    let Some(body) = request.body() else {
        return "Req: No Body".to_string();
    };
    let ct = content_type(request.headers());
    if !is_json(ct) {
        return format!("Req: unsupported content type {}", ct.unwrap_or("none"));
    }
    match body.as_bytes() {
        Some(bytes) => format!("Req: {}", decode_text(bytes, ct)),
        None => "Req: Error reading request body".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    #[test]
    fn test_is_json() {
        assert!(is_json(Some("application/json")));
        assert!(is_json(Some("application/json; charset=utf-8")));
        assert!(is_json(Some("Application/JSON")));
        assert!(is_json(Some("application/problem+json")));
        assert!(!is_json(Some("text/plain")));
        assert!(!is_json(Some("application/octet-stream")));
        assert!(!is_json(None));
    }

    #[test]
    fn test_decode_text_charset() {
        assert_eq!(decode_text("héllo".as_bytes(), None), "héllo");
        assert_eq!(
            decode_text("héllo".as_bytes(), Some("text/plain; charset=UTF-8")),
            "héllo"
        );
        assert_eq!(
            decode_text(&[0x68, 0xe9], Some("text/plain; charset=\"ISO-8859-1\"")),
            "hé"
        );
    }

    #[test]
    fn test_describe_response_body_json() {
        let line = describe_response_body(Some("application/json"), br#"{"a":1}"#);
        assert_eq!(line, "Resp: {\n  \"a\": 1\n}");

        // Not an object: logged raw.
        let line = describe_response_body(Some("application/json"), b"[1,2]");
        assert_eq!(line, "Resp: [1,2]");

        let line = describe_response_body(Some("application/json"), b"{broken");
        assert_eq!(line, "Resp: {broken");
    }

    #[test]
    fn test_describe_response_body_not_authenticated_is_logged_raw() {
        let raw = r#"{"msg":"code_not_authenticated"}"#;
        let line = describe_response_body(Some("application/json; charset=utf-8"), raw.as_bytes());
        assert_eq!(line, format!("Resp: {raw}"));
    }

    #[test]
    fn test_describe_response_body_other_types() {
        assert_eq!(
            describe_response_body(Some("application/json"), b""),
            "Resp: No Body"
        );
        assert_eq!(
            describe_response_body(Some("text/plain"), b"hello"),
            "Resp: hello"
        );
        assert_eq!(describe_response_body(None, b"hello"), "Resp: hello");
        assert_eq!(
            describe_response_body(Some("application/octet-stream"), &[0, 1, 2, 3]),
            "Resp: 4 bytes of application/octet-stream"
        );
    }

    #[test]
    fn test_describe_request() {
        let client = Client::new();

        let req = client.get("http://localhost/none").build().unwrap();
        assert_eq!(describe_request(&req), "Req: No Body");

        let req = client
            .post("http://localhost/json")
            .json(&serde_json::json!({"path": "/a"}))
            .build()
            .unwrap();
        assert_eq!(describe_request(&req), r#"Req: {"path":"/a"}"#);

        let req = client
            .request(Method::PUT, "http://localhost/bin")
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(vec![1u8, 2, 3])
            .build()
            .unwrap();
        assert_eq!(
            describe_request(&req),
            "Req: unsupported content type application/octet-stream"
        );
        // Describing must not consume the body.
        assert_eq!(req.body().and_then(|b| b.as_bytes()), Some(&[1u8, 2, 3][..]));
    }
}
