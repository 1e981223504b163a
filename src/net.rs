//! Classification of network failures.

use std::error::Error;

use crate::error::AppError;
use crate::logger::UploadLogger;

/// Fragments resolvers put in their error messages when a host name cannot be
/// resolved (hyper, getaddrinfo on Linux/macOS, Windows).
const NAME_RESOLUTION_MARKERS: &[&str] = &[
    "dns error",
    "failed to lookup address",
    "name or service not known",
    "nodename nor servname",
    "temporary failure in name resolution",
    "no such host is known",
];

fn chain_mentions_resolver(first: Option<&(dyn Error + 'static)>) -> bool {
    let mut current = first;
    while let Some(e) = current {
        let message = e.to_string().to_ascii_lowercase();
        if NAME_RESOLUTION_MARKERS.iter().any(|m| message.contains(m)) {
            return true;
        }
        current = e.source();
    }
    false
}

/// Whether `err` is a failure to resolve the server's host name.
///
/// Only connection attempts are inspected. Provider responses are never
/// classified, whatever their body says.
pub fn is_name_resolution_failure(err: &AppError) -> bool {
    match err {
        // The reqwest error's own message carries the request URL, so start
        // at its source.
        AppError::HttpClient(e) if e.is_connect() => chain_mentions_resolver(e.source()),
        AppError::Connect(e) => chain_mentions_resolver(Some(e as &(dyn Error + 'static))),
        _ => false,
    }
}

/// Tell the operator that `domain` could not be reached when `err` is a name
/// resolution failure. Other failures are left to the caller.
pub fn catch_error(err: &AppError, domain: &str, logger: &dyn UploadLogger) {
    if !is_name_resolution_failure(err) {
        return;
    }
    logger.log(&format!(
        "Failed to connect to {domain}, check your network connection and DNS settings"
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_error::decode_failure;
    use crate::logger::MemoryLogger;
    use std::io;

    #[derive(Debug, thiserror::Error)]
    #[error("client error (Connect)")]
    struct Wrapper(#[source] io::Error);

    #[test]
    fn test_dns_failure_is_reported() {
        let logger = MemoryLogger::new();
        let err = AppError::Connect(io::Error::other(
            "failed to lookup address information: Name or service not known",
        ));

        catch_error(&err, "ftp.example.com", &logger);

        assert_eq!(
            logger.lines(),
            vec!["Failed to connect to ftp.example.com, check your network connection and DNS settings"]
        );
    }

    #[test]
    fn test_dns_failure_found_in_source_chain() {
        let err = AppError::Connect(io::Error::other(Wrapper(io::Error::other(
            "dns error: no such host is known. (os error 11001)",
        ))));
        assert!(is_name_resolution_failure(&err));
    }

    #[test]
    fn test_local_io_errors_are_not_classified() {
        let err = AppError::Io(io::Error::other("dns error: failed to lookup address"));
        assert!(!is_name_resolution_failure(&err));
    }

    #[test]
    fn test_provider_responses_mentioning_dns_are_ignored() {
        let logger = MemoryLogger::new();

        let raw = decode_failure(502, "upstream dns error while contacting origin");
        catch_error(&raw, "graph.microsoft.com", &logger);

        let envelope = decode_failure(
            400,
            r#"{"error":{"code":"badGateway","message":"Name or service not known for origin"}}"#,
        );
        assert!(matches!(envelope, AppError::Api(_)));
        catch_error(&envelope, "graph.microsoft.com", &logger);

        let auth = AppError::Auth("temporary failure in name resolution".to_string());
        catch_error(&auth, "graph.microsoft.com", &logger);

        assert!(logger.lines().is_empty());
    }

    #[test]
    fn test_other_connect_failures_are_ignored() {
        let logger = MemoryLogger::new();

        let refused = AppError::Connect(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        catch_error(&refused, "example.com", &logger);

        assert!(logger.lines().is_empty());
    }

    #[tokio::test]
    async fn test_refused_http_connection_is_not_a_dns_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let err = client
            .get(format!("http://{addr}/"))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_connect());

        let logger = MemoryLogger::new();
        catch_error(&AppError::HttpClient(err), "127.0.0.1", &logger);
        assert!(logger.lines().is_empty());
    }
}
