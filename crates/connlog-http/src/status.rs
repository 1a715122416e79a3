// Status and transport error descriptions shared by the HTTP adapters

use reqwest::StatusCode;

/// Describe a non-success response from `service`
pub(crate) fn describe_status(service: &str, status: StatusCode, body: &str) -> String {
    match status.as_u16() {
        401 | 403 => format!(
            "{} rejected the request: invalid or insufficient credentials. Status: {}",
            service, status
        ),
        404 => format!("{} endpoint not found. Status: {}", service, status),
        429 => format!("{} rate limit exceeded. Status: {}", service, status),
        500..=599 => format!("{} server error (transient): {} - {}", service, status, body),
        _ => format!("unexpected response status from {}: {} - {}", service, status, body),
    }
}

/// Describe a request that never produced a response
pub(crate) fn describe_transport(service: &str, err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("{} request timed out", service)
    } else if err.is_connect() {
        format!("failed to connect to {}: {}", service, err)
    } else {
        format!("{} request failed: {}", service, err)
    }
}
