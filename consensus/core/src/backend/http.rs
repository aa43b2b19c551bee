//! HTTP error mapping shared by the network clients

use std::time::Duration;

use reqwest::StatusCode;

use super::traits::ClientError;

/// Longest backend error body kept in a failure message
const MAX_ERROR_BODY: usize = 512;

/// Build the HTTP client used by network backends
///
/// Only the connect phase is bounded here; the whole call is bounded by
/// [`super::invoke_bounded`].
pub(crate) fn build_http_client(connect_timeout: Duration) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| ClientError::Config(format!("failed to create HTTP client: {e}")))
}

/// Map a non-success HTTP status and its body onto a client error
pub(crate) fn status_error(status: StatusCode, body: &str) -> ClientError {
    let body = excerpt(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ClientError::Auth(format!("HTTP {}: {body}", status.as_u16()))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ClientError::Timeout(Duration::ZERO)
        }
        _ => ClientError::Backend {
            status: Some(status.as_u16()),
            message: body,
        },
    }
}

/// Map a reqwest failure onto a client error
pub(crate) fn transport_error(err: &reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout(Duration::ZERO)
    } else if err.is_decode() {
        ClientError::MalformedResponse(err.to_string())
    } else if err.is_builder() {
        ClientError::Config(err.to_string())
    } else {
        ClientError::Transport(err.to_string())
    }
}

/// Trim a body to a loggable size on a char boundary
pub(crate) fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
