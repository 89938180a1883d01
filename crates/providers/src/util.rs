//! Shared helpers for provider adapters.

use sb_domain::error::Error;

/// Convert a [`reqwest::Error`] into the domain error type.
///
/// Timeouts map to [`Error::Timeout`]; everything else to [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::Http(e.to_string())
    }
}

/// Read a non-2xx response body and build the API error.
pub(crate) async fn api_error(resp: reqwest::Response) -> Error {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Error::ApiError { status, body }
}
