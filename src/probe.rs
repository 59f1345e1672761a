use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceInfo {
    pub total_size: u64,
    pub range_supported: bool,
}

/// Turn configured headers into a [`HeaderMap`], dropping any `Range`.
pub fn build_headers(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::config("headers", format!("invalid header name {:?}: {}", name, e)))?;
        if name == RANGE {
            continue;
        }
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::config("headers", format!("invalid value for {}: {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// GET with `Range: bytes=0-` and read the response headers only.
///
/// The full-open range (no upper bound) keeps `Content-Length` equal to the
/// size of the whole resource.
pub async fn probe(client: &Client, url: &str, headers: &HeaderMap, timeout: Duration) -> Result<ResourceInfo> {
    let request = client
        .get(url)
        .headers(headers.clone())
        .header(RANGE, "bytes=0-");
    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| Error::Network(format!("timed out probing {}", url)))??;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Network(format!("pre-check of {} failed with status {}", url, status)));
    }

    let total_size = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| Error::MissingContentLength(url.to_string()))?;

    let range_supported = status == StatusCode::PARTIAL_CONTENT
        || response
            .headers()
            .get(ACCEPT_RANGES)
            .map(|v| v.as_bytes() == b"bytes")
            .unwrap_or(false);

    debug!(%url, total_size, range_supported, %status, "pre-check done");
    Ok(ResourceInfo {
        total_size,
        range_supported,
    })
}
