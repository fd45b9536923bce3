//! HTTP/HTTPS storage backend.
//!
//! Reads are issued as HTTP `Range` requests, so a remote archive is
//! decoded slice by slice without downloading it.

use super::{ByteRange, Storage};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

/// HTTP/HTTPS storage backend for a single remote file.
pub struct HttpStorage {
    client: Client,
    url: String,
}

impl HttpStorage {
    /// Create a new HttpStorage for `url`.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Render a range as an HTTP `Range` header value (inclusive end).
fn range_header(range: &ByteRange) -> String {
    match range.end {
        Some(end) => format!("bytes={}-{}", range.start, end.saturating_sub(1)),
        None => format!("bytes={}-", range.start),
    }
}

#[async_trait]
impl Storage for HttpStorage {
    async fn read_bytes(&self, range: Option<ByteRange>) -> Result<Bytes> {
        if range.is_some_and(|r| r.is_empty()) {
            return Ok(Bytes::new());
        }

        let mut request = self.client.get(&self.url);
        if let Some(r) = &range {
            request = request.header(reqwest::header::RANGE, range_header(r));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Internal(format!("HTTP GET request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Bytes::new());
        }
        if !status.is_success() {
            return Err(Error::NotFound(self.url.clone()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Internal(format!("failed to read HTTP response: {}", e)))?;

        // A server that ignores Range answers 200 with the whole body.
        match range {
            Some(r) if status == reqwest::StatusCode::OK => {
                let start = (r.start as usize).min(body.len());
                let end = r
                    .end
                    .map_or(body.len(), |end| (end as usize).min(body.len()))
                    .max(start);
                Ok(body.slice(start..end))
            }
            _ => Ok(body),
        }
    }
}
