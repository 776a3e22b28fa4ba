//! The network edge behind a trait, so fetchers can be driven by in-memory
//! transports in tests.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use url::Url;

pub type BodyStream = BoxStream<'static, Result<Bytes>>;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    /// Suffix range: `Range: bytes=<start>-`.
    pub range_start: Option<u64>,
    pub headers: Vec<(String, String)>,
}

/// Parsed `Content-Range` header. `total` is `None` for `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub total: Option<u64>,
}

pub struct FetchResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_range: Option<ContentRange>,
    pub content_type: Option<String>,
    pub body: BodyStream,
}

/// Issues one HTTP GET and exposes the body as a byte stream.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse>;
}

/// Production transport over a shared `reqwest` client.
#[derive(Default, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let mut builder = self.client.get(request.url.as_str());
        if let Some(start) = request.range_start {
            builder = builder.header(reqwest::header::RANGE, format!("bytes={start}-"));
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let content_range = headers
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range);
        let content_length = headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());

        Ok(FetchResponse {
            status,
            content_length,
            content_range,
            content_type,
            body: response.bytes_stream().map_err(Error::from).boxed(),
        })
    }
}

/// Parses `bytes <start>-<end>/<total>`.
fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes ")?;
    let (range, total) = rest.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    Some(ContentRange {
        start: start.trim().parse().ok()?,
        total: total.trim().parse().ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            parse_content_range("bytes 100-999/1000"),
            Some(ContentRange {
                start: 100,
                total: Some(1000),
            })
        );
        assert_eq!(
            parse_content_range("bytes 0-499/*"),
            Some(ContentRange {
                start: 0,
                total: None,
            })
        );
        assert_eq!(parse_content_range("items 0-10/20"), None);
        assert_eq!(parse_content_range("bytes garbage"), None);
    }
}
