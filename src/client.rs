//! HTTP retrieval against the source archive and the target catalog.
use crate::config::{Credentials, Endpoint};
use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CHUNK_SIZE: usize = 8 * 1024;
pub const PROGRESS_EVERY: u64 = 1024;
pub const MAX_JSON_PARSE: usize = 16 * 1024 * 1024;

/// A fully buffered response body. Small bodies that parse as JSON carry the
/// parsed value next to the raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value, Vec<u8>),
    Raw(Vec<u8>),
}

impl Body {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        if bytes.len() >= MAX_JSON_PARSE {
            return Self::Raw(bytes);
        }
        let parsed = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(text).ok());
        match parsed {
            Some(value) => Self::Json(value, bytes),
            None => Self::Raw(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Json(_, bytes) | Self::Raw(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Json(_, bytes) | Self::Raw(bytes) => bytes,
        }
    }

    pub fn json(&self) -> Option<&Value> {
        match self {
            Self::Json(value, _) => Some(value),
            Self::Raw(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Download percentage, `None` when the expected size is unknown.
pub fn progress_percent(received: u64, expected: u64) -> Option<u64> {
    if expected == 0 {
        return None;
    }
    Some(received * 100 / expected)
}

/// Counts received data in fixed 8 KiB blocks and reports progress every
/// 1024th block, starting with the first one.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    expected: u64,
    received: u64,
    blocks: u64,
}

impl ProgressTracker {
    pub fn new(expected: u64) -> Self {
        Self {
            expected,
            ..Default::default()
        }
    }

    /// Accounts for `len` new bytes and returns the percentages due for
    /// reporting. Nothing is reported when the expected size is unknown.
    pub fn advance(&mut self, len: usize) -> Vec<u64> {
        let mut due = vec![];
        let before = self.received;
        self.received += len as u64;
        // A block is counted once its first byte has arrived.
        let first_block = before.div_ceil(CHUNK_SIZE as u64);
        let last_block = self.received.div_ceil(CHUNK_SIZE as u64);
        for block in first_block..last_block {
            self.blocks = block + 1;
            if block % PROGRESS_EVERY == 0 {
                let so_far = block * CHUNK_SIZE as u64;
                if let Some(pct) = progress_percent(so_far, self.expected) {
                    due.push(pct);
                }
            }
        }
        due
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn blocks(&self) -> u64 {
        self.blocks
    }
}

fn content_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Authenticated GET requests with streamed, chunk-accounted transfers.
///
/// Network failures are logged and reported as an absent body; deciding
/// whether that is fatal is up to the caller.
#[derive(Debug, Clone)]
pub struct RetrievalClient {
    http: Client,
    scheme: String,
}

impl RetrievalClient {
    /// `timeout` bounds connecting and each read, never the whole transfer.
    pub fn new(scheme: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            scheme: scheme.to_string(),
        })
    }

    pub fn for_endpoint(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        Self::new(&endpoint.scheme, timeout)
    }

    /// Scheme, host and path concatenated as they are. The path is never
    /// re-encoded.
    pub fn url(&self, host: &str, path: &str) -> String {
        format!("{}://{}{}", self.scheme, host, path)
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn authorize(request: RequestBuilder, credentials: Option<&Credentials>) -> RequestBuilder {
        match credentials {
            Some(c) => request.basic_auth(&c.username, Some(&c.password)),
            None => request,
        }
    }

    fn get(
        &self,
        host: &str,
        path: &str,
        credentials: Option<&Credentials>,
        params: &[(&str, &str)],
    ) -> RequestBuilder {
        let mut request = self.http.get(self.url(host, path));
        if !params.is_empty() {
            request = request.query(params);
        }
        Self::authorize(request, credentials)
    }

    /// Fetches `path` from `host`, returning `None` after logging when the
    /// request fails.
    pub async fn fetch(
        &self,
        host: &str,
        path: &str,
        credentials: Option<&Credentials>,
        params: &[(&str, &str)],
        streaming: bool,
    ) -> Option<Body> {
        let url = self.url(host, path);
        info!(%url, streaming, "fetching");
        match self.try_fetch(host, path, credentials, params, streaming).await {
            Ok(body) => {
                debug!(%url, bytes = body.len(), json = body.json().is_some(), "fetched");
                Some(body)
            }
            Err(err) => {
                warn!(%url, error = %err, "unable to download");
                None
            }
        }
    }

    pub async fn try_fetch(
        &self,
        host: &str,
        path: &str,
        credentials: Option<&Credentials>,
        params: &[(&str, &str)],
        streaming: bool,
    ) -> Result<Body> {
        let response = self
            .get(host, path, credentials, params)
            .send()
            .await?
            .error_for_status()?;

        let bytes = if streaming {
            Self::read_streamed(response).await?
        } else {
            response.bytes().await?.to_vec()
        };
        Ok(Body::from_bytes(bytes))
    }

    async fn read_streamed(response: Response) -> Result<Vec<u8>> {
        let expected = content_length(&response).unwrap_or(0);
        if expected > 0 {
            info!(expected, "expected download size");
        }
        let mut tracker = ProgressTracker::new(expected);
        let mut buffer: Vec<u8> = Vec::with_capacity(expected.min(MAX_JSON_PARSE as u64) as usize);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for pct in tracker.advance(chunk.len()) {
                info!(
                    percent = pct,
                    received = tracker.received(),
                    expected,
                    "download progress"
                );
            }
            buffer.extend_from_slice(&chunk);
        }

        if let Some(pct) = progress_percent(buffer.len() as u64, expected) {
            info!(percent = pct, received = buffer.len(), expected, "download finished");
        }
        Ok(buffer)
    }

    /// Issues a GET and reads only the `Content-Length` header; the body is
    /// dropped unread.
    pub async fn probe_content_length(
        &self,
        host: &str,
        path: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Option<u64>> {
        let response = self
            .get(host, path, credentials, &[])
            .send()
            .await?
            .error_for_status()?;
        Ok(content_length(&response))
    }
}

/// A [`RetrievalClient`] bound to one host and its credentials.
#[derive(Debug, Clone)]
pub struct HostClient {
    client: RetrievalClient,
    host: String,
    credentials: Option<Credentials>,
}

impl HostClient {
    pub fn new(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: RetrievalClient::for_endpoint(endpoint, timeout)?,
            host: endpoint.host.clone(),
            credentials: Some(endpoint.credentials.clone()),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn client(&self) -> &RetrievalClient {
        &self.client
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn url(&self, path: &str) -> String {
        self.client.url(&self.host, path)
    }

    pub async fn fetch(&self, path: &str, streaming: bool) -> Option<Body> {
        self.client
            .fetch(&self.host, path, self.credentials(), &[], streaming)
            .await
    }

    pub async fn content_length(&self, path: &str) -> Result<Option<u64>> {
        self.client
            .probe_content_length(&self.host, path, self.credentials())
            .await
    }

    pub async fn json(&self, path: &str) -> Result<Value> {
        let body = self
            .client
            .try_fetch(&self.host, path, self.credentials(), &[], false)
            .await?;
        match body {
            Body::Json(value, _) => Ok(value),
            Body::Raw(_) => Err(anyhow!("response from {} is not JSON", self.url(path))),
        }
    }
}
