//! Transport abstraction over the HTTP stack.
//!
//! The connector speaks to servers through [`Transport`], which the
//! default [`ReqwestTransport`] implements over reqwest. Tests swap in
//! fixture transports that replay canned responses.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sonic_core::Error;

/// Case-insensitive header multimap with lowercase keys.
#[derive(Debug, Clone, Default)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.entry(name.to_ascii_lowercase()).or_default().push(value.into());
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), vec![value.into()]);
    }

    /// First value for a header name, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values for a header name.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.0.get(&name.to_ascii_lowercase()).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// An outbound sync request, already decorated with protocol headers.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Headers,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

/// Incrementally readable response body.
#[async_trait]
pub trait BodyStream: Send {
    /// Next body chunk, or None at end of stream.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error>;
}

/// Response body: fully buffered (fixtures, 304s) or streamed.
pub enum Body {
    Full(Bytes),
    Stream(Box<dyn BodyStream>),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Full(b) => f.debug_tuple("Full").field(&b.len()).finish(),
            Body::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// A server response as the connector sees it.
#[derive(Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Body,
}

/// Low-level HTTP execution.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, Error>;
}

/// Production transport over reqwest.
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the shared HTTP client.
    ///
    /// Redirects are not followed: the protocol treats any non-200,
    /// non-304 status, redirects included, as a miss to hand back to
    /// the host.
    pub fn new(user_agent: &str, connect_timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::InvalidConnection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

struct ReqwestBody(reqwest::Response);

#[async_trait]
impl BodyStream for ReqwestBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        self.0.chunk().await.map_err(|e| Error::ConnectionIo(e.to_string()))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, Error> {
        let mut builder = self.http.get(&request.url).timeout(request.read_timeout);
        for (name, values) in request.headers.iter() {
            for value in values {
                builder = builder.header(name, value);
            }
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::ConnectionTimeout(e.to_string())
            } else {
                Error::ConnectionIo(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value);
            }
        }

        tracing::debug!(url = %request.url, status, "sync response");

        Ok(TransportResponse { status, headers, body: Body::Stream(Box::new(ReqwestBody(response))) })
    }
}
