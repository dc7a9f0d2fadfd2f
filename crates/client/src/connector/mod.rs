//! Server connector: request decoration and response normalization.
//!
//! Decorates outbound requests with the sync protocol headers,
//! executes them through a [`Transport`], and normalizes the response
//! so the session layer only ever sees well-formed protocol fields:
//! weak ETags are strengthened, and servers that omit validators get
//! them repaired locally from a content hash.

pub mod bridge;
pub mod transport;

use bytes::{Bytes, BytesMut};
use sonic_core::diff;
use sonic_core::Error;
use std::sync::Arc;

use crate::runtime::HostRuntime;
use crate::session::config::SessionConfig;
use sonic_core::SessionMetadata;

pub use bridge::{BridgeStream, ReadBreak};
pub use transport::{Body, BodyStream, Headers, ReqwestTransport, Transport, TransportRequest, TransportResponse};

/// Request: client wants data-only updates.
pub const HEADER_ACCEPT_DIFF: &str = "accept-diff";
/// Request: cached document validator.
pub const HEADER_IF_NONE_MATCH: &str = "if-none-match";
/// Request and response: template validator.
pub const HEADER_TEMPLATE_TAG: &str = "template-tag";
/// Response: document validator.
pub const HEADER_ETAG: &str = "etag";
/// Response: whether the template changed since the client's tag.
pub const HEADER_TEMPLATE_CHANGE: &str = "template-change";
/// Response: cache directive (true | store | false | http).
pub const HEADER_CACHE_OFFLINE: &str = "cache-offline";
/// Response: resource prefetch hints for the host.
pub const HEADER_SONIC_LINK: &str = "sonic-link";

/// Server cache directive. Absent header means [`CacheOffline::Enable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheOffline {
    /// Cache the response and deliver it.
    #[default]
    Enable,
    /// Cache the response but don't disturb the current view.
    Store,
    /// Deliver without caching.
    Disable,
    /// Stop using the sync protocol for this id for a backoff window.
    Http,
}

impl CacheOffline {
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("store") => CacheOffline::Store,
            Some("false") => CacheOffline::Disable,
            Some("http") => CacheOffline::Http,
            _ => CacheOffline::Enable,
        }
    }
}

/// Strip the weak-validator prefix and quotes: `W/"abc"` -> `abc`.
pub fn normalize_etag(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("W/").or_else(|| trimmed.strip_prefix("w/")).unwrap_or(trimmed);
    trimmed.trim_matches('"').to_string()
}

/// One sync exchange with the server.
///
/// Owns the decorated request and, after [`ServerConnector::connect`],
/// the normalized response. The body can be drained fully or taken as
/// a stream for bridging to the host.
pub struct ServerConnector {
    transport: Arc<dyn Transport>,
    request: TransportRequest,
    repair_validators: bool,
    response: Option<TransportResponse>,
    buffered: BytesMut,
    body_done: bool,
    read_break: ReadBreak,
}

impl ServerConnector {
    /// Build a decorated request for a session.
    ///
    /// Cookie lookup goes through the host runtime, which is why this
    /// is async.
    pub async fn new(
        transport: Arc<dyn Transport>,
        url: &str,
        meta: &SessionMetadata,
        config: &SessionConfig,
        runtime: &dyn HostRuntime,
    ) -> Self {
        let mut headers = Headers::new();
        headers.set(HEADER_ACCEPT_DIFF, if config.accept_diff { "true" } else { "false" });
        headers.set(HEADER_IF_NONE_MATCH, meta.etag.clone());
        headers.set(HEADER_TEMPLATE_TAG, meta.template_tag.clone());
        if let Some(cookie) = runtime.cookie(url).await {
            headers.set("cookie", cookie);
        }
        for (name, value) in &config.custom_headers {
            headers.insert(name, value.clone());
        }

        let request = TransportRequest {
            url: url.to_string(),
            headers,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
        };

        Self {
            transport,
            request,
            repair_validators: config.support_local_server,
            response: None,
            buffered: BytesMut::new(),
            body_done: false,
            read_break: ReadBreak::default(),
        }
    }

    /// Handle that caps body reads at the buffered boundary once the
    /// consumer signals it is done with the page.
    pub fn read_break(&self) -> ReadBreak {
        self.read_break.clone()
    }

    /// Execute the request and normalize the response.
    ///
    /// Returns the effective status code, which may be a synthesized
    /// 304 when validator repair finds the body unchanged.
    pub async fn connect(&mut self) -> Result<u16, Error> {
        let mut response = self.transport.execute(self.request.clone()).await?;

        if let Some(raw) = response.headers.get(HEADER_ETAG) {
            let normalized = normalize_etag(raw);
            response.headers.set(HEADER_ETAG, normalized);
        }

        self.response = Some(response);

        if self.repair_validators {
            self.repair().await?;
        }

        Ok(self.status())
    }

    /// Effective response status.
    pub fn status(&self) -> u16 {
        self.response.as_ref().map_or(0, |r| r.status)
    }

    /// First value of a response header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response.as_ref().and_then(|r| r.headers.get(name))
    }

    /// All values of a response header.
    pub fn header_all(&self, name: &str) -> &[String] {
        self.response.as_ref().map_or(&[], |r| r.headers.get_all(name))
    }

    /// The server's cache directive.
    pub fn cache_offline(&self) -> CacheOffline {
        CacheOffline::from_header(self.header(HEADER_CACHE_OFFLINE))
    }

    /// Response headers safe to surface to the host view.
    ///
    /// Cookies go through the runtime's cookie store, cache validators
    /// stay inside the engine so the host's own HTTP cache never
    /// revalidates behind our back, and the transport already decoded
    /// the body.
    pub fn filtered_headers(&self) -> Vec<(String, String)> {
        const DROP: &[&str] = &[
            "set-cookie",
            "cache-control",
            "expires",
            "etag",
            "content-encoding",
            "content-length",
            "transfer-encoding",
        ];
        let mut out = Vec::new();
        if let Some(response) = &self.response {
            for (name, values) in response.headers.iter() {
                if DROP.contains(&name) {
                    continue;
                }
                for value in values {
                    out.push((name.to_string(), value.clone()));
                }
            }
        }
        out
    }

    /// Drain the remaining body and return everything read so far.
    pub async fn read_body(&mut self) -> Result<Bytes, Error> {
        while !self.body_done {
            self.pull_chunk().await?;
        }
        Ok(self.buffered.clone().freeze())
    }

    /// Read one more chunk into the internal buffer. Returns false at
    /// end of stream or once the read break trips; a tripped break
    /// caps what gets cached at whatever was buffered.
    pub async fn pull_chunk(&mut self) -> Result<bool, Error> {
        if self.body_done {
            return Ok(false);
        }
        if self.read_break.tripped() {
            self.body_done = true;
            return Ok(false);
        }
        let response = self
            .response
            .as_mut()
            .ok_or_else(|| Error::InvalidConnection("not connected".into()))?;
        match &mut response.body {
            Body::Full(bytes) => {
                self.buffered.extend_from_slice(bytes);
                *bytes = Bytes::new();
                self.body_done = true;
                Ok(false)
            }
            Body::Stream(stream) => match stream.next_chunk().await? {
                Some(chunk) => {
                    self.buffered.extend_from_slice(&chunk);
                    Ok(true)
                }
                None => {
                    self.body_done = true;
                    Ok(false)
                }
            },
        }
    }

    /// Bytes buffered so far.
    pub fn buffered(&self) -> &[u8] {
        &self.buffered
    }

    /// Whether the whole body has been read.
    pub fn body_complete(&self) -> bool {
        self.body_done
    }

    /// Turn the connector into a stream serving the buffered prefix
    /// followed by whatever the server has yet to send.
    pub fn into_bridge(mut self) -> BridgeStream {
        let remainder = self.response.take().and_then(|r| match r.body {
            Body::Stream(s) if !self.body_done => Some(s),
            _ => None,
        });
        BridgeStream::new(self.buffered.freeze(), remainder, self.read_break.clone())
    }

    /// Repair missing validators from the body content.
    ///
    /// Servers without sync support answer a plain 200 with no `etag`
    /// or `template-tag`. We compute them locally: the document hash
    /// becomes the etag (downgrading to 304 when it matches the
    /// client's), and the separated template's hash becomes the
    /// template tag, with `template-change` derived by comparison.
    async fn repair(&mut self) -> Result<(), Error> {
        if self.status() != 200 {
            return Ok(());
        }
        if self.cache_offline() == CacheOffline::Http {
            return Ok(());
        }

        let needs_etag = self.header(HEADER_ETAG).is_none_or(str::is_empty);
        let needs_template_tag = self.header(HEADER_TEMPLATE_TAG).is_none_or(str::is_empty);
        if !needs_etag && !needs_template_tag {
            return Ok(());
        }

        // Validator repair needs the whole document in hand.
        let body = self.read_body().await?;
        let requested_etag = self.request.headers.get(HEADER_IF_NONE_MATCH).unwrap_or("").to_string();
        let requested_template_tag = self.request.headers.get(HEADER_TEMPLATE_TAG).unwrap_or("").to_string();
        let response = self
            .response
            .as_mut()
            .ok_or_else(|| Error::InvalidConnection("not connected".into()))?;

        if needs_etag {
            let etag = diff::hash::sha1_hex(&body);
            response.headers.set(HEADER_ETAG, etag.clone());
            if !etag.is_empty() && requested_etag == etag {
                response.status = 304;
                tracing::debug!("validator repair: content unchanged, downgrading to 304");
                return Ok(());
            }
        }

        if response.headers.get(HEADER_TEMPLATE_TAG).is_none_or(str::is_empty) {
            let document = String::from_utf8_lossy(&body);
            let separated = diff::separate(&document)?;
            response
                .headers
                .set(HEADER_TEMPLATE_TAG, diff::hash::sha1_hex(separated.template.as_bytes()));
        }

        if response.headers.get(HEADER_TEMPLATE_CHANGE).is_none() {
            let unchanged = !requested_template_tag.is_empty()
                && response.headers.get(HEADER_TEMPLATE_TAG) == Some(requested_template_tag.as_str());
            response
                .headers
                .set(HEADER_TEMPLATE_CHANGE, if unchanged { "false" } else { "true" });
        }

        Ok(())
    }
}
