//! Session lifecycle and protocol flow.
//!
//! A session owns one URL's load from start to teardown: it serves the
//! cache, revalidates against the server, merges data updates, and
//! persists the new generation. The host view attaches whenever it is
//! ready; results produced before that are queued and replayed.
//!
//! State machine: `None -> Running -> Ready -> Destroyed`. `start`
//! moves to Running and spawns the worker; the worker moves to Ready
//! when its flow finishes; `destroy` moves to Destroyed, deferring
//! while a cache save is mid-flight.

pub mod config;
pub mod host;
pub mod strategy;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use sonic_core::diff::{self, DataBlocks};
use sonic_core::{BlobKind, CacheDb, EngineConfig, Error, SessionMetadata};
use tokio::sync::watch;

use crate::connector::{
    BridgeStream, CacheOffline, ServerConnector, Transport, HEADER_ETAG, HEADER_SONIC_LINK, HEADER_TEMPLATE_CHANGE,
    HEADER_TEMPLATE_TAG,
};
use crate::runtime::HostRuntime;
use crate::scheduler::Scheduler;

pub use config::{SessionConfig, SessionMode};
pub use host::{ResultCode, SessionHost};
pub use strategy::{Delivery, QuickDelivery, StandardDelivery};

/// Grace period between a destroy request during a save and forced
/// teardown.
const DESTROY_DELAY: Duration = Duration::from_secs(6);

/// How long a resource intercept waits for the worker to produce a
/// document.
const RESOURCE_WAIT: Duration = Duration::from_secs(30);

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    None,
    Running,
    Ready,
    Destroyed,
}

/// Data-only update payload from a sync-aware server.
#[derive(Debug, Deserialize)]
struct UpdatePayload {
    data: DataBlocks,
    #[serde(rename = "html-sha1", default)]
    html_sha1: String,
    #[serde(rename = "template-tag", default)]
    template_tag: String,
}

enum HostEvent {
    LoadUrl(String),
    LoadPage(String, Vec<(String, String)>),
    DataUpdate(String),
    Result(ResultCode, ResultCode),
    Error(Error),
    Toast(String),
    Prefetch(Vec<String>),
}

/// Queues host callbacks until a real host attaches, then replays them
/// in order.
#[derive(Default)]
struct HostProxy {
    host: Mutex<Option<Arc<dyn SessionHost>>>,
    queued: Mutex<Vec<HostEvent>>,
}

impl HostProxy {
    fn bind(&self, host: Arc<dyn SessionHost>) {
        *self.host.lock().unwrap() = Some(host.clone());
        let events = std::mem::take(&mut *self.queued.lock().unwrap());
        for event in events {
            Self::replay(&*host, event);
        }
    }

    fn unbind(&self) {
        self.host.lock().unwrap().take();
    }

    fn replay(host: &dyn SessionHost, event: HostEvent) {
        match event {
            HostEvent::LoadUrl(url) => host.load_url(&url),
            HostEvent::LoadPage(html, headers) => host.load_page(&html, &headers),
            HostEvent::DataUpdate(json) => host.apply_data_update(&json),
            HostEvent::Result(source, resolved) => host.notify_result(source, resolved),
            HostEvent::Error(error) => host.notify_error(&error),
            HostEvent::Toast(message) => host.show_toast(&message),
            HostEvent::Prefetch(links) => host.prefetch(&links),
        }
    }

    fn dispatch(&self, event: HostEvent) {
        let host = self.host.lock().unwrap().clone();
        match host {
            Some(host) => Self::replay(&*host, event),
            None => self.queued.lock().unwrap().push(event),
        }
    }
}

impl SessionHost for HostProxy {
    fn load_url(&self, url: &str) {
        self.dispatch(HostEvent::LoadUrl(url.to_string()));
    }

    fn load_page(&self, html: &str, headers: &[(String, String)]) {
        self.dispatch(HostEvent::LoadPage(html.to_string(), headers.to_vec()));
    }

    fn apply_data_update(&self, diff_json: &str) {
        self.dispatch(HostEvent::DataUpdate(diff_json.to_string()));
    }

    fn notify_result(&self, source: ResultCode, resolved: ResultCode) {
        self.dispatch(HostEvent::Result(source, resolved));
    }

    fn notify_error(&self, error: &Error) {
        self.dispatch(HostEvent::Error(error.duplicate()));
    }

    fn show_toast(&self, message: &str) {
        self.dispatch(HostEvent::Toast(message.to_string()));
    }

    fn prefetch(&self, links: &[String]) {
        self.dispatch(HostEvent::Prefetch(links.to_vec()));
    }
}

/// One URL's load session.
pub struct Session {
    pub id: String,
    pub url: String,
    config: SessionConfig,
    engine_config: EngineConfig,
    db: CacheDb,
    runtime: Arc<dyn HostRuntime>,
    transport: Arc<dyn Transport>,
    delivery: Box<dyn Delivery>,
    proxy: HostProxy,
    state_tx: watch::Sender<SessionState>,
    document: Mutex<Option<String>>,
    doc_ready_tx: watch::Sender<bool>,
    intercept_invoked: AtomicBool,
    worker_active: AtomicBool,
    waiting_for_save: AtomicBool,
    destroy_requested: AtomicBool,
    created_at: std::time::Instant,
}

impl Session {
    pub fn new(
        id: String,
        url: String,
        config: SessionConfig,
        engine_config: EngineConfig,
        db: CacheDb,
        runtime: Arc<dyn HostRuntime>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let delivery: Box<dyn Delivery> = match config.mode {
            SessionMode::Standard => Box::new(StandardDelivery::default()),
            SessionMode::Quick => Box::new(QuickDelivery::default()),
        };
        let (state_tx, _) = watch::channel(SessionState::None);
        let (doc_ready_tx, _) = watch::channel(false);
        Arc::new(Self {
            id,
            url,
            config,
            engine_config,
            db,
            runtime,
            transport,
            delivery,
            proxy: HostProxy::default(),
            state_tx,
            document: Mutex::new(None),
            doc_ready_tx,
            intercept_invoked: AtomicBool::new(false),
            worker_active: AtomicBool::new(false),
            waiting_for_save: AtomicBool::new(false),
            destroy_requested: AtomicBool::new(false),
            created_at: std::time::Instant::now(),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a preloaded session has outlived its expiry without a
    /// host attaching.
    pub fn preload_expired(&self) -> bool {
        self.proxy.host.lock().unwrap().is_none() && self.created_at.elapsed() > self.config.preload_expiry
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Start the worker. Returns false if the session already started.
    pub fn start(self: &Arc<Self>, scheduler: &Scheduler) -> bool {
        if !self.transition(SessionState::None, SessionState::Running) {
            return false;
        }
        // Marked before the spawn so a destroy racing the startup
        // still defers to the worker.
        self.worker_active.store(true, Ordering::SeqCst);
        let session = self.clone();
        scheduler.spawn(async move {
            session.run().await;
        });
        true
    }

    /// Attach the host view, replaying anything the worker already
    /// produced.
    pub fn bind_host(&self, host: Arc<dyn SessionHost>) {
        self.proxy.bind(host);
    }

    /// The host's one chance to intercept the page request and get the
    /// session-managed document. Blocks until the worker publishes a
    /// document or the wait budget runs out; None means fall back to a
    /// plain network load.
    pub async fn on_resource_request(&self) -> Option<BridgeStream> {
        if self.intercept_invoked.swap(true, Ordering::SeqCst) {
            return None;
        }
        let mut ready = self.doc_ready_tx.subscribe();
        if !*ready.borrow() {
            let waited = tokio::time::timeout(RESOURCE_WAIT, async {
                while ready.changed().await.is_ok() {
                    if *ready.borrow() {
                        break;
                    }
                }
            })
            .await;
            if waited.is_err() {
                tracing::warn!(session_id = %self.id, "resource intercept timed out");
            }
        }
        let document = self.document.lock().unwrap().clone()?;
        Some(BridgeStream::from_bytes(Bytes::from(document)))
    }

    /// Tear the session down. While the worker or a cache save is in
    /// flight the teardown is deferred: the worker finishes its leg
    /// and destroys on exit, with the grace period as a hard cap.
    pub fn destroy(self: &Arc<Self>) {
        if self.state() == SessionState::Destroyed {
            return;
        }
        self.destroy_requested.store(true, Ordering::SeqCst);
        if self.worker_active.load(Ordering::SeqCst) || self.waiting_for_save.load(Ordering::SeqCst) {
            let session = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(DESTROY_DELAY).await;
                session.force_destroy();
            });
            return;
        }
        self.force_destroy();
    }

    fn force_destroy(&self) {
        let was = self.state_tx.send_replace(SessionState::Destroyed);
        if was == SessionState::Destroyed {
            return;
        }
        self.proxy.unbind();
        // Wake any intercept still blocked on the worker.
        let _ = self.doc_ready_tx.send(true);
        tracing::debug!(session_id = %self.id, "session destroyed");
    }

    async fn run(self: Arc<Self>) {
        if self.destroy_requested.load(Ordering::SeqCst) {
            self.worker_active.store(false, Ordering::SeqCst);
            self.force_destroy();
            return;
        }
        if let Err(error) = self.sync_flow().await {
            tracing::warn!(session_id = %self.id, %error, "sync flow failed");
            self.proxy.notify_error(&error);
            // Nothing painted and nothing recoverable: hand the load
            // back to the host as a plain navigation.
            if self.config.direct_load_on_error && self.document.lock().unwrap().is_none() {
                self.proxy.load_url(&self.url);
            }
        }
        self.worker_active.store(false, Ordering::SeqCst);
        self.transition(SessionState::Running, SessionState::Ready);
        if self.destroy_requested.load(Ordering::SeqCst) {
            self.force_destroy();
        }
    }

    fn publish_document(&self, html: String) {
        *self.document.lock().unwrap() = Some(html);
        let _ = self.doc_ready_tx.send(true);
    }

    async fn sync_flow(&self) -> Result<(), Error> {
        let meta = self.db.get_metadata(&self.id).await?;
        let (mut cached_html, cache_purged) = self.load_valid_cache(&meta).await?;

        // Under Cache-Control an expired entry counts as no cache at
        // all: full reload, no validators, so the server can't answer
        // 304 against a document we refuse to serve.
        let mut cache_expired = false;
        if self.config.support_cache_control && cached_html.is_some() && !is_fresh(&meta) {
            tracing::debug!(session_id = %self.id, "cached document expired");
            cached_html = None;
            cache_expired = true;
        }

        if let Some(html) = &cached_html {
            self.publish_document(html.clone());
            self.delivery.on_cache_ready(&self.proxy, html);
        }

        if !self.runtime.is_network_valid() {
            if cached_html.is_some() {
                if self.config.reload_in_bad_network {
                    self.proxy.show_toast(&self.config.bad_network_toast);
                }
                return Ok(());
            }
            return Err(Error::ConnectionIo("network unreachable".into()));
        }

        // Within the Cache-Control window there is nothing to ask the
        // server.
        if self.config.support_cache_control && cached_html.is_some() {
            self.delivery.on_cache_hit(&self.proxy);
            self.db.record_cache_hit(&self.id).await?;
            return Ok(());
        }

        let now = chrono::Utc::now().to_rfc3339();
        let protocol_enabled = self.db.is_session_available(&self.id, &now).await?;
        let request_meta = if protocol_enabled && !cache_expired && !cache_purged {
            meta.clone()
        } else {
            // Backoff window, expired cache, or a purged entry: plain
            // request with empty validators, so the server can't 304
            // against a document we no longer hold.
            SessionMetadata { session_id: self.id.clone(), ..Default::default() }
        };

        let mut connector =
            ServerConnector::new(self.transport.clone(), &self.url, &request_meta, &self.config, &*self.runtime)
                .await;
        let status = connector.connect().await?;

        let set_cookies = connector.header_all("set-cookie").to_vec();
        if !set_cookies.is_empty() {
            self.runtime.set_cookies(&self.url, set_cookies).await;
        }
        if let Some(links) = connector.header(HEADER_SONIC_LINK) {
            let links: Vec<String> = links.split(';').filter(|l| !l.is_empty()).map(str::to_string).collect();
            if !links.is_empty() {
                self.proxy.prefetch(&links);
            }
        }

        match status {
            304 => {
                self.delivery.on_cache_hit(&self.proxy);
                self.db.record_cache_hit(&self.id).await?;
                Ok(())
            }
            200 => self.handle_success(connector, meta, cached_html, protocol_enabled).await,
            other => Err(Error::HttpStatus(other)),
        }
    }

    async fn handle_success(
        &self,
        mut connector: ServerConnector,
        meta: SessionMetadata,
        cached_html: Option<String>,
        protocol_enabled: bool,
    ) -> Result<(), Error> {
        let cache_offline = connector.cache_offline();

        if cache_offline == CacheOffline::Http {
            let until = (chrono::Utc::now() + chrono::Duration::from_std(self.engine_config.unavailable_backoff())
                .unwrap_or_else(|_| chrono::Duration::hours(6)))
            .to_rfc3339();
            self.db.set_unavailable_until(&self.id, &until).await?;
            tracing::info!(session_id = %self.id, "server opted out of sync protocol");

            let body = connector.read_body().await?;
            let html = String::from_utf8_lossy(&body).into_owned();
            let headers = connector.filtered_headers();
            self.publish_document(html.clone());
            self.delivery.on_fresh_document(&self.proxy, &html, &headers, ResultCode::FirstLoad);
            return Ok(());
        }

        // A protocol response that resends our own template tag but
        // omits template-change is contradicting itself; drop the
        // cache rather than guess which side is stale.
        if cached_html.is_some()
            && connector.header(HEADER_TEMPLATE_CHANGE).is_none()
            && !meta.template_tag.is_empty()
            && connector.header(HEADER_TEMPLATE_TAG) == Some(meta.template_tag.as_str())
        {
            self.db.remove_session(&self.id).await?;
            return Err(Error::MalformedPayload("template-change missing with unchanged template-tag".into()));
        }

        let template_change = connector.header(HEADER_TEMPLATE_CHANGE) != Some("false");

        // "store": persist the new generation but leave the page the
        // host is already showing alone.
        let deliver = cache_offline != CacheOffline::Store || cached_html.is_none();

        if cached_html.is_none() || template_change {
            let source = if cached_html.is_none() { ResultCode::FirstLoad } else { ResultCode::TemplateChange };
            return self
                .handle_full_document(connector, cache_offline, protocol_enabled, source, deliver)
                .await;
        }

        self.handle_data_update(connector, meta, cache_offline, protocol_enabled, deliver)
            .await
    }

    /// First load or template change: the body is the whole document.
    async fn handle_full_document(
        &self,
        mut connector: ServerConnector,
        cache_offline: CacheOffline,
        protocol_enabled: bool,
        source: ResultCode,
        deliver: bool,
    ) -> Result<(), Error> {
        let body = connector.read_body().await?;
        let html = String::from_utf8_lossy(&body).into_owned();
        let headers = connector.filtered_headers();

        if deliver {
            self.publish_document(html.clone());
            self.delivery.on_fresh_document(&self.proxy, &html, &headers, source);
        }

        if cache_offline == CacheOffline::Disable || !protocol_enabled {
            return Ok(());
        }

        let separated = diff::separate(&html)?;
        let etag = connector.header(HEADER_ETAG).unwrap_or_default().to_string();
        let template_tag = connector.header(HEADER_TEMPLATE_TAG).unwrap_or_default().to_string();
        let cache_control = connector.header("cache-control").map(str::to_string);
        let blocks_json = diff::blocks_to_json(&separated.blocks);
        self.save_snapshot(cache_control, etag, template_tag, &html, &separated.template, &blocks_json)
            .await
    }

    /// Template held: merge changed blocks into the cached generation.
    async fn handle_data_update(
        &self,
        mut connector: ServerConnector,
        meta: SessionMetadata,
        cache_offline: CacheOffline,
        protocol_enabled: bool,
        deliver: bool,
    ) -> Result<(), Error> {
        let template = self
            .db
            .get_blob(&self.id, BlobKind::Template)
            .await?
            .ok_or_else(|| Error::DiffMergeFail("template blob missing for data update".into()))?;
        let template = String::from_utf8_lossy(&template).into_owned();
        let old_blocks = match self.db.get_blob(&self.id, BlobKind::Data).await? {
            Some(bytes) => diff::parse_blocks(&String::from_utf8_lossy(&bytes))?,
            None => DataBlocks::new(),
        };

        let body = connector.read_body().await?;
        let body_text = String::from_utf8_lossy(&body);

        // Sync-aware servers answer with a JSON block payload; plain
        // servers under validator repair answer with the full page and
        // the diff is computed here.
        let (changed, expected_sha1, payload_template_tag) = match serde_json::from_str::<UpdatePayload>(&body_text) {
            Ok(payload) => (payload.data, payload.html_sha1, payload.template_tag),
            Err(_) => {
                let separated = diff::separate(&body_text)?;
                (diff::diff(&old_blocks, &separated.blocks), String::new(), String::new())
            }
        };

        let mut merged = old_blocks;
        for (key, value) in &changed {
            merged.insert(key.clone(), value.clone());
        }
        if !merged.is_empty() && !merged.keys().any(|key| template.contains(key.as_str())) {
            return Err(Error::BuildHtmlFail("cached template has no block tokens".into()));
        }
        let rebuilt = diff::rebuild(&template, &merged);

        if !expected_sha1.is_empty() && !diff::hash::verify(rebuilt.as_bytes(), &expected_sha1) {
            self.db.remove_session(&self.id).await?;
            return Err(Error::CacheVerifyFail(self.id.clone()));
        }

        if deliver {
            let diff_json = diff::blocks_to_json(&changed);
            self.publish_document(rebuilt.clone());
            self.delivery.on_data_update(&self.proxy, &diff_json, &rebuilt);
        }

        if cache_offline == CacheOffline::Disable || !protocol_enabled {
            return Ok(());
        }

        let etag = connector
            .header(HEADER_ETAG)
            .map(str::to_string)
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| diff::hash::sha1_hex(rebuilt.as_bytes()));
        let template_tag = if !payload_template_tag.is_empty() {
            payload_template_tag
        } else {
            connector
                .header(HEADER_TEMPLATE_TAG)
                .map(str::to_string)
                .filter(|t| !t.is_empty())
                .unwrap_or(meta.template_tag)
        };
        let cache_control = connector.header("cache-control").map(str::to_string);
        let blocks_json = diff::blocks_to_json(&merged);
        self.save_snapshot(cache_control, etag, template_tag, &rebuilt, &template, &blocks_json)
            .await
    }

    async fn save_snapshot(
        &self,
        cache_control: Option<String>,
        etag: String,
        template_tag: String,
        html: &str,
        template: &str,
        blocks_json: &str,
    ) -> Result<(), Error> {
        self.waiting_for_save.store(true, Ordering::SeqCst);
        let now = chrono::Utc::now();
        let expires_at = self.expiry_from(cache_control.as_deref(), now);
        let meta = SessionMetadata {
            session_id: self.id.clone(),
            etag,
            template_tag,
            html_sha1: diff::hash::sha1_hex(html.as_bytes()),
            html_size: html.len() as u64,
            template_updated_at: Some(now.to_rfc3339()),
            expires_at,
            unavailable_until: None,
            cache_hit_count: 0,
        };
        let result = self
            .db
            .save_session(&meta, html.as_bytes(), template.as_bytes(), blocks_json.as_bytes())
            .await;
        self.waiting_for_save.store(false, Ordering::SeqCst);
        result?;

        let interval = chrono::Duration::from_std(self.engine_config.cache_check_interval())
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let evicted = self.db.trim_if_over_budget(self.engine_config.max_cache_bytes, interval).await?;
        if evicted > 0 {
            tracing::info!(evicted, "cache trimmed");
        }
        Ok(())
    }

    fn expiry_from(&self, cache_control: Option<&str>, now: chrono::DateTime<chrono::Utc>) -> Option<String> {
        if !self.config.support_cache_control {
            return None;
        }
        // cache_max_age_ms is an upper bound; servers can shorten it
        // but not extend it.
        let max_age_ms = parse_max_age(cache_control?)
            .map(|secs| secs * 1000)
            .unwrap_or(self.engine_config.cache_max_age_ms)
            .min(self.engine_config.cache_max_age_ms);
        Some((now + chrono::Duration::milliseconds(max_age_ms as i64)).to_rfc3339())
    }

    /// Read and verify the cached document. Corrupt or vanished cache
    /// is dropped and treated as a miss; the second flag reports that,
    /// so the request doesn't go out with validators for a document
    /// that no longer exists.
    async fn load_valid_cache(&self, meta: &SessionMetadata) -> Result<(Option<String>, bool), Error> {
        if meta.is_empty() {
            return Ok((None, false));
        }
        let Some(document) = self.db.get_blob(&self.id, BlobKind::Document).await? else {
            return Ok((None, true));
        };
        let size_ok = meta.html_size == document.len() as u64;
        let hash_ok = !self.engine_config.verify_cache_with_hash || diff::hash::verify(&document, &meta.html_sha1);
        if !size_ok || !hash_ok {
            tracing::warn!(session_id = %self.id, size_ok, hash_ok, "cached document failed verification");
            self.db.remove_session(&self.id).await?;
            return Ok((None, true));
        }
        Ok((Some(String::from_utf8_lossy(&document).into_owned()), false))
    }
}

/// True while `expires_at` is in the future.
fn is_fresh(meta: &SessionMetadata) -> bool {
    meta.expires_at
        .as_deref()
        .is_some_and(|expires| expires > chrono::Utc::now().to_rfc3339().as_str())
}

/// Seconds from a Cache-Control `max-age` directive.
fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|value| value.parse().ok())
}
