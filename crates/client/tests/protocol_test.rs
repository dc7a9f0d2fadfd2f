//! End-to-end protocol flows against a fixture transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sonic_client::{
    Body, Headers, HostRuntime, ResultCode, Session, SessionConfig, SessionEngine, SessionHost, SessionMode,
    SessionState, Transport, TransportRequest, TransportResponse,
};
use sonic_core::diff;
use sonic_core::{BlobKind, CacheDb, EngineConfig, Error};

const PAGE: &str = "<html><head><title>news</title></head><body>\
                    <!--sonicdiff-price-->42<!--sonicdiff-price-end-->\
                    <p>static</p></body></html>";

struct MockTransport {
    responses: Mutex<VecDeque<(u16, Vec<(&'static str, String)>, Bytes)>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self { responses: Mutex::new(VecDeque::new()), requests: Mutex::new(Vec::new()) })
    }

    fn push(&self, status: u16, headers: Vec<(&'static str, String)>, body: impl Into<Bytes>) {
        self.responses.lock().unwrap().push_back((status, headers, body.into()));
    }

    fn recorded(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, Error> {
        self.requests.lock().unwrap().push(request);
        let (status, header_list, body) = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::ConnectionIo("no fixture response".into()))?;
        let mut headers = Headers::new();
        for (name, value) in header_list {
            headers.insert(name, value);
        }
        Ok(TransportResponse { status, headers, body: Body::Full(body) })
    }
}

#[derive(Default)]
struct RecordingHost {
    pages: Mutex<Vec<String>>,
    data_updates: Mutex<Vec<String>>,
    results: Mutex<Vec<(ResultCode, ResultCode)>>,
    errors: Mutex<Vec<String>>,
    toasts: Mutex<Vec<String>>,
    prefetches: Mutex<Vec<Vec<String>>>,
}

impl SessionHost for RecordingHost {
    fn load_url(&self, url: &str) {
        self.pages.lock().unwrap().push(format!("url:{url}"));
    }

    fn load_page(&self, html: &str, _headers: &[(String, String)]) {
        self.pages.lock().unwrap().push(html.to_string());
    }

    fn apply_data_update(&self, diff_json: &str) {
        self.data_updates.lock().unwrap().push(diff_json.to_string());
    }

    fn notify_result(&self, source: ResultCode, resolved: ResultCode) {
        self.results.lock().unwrap().push((source, resolved));
    }

    fn notify_error(&self, error: &Error) {
        self.errors.lock().unwrap().push(error.to_string());
    }

    fn show_toast(&self, message: &str) {
        self.toasts.lock().unwrap().push(message.to_string());
    }

    fn prefetch(&self, links: &[String]) {
        self.prefetches.lock().unwrap().push(links.to_vec());
    }
}

/// Delays every exchange, so teardown can race an in-flight fetch.
struct SlowTransport {
    inner: Arc<MockTransport>,
    delay: Duration,
}

#[async_trait]
impl Transport for SlowTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, Error> {
        tokio::time::sleep(self.delay).await;
        self.inner.execute(request).await
    }
}

struct OfflineRuntime;

#[async_trait]
impl HostRuntime for OfflineRuntime {
    fn is_network_valid(&self) -> bool {
        false
    }

    async fn cookie(&self, _url: &str) -> Option<String> {
        None
    }

    async fn set_cookies(&self, _url: &str, _set_cookie: Vec<String>) {}
}

async fn engine_with(transport: Arc<MockTransport>, runtime: Arc<dyn HostRuntime>) -> Arc<SessionEngine> {
    let db = CacheDb::open_in_memory().await.unwrap();
    SessionEngine::from_parts(EngineConfig::default(), runtime, transport, db)
}

async fn wait_ready(session: &Arc<Session>) {
    let mut states = session.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let state = *states.borrow();
            if state == SessionState::Ready || state == SessionState::Destroyed {
                break;
            }
            states.changed().await.unwrap();
        }
    })
    .await
    .expect("session did not finish");
}

async fn teardown(engine: &Arc<SessionEngine>, session: Arc<Session>) {
    session.destroy();
    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.running_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session did not leave the registry");
}

#[tokio::test]
async fn test_first_load_caches_and_reports() {
    let transport = MockTransport::new();
    transport.push(
        200,
        vec![("etag", "e1".to_string()), ("template-tag", "t1".to_string())],
        PAGE,
    );
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let host = Arc::new(RecordingHost::default());
    let session = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    session.bind_host(host.clone());
    wait_ready(&session).await;

    // Empty validators advertised on a cold start.
    let requests = transport.recorded();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].headers.get("accept-diff"), Some("true"));
    assert_eq!(requests[0].headers.get("if-none-match"), Some(""));
    assert_eq!(requests[0].headers.get("template-tag"), Some(""));

    assert_eq!(host.pages.lock().unwrap().as_slice(), [PAGE.to_string()]);
    assert_eq!(
        host.results.lock().unwrap().as_slice(),
        [(ResultCode::FirstLoad, ResultCode::FirstLoad)]
    );

    let meta = engine.db().get_metadata(&session.id).await.unwrap();
    assert_eq!(meta.etag, "e1");
    assert_eq!(meta.template_tag, "t1");
    assert_eq!(meta.html_size, PAGE.len() as u64);
    assert!(engine.db().get_blob(&session.id, BlobKind::Template).await.unwrap().is_some());

    teardown(&engine, session).await;
}

#[tokio::test]
async fn test_cache_hit_on_304() {
    let transport = MockTransport::new();
    transport.push(
        200,
        vec![("etag", "e1".to_string()), ("template-tag", "t1".to_string())],
        PAGE,
    );
    transport.push(304, vec![], Bytes::new());
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let first = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    wait_ready(&first).await;
    teardown(&engine, first).await;

    let host = Arc::new(RecordingHost::default());
    let session = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    session.bind_host(host.clone());
    wait_ready(&session).await;

    // Second request carries the saved validators.
    let requests = transport.recorded();
    assert_eq!(requests[1].headers.get("if-none-match"), Some("e1"));
    assert_eq!(requests[1].headers.get("template-tag"), Some("t1"));

    // Cache painted first, then the hit confirmed.
    assert_eq!(host.pages.lock().unwrap().as_slice(), [PAGE.to_string()]);
    assert_eq!(
        host.results.lock().unwrap().as_slice(),
        [(ResultCode::HitCache, ResultCode::HitCache)]
    );
    assert_eq!(engine.db().get_metadata(&session.id).await.unwrap().cache_hit_count, 1);

    teardown(&engine, session).await;
}

#[tokio::test]
async fn test_data_update_merges_blocks() {
    let transport = MockTransport::new();
    transport.push(
        200,
        vec![("etag", "e1".to_string()), ("template-tag", "t1".to_string())],
        PAGE,
    );

    // Compute what the merged page must look like.
    let separated = diff::separate(PAGE).unwrap();
    let new_price = "<!--sonicdiff-price-->99<!--sonicdiff-price-end-->".to_string();
    let mut merged = separated.blocks.clone();
    merged.insert("{price}".to_string(), new_price.clone());
    let rebuilt = diff::rebuild(&separated.template, &merged);

    let payload = serde_json::json!({
        "data": { "{price}": new_price },
        "html-sha1": diff::hash::sha1_hex(rebuilt.as_bytes()),
        "template-tag": "t1",
    })
    .to_string();
    transport.push(
        200,
        vec![("etag", "e2".to_string()), ("template-tag", "t1".to_string()), ("template-change", "false".to_string())],
        payload,
    );

    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let first = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    wait_ready(&first).await;
    teardown(&engine, first).await;

    let host = Arc::new(RecordingHost::default());
    let config = SessionConfig { mode: SessionMode::Quick, ..Default::default() };
    let session = engine.create_session("https://example.com/news", config).unwrap();
    session.bind_host(host.clone());
    wait_ready(&session).await;

    // Quick mode: cache painted, then the diff applied in place.
    let pages = host.pages.lock().unwrap().clone();
    assert_eq!(pages.as_slice(), [PAGE.to_string()]);
    let updates = host.data_updates.lock().unwrap().clone();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].contains("99"));
    assert!(!updates[0].contains("{title}"), "unchanged blocks must not be re-sent");
    assert_eq!(
        host.results.lock().unwrap().as_slice(),
        [(ResultCode::DataUpdate, ResultCode::DataUpdate)]
    );

    // New generation persisted.
    let meta = engine.db().get_metadata(&session.id).await.unwrap();
    assert_eq!(meta.etag, "e2");
    let cached = engine.db().get_blob(&session.id, BlobKind::Document).await.unwrap().unwrap();
    assert_eq!(String::from_utf8_lossy(&cached), rebuilt);

    teardown(&engine, session).await;
}

#[tokio::test]
async fn test_template_change_replaces_page() {
    let transport = MockTransport::new();
    transport.push(
        200,
        vec![("etag", "e1".to_string()), ("template-tag", "t1".to_string())],
        PAGE,
    );
    let new_page = "<html><head><title>rebuilt</title></head><body>brand new layout</body></html>";
    transport.push(
        200,
        vec![("etag", "e2".to_string()), ("template-tag", "t2".to_string()), ("template-change", "true".to_string())],
        new_page,
    );

    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let first = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    wait_ready(&first).await;
    teardown(&engine, first).await;

    let host = Arc::new(RecordingHost::default());
    let session = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    session.bind_host(host.clone());
    wait_ready(&session).await;

    let pages = host.pages.lock().unwrap().clone();
    assert_eq!(pages.as_slice(), [PAGE.to_string(), new_page.to_string()]);
    assert_eq!(
        host.results.lock().unwrap().as_slice(),
        [(ResultCode::TemplateChange, ResultCode::TemplateChange)]
    );

    let meta = engine.db().get_metadata(&session.id).await.unwrap();
    assert_eq!(meta.etag, "e2");
    assert_eq!(meta.template_tag, "t2");

    teardown(&engine, session).await;
}

#[tokio::test]
async fn test_cache_offline_http_backs_off() {
    let transport = MockTransport::new();
    transport.push(200, vec![("cache-offline", "http".to_string())], PAGE);
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let host = Arc::new(RecordingHost::default());
    let session = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    session.bind_host(host.clone());
    wait_ready(&session).await;

    // Document still delivered, but nothing cached and the id is
    // gated off the protocol.
    assert_eq!(host.pages.lock().unwrap().as_slice(), [PAGE.to_string()]);
    assert!(engine.db().get_blob(&session.id, BlobKind::Document).await.unwrap().is_none());
    let now = chrono::Utc::now().to_rfc3339();
    assert!(!engine.db().is_session_available(&session.id, &now).await.unwrap());

    teardown(&engine, session).await;
}

#[tokio::test]
async fn test_offline_serves_cache_without_connecting() {
    let transport = MockTransport::new();
    transport.push(
        200,
        vec![("etag", "e1".to_string()), ("template-tag", "t1".to_string())],
        PAGE,
    );
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let first = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    wait_ready(&first).await;
    teardown(&engine, first).await;

    // Same cache database, network now down.
    let offline_engine = SessionEngine::from_parts(
        EngineConfig::default(),
        Arc::new(OfflineRuntime),
        transport.clone(),
        engine.db().clone(),
    );
    let host = Arc::new(RecordingHost::default());
    let config = SessionConfig { reload_in_bad_network: true, ..Default::default() };
    let session = offline_engine.create_session("https://example.com/news", config).unwrap();
    session.bind_host(host.clone());
    wait_ready(&session).await;

    assert_eq!(host.pages.lock().unwrap().as_slice(), [PAGE.to_string()]);
    assert_eq!(host.toasts.lock().unwrap().len(), 1);
    assert!(host.errors.lock().unwrap().is_empty());
    // No request left the device.
    assert_eq!(transport.recorded().len(), 1);

    teardown(&offline_engine, session).await;
}

#[tokio::test]
async fn test_validator_repair_downgrades_to_304() {
    let transport = MockTransport::new();
    // Plain server: no protocol headers at all, same body twice.
    transport.push(200, vec![], PAGE);
    transport.push(200, vec![], PAGE);
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let first = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    wait_ready(&first).await;

    let meta = engine.db().get_metadata(&first.id).await.unwrap();
    assert_eq!(meta.etag, diff::hash::sha1_hex(PAGE.as_bytes()));
    teardown(&engine, first).await;

    let host = Arc::new(RecordingHost::default());
    let session = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    session.bind_host(host.clone());
    wait_ready(&session).await;

    assert_eq!(
        host.results.lock().unwrap().as_slice(),
        [(ResultCode::HitCache, ResultCode::HitCache)]
    );

    teardown(&engine, session).await;
}

#[tokio::test]
async fn test_resource_intercept_serves_session_document() {
    let transport = MockTransport::new();
    transport.push(
        200,
        vec![("etag", "e1".to_string()), ("template-tag", "t1".to_string())],
        PAGE,
    );
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let session = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();

    let mut stream = session.on_resource_request().await.expect("document stream");
    let body = stream.read_to_end().await.unwrap();
    assert_eq!(String::from_utf8_lossy(&body), PAGE);

    // The intercept is single-shot.
    assert!(session.on_resource_request().await.is_none());

    teardown(&engine, session).await;
}

#[tokio::test]
async fn test_second_session_for_same_id_rejected_while_running() {
    let transport = MockTransport::new();
    transport.push(
        200,
        vec![("etag", "e1".to_string()), ("template-tag", "t1".to_string())],
        PAGE,
    );
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let session = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    let second = engine.create_session("https://example.com/news", SessionConfig::default());
    assert!(matches!(second, Err(Error::SessionRunning(_))));

    teardown(&engine, session).await;
}

#[tokio::test]
async fn test_preload_pool_capacity_and_adoption() {
    let transport = MockTransport::new();
    for _ in 0..7 {
        transport.push(
            200,
            vec![("etag", "e1".to_string()), ("template-tag", "t1".to_string())],
            PAGE,
        );
    }
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    for i in 0..5 {
        let url = format!("https://example.com/page{i}");
        assert!(engine.pre_create_session(&url, SessionConfig::default()).await.unwrap());
    }
    // Pool is full.
    assert!(!engine.pre_create_session("https://example.com/page5", SessionConfig::default()).await.unwrap());
    // Duplicate id is refused too.
    assert!(!engine.pre_create_session("https://example.com/page0", SessionConfig::default()).await.unwrap());
    assert_eq!(engine.preloaded_count(), 5);

    // A real load adopts the preloaded session instead of re-fetching.
    let session = engine
        .create_session("https://example.com/page0", SessionConfig::default())
        .unwrap();
    wait_ready(&session).await;
    assert_eq!(engine.preloaded_count(), 4);
    assert_eq!(engine.running_count(), 1);

    teardown(&engine, session).await;
}

#[tokio::test]
async fn test_clean_cache_refused_while_sessions_live() {
    let transport = MockTransport::new();
    transport.push(
        200,
        vec![("etag", "e1".to_string()), ("template-tag", "t1".to_string())],
        PAGE,
    );
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let session = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    wait_ready(&session).await;

    assert!(!engine.clean_cache().await.unwrap());

    teardown(&engine, session.clone()).await;
    assert!(engine.clean_cache().await.unwrap());
    let meta = engine.db().get_metadata(&session.id).await.unwrap();
    assert!(meta.is_empty());
}

#[tokio::test]
async fn test_cache_offline_store_keeps_current_view() {
    let transport = MockTransport::new();
    transport.push(
        200,
        vec![("etag", "e1".to_string()), ("template-tag", "t1".to_string())],
        PAGE,
    );
    let new_page = "<html><head><title>v2</title></head><body>new layout</body></html>";
    transport.push(
        200,
        vec![
            ("etag", "e2".to_string()),
            ("template-tag", "t2".to_string()),
            ("template-change", "true".to_string()),
            ("cache-offline", "store".to_string()),
        ],
        new_page,
    );
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let first = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    wait_ready(&first).await;
    teardown(&engine, first).await;

    let host = Arc::new(RecordingHost::default());
    let session = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    session.bind_host(host.clone());
    wait_ready(&session).await;

    // The old page stays up; only the cache advances.
    assert_eq!(host.pages.lock().unwrap().as_slice(), [PAGE.to_string()]);
    let meta = engine.db().get_metadata(&session.id).await.unwrap();
    assert_eq!(meta.etag, "e2");
    let cached = engine.db().get_blob(&session.id, BlobKind::Document).await.unwrap().unwrap();
    assert_eq!(String::from_utf8_lossy(&cached), new_page);

    teardown(&engine, session).await;
}

#[tokio::test]
async fn test_destroy_is_idempotent_and_blocks_restart() {
    let transport = MockTransport::new();
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let config = SessionConfig { auto_start: false, ..Default::default() };
    let session = engine.create_session("https://example.com/news", config).unwrap();
    assert_eq!(session.state(), SessionState::None);

    session.destroy();
    session.destroy();
    assert_eq!(session.state(), SessionState::Destroyed);

    // A destroyed session never starts a worker.
    let scheduler = sonic_client::Scheduler::new(1);
    assert!(!session.start(&scheduler));
    assert_eq!(transport.recorded().len(), 0);

    teardown(&engine, session).await;
}

#[tokio::test]
async fn test_server_error_reported_to_host() {
    let transport = MockTransport::new();
    transport.push(502, vec![], Bytes::new());
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let host = Arc::new(RecordingHost::default());
    let session = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    session.bind_host(host.clone());
    wait_ready(&session).await;

    let errors = host.errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("502"));
    // Unrecoverable, nothing painted: the host is told to navigate
    // directly instead.
    assert_eq!(
        host.pages.lock().unwrap().as_slice(),
        ["url:https://example.com/news".to_string()]
    );

    teardown(&engine, session).await;
}

#[tokio::test]
async fn test_corrupt_cache_purged_and_reloaded() {
    let transport = MockTransport::new();
    transport.push(
        200,
        vec![("etag", "e1".to_string()), ("template-tag", "t1".to_string())],
        PAGE,
    );
    transport.push(
        200,
        vec![("etag", "e2".to_string()), ("template-tag", "t2".to_string())],
        PAGE,
    );
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let first = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    wait_ready(&first).await;
    let id = first.id.clone();
    teardown(&engine, first).await;

    // The stored hash no longer matches the on-disk document.
    let mut meta = engine.db().get_metadata(&id).await.unwrap();
    meta.html_sha1 = "0".repeat(40);
    engine.db().upsert_metadata(&meta).await.unwrap();

    let host = Arc::new(RecordingHost::default());
    let session = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    session.bind_host(host.clone());
    wait_ready(&session).await;

    // The purged entry's validators must not go out; the server cannot
    // 304 against a document we no longer hold.
    let requests = transport.recorded();
    assert_eq!(requests[1].headers.get("if-none-match"), Some(""));
    assert_eq!(requests[1].headers.get("template-tag"), Some(""));

    assert_eq!(host.pages.lock().unwrap().as_slice(), [PAGE.to_string()]);
    assert_eq!(
        host.results.lock().unwrap().as_slice(),
        [(ResultCode::FirstLoad, ResultCode::FirstLoad)]
    );

    // A fresh generation replaced the corrupt one.
    let meta = engine.db().get_metadata(&id).await.unwrap();
    assert_eq!(meta.etag, "e2");

    teardown(&engine, session).await;
}

#[tokio::test]
async fn test_destroy_defers_until_worker_finishes() {
    let transport = MockTransport::new();
    transport.push(
        200,
        vec![("etag", "e1".to_string()), ("template-tag", "t1".to_string())],
        PAGE,
    );
    let slow = Arc::new(SlowTransport { inner: transport.clone(), delay: Duration::from_millis(300) });
    let db = CacheDb::open_in_memory().await.unwrap();
    let engine = SessionEngine::from_parts(EngineConfig::default(), Arc::new(sonic_client::NullRuntime), slow, db);

    let session = engine
        .create_session("https://example.com/news", SessionConfig::default())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Worker is mid-fetch: teardown is deferred, and the id stays
    // claimed so no second worker can run against it.
    session.destroy();
    assert_ne!(session.state(), SessionState::Destroyed);
    let second = engine.create_session("https://example.com/news", SessionConfig::default());
    assert!(matches!(second, Err(Error::SessionRunning(_))));

    let mut states = session.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *states.borrow() != SessionState::Destroyed {
            states.changed().await.unwrap();
        }
    })
    .await
    .expect("session did not destroy after worker finished");

    assert_eq!(transport.recorded().len(), 1);
}

#[tokio::test]
async fn test_preload_refused_while_protocol_unavailable() {
    let transport = MockTransport::new();
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    let id = engine
        .session_id_for("https://example.com/news", &SessionConfig::default())
        .unwrap();
    let until = (chrono::Utc::now() + chrono::Duration::hours(6)).to_rfc3339();
    engine.db().set_unavailable_until(&id, &until).await.unwrap();

    let accepted = engine
        .pre_create_session("https://example.com/news", SessionConfig::default())
        .await
        .unwrap();
    assert!(!accepted);
    assert_eq!(engine.preloaded_count(), 0);
    assert_eq!(transport.recorded().len(), 0);
}

#[tokio::test]
async fn test_clean_cache_evicts_preloads_then_wipes() {
    let transport = MockTransport::new();
    // Non-caching responses keep the wipe free of racing saves.
    transport.push(200, vec![("cache-offline", "false".to_string())], PAGE);
    transport.push(200, vec![("cache-offline", "false".to_string())], PAGE);
    let engine = engine_with(transport.clone(), Arc::new(sonic_client::NullRuntime)).await;

    assert!(engine.pre_create_session("https://example.com/a", SessionConfig::default()).await.unwrap());
    assert!(engine.pre_create_session("https://example.com/b", SessionConfig::default()).await.unwrap());
    assert_eq!(engine.preloaded_count(), 2);

    // Preloads are destroyed and evicted, then the store is wiped.
    assert!(engine.clean_cache().await.unwrap());
    assert_eq!(engine.preloaded_count(), 0);
    assert_eq!(engine.db().total_blob_bytes().await.unwrap(), 0);
}
