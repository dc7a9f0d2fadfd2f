//! Session engine: session registry, preload pool, cache maintenance.
//!
//! One engine per process. It enforces the one-running-session-per-id
//! rule, keeps a small pool of speculatively started sessions, and is
//! the only place cache-wide maintenance is allowed to run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sonic_core::{CacheDb, EngineConfig, Error};

use crate::connector::{ReqwestTransport, Transport};
use crate::runtime::HostRuntime;
use crate::scheduler::Scheduler;
use crate::session::{Session, SessionConfig, SessionState};
use crate::session_id::session_id;

/// Worker concurrency bound shared by all sessions.
const MAX_CONCURRENT_WORKERS: usize = 4;

#[derive(Default)]
struct Registry {
    running: HashMap<String, Arc<Session>>,
    preloaded: HashMap<String, Arc<Session>>,
}

/// Process-wide session engine.
pub struct SessionEngine {
    config: EngineConfig,
    db: CacheDb,
    runtime: Arc<dyn HostRuntime>,
    transport: Arc<dyn Transport>,
    scheduler: Scheduler,
    registry: Mutex<Registry>,
}

impl SessionEngine {
    /// Open the cache database and stand the engine up with the
    /// default HTTP transport.
    pub async fn init(config: EngineConfig, runtime: Arc<dyn HostRuntime>) -> Result<Arc<Self>, Error> {
        let mut user_agent = config.user_agent.clone();
        let suffix = runtime.user_agent();
        if !suffix.is_empty() {
            user_agent.push(' ');
            user_agent.push_str(&suffix);
        }
        let transport = Arc::new(ReqwestTransport::new(&user_agent, Duration::from_secs(5))?);
        let db = CacheDb::open(&config.db_path).await?;
        Ok(Self::from_parts(config, runtime, transport, db))
    }

    /// Assemble an engine from explicit parts. Embedders with custom
    /// transports and tests use this.
    pub fn from_parts(
        config: EngineConfig,
        runtime: Arc<dyn HostRuntime>,
        transport: Arc<dyn Transport>,
        db: CacheDb,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            db,
            runtime,
            transport,
            scheduler: Scheduler::new(MAX_CONCURRENT_WORKERS),
            registry: Mutex::new(Registry::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    /// Derive the session id the engine would use for a URL.
    pub fn session_id_for(&self, url: &str, config: &SessionConfig) -> Result<String, Error> {
        let account = if config.account_related { self.runtime.account_id() } else { String::new() };
        session_id(url, &account)
    }

    /// Create (or adopt from the preload pool) a session for a URL.
    ///
    /// At most one session per id may be live at a time; a second
    /// create for the same id fails until the first is destroyed.
    pub fn create_session(self: &Arc<Self>, url: &str, config: SessionConfig) -> Result<Arc<Session>, Error> {
        let id = self.session_id_for(url, &config)?;
        let mut registry = self.registry.lock().unwrap();

        if registry.running.contains_key(&id) {
            return Err(Error::SessionRunning(id));
        }

        if let Some(preloaded) = registry.preloaded.remove(&id) {
            if preloaded.config().compatible_with(&config) && !preloaded.preload_expired() {
                registry.running.insert(id, preloaded.clone());
                tracing::debug!(session_id = %preloaded.id, "adopting preloaded session");
                return Ok(preloaded);
            }
            // Incompatible or stale preload: tear it down and start over.
            preloaded.destroy();
        }

        let session = Session::new(
            id.clone(),
            url.to_string(),
            config,
            self.config.clone(),
            self.db.clone(),
            self.runtime.clone(),
            self.transport.clone(),
        );
        registry.running.insert(id, session.clone());
        drop(registry);

        self.evict_on_destroy(&session);
        if session.config().auto_start {
            session.start(&self.scheduler);
        }
        Ok(session)
    }

    /// Speculatively start a session so its server round-trip overlaps
    /// with whatever the host is doing. Returns false when the id is
    /// already live, gated off the protocol, or the pool is full.
    pub async fn pre_create_session(self: &Arc<Self>, url: &str, config: SessionConfig) -> Result<bool, Error> {
        let id = self.session_id_for(url, &config)?;

        // No point warming an id the server told us to leave alone.
        let now = chrono::Utc::now().to_rfc3339();
        if !self.db.is_session_available(&id, &now).await? {
            tracing::debug!(session_id = %id, "preload refused: protocol unavailable");
            return Ok(false);
        }

        let mut registry = self.registry.lock().unwrap();

        // Drop preloads nobody claimed in time.
        let expired: Vec<String> = registry
            .preloaded
            .iter()
            .filter(|(_, s)| s.preload_expired())
            .map(|(id, _)| id.clone())
            .collect();
        for expired_id in expired {
            if let Some(stale) = registry.preloaded.remove(&expired_id) {
                stale.destroy();
            }
        }

        if registry.running.contains_key(&id) || registry.preloaded.contains_key(&id) {
            return Ok(false);
        }
        if registry.preloaded.len() >= self.config.max_preload_sessions {
            tracing::debug!(session_id = %id, "preload pool full");
            return Ok(false);
        }

        let session = Session::new(
            id.clone(),
            url.to_string(),
            config,
            self.config.clone(),
            self.db.clone(),
            self.runtime.clone(),
            self.transport.clone(),
        );
        registry.preloaded.insert(id, session.clone());
        drop(registry);

        self.evict_on_destroy(&session);
        session.start(&self.scheduler);
        Ok(true)
    }

    /// Number of live (running) sessions.
    pub fn running_count(&self) -> usize {
        self.registry.lock().unwrap().running.len()
    }

    /// Number of sessions waiting in the preload pool.
    pub fn preloaded_count(&self) -> usize {
        self.registry.lock().unwrap().preloaded.len()
    }

    /// Wipe the whole cache. The preload pool is destroyed and evicted
    /// first; the wipe itself is refused while any running session
    /// could re-persist mid-wipe.
    pub async fn clean_cache(&self) -> Result<bool, Error> {
        let preloaded: Vec<Arc<Session>> = {
            let mut registry = self.registry.lock().unwrap();
            registry.preloaded.drain().map(|(_, session)| session).collect()
        };
        for session in preloaded {
            session.destroy();
        }
        {
            let registry = self.registry.lock().unwrap();
            if !registry.running.is_empty() {
                tracing::warn!("clean_cache refused: sessions still running");
                return Ok(false);
            }
        }
        self.db.clear_all().await?;
        Ok(true)
    }

    /// Remove one URL's cache entry. Refused while that id is live.
    pub async fn remove_session_cache(&self, url: &str, config: &SessionConfig) -> Result<bool, Error> {
        let id = self.session_id_for(url, config)?;
        {
            let registry = self.registry.lock().unwrap();
            if registry.running.contains_key(&id) || registry.preloaded.contains_key(&id) {
                return Ok(false);
            }
        }
        self.db.remove_session(&id).await?;
        Ok(true)
    }

    /// Drop the session from the registry once it reaches Destroyed.
    fn evict_on_destroy(self: &Arc<Self>, session: &Arc<Session>) {
        let mut states = session.subscribe_state();
        let engine = self.clone();
        let id = session.id.clone();
        tokio::spawn(async move {
            loop {
                if *states.borrow() == SessionState::Destroyed {
                    break;
                }
                if states.changed().await.is_err() {
                    break;
                }
            }
            let mut registry = engine.registry.lock().unwrap();
            registry.running.remove(&id);
            registry.preloaded.remove(&id);
        });
    }
}
