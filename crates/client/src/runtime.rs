//! Host environment abstraction.
//!
//! The engine runs inside some embedding application that owns network
//! reachability, cookie storage, and user identity. This trait is the
//! engine's only view of that application.

use async_trait::async_trait;

/// Services the embedding application provides to the engine.
///
/// Implementations must be cheap to call from worker tasks; cookie
/// accessors may touch storage and are therefore async.
#[async_trait]
pub trait HostRuntime: Send + Sync + 'static {
    /// Whether the network is currently reachable. Consulted before
    /// deciding to serve stale cache with a reload hint.
    fn is_network_valid(&self) -> bool;

    /// User-Agent suffix appended to the engine's own.
    fn user_agent(&self) -> String {
        String::new()
    }

    /// Current signed-in account id, or empty when anonymous. Salts
    /// session ids for account-scoped URLs.
    fn account_id(&self) -> String {
        String::new()
    }

    /// Cookie header value for a URL, or None when no cookies apply.
    async fn cookie(&self, url: &str) -> Option<String>;

    /// Store Set-Cookie values received for a URL.
    async fn set_cookies(&self, url: &str, set_cookie: Vec<String>);
}

/// Runtime for tests and headless use: network always up, no cookies,
/// anonymous.
#[derive(Debug, Default)]
pub struct NullRuntime;

#[async_trait]
impl HostRuntime for NullRuntime {
    fn is_network_valid(&self) -> bool {
        true
    }

    async fn cookie(&self, _url: &str) -> Option<String> {
        None
    }

    async fn set_cookies(&self, _url: &str, _set_cookie: Vec<String>) {}
}
