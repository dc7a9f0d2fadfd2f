//! Per-session configuration.

use std::time::Duration;

/// How results reach the host view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Hold server results until the host attaches, then deliver the
    /// best available document in one shot.
    #[default]
    Standard,
    /// Show the cache immediately and stream refinements (data diffs,
    /// template reloads) as they arrive.
    Quick,
}

/// Configuration for one session.
///
/// Engine-wide knobs (cache budget, backoff) live in
/// `sonic_core::EngineConfig`; everything here can vary per URL.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delivery mode (default: Standard).
    pub mode: SessionMode,

    /// TCP/TLS connect timeout (default: 5s).
    pub connect_timeout: Duration,

    /// Whole-body read timeout (default: 15s).
    pub read_timeout: Duration,

    /// Advertise `accept-diff` so the server may answer with data-only
    /// payloads (default: true).
    pub accept_diff: bool,

    /// Start the worker at session creation rather than waiting for
    /// the host to attach (default: true).
    pub auto_start: bool,

    /// How long a preloaded session waits for a host before expiring
    /// (default: 3 minutes).
    pub preload_expiry: Duration,

    /// Repair missing validators locally so plain HTTP servers still
    /// get diff semantics (default: true).
    pub support_local_server: bool,

    /// Honor Cache-Control max-age for cache expiry (default: false).
    pub support_cache_control: bool,

    /// Salt the session id with the signed-in account (default: false).
    pub account_related: bool,

    /// When the network is down and cache is served, tell the host to
    /// offer a reload (default: false).
    pub reload_in_bad_network: bool,

    /// On an unrecoverable fetch error with nothing painted, instruct
    /// the host to load the URL directly instead (default: true).
    pub direct_load_on_error: bool,

    /// Toast shown by the host alongside a bad-network reload offer.
    pub bad_network_toast: String,

    /// Extra request headers, appended after the protocol's own.
    pub custom_headers: Vec<(String, String)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Standard,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(15),
            accept_diff: true,
            auto_start: true,
            preload_expiry: Duration::from_secs(180),
            support_local_server: true,
            support_cache_control: false,
            account_related: false,
            reload_in_bad_network: false,
            direct_load_on_error: true,
            bad_network_toast: "Network unavailable, showing saved copy".to_string(),
            custom_headers: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Whether a preloaded session built with `self` can serve a load
    /// requested with `other`. Only fields that change protocol
    /// behavior participate.
    pub fn compatible_with(&self, other: &SessionConfig) -> bool {
        self.mode == other.mode && self.support_local_server == other.support_local_server
    }
}
