//! Host view callbacks.
//!
//! The session drives whatever is rendering the page (a webview, a
//! test harness) through this trait. Callbacks fire from worker tasks,
//! so implementations must be `Send + Sync` and cheap.

/// How a session load was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultCode {
    /// Not resolved yet.
    #[default]
    Unknown,
    /// No cache; the document came straight from the server.
    FirstLoad,
    /// Template changed; the full new document was loaded.
    TemplateChange,
    /// Template held; only data blocks were refreshed.
    DataUpdate,
    /// Server confirmed the cache is current.
    HitCache,
}

impl ResultCode {
    /// Wire/stat value, matching the protocol's conventions.
    pub fn as_i32(self) -> i32 {
        match self {
            ResultCode::Unknown => -1,
            ResultCode::FirstLoad => 1000,
            ResultCode::TemplateChange => 2000,
            ResultCode::DataUpdate => 200,
            ResultCode::HitCache => 304,
        }
    }
}

/// Callbacks from a session to its host view.
pub trait SessionHost: Send + Sync + 'static {
    /// Navigate to a URL; the page will be re-requested through the
    /// session's resource intercept.
    fn load_url(&self, url: &str);

    /// Render a complete document.
    fn load_page(&self, html: &str, headers: &[(String, String)]);

    /// Apply a data-block diff to the already-rendered page. The
    /// payload is the JSON object of changed blocks.
    fn apply_data_update(&self, diff_json: &str);

    /// Final resolution of the load. `source` is how the server
    /// answered, `resolved` what the host actually experienced (they
    /// differ when a data update rebuilds into a full page load).
    fn notify_result(&self, source: ResultCode, resolved: ResultCode);

    /// Unrecoverable failure for this load.
    fn notify_error(&self, error: &sonic_core::Error);

    /// Transient message for the user.
    fn show_toast(&self, message: &str);

    /// Resource prefetch hints from the server's `sonic-link` header.
    fn prefetch(&self, links: &[String]) {
        let _ = links;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_values() {
        assert_eq!(ResultCode::Unknown.as_i32(), -1);
        assert_eq!(ResultCode::FirstLoad.as_i32(), 1000);
        assert_eq!(ResultCode::TemplateChange.as_i32(), 2000);
        assert_eq!(ResultCode::DataUpdate.as_i32(), 200);
        assert_eq!(ResultCode::HitCache.as_i32(), 304);
    }
}
