//! Delivery strategies.
//!
//! Standard mode holds everything until one final answer can be given;
//! Quick mode paints the cache immediately and streams refinements.
//! Both see the same worker events; only the host-facing choreography
//! differs.

use std::sync::atomic::{AtomicBool, Ordering};

use super::host::{ResultCode, SessionHost};

/// Host-facing choreography for one session.
pub trait Delivery: Send + Sync {
    /// Cached document became available before the server answered.
    fn on_cache_ready(&self, host: &dyn SessionHost, html: &str);

    /// Server produced a complete document (first load or template
    /// change).
    fn on_fresh_document(&self, host: &dyn SessionHost, html: &str, headers: &[(String, String)], source: ResultCode);

    /// Server produced a data-only update. `diff_json` is the changed
    /// block set; `rebuilt_html` the full document after merging.
    fn on_data_update(&self, host: &dyn SessionHost, diff_json: &str, rebuilt_html: &str);

    /// Server confirmed the cache is current.
    fn on_cache_hit(&self, host: &dyn SessionHost);
}

/// Hold results and deliver once: the host gets whichever document is
/// final, never an intermediate repaint.
#[derive(Default)]
pub struct StandardDelivery {
    painted: AtomicBool,
}

impl Delivery for StandardDelivery {
    fn on_cache_ready(&self, host: &dyn SessionHost, html: &str) {
        if !self.painted.swap(true, Ordering::SeqCst) {
            host.load_page(html, &[]);
        }
    }

    fn on_fresh_document(&self, host: &dyn SessionHost, html: &str, headers: &[(String, String)], source: ResultCode) {
        host.load_page(html, headers);
        self.painted.store(true, Ordering::SeqCst);
        host.notify_result(source, source);
    }

    fn on_data_update(&self, host: &dyn SessionHost, _diff_json: &str, rebuilt_html: &str) {
        // Standard mode never merges in place; the rebuilt document
        // replaces the page wholesale.
        host.load_page(rebuilt_html, &[]);
        self.painted.store(true, Ordering::SeqCst);
        host.notify_result(ResultCode::DataUpdate, ResultCode::TemplateChange);
    }

    fn on_cache_hit(&self, host: &dyn SessionHost) {
        host.notify_result(ResultCode::HitCache, ResultCode::HitCache);
    }
}

/// Paint the cache as soon as it exists, then refine in place.
#[derive(Default)]
pub struct QuickDelivery {
    painted: AtomicBool,
}

impl Delivery for QuickDelivery {
    fn on_cache_ready(&self, host: &dyn SessionHost, html: &str) {
        if !self.painted.swap(true, Ordering::SeqCst) {
            host.load_page(html, &[]);
        }
    }

    fn on_fresh_document(&self, host: &dyn SessionHost, html: &str, headers: &[(String, String)], source: ResultCode) {
        host.load_page(html, headers);
        self.painted.store(true, Ordering::SeqCst);
        host.notify_result(source, source);
    }

    fn on_data_update(&self, host: &dyn SessionHost, diff_json: &str, rebuilt_html: &str) {
        // The cache may not have painted yet (server beat the view);
        // fall back to a full load in that case.
        if self.painted.load(Ordering::SeqCst) {
            host.apply_data_update(diff_json);
            host.notify_result(ResultCode::DataUpdate, ResultCode::DataUpdate);
        } else {
            host.load_page(rebuilt_html, &[]);
            self.painted.store(true, Ordering::SeqCst);
            host.notify_result(ResultCode::DataUpdate, ResultCode::TemplateChange);
        }
    }

    fn on_cache_hit(&self, host: &dyn SessionHost) {
        host.notify_result(ResultCode::HitCache, ResultCode::HitCache);
    }
}
