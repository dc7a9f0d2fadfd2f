//! Session id derivation from URLs.
//!
//! Two URLs map to the same session id when they share authority and
//! path and agree on every significant query parameter. Parameters
//! named in `sonic_remain_params` and parameters carrying the reserved
//! `sonic_` prefix are significant; the rest (tracking codes,
//! timestamps) are ignored so they don't fragment the cache.

use sha1::{Digest, Sha1};
use sonic_core::Error;
use url::Url;

/// Query parameter holding the comma-separated list of parameter names
/// that stay significant for id derivation.
const REMAIN_PARAMS_KEY: &str = "sonic_remain_params";

/// Parameters with this prefix are always significant. The allow-list
/// itself is excluded; its value is an instruction, not page identity.
const RESERVED_PREFIX: &str = "sonic_";

/// Derive the cache session id for a URL.
///
/// When `account` is non-empty the id is salted with it, so cached
/// documents never leak across signed-in users.
///
/// # Errors
///
/// Returns `Error::InvalidUrl` if the URL does not parse or has no
/// host.
pub fn session_id(url_str: &str, account: &str) -> Result<String, Error> {
    let url = Url::parse(url_str.trim()).map_err(|e| Error::InvalidUrl(format!("{url_str}: {e}")))?;
    let host = url.host_str().ok_or_else(|| Error::InvalidUrl(format!("{url_str}: no host")))?;

    let mut identity = String::new();
    if !account.is_empty() {
        identity.push_str(account);
        identity.push('_');
    }
    identity.push_str(host);
    if let Some(port) = url.port() {
        identity.push(':');
        identity.push_str(&port.to_string());
    }
    identity.push_str(url.path());

    let remain: Vec<String> = url
        .query_pairs()
        .find(|(k, _)| k == REMAIN_PARAMS_KEY)
        .map(|(_, v)| v.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    let mut significant: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            (k.starts_with(RESERVED_PREFIX) && k.as_ref() != REMAIN_PARAMS_KEY)
                || remain.iter().any(|r| r == k)
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    significant.sort();

    for (key, value) in significant {
        identity.push('&');
        identity.push_str(&key);
        identity.push('=');
        identity.push_str(&value);
    }

    let mut hasher = Sha1::new();
    hasher.update(identity.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
