//! Session metadata CRUD operations.
//!
//! One row per session id, holding the negotiated validators (etag,
//! template tag) and cache bookkeeping. A session with no row behaves
//! as a zero-value record, which the protocol reads as "first load".

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Persisted per-session cache metadata.
///
/// `etag` validates the full document; `template_tag` validates the
/// template alone. Both empty means nothing is cached for this id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub etag: String,
    pub template_tag: String,
    /// Content hash of the cached document, kept separately from the
    /// etag because real server etags are opaque.
    pub html_sha1: String,
    pub html_size: u64,
    /// RFC 3339 timestamp of the last template write.
    pub template_updated_at: Option<String>,
    /// RFC 3339 expiry derived from the server's Cache-Control.
    pub expires_at: Option<String>,
    /// RFC 3339 end of the protocol-unavailable backoff window.
    pub unavailable_until: Option<String>,
    pub cache_hit_count: i64,
}

impl SessionMetadata {
    /// True when no validator is cached, i.e. the next request is a
    /// first load.
    pub fn is_empty(&self) -> bool {
        self.etag.is_empty() && self.template_tag.is_empty()
    }
}

impl CacheDb {
    /// Get metadata for a session id.
    ///
    /// Returns a zero-value record (empty validators) when the id has
    /// never been cached, so callers never branch on a missing row.
    pub async fn get_metadata(&self, session_id: &str) -> Result<SessionMetadata, Error> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| -> Result<SessionMetadata, Error> {
                let result = conn.query_row(
                    "SELECT session_id, etag, template_tag, html_sha1, html_size,
                            template_updated_at, expires_at, unavailable_until, cache_hit_count
                     FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    |row| {
                        Ok(SessionMetadata {
                            session_id: row.get(0)?,
                            etag: row.get(1)?,
                            template_tag: row.get(2)?,
                            html_sha1: row.get(3)?,
                            html_size: row.get::<_, i64>(4)? as u64,
                            template_updated_at: row.get(5)?,
                            expires_at: row.get(6)?,
                            unavailable_until: row.get(7)?,
                            cache_hit_count: row.get(8)?,
                        })
                    },
                );

                match result {
                    Ok(meta) => Ok(meta),
                    Err(rusqlite::Error::QueryReturnedNoRows) => {
                        Ok(SessionMetadata { session_id, ..Default::default() })
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or update session metadata.
    ///
    /// Uses UPSERT semantics keyed on session id. `cache_hit_count` is
    /// preserved across updates; use [`CacheDb::record_cache_hit`] to
    /// bump it.
    pub async fn upsert_metadata(&self, meta: &SessionMetadata) -> Result<(), Error> {
        let meta = meta.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO sessions (
                        session_id, etag, template_tag, html_sha1, html_size,
                        template_updated_at, expires_at, unavailable_until, cache_hit_count
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    ON CONFLICT(session_id) DO UPDATE SET
                        etag = excluded.etag,
                        template_tag = excluded.template_tag,
                        html_sha1 = excluded.html_sha1,
                        html_size = excluded.html_size,
                        template_updated_at = excluded.template_updated_at,
                        expires_at = excluded.expires_at,
                        unavailable_until = excluded.unavailable_until",
                    params![
                        &meta.session_id,
                        &meta.etag,
                        &meta.template_tag,
                        &meta.html_sha1,
                        meta.html_size as i64,
                        &meta.template_updated_at,
                        &meta.expires_at,
                        &meta.unavailable_until,
                        meta.cache_hit_count,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Mark a session id unavailable for the sync protocol until the
    /// given RFC 3339 instant.
    ///
    /// Creates the row if the id was never cached, so the gate survives
    /// a cache purge of the blobs.
    pub async fn set_unavailable_until(&self, session_id: &str, until: &str) -> Result<(), Error> {
        let session_id = session_id.to_string();
        let until = until.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO sessions (session_id, unavailable_until) VALUES (?1, ?2)
                     ON CONFLICT(session_id) DO UPDATE SET unavailable_until = excluded.unavailable_until",
                    params![session_id, until],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Check whether the sync protocol may be used for this id at the
    /// given RFC 3339 instant.
    ///
    /// Missing rows are available. RFC 3339 UTC strings compare
    /// lexicographically, so this is a plain string comparison.
    pub async fn is_session_available(&self, session_id: &str, now: &str) -> Result<bool, Error> {
        let session_id = session_id.to_string();
        let now = now.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let available: bool = conn
                    .query_row(
                        "SELECT NOT EXISTS(
                            SELECT 1 FROM sessions
                            WHERE session_id = ?1
                            AND unavailable_until IS NOT NULL
                            AND unavailable_until > ?2
                        )",
                        params![session_id, now],
                        |row| row.get(0),
                    )
                    .map_err(Error::from)?;
                Ok(available)
            })
            .await
            .map_err(Error::from)
    }

    /// Bump the cache hit counter for a session id.
    pub async fn record_cache_hit(&self, session_id: &str) -> Result<(), Error> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "UPDATE sessions SET cache_hit_count = cache_hit_count + 1 WHERE session_id = ?1",
                    params![session_id],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Remove a session's metadata and blobs.
    pub async fn remove_session(&self, session_id: &str) -> Result<(), Error> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM blobs WHERE session_id = ?1", params![session_id])?;
                tx.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Remove every session's metadata and blobs.
    ///
    /// The engine refuses to call this while any session is running.
    pub async fn clear_all(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM blobs", [])?;
                tx.execute("DELETE FROM sessions", [])?;
                tx.execute("DELETE FROM engine_meta", [])?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}
