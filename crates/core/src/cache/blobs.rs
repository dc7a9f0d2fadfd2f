//! Blob storage and budget-driven trimming.
//!
//! Each session id owns up to three blobs: the full document, the
//! separated template, and the data-block JSON. Metadata and blobs are
//! written in one transaction so readers never observe validators that
//! point at missing or stale bytes.

use super::connection::CacheDb;
use super::metadata::SessionMetadata;
use crate::Error;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Blob kind discriminant, stored as TEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Document,
    Template,
    Data,
}

impl BlobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlobKind::Document => "document",
            BlobKind::Template => "template",
            BlobKind::Data => "data",
        }
    }
}

/// Fraction of the budget above which a trim pass fires.
const TRIM_TRIGGER: f64 = 0.8;

/// Fraction of the budget the trim pass deletes down to.
const TRIM_TARGET: f64 = 0.25;

const LAST_TRIM_CHECK_KEY: &str = "last_trim_check";

impl CacheDb {
    /// Persist a session's metadata and blobs in one transaction.
    ///
    /// All three blobs and the metadata row commit together or not at
    /// all; a crash mid-save leaves the previous generation intact.
    pub async fn save_session(
        &self,
        meta: &SessionMetadata,
        document: &[u8],
        template: &[u8],
        data: &[u8],
    ) -> Result<(), Error> {
        let meta = meta.clone();
        let document = document.to_vec();
        let template = template.to_vec();
        let data = data.to_vec();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
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
                for (kind, bytes) in [
                    (BlobKind::Document, &document),
                    (BlobKind::Template, &template),
                    (BlobKind::Data, &data),
                ] {
                    tx.execute(
                        "INSERT INTO blobs (session_id, kind, bytes, updated_at)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(session_id, kind) DO UPDATE SET
                             bytes = excluded.bytes,
                             updated_at = excluded.updated_at",
                        params![&meta.session_id, kind.as_str(), bytes, &now],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get one blob for a session id.
    ///
    /// Returns None if the blob doesn't exist in the cache.
    pub async fn get_blob(&self, session_id: &str, kind: BlobKind) -> Result<Option<Vec<u8>>, Error> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Vec<u8>>, Error> {
                let result = conn.query_row(
                    "SELECT bytes FROM blobs WHERE session_id = ?1 AND kind = ?2",
                    params![session_id, kind.as_str()],
                    |row| row.get(0),
                );
                match result {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Total bytes held across all blobs.
    pub async fn total_blob_bytes(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let total: i64 = conn
                    .query_row("SELECT COALESCE(SUM(LENGTH(bytes)), 0) FROM blobs", [], |row| row.get(0))
                    .map_err(Error::from)?;
                Ok(total as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Trim the blob store if it exceeds 80% of the budget, deleting
    /// least-recently-written sessions until usage drops to 25%.
    ///
    /// The check itself is rate-limited: it runs at most once per
    /// `check_interval`, tracked in `engine_meta`. Returns the number
    /// of sessions evicted.
    pub async fn trim_if_over_budget(
        &self,
        max_cache_bytes: u64,
        check_interval: chrono::Duration,
    ) -> Result<u64, Error> {
        let now = chrono::Utc::now();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let last_check: Option<String> = match conn.query_row(
                    "SELECT value FROM engine_meta WHERE key = ?1",
                    params![LAST_TRIM_CHECK_KEY],
                    |row| row.get(0),
                ) {
                    Ok(v) => Some(v),
                    Err(rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => return Err(e.into()),
                };

                if let Some(last) = last_check {
                    let due = (now - check_interval).to_rfc3339();
                    if last > due {
                        return Ok(0);
                    }
                }

                conn.execute(
                    "INSERT INTO engine_meta (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![LAST_TRIM_CHECK_KEY, now.to_rfc3339()],
                )?;

                let total: i64 =
                    conn.query_row("SELECT COALESCE(SUM(LENGTH(bytes)), 0) FROM blobs", [], |row| row.get(0))?;
                let trigger = (max_cache_bytes as f64 * TRIM_TRIGGER) as i64;
                if total <= trigger {
                    return Ok(0);
                }

                let target = (max_cache_bytes as f64 * TRIM_TARGET) as i64;
                let mut remaining = total;
                let mut evicted = 0u64;

                // Oldest write first; ties broken by least-hit session.
                let victims: Vec<(String, i64)> = {
                    let mut stmt = conn.prepare(
                        "SELECT b.session_id, SUM(LENGTH(b.bytes)) AS size
                         FROM blobs b
                         LEFT JOIN sessions s ON s.session_id = b.session_id
                         GROUP BY b.session_id
                         ORDER BY MIN(b.updated_at) ASC, COALESCE(s.cache_hit_count, 0) ASC",
                    )?;
                    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };

                let tx = conn.transaction()?;
                for (session_id, size) in victims {
                    if remaining <= target {
                        break;
                    }
                    tx.execute("DELETE FROM blobs WHERE session_id = ?1", params![&session_id])?;
                    tx.execute(
                        "UPDATE sessions SET etag = '', template_tag = '', html_sha1 = '', html_size = 0,
                                template_updated_at = NULL, expires_at = NULL
                         WHERE session_id = ?1",
                        params![&session_id],
                    )?;
                    remaining -= size;
                    evicted += 1;
                }
                tx.commit()?;

                Ok(evicted)
            })
            .await
            .map_err(Error::from)
    }
}
