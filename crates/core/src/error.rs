//! Unified error types for the sonic cache engine.
//!
//! Network and storage failures are downgraded to host-visible
//! notifications at the session layer; nothing here crosses the
//! session/host boundary as a panic.

use tokio_rusqlite::rusqlite;

/// Unified error type shared by the cache engine and the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or unsupported URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Connection-level I/O failure (socket, TLS, DNS).
    #[error("connection error: {0}")]
    ConnectionIo(String),

    /// Connect or read timed out.
    #[error("connection timeout: {0}")]
    ConnectionTimeout(String),

    /// The transport produced no usable connection.
    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    /// Non-200/304 HTTP status.
    #[error("http error: status {0}")]
    HttpStatus(u16),

    /// Local cache failed hash or size verification.
    #[error("cache verify failed for session {0}")]
    CacheVerifyFail(String),

    /// A session with this id is already live.
    #[error("session already running: {0}")]
    SessionRunning(String),

    /// Database operation failed.
    #[error("cache error: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("cache error: migration failed: {0}")]
    MigrationFailed(String),

    /// Template/data separation failed.
    #[error("separate error: {0}")]
    SeparateFail(String),

    /// Diff computation or merge failed.
    #[error("diff merge error: {0}")]
    DiffMergeFail(String),

    /// Server payload did not match the protocol.
    #[error("malformed server payload: {0}")]
    MalformedPayload(String),

    /// Rebuilding a document from template + data failed.
    #[error("build html error: {0}")]
    BuildHtmlFail(String),
}

impl Error {
    /// Structural copy for queueing and replay.
    ///
    /// `Error` is not `Clone` because database errors hold connection
    /// state; those collapse to a closed-connection marker, every
    /// other variant is rebuilt as-is.
    pub fn duplicate(&self) -> Self {
        match self {
            Error::InvalidUrl(s) => Error::InvalidUrl(s.clone()),
            Error::ConnectionIo(s) => Error::ConnectionIo(s.clone()),
            Error::ConnectionTimeout(s) => Error::ConnectionTimeout(s.clone()),
            Error::InvalidConnection(s) => Error::InvalidConnection(s.clone()),
            Error::HttpStatus(code) => Error::HttpStatus(*code),
            Error::CacheVerifyFail(s) => Error::CacheVerifyFail(s.clone()),
            Error::SessionRunning(s) => Error::SessionRunning(s.clone()),
            Error::Database(_) => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            Error::MigrationFailed(s) => Error::MigrationFailed(s.clone()),
            Error::SeparateFail(s) => Error::SeparateFail(s.clone()),
            Error::DiffMergeFail(s) => Error::DiffMergeFail(s.clone()),
            Error::MalformedPayload(s) => Error::MalformedPayload(s.clone()),
            Error::BuildHtmlFail(s) => Error::BuildHtmlFail(s.clone()),
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
