//! SQLite-backed cache for session documents, templates, and data.
//!
//! This module provides a persistent per-session cache using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - Atomic metadata + blob writes (one transaction per save)
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - Budget-driven trimming with a rate-limited check

pub mod blobs;
pub mod connection;
pub mod metadata;
pub mod migrations;

pub use crate::Error;

pub use blobs::BlobKind;
pub use connection::CacheDb;
pub use metadata::SessionMetadata;
