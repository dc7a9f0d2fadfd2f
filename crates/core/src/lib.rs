//! Core types and shared functionality for the sonic session cache.
//!
//! This crate provides:
//! - Template/data separation, diff, and rebuild
//! - Cache implementation with SQLite backend
//! - Unified error types
//! - Engine configuration

pub mod cache;
pub mod config;
pub mod diff;
pub mod error;

pub use cache::{BlobKind, CacheDb, SessionMetadata};
pub use config::EngineConfig;
pub use error::Error;
