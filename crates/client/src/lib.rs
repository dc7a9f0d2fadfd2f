//! Client side of the sonic session cache.
//!
//! This crate provides the session engine, the per-URL session state
//! machine, and the server connector implementing the sync protocol
//! over HTTP.

pub mod connector;
pub mod engine;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod session_id;

pub use connector::{
    Body, BodyStream, BridgeStream, CacheOffline, Headers, ReadBreak, ReqwestTransport, ServerConnector, Transport,
    TransportRequest, TransportResponse,
};
pub use engine::SessionEngine;
pub use runtime::{HostRuntime, NullRuntime};
pub use scheduler::Scheduler;
pub use session::{
    QuickDelivery, ResultCode, Session, SessionConfig, SessionHost, SessionMode, SessionState, StandardDelivery,
};
pub use session_id::session_id;
