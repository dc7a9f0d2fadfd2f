//! Bridged response body: cached prefix plus live remainder.
//!
//! When the host asks for the page while the worker is still reading
//! it from the server, the session hands back a [`BridgeStream`]: it
//! replays everything buffered so far, then serves the rest straight
//! off the connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use sonic_core::Error;

use super::transport::BodyStream;

/// Reader-side stop signal.
///
/// When the page consumer is done (the view finished rendering), it
/// trips the break; anything already buffered is still served, but no
/// further network bytes are pulled for this load.
#[derive(Clone, Default)]
pub struct ReadBreak(Arc<AtomicBool>);

impl ReadBreak {
    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Body stream that serves a buffered prefix before the live tail.
pub struct BridgeStream {
    prefix: Option<Bytes>,
    remainder: Option<Box<dyn BodyStream>>,
    brk: ReadBreak,
}

impl BridgeStream {
    pub fn new(prefix: Bytes, remainder: Option<Box<dyn BodyStream>>, brk: ReadBreak) -> Self {
        let prefix = if prefix.is_empty() { None } else { Some(prefix) };
        Self { prefix, remainder, brk }
    }

    /// A fully buffered stream with no live tail.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::new(bytes, None, ReadBreak::default())
    }

    /// Handle for capping this stream at the buffered boundary.
    pub fn read_break(&self) -> ReadBreak {
        self.brk.clone()
    }

    /// Next chunk: the whole prefix first, then the live remainder
    /// until end of stream or the break trips.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        if let Some(prefix) = self.prefix.take() {
            return Ok(Some(prefix));
        }
        if self.brk.tripped() {
            self.remainder = None;
            return Ok(None);
        }
        match &mut self.remainder {
            Some(stream) => match stream.next_chunk().await? {
                Some(chunk) => Ok(Some(chunk)),
                None => {
                    self.remainder = None;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Drain the whole stream into one buffer.
    pub async fn read_to_end(&mut self) -> Result<Bytes, Error> {
        let mut out = bytes::BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }
}
