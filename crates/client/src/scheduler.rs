//! Bounded worker scheduling.
//!
//! Session workers run as tokio tasks behind a semaphore, so a burst
//! of preloads can't saturate the runtime. Permits are taken inside
//! the spawned task: `spawn` never blocks the caller.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Semaphore-bounded task spawner for session workers.
#[derive(Clone)]
pub struct Scheduler {
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(max_concurrent)) }
    }

    /// Spawn a worker; it waits for a permit before running.
    pub fn spawn<F>(&self, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            work.await;
        })
    }
}
