use std::future::Future;
use std::sync::Arc;

use tarpc::context::Context;
use tokio::sync::{AcquireError, Semaphore};
use tokio::task::JoinHandle;

use crate::model::service::NumberService;
use crate::model::{ExchangeMessage, roll};

/// Handles [NumberService] requests.
///
/// Stateless; every request gets a fresh number.
#[derive(Clone, Default)]
pub struct NumberServer;

impl NumberServer {
    pub fn new() -> Self {
        Self
    }
}

impl NumberService for NumberServer {
    async fn send_number(self, _: Context, request: ExchangeMessage) -> ExchangeMessage {
        let number = roll(&mut rand::thread_rng());
        log::info!(
            "{}: {} --> server: {}",
            request.client_id,
            request.number,
            number
        );

        ExchangeMessage::new(number, request.client_id)
    }
}

/// Bounded pool of tasks running request handlers.
///
/// The pool is shared by all connections of a server; once
/// `capacity` handlers are running, [WorkerPool::spawn] waits for one
/// of them to finish.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub const DEFAULT_CAPACITY: usize = 10;

    /// Create a pool running at most `capacity` tasks at a time.
    ///
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks that could be spawned right now without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free slot, then spawn `fut` on it.
    pub async fn spawn<F>(&self, fut: F) -> Result<JoinHandle<F::Output>, AcquireError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = Arc::clone(&self.permits).acquire_owned().await?;

        Ok(tokio::spawn(async move {
            let out = fut.await;
            drop(permit);

            out
        }))
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
