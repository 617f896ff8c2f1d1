//! Helpers for managing spawned tasks.
//!
//! # Example
//!
//! ```rust
//! use numex_lib::utils::async_utils::AbortOnDrop;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let task = AbortOnDrop::new(tokio::spawn(async { 42 }));
//! assert_eq!(42, task.join().await.unwrap());
//! # });
//! ```

use tokio::task::{JoinError, JoinHandle};

/// Aborts a Tokio task when dropped.
#[must_use]
pub struct AbortOnDrop<T> {
    handle: Option<JoinHandle<T>>,
}

impl<T> AbortOnDrop<T> {
    pub fn new(handle: JoinHandle<T>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Wait for the task to finish and return its result.
    pub async fn join(mut self) -> Result<T, JoinError> {
        match self.handle.take() {
            Some(handle) => handle.await,
            // The handle is only taken here and in drop.
            None => unreachable!(),
        }
    }
}

impl<T> Drop for AbortOnDrop<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn drop_aborts() -> anyhow::Result<()> {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = AbortOnDrop::new(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            let _ = tx.send(());
        }));
        drop(task);

        // The sender is dropped along with the aborted task.
        assert!(rx.await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn join_returns_output() -> anyhow::Result<()> {
        let task = AbortOnDrop::new(tokio::spawn(async { "done" }));
        assert_eq!("done", task.join().await?);

        Ok(())
    }
}
