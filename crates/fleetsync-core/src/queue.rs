//! Bounded task queue for per-sensor sync operations.
//!
//! At most `capacity` tasks run at once; excess tasks wait in FIFO order
//! (the underlying semaphore is fair). Each task is registered under its
//! sensor key, which gives two guarantees:
//!
//! - two tasks for the same key never overlap, the second is rejected;
//! - a task can be cancelled while it waits for a slot, in which case it
//!   never starts. A running task receives the same [`CancellationToken`]
//!   and decides itself up to which point it is still cancellable.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use fleetsync_types::SensorKey;

use crate::error::SyncError;

/// Reasons a task did not run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// A task for the same key is queued or running.
    #[error("A sync for {0} is already queued")]
    AlreadyQueued(SensorKey),
    /// The task was cancelled before it started.
    #[error("Sync for {0} was cancelled while queued")]
    Cancelled(SensorKey),
}

impl From<QueueError> for SyncError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::AlreadyQueued(_) => SyncError::QueueIsAlreadySyncing,
            QueueError::Cancelled(_) => SyncError::Cancelled,
        }
    }
}

type Registry = Arc<Mutex<HashMap<SensorKey, CancellationToken>>>;

/// Worker pool capping concurrent tasks.
#[derive(Debug, Clone)]
pub struct BoundedTaskQueue {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    active: Registry,
}

/// Removes a key from the registry when its task ends, however it ends.
struct Registration {
    active: Registry,
    key: SensorKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.key);
        }
    }
}

impl BoundedTaskQueue {
    /// Create a queue running at most `capacity` tasks at once (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Maximum number of concurrent tasks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks currently holding a slot.
    pub fn running(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Whether a task for `key` is queued or running.
    pub fn is_active(&self, key: &SensorKey) -> bool {
        self.active
            .lock()
            .map(|active| active.contains_key(key))
            .unwrap_or(false)
    }

    /// Cancel the task registered under `key`.
    ///
    /// Returns `false` if no such task exists.
    pub fn cancel(&self, key: &SensorKey) -> bool {
        let token = self
            .active
            .lock()
            .ok()
            .and_then(|active| active.get(key).cloned());

        match token {
            Some(token) => {
                debug!("Cancelling sync for {}", key);
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn register(&self, key: &SensorKey) -> Result<(Registration, CancellationToken), QueueError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| QueueError::AlreadyQueued(key.clone()))?;
        if active.contains_key(key) {
            return Err(QueueError::AlreadyQueued(key.clone()));
        }

        let token = CancellationToken::new();
        active.insert(key.clone(), token.clone());
        Ok((
            Registration {
                active: Arc::clone(&self.active),
                key: key.clone(),
            },
            token,
        ))
    }

    /// Run `task` once a slot is free.
    ///
    /// The task receives the key's cancellation token.
    pub async fn run<F, Fut, T>(&self, key: SensorKey, task: F) -> Result<T, QueueError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let (_registration, token) = self.register(&key)?;

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            debug!("Sync for {} cancelled before start", key);
            return Err(QueueError::Cancelled(key));
        };

        let output = task(token).await;
        drop(permit);
        Ok(output)
    }
}

impl Default for BoundedTaskQueue {
    fn default() -> Self {
        Self::new(3)
    }
}
