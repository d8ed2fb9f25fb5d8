//! Shared FIFO of pending delivery tasks.
//!
//! The receiver and retry units push, the processor pops. There is no depth
//! limit.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use crate::{
    error::{DeliveryError, Result},
    task::DeliveryTask,
};

/// Unbounded, thread-safe FIFO of [`DeliveryTask`]s.
///
/// Clones are handles to the same queue.
#[derive(Debug, Clone, Default)]
pub struct DeliveryQueue {
    tasks: Arc<Mutex<VecDeque<DeliveryTask>>>,
}

impl DeliveryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task at the tail. Never fails.
    pub fn enqueue(&self, task: DeliveryTask) {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).push_back(task);
    }

    /// Removes the task at the head without waiting.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::QueueUnavailable` if a previous holder of the
    /// lock panicked. The poison is cleared once reported, so the next poll
    /// sees the queued tasks again.
    pub fn try_dequeue(&self) -> Result<Option<DeliveryTask>> {
        match self.tasks.lock() {
            Ok(mut tasks) => Ok(tasks.pop_front()),
            Err(poisoned) => {
                let message = poisoned.to_string();
                drop(poisoned);
                self.tasks.clear_poison();
                Err(DeliveryError::queue_unavailable(message))
            },
        }
    }

    /// Returns the number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if no task is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Poisons the lock by panicking while holding it.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let tasks = Arc::clone(&self.tasks);
        let _ = std::thread::spawn(move || {
            let _guard = tasks.lock();
            panic!("poison the queue lock");
        })
        .join();
    }
}
