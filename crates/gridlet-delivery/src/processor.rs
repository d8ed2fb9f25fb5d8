//! Background delivery loop with retry and deadletter handling.
//!
//! A single [`DeliveryProcessor`] drains the [`DeliveryQueue`]. Each task
//! ends in exactly one of three ways: delivered, requeued by a retry unit
//! after a backoff delay, or written to the deadletter sink.
//!
//! ```text
//! Queued ──▶ Dispatching ──┬──▶ Delivered
//!   ▲                      ├──▶ AwaitingRetry ──(backoff)──┐
//!   │                      └──▶ Deadlettered               │
//!   └──────────────────────────────────────────────────────┘
//! ```
//!
//! Retry units are independent tasks so the loop never waits on a backoff.
//! They race their delay against the cancellation token; a unit that loses
//! drops its task without persisting it.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use gridlet_core::{sink::DeadletterRecord, Archive, Clock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    client::{DeliveryOutcome, EventSender},
    error::{DeliveryError, ErrorCategory, Result},
    queue::DeliveryQueue,
    retry::{RetryDecision, RetryPolicy},
    task::DeliveryTask,
};

/// Configuration for the delivery processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Backoff parameters and attempt limit.
    pub retry_policy: RetryPolicy,
    /// Pause after every dispatched task.
    pub pace_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { retry_policy: RetryPolicy::default(), pace_interval: Duration::from_millis(50) }
    }
}

/// Snapshot of processor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    /// Tasks delivered successfully.
    pub delivered: u64,
    /// Retry units spawned.
    pub retries_scheduled: u64,
    /// Tasks written to the deadletter sink.
    pub deadlettered: u64,
    /// Retry units that dropped their task because of shutdown.
    pub dropped_on_shutdown: u64,
    /// Retry units currently waiting out their delay.
    pub pending_retries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    retries_scheduled: AtomicU64,
    deadlettered: AtomicU64,
    dropped_on_shutdown: AtomicU64,
    pending_retries: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            delivered: self.delivered.load(Ordering::Acquire),
            retries_scheduled: self.retries_scheduled.load(Ordering::Acquire),
            deadlettered: self.deadlettered.load(Ordering::Acquire),
            dropped_on_shutdown: self.dropped_on_shutdown.load(Ordering::Acquire),
            pending_retries: self.pending_retries.load(Ordering::Acquire),
        }
    }
}

/// How a dispatched task was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResolution {
    /// Subscriber accepted the event.
    Delivered,
    /// A retry unit will requeue the next attempt after `delay`.
    RetryScheduled {
        /// Backoff before the requeue
        delay: Duration,
    },
    /// The task was deadlettered.
    Deadlettered,
}

/// Drains the delivery queue, dispatching each task through an
/// [`EventSender`].
#[derive(Debug)]
pub struct DeliveryProcessor {
    queue: DeliveryQueue,
    sender: Arc<dyn EventSender>,
    archive: Archive,
    clock: Arc<dyn Clock>,
    config: ProcessorConfig,
    counters: Arc<Counters>,
    cancellation_token: CancellationToken,
    retries: TaskTracker,
}

impl DeliveryProcessor {
    /// Creates a processor. Nothing runs until [`run`](Self::run) or
    /// [`spawn`](Self::spawn).
    pub fn new(
        queue: DeliveryQueue,
        sender: Arc<dyn EventSender>,
        archive: Archive,
        clock: Arc<dyn Clock>,
        config: ProcessorConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            queue,
            sender,
            archive,
            clock,
            config,
            counters: Arc::new(Counters::default()),
            cancellation_token,
            retries: TaskTracker::new(),
        }
    }

    /// Returns current counters.
    pub fn stats(&self) -> ProcessorStats {
        self.counters.snapshot()
    }

    /// Main loop. Polls, dispatches and sleeps until cancelled.
    pub async fn run(&self) {
        info!(
            max_attempts = self.config.retry_policy.max_attempts,
            pace_ms = self.config.pace_interval.as_millis(),
            "delivery processor starting"
        );

        let policy = &self.config.retry_policy;
        let mut idle: u32 = 0;
        let mut errors: u32 = 0;

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            let pause = match self.process_next().await {
                Ok(Some(_)) => {
                    idle = 0;
                    errors = 0;
                    self.config.pace_interval
                },
                Ok(None) => {
                    errors = 0;
                    idle = idle.saturating_add(1);
                    policy.idle_delay(idle)
                },
                Err(error) => {
                    errors = errors.saturating_add(1);
                    let delay = policy.error_delay(errors);
                    error!(
                        error = %error,
                        consecutive_errors = errors,
                        delay_ms = delay.as_millis(),
                        "failed to poll delivery queue"
                    );
                    delay
                },
            };

            tokio::select! {
                () = self.clock.sleep(pause) => {}
                () = self.cancellation_token.cancelled() => break,
            }
        }

        info!("delivery processor stopped");
    }

    /// Polls the queue once and dispatches the task found, without sleeping.
    ///
    /// Returns `None` if the queue was empty.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::QueueUnavailable` if the queue cannot be
    /// polled.
    pub async fn process_next(&self) -> Result<Option<TaskResolution>> {
        let Some(task) = self.queue.try_dequeue()? else {
            return Ok(None);
        };

        Ok(Some(self.dispatch(task).await))
    }

    async fn dispatch(&self, task: DeliveryTask) -> TaskResolution {
        debug!(
            event_id = %task.event.id,
            subscription = %task.subscription,
            attempt = task.attempt,
            "dispatching delivery task"
        );

        match self.sender.send(&task.subscription, &task.event).await {
            DeliveryOutcome::Delivered { status_code, duration } => {
                self.counters.delivered.fetch_add(1, Ordering::AcqRel);
                info!(
                    event_id = %task.event.id,
                    event_type = %task.event.event_type,
                    subscription = %task.subscription,
                    attempt = task.attempt,
                    status_code,
                    duration_ms = duration.as_millis(),
                    "event delivered"
                );
                TaskResolution::Delivered
            },
            DeliveryOutcome::TransportFailure(error) => {
                match self.config.retry_policy.decide(task.attempt) {
                    RetryDecision::Retry { delay } => {
                        info!(
                            event_id = %task.event.id,
                            subscription = %task.subscription,
                            attempt = task.attempt,
                            delay_ms = delay.as_millis(),
                            error = %error,
                            "delivery failed, retry scheduled"
                        );
                        self.schedule_retry(task, delay);
                        TaskResolution::RetryScheduled { delay }
                    },
                    RetryDecision::GiveUp { reason } => {
                        warn!(
                            event_id = %task.event.id,
                            subscription = %task.subscription,
                            attempt = task.attempt,
                            error = %error,
                            "delivery retries exhausted, deadlettering"
                        );
                        self.deadletter(&task, format!("{error}; {reason}")).await;
                        TaskResolution::Deadlettered
                    },
                }
            },
            DeliveryOutcome::OtherFailure(error) => {
                error!(
                    event_id = %task.event.id,
                    subscription = %task.subscription,
                    attempt = task.attempt,
                    error = %error,
                    category = %ErrorCategory::from(&error),
                    "delivery failed permanently, deadlettering"
                );
                self.deadletter(&task, error.to_string()).await;
                TaskResolution::Deadlettered
            },
        }
    }

    async fn deadletter(&self, task: &DeliveryTask, reason: String) {
        self.counters.deadlettered.fetch_add(1, Ordering::AcqRel);
        self.archive
            .record_deadletter(&DeadletterRecord {
                event: &task.event,
                reason,
                subscription: task.subscription.to_string(),
                attempt: task.attempt,
                first_received_timestamp: task.first_received_at,
            })
            .await;
    }

    fn schedule_retry(&self, task: DeliveryTask, delay: Duration) {
        self.counters.retries_scheduled.fetch_add(1, Ordering::AcqRel);
        self.counters.pending_retries.fetch_add(1, Ordering::AcqRel);

        let queue = self.queue.clone();
        let clock = Arc::clone(&self.clock);
        let counters = Arc::clone(&self.counters);
        let cancellation_token = self.cancellation_token.clone();

        self.retries.spawn(async move {
            let cancelled = tokio::select! {
                () = clock.sleep(delay) => cancellation_token.is_cancelled(),
                () = cancellation_token.cancelled() => true,
            };

            if cancelled {
                counters.dropped_on_shutdown.fetch_add(1, Ordering::AcqRel);
                counters.pending_retries.fetch_sub(1, Ordering::AcqRel);
                warn!(
                    event_id = %task.event.id,
                    subscription = %task.subscription,
                    attempt = task.attempt,
                    "shutdown while awaiting retry, delivery task dropped"
                );
                return;
            }

            let next = task.next_attempt();
            debug!(
                event_id = %next.event.id,
                subscription = %next.subscription,
                attempt = next.attempt,
                "requeued delivery task"
            );
            queue.enqueue(next);
            counters.pending_retries.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Runs the loop on a background task.
    pub fn spawn(self) -> ProcessorHandle {
        let processor = Arc::new(self);
        let worker = Arc::clone(&processor);
        let join_handle = tokio::spawn(async move { worker.run().await });

        ProcessorHandle { processor, join_handle }
    }
}

/// Handle to a spawned [`DeliveryProcessor`].
#[derive(Debug)]
pub struct ProcessorHandle {
    processor: Arc<DeliveryProcessor>,
    join_handle: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Returns current counters.
    pub fn stats(&self) -> ProcessorStats {
        self.processor.stats()
    }

    /// Stops the loop and waits for it and every pending retry unit.
    ///
    /// Returns the final counters.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Internal` if the loop panicked or the
    /// timeout elapsed first.
    pub async fn shutdown(self, timeout: Duration) -> Result<ProcessorStats> {
        let Self { processor, join_handle } = self;
        info!(
            pending_retries = processor.stats().pending_retries,
            timeout_seconds = timeout.as_secs(),
            "shutting down delivery processor"
        );

        processor.cancellation_token.cancel();
        processor.retries.close();

        let retries = processor.retries.clone();
        let wait = async move {
            let joined = join_handle.await;
            retries.wait().await;
            joined
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(())) => {
                let stats = processor.stats();
                info!(
                    delivered = stats.delivered,
                    deadlettered = stats.deadlettered,
                    dropped_on_shutdown = stats.dropped_on_shutdown,
                    "delivery processor shut down"
                );
                Ok(stats)
            },
            Ok(Err(join_error)) => {
                error!(error = %join_error, "delivery processor task panicked");
                Err(DeliveryError::internal(format!("processor task failed: {join_error}")))
            },
            Err(_) => {
                warn!(timeout_seconds = timeout.as_secs(), "delivery processor shutdown timed out");
                Err(DeliveryError::internal("processor shutdown timed out"))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{future::Future, pin::Pin, sync::Mutex};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use gridlet_core::{Endpoint, EventGridEvent, Service, Subscription};

    use super::*;

    /// Side effect a [`LoopClock`] performs on its nth sleep.
    #[derive(Debug, Clone, Copy)]
    enum OnSleep {
        Nothing,
        Enqueue(usize),
        Poison(usize),
    }

    /// Clock that returns from every sleep at once, records it and cancels
    /// the loop after `limit` sleeps.
    #[derive(Debug)]
    struct LoopClock {
        sleeps: Mutex<Vec<Duration>>,
        limit: usize,
        on_sleep: OnSleep,
        queue: DeliveryQueue,
        token: CancellationToken,
    }

    impl LoopClock {
        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    impl Clock for LoopClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp(1_700_000_000, 0).unwrap()
        }

        fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            let count = {
                let mut sleeps = self.sleeps.lock().unwrap();
                sleeps.push(duration);
                sleeps.len()
            };

            match self.on_sleep {
                OnSleep::Enqueue(n) if n == count => self.queue.enqueue(task()),
                OnSleep::Poison(n) if n == count => self.queue.poison(),
                _ => {},
            }

            if count >= self.limit {
                self.token.cancel();
            }

            Box::pin(std::future::ready(()))
        }
    }

    #[derive(Debug)]
    struct AlwaysDelivers;

    #[async_trait]
    impl EventSender for AlwaysDelivers {
        async fn send(&self, _: &Subscription, _: &EventGridEvent) -> DeliveryOutcome {
            DeliveryOutcome::Delivered { status_code: 200, duration: Duration::from_millis(1) }
        }
    }

    fn task() -> DeliveryTask {
        let event: EventGridEvent = serde_json::from_value(serde_json::json!({
            "id": "e-1",
            "eventType": "Foo",
            "subject": "s",
            "data": null,
            "eventTime": "2024-01-01T00:00:00Z",
            "dataVersion": "1"
        }))
        .unwrap();
        let service =
            Service::new("http://a", vec![Endpoint::path("/h", ["Foo"]).unwrap()]).unwrap();
        let subscription = Subscription::new(&service, &service.endpoints()[0]);
        DeliveryTask::new(Arc::new(event), Arc::new(subscription), Utc::now())
    }

    /// Runs the loop until the clock has recorded `limit` sleeps.
    async fn run_loop(
        queue: DeliveryQueue,
        limit: usize,
        on_sleep: OnSleep,
    ) -> (Vec<Duration>, ProcessorStats) {
        let token = CancellationToken::new();
        let clock = Arc::new(LoopClock {
            sleeps: Mutex::new(Vec::new()),
            limit,
            on_sleep,
            queue: queue.clone(),
            token: token.clone(),
        });
        let processor = DeliveryProcessor::new(
            queue,
            Arc::new(AlwaysDelivers),
            Archive::disabled(),
            clock.clone(),
            ProcessorConfig::default(),
            token,
        );

        processor.run().await;

        (clock.sleeps(), processor.stats())
    }

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_secs).collect()
    }

    #[tokio::test]
    async fn empty_queue_backs_off_up_to_twenty_seconds() {
        let (sleeps, stats) = run_loop(DeliveryQueue::new(), 7, OnSleep::Nothing).await;

        assert_eq!(sleeps, secs(&[2, 4, 8, 16, 20, 20, 20]));
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn dequeued_task_resets_idle_backoff() {
        let (sleeps, stats) = run_loop(DeliveryQueue::new(), 5, OnSleep::Enqueue(2)).await;

        assert_eq!(sleeps, vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_millis(50),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ]);
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn dequeue_faults_back_off_then_delivery_resumes() {
        let queue = DeliveryQueue::new();
        queue.enqueue(task());
        queue.poison();

        let (sleeps, stats) = run_loop(queue.clone(), 4, OnSleep::Poison(1)).await;

        assert_eq!(sleeps, vec![
            Duration::from_secs(4),
            Duration::from_secs(16),
            Duration::from_millis(50),
            Duration::from_secs(2),
        ]);
        assert_eq!(stats.delivered, 1);
        assert!(queue.is_empty());
    }
}
