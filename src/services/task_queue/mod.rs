//! Bounded side-effect queue.
//!
//! A fixed pool of workers pulls tasks from one bounded channel. A failed
//! attempt is re-enqueued after `base * 2^attempt` (capped) until
//! `max_attempts` is reached. Producers never wait: a full queue drops the
//! task and counts it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::env_or;
use crate::middleware::metrics::track_side_effect_task;

#[derive(Debug, Clone)]
pub struct TaskQueueConfig {
    pub workers: usize,
    pub capacity: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 1024,
            max_attempts: 5,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_millis(60_000),
        }
    }
}

impl TaskQueueConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workers: env_or("TASK_WORKERS", defaults.workers).max(1),
            capacity: env_or("TASK_QUEUE_CAPACITY", defaults.capacity).max(1),
            max_attempts: env_or("TASK_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            backoff_base: Duration::from_millis(env_or("TASK_BACKOFF_BASE_MS", 500)),
            backoff_max: Duration::from_millis(env_or("TASK_BACKOFF_MAX_MS", 60_000)),
        }
    }

    /// Delay before retrying after the given (0-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

pub trait Task: Send + Sync + Clone + 'static {
    /// Label used in logs and the `side_effect_tasks_total` metric
    fn kind(&self) -> &'static str;
}

#[async_trait]
pub trait TaskHandler<T: Task>: Send + Sync {
    /// `Ok(Some(next))` enqueues a follow-up task; `Err` schedules a retry.
    async fn handle(&self, task: &T) -> anyhow::Result<Option<T>>;
}

struct Envelope<T> {
    task: T,
    attempt: u32,
}

pub struct TaskQueue<T: Task> {
    sender: Mutex<Option<mpsc::Sender<Envelope<T>>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Task> TaskQueue<T> {
    /// Spawns the worker pool on the current runtime.
    pub fn start(config: TaskQueueConfig, handler: Arc<dyn TaskHandler<T>>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Envelope<T>>(config.capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let config = Arc::new(config);

        let workers = (0..config.workers)
            .map(|worker_id| {
                let rx = rx.clone();
                let retry_tx = tx.downgrade();
                let handler = handler.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, rx, retry_tx, handler, config).await;
                })
            })
            .collect();

        info!(
            "Side-effect queue started ({} workers, capacity {})",
            config.workers, config.capacity
        );

        Arc::new(Self {
            sender: Mutex::new(Some(tx)),
            workers: tokio::sync::Mutex::new(workers),
        })
    }

    /// Non-blocking enqueue. Returns `false` when the task was dropped.
    pub fn enqueue(&self, task: T) -> bool {
        let sender = self.sender.lock().ok().and_then(|guard| guard.clone());
        let Some(sender) = sender else {
            warn!("Side-effect queue is shut down, dropping {} task", task.kind());
            track_side_effect_task(task.kind(), "dropped");
            return false;
        };

        let kind = task.kind();
        match sender.try_send(Envelope { task, attempt: 0 }) {
            Ok(()) => {
                track_side_effect_task(kind, "enqueued");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Side-effect queue full, dropping {} task", kind);
                track_side_effect_task(kind, "dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Side-effect queue closed, dropping {} task", kind);
                track_side_effect_task(kind, "dropped");
                false
            }
        }
    }

    /// Stops accepting new tasks and waits for queued tasks to finish.
    /// Retries still sleeping in backoff are abandoned.
    pub async fn shutdown(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Side-effect worker panicked: {}", e);
            }
        }
        info!("Side-effect queue drained");
    }
}

async fn worker_loop<T: Task>(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Envelope<T>>>>,
    retry_tx: mpsc::WeakSender<Envelope<T>>,
    handler: Arc<dyn TaskHandler<T>>,
    config: Arc<TaskQueueConfig>,
) {
    loop {
        let next = { rx.lock().await.recv().await };
        let Some(Envelope { task, attempt }) = next else {
            break;
        };
        let kind = task.kind();

        match handler.handle(&task).await {
            Ok(follow_up) => {
                debug!("Worker {}: {} task succeeded (attempt {})", worker_id, kind, attempt + 1);
                track_side_effect_task(kind, "succeeded");
                if let Some(next_task) = follow_up {
                    resend(&retry_tx, Envelope { task: next_task, attempt: 0 });
                }
            }
            Err(e) if attempt + 1 >= config.max_attempts => {
                error!(
                    "{} task failed permanently after {} attempts: {}",
                    kind,
                    attempt + 1,
                    e
                );
                track_side_effect_task(kind, "exhausted");
            }
            Err(e) => {
                let delay = config.backoff(attempt);
                warn!(
                    "{} task failed (attempt {}/{}), retrying in {:?}: {}",
                    kind,
                    attempt + 1,
                    config.max_attempts,
                    delay,
                    e
                );
                track_side_effect_task(kind, "retried");

                let retry_tx = retry_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    resend(&retry_tx, Envelope { task, attempt: attempt + 1 });
                });
            }
        }
    }
    debug!("Side-effect worker {} stopped", worker_id);
}

fn resend<T: Task>(tx: &mpsc::WeakSender<Envelope<T>>, envelope: Envelope<T>) {
    let kind = envelope.task.kind();
    let Some(sender) = tx.upgrade() else {
        warn!("Side-effect queue closed, dropping {} task", kind);
        track_side_effect_task(kind, "dropped");
        return;
    };
    if sender.try_send(envelope).is_err() {
        warn!("Side-effect queue full, dropping {} task", kind);
        track_side_effect_task(kind, "dropped");
    }
}
