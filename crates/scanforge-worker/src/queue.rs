//! Process-local task queue with a bounded worker pool and a recurring
//! scheduler.
//!
//! Async work is enqueued as futures and dispatched FIFO under a
//! `max_workers` semaphore; synchronous work goes through the blocking
//! pool so it never stalls the cooperative runtime. A task that errors
//! marks its record failed and never takes the worker loop down with it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Scheduler tick granularity.
const SCHEDULER_TICK: Duration = Duration::from_secs(1);

/// Lifecycle status of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Record of one submitted task. Immutable once terminal.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: Uuid,
    pub name: String,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

type TaskFuture = BoxFuture<'static, Result<Value, String>>;

struct QueuedTask {
    id: Uuid,
    future: TaskFuture,
}

type ScheduleFactory = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

struct Schedule {
    name: String,
    interval: Duration,
    last_run: Option<tokio::time::Instant>,
    in_flight: Arc<std::sync::atomic::AtomicBool>,
    factory: ScheduleFactory,
}

/// Embedded asynchronous task queue.
pub struct TaskQueue {
    records: Arc<Mutex<HashMap<Uuid, TaskRecord>>>,
    sender: mpsc::UnboundedSender<QueuedTask>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<QueuedTask>>>,
    max_workers: usize,
    schedules: Arc<Mutex<Vec<Schedule>>>,
    shutdown_tx: watch::Sender<bool>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    pub fn new(max_workers: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            sender,
            receiver: Mutex::new(Some(receiver)),
            max_workers: max_workers.max(1),
            schedules: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx,
            worker_handle: Mutex::new(None),
            scheduler_handle: Mutex::new(None),
        }
    }

    /// Submit an async task. Returns immediately with the task id.
    pub fn enqueue<F>(&self, name: &str, future: F) -> Uuid
    where
        F: std::future::Future<Output = Result<Value, String>> + Send + 'static,
    {
        submit(&self.records, &self.sender, name, future.boxed())
    }

    /// Submit a synchronous callable; it runs on the blocking pool so the
    /// cooperative loop keeps moving.
    pub fn enqueue_blocking<F>(&self, name: &str, func: F) -> Uuid
    where
        F: FnOnce() -> Result<Value, String> + Send + 'static,
    {
        self.enqueue(name, async move {
            tokio::task::spawn_blocking(func)
                .await
                .map_err(|e| format!("blocking task panicked: {e}"))?
        })
    }

    /// Status query for a submitted task.
    pub fn get(&self, task_id: Uuid) -> Option<TaskRecord> {
        self.records.lock().unwrap().get(&task_id).cloned()
    }

    /// Mark a pending task cancelled; it is skipped at dispatch.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&task_id) {
            Some(record) if record.status == TaskStatus::Pending => {
                record.status = TaskStatus::Cancelled;
                record.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Register a recurring task invoked every `interval`. Invocations of
    /// the same schedule never overlap; a tick that finds the previous
    /// invocation still running is skipped.
    pub fn schedule<F, Fut>(&self, name: &str, interval: Duration, factory: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, String>> + Send + 'static,
    {
        info!(name, ?interval, "registered recurring task");
        self.schedules.lock().unwrap().push(Schedule {
            name: name.to_string(),
            interval,
            last_run: None,
            in_flight: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            factory: Arc::new(move || factory().boxed()),
        });
    }

    /// Start the worker and scheduler loops. Idempotent.
    pub fn start(&self) {
        let Some(receiver) = self.receiver.lock().unwrap().take() else {
            return;
        };
        info!(max_workers = self.max_workers, "task queue started");

        let worker = tokio::spawn(worker_loop(
            receiver,
            self.records.clone(),
            self.max_workers,
            self.shutdown_tx.subscribe(),
        ));
        *self.worker_handle.lock().unwrap() = Some(worker);

        let scheduler = tokio::spawn(scheduler_loop(
            self.records.clone(),
            self.sender.clone(),
            self.schedules.clone(),
            self.shutdown_tx.subscribe(),
        ));
        *self.scheduler_handle.lock().unwrap() = Some(scheduler);
    }

    /// Stop the loops and wait briefly for in-flight work. Idempotent.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let worker = self.worker_handle.lock().unwrap().take();
        if let Some(handle) = worker {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        let scheduler = self.scheduler_handle.lock().unwrap().take();
        if let Some(handle) = scheduler {
            handle.abort();
            let _ = handle.await;
        }
        info!("task queue stopped");
    }
}

async fn worker_loop(
    mut receiver: mpsc::UnboundedReceiver<QueuedTask>,
    records: Arc<Mutex<HashMap<Uuid, TaskRecord>>>,
    max_workers: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(max_workers));

    loop {
        let task = tokio::select! {
            _ = shutdown.changed() => break,
            task = receiver.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        // Cancelled-while-pending tasks are dropped at dispatch
        {
            let records = records.lock().unwrap();
            if records
                .get(&task.id)
                .is_some_and(|r| r.status == TaskStatus::Cancelled)
            {
                continue;
            }
        }

        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };

        let name = {
            let mut records = records.lock().unwrap();
            match records.get_mut(&task.id) {
                Some(record) => {
                    record.status = TaskStatus::Running;
                    record.started_at = Some(Utc::now());
                    record.name.clone()
                }
                None => String::new(),
            }
        };
        info!(task_id = %task.id, name, "executing task");

        let records = records.clone();
        tokio::spawn(async move {
            let outcome = task.future.await;
            let mut records = records.lock().unwrap();
            if let Some(record) = records.get_mut(&task.id) {
                match outcome {
                    Ok(value) => {
                        record.status = TaskStatus::Completed;
                        record.result = Some(value);
                    }
                    Err(message) => {
                        error!(task_id = %task.id, error = %message, "task failed");
                        record.status = TaskStatus::Failed;
                        record.error = Some(message);
                    }
                }
                record.completed_at = Some(Utc::now());
            }
            drop(permit);
        });
    }
}

/// Insert a record and hand the boxed future to the worker loop.
fn submit(
    records: &Arc<Mutex<HashMap<Uuid, TaskRecord>>>,
    sender: &mpsc::UnboundedSender<QueuedTask>,
    name: &str,
    future: TaskFuture,
) -> Uuid {
    let id = Uuid::now_v7();
    let record = TaskRecord {
        id,
        name: name.to_string(),
        status: TaskStatus::Pending,
        result: None,
        error: None,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
    };
    records.lock().unwrap().insert(id, record);

    if sender.send(QueuedTask { id, future }).is_err() {
        error!(task_id = %id, name, "task queue is stopped, dropping task");
        let mut records = records.lock().unwrap();
        if let Some(record) = records.get_mut(&id) {
            record.status = TaskStatus::Failed;
            record.error = Some("Queue stopped".to_string());
        }
    } else {
        debug!(task_id = %id, name, "task enqueued");
    }
    id
}

async fn scheduler_loop(
    records: Arc<Mutex<HashMap<Uuid, TaskRecord>>>,
    sender: mpsc::UnboundedSender<QueuedTask>,
    schedules: Arc<Mutex<Vec<Schedule>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(SCHEDULER_TICK) => {}
        }

        let due: Vec<(String, ScheduleFactory, Arc<std::sync::atomic::AtomicBool>)> = {
            let mut schedules = schedules.lock().unwrap();
            let now = tokio::time::Instant::now();
            schedules
                .iter_mut()
                .filter(|s| {
                    s.last_run
                        .map(|last| now.duration_since(last) >= s.interval)
                        .unwrap_or(true)
                })
                .filter(|s| !s.in_flight.load(std::sync::atomic::Ordering::SeqCst))
                .map(|s| {
                    s.last_run = Some(now);
                    s.in_flight
                        .store(true, std::sync::atomic::Ordering::SeqCst);
                    (s.name.clone(), s.factory.clone(), s.in_flight.clone())
                })
                .collect()
        };

        for (name, factory, in_flight) in due {
            let future = factory();
            let wrapped = async move {
                let result = future.await;
                in_flight.store(false, std::sync::atomic::Ordering::SeqCst);
                result
            };
            submit(
                &records,
                &sender,
                &format!("scheduled:{name}"),
                wrapped.boxed(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn wait_for<F: Fn() -> bool>(predicate: F) {
        for _ in 0..500 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_enqueue_and_complete() {
        let queue = Arc::new(TaskQueue::new(2));
        queue.start();

        let id = queue.enqueue("add", async { Ok(json!({"sum": 5})) });
        wait_for(|| queue.get(id).unwrap().status == TaskStatus::Completed).await;

        let record = queue.get(id).unwrap();
        assert_eq!(record.result.unwrap()["sum"], 5);
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_failing_task_marks_record_not_worker() {
        let queue = Arc::new(TaskQueue::new(1));
        queue.start();

        let bad = queue.enqueue("boom", async { Err("it broke".to_string()) });
        wait_for(|| queue.get(bad).unwrap().status == TaskStatus::Failed).await;
        assert_eq!(queue.get(bad).unwrap().error.as_deref(), Some("it broke"));

        // The worker loop survives and keeps executing
        let good = queue.enqueue("after", async { Ok(json!(1)) });
        wait_for(|| queue.get(good).unwrap().status == TaskStatus::Completed).await;
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_bounded_parallelism() {
        let queue = Arc::new(TaskQueue::new(2));
        queue.start();

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut ids = Vec::new();

        for _ in 0..6 {
            let active = active.clone();
            let peak = peak.clone();
            ids.push(queue.enqueue("load", async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(null))
            }));
        }

        wait_for(|| {
            ids.iter()
                .all(|id| queue.get(*id).unwrap().status == TaskStatus::Completed)
        })
        .await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_blocking_task_runs() {
        let queue = Arc::new(TaskQueue::new(2));
        queue.start();

        let id = queue.enqueue_blocking("sync-work", || Ok(json!({"from": "blocking"})));
        wait_for(|| queue.get(id).unwrap().status == TaskStatus::Completed).await;
        assert_eq!(queue.get(id).unwrap().result.unwrap()["from"], "blocking");
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let queue = Arc::new(TaskQueue::new(1));
        // Not started yet, so the task stays pending
        let id = queue.enqueue("never", async { Ok(json!(null)) });
        assert!(queue.cancel(id));
        assert_eq!(queue.get(id).unwrap().status, TaskStatus::Cancelled);

        queue.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Dropped at dispatch, still cancelled
        assert_eq!(queue.get(id).unwrap().status, TaskStatus::Cancelled);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_recurring_schedule_fires() {
        let queue = Arc::new(TaskQueue::new(2));
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        queue.schedule("tick", Duration::from_millis(100), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(json!(null))
            }
        });
        queue.start();

        wait_for(|| counter.load(Ordering::SeqCst) >= 2).await;
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let queue = Arc::new(TaskQueue::new(1));
        queue.start();
        queue.start();
        queue.stop().await;
        queue.stop().await;
    }
}
