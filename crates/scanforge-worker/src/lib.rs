//! Worker process: the job execution pipeline and its wiring.
//!
//! [`App`] is the canonical construction path: it builds the store, event
//! bus, registries, encryption service, task queue and executor once at
//! startup and injects them everywhere. Components take their
//! collaborators as arguments; nothing reaches for hidden globals.

use std::sync::Arc;
use std::time::Duration;

use scanforge_core::{EventBus, ToolRegistry};
use scanforge_engine::{JobDispatcher, WorkflowEngine};
use scanforge_parsers::ParserRegistry;
use scanforge_storage::{EncryptionService, Store};

pub mod config;
pub mod executor;
pub mod import;
pub mod notify;
pub mod queue;
pub mod runner;
pub mod upsert;
pub mod workflow;

pub use config::Config;
pub use executor::{JobExecutor, QueueDispatcher};
pub use import::{import_scan, ImportReport};
pub use notify::WebhookNotifier;
pub use queue::{TaskQueue, TaskRecord, TaskStatus};
pub use runner::{CancelHandle, OutputCallback, ToolRunner};
pub use upsert::UpsertStats;

/// Interval of the scheduled-jobs sweeper.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Assembled backend services.
pub struct App {
    pub store: Arc<dyn Store>,
    pub bus: Arc<EventBus>,
    pub tools: Arc<ToolRegistry>,
    pub parsers: Arc<ParserRegistry>,
    pub crypto: EncryptionService,
    pub queue: Arc<TaskQueue>,
    pub executor: Arc<JobExecutor>,
    engine_poll_interval: Option<Duration>,
}

impl App {
    /// Build the full service graph over the given store.
    pub fn new(store: Arc<dyn Store>, crypto: EncryptionService, config: &Config) -> Self {
        let bus = Arc::new(EventBus::new());
        let tools = Arc::new(ToolRegistry::builtin());
        let parsers = Arc::new(ParserRegistry::builtin());
        let queue = Arc::new(TaskQueue::new(config.max_workers));
        let notifier = config
            .webhook_url
            .as_deref()
            .map(|url| Arc::new(WebhookNotifier::new(url)));

        let executor = Arc::new(JobExecutor::new(
            store.clone(),
            bus.clone(),
            tools.clone(),
            parsers.clone(),
            crypto.clone(),
            notifier,
            config.outputs_dir.clone(),
            queue.clone(),
        ));

        Self {
            store,
            bus,
            tools,
            parsers,
            crypto,
            queue,
            executor,
            engine_poll_interval: None,
        }
    }

    /// Override the workflow engine's job poll interval (tests).
    pub fn with_engine_poll_interval(mut self, interval: Duration) -> Self {
        self.engine_poll_interval = Some(interval);
        self
    }

    /// Start the queue and register the scheduled-jobs sweeper.
    pub fn start(&self) {
        let executor = self.executor.clone();
        self.queue
            .schedule("scheduled-jobs-sweeper", SWEEP_INTERVAL, move || {
                let executor = executor.clone();
                async move { executor.sweep_scheduled_jobs().await }
            });
        self.queue.start();
    }

    /// Stop background loops.
    pub async fn stop(&self) {
        self.queue.stop().await;
    }

    /// Build a workflow engine for one run, wired to this process's
    /// services.
    pub fn build_engine(
        &self,
        workflow: scanforge_core::model::Workflow,
        run: scanforge_core::model::WorkflowRun,
    ) -> WorkflowEngine {
        let dispatcher: Arc<dyn JobDispatcher> =
            Arc::new(QueueDispatcher::new(self.executor.clone()));
        let engine = WorkflowEngine::new(
            self.store.clone(),
            self.bus.clone(),
            self.tools.clone(),
            dispatcher,
            workflow,
            run,
        );
        match self.engine_poll_interval {
            Some(interval) => engine.with_poll_interval(interval),
            None => engine,
        }
    }
}
