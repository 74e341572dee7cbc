use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::context::PrintingContextFactory;
use crate::events::{
    EventScope, JobEventBus, JobEventDetails, JobEventKind, JobEventObserver, Subscription,
};
use crate::print_job::{PrintJob, PrintJobId};
use crate::queries_queue::PrintQueriesQueue;
use crate::task::{lock, PrintThreads};

/// Process-wide owner of the printer query queue and the set of active jobs.
///
/// Jobs enter the active set on `NEW_DOC` and leave it on `JOB_DONE` or
/// `FAILED`.
pub struct PrintJobManager {
    threads: PrintThreads,
    bus: Arc<JobEventBus>,
    context_factory: Arc<dyn PrintingContextFactory>,
    config: PipelineConfig,
    queue: OnceLock<Arc<PrintQueriesQueue>>,
    current_jobs: Mutex<HashMap<PrintJobId, Arc<PrintJob>>>,
    subscription: Mutex<Option<Subscription>>,
    is_shutdown: AtomicBool,
}

impl fmt::Debug for PrintJobManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintJobManager")
            .field("active_jobs", &self.active_job_count())
            .field("is_shutdown", &self.is_shut_down())
            .finish()
    }
}

impl PrintJobManager {
    pub fn new(
        threads: PrintThreads,
        bus: Arc<JobEventBus>,
        context_factory: Arc<dyn PrintingContextFactory>,
        config: PipelineConfig,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            threads,
            bus,
            context_factory,
            config,
            queue: OnceLock::new(),
            current_jobs: Mutex::new(HashMap::new()),
            subscription: Mutex::new(None),
            is_shutdown: AtomicBool::new(false),
        });
        let observer: Weak<dyn JobEventObserver> = Arc::downgrade(&manager) as Weak<dyn JobEventObserver>;
        let subscription = manager.bus.subscribe(EventScope::AllJobs, observer);
        *lock(&manager.subscription) = Some(subscription);
        manager
    }

    /// The query queue, created on first use.
    pub fn queue(&self) -> Arc<PrintQueriesQueue> {
        self.queue
            .get_or_init(|| {
                PrintQueriesQueue::new(
                    self.threads.clone(),
                    Arc::clone(&self.context_factory),
                    &self.config,
                )
            })
            .clone()
    }

    pub fn bus(&self) -> &Arc<JobEventBus> {
        &self.bus
    }

    pub fn threads(&self) -> &PrintThreads {
        &self.threads
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// A job wired to this manager's UI runner, bus and shutdown policy.
    pub fn create_print_job(&self) -> Arc<PrintJob> {
        PrintJob::new(
            self.threads.ui.clone(),
            Arc::clone(&self.bus),
            self.config.shutdown_policy(),
        )
    }

    pub fn is_job_active(&self, id: PrintJobId) -> bool {
        lock(&self.current_jobs).contains_key(&id)
    }

    pub fn active_job_count(&self) -> usize {
        lock(&self.current_jobs).len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Stops every active job and the query queue. Idempotent.
    pub fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(active_jobs = self.active_job_count(), "shutting down print job manager");
        // Stop listening first so draining jobs cannot re-enter the set.
        let subscription = lock(&self.subscription).take();
        drop(subscription);
        self.stop_jobs(true);
        if let Some(queue) = self.queue.get() {
            queue.shutdown();
        }
    }

    fn stop_jobs(&self, wait_for_finish: bool) {
        let to_stop: Vec<Arc<PrintJob>> = lock(&self.current_jobs)
            .drain()
            .map(|(_, job)| job)
            .collect();
        let timeout = self.config.flush_timeout();
        for job in to_stop {
            if wait_for_finish {
                debug!(job = %job.id(), ?timeout, "flushing print job before shutdown");
                job.flush_job(timeout);
                if job.is_job_pending() {
                    warn!(job = %job.id(), "print job still pending after flush");
                }
            }
            job.stop();
        }
    }

    fn on_print_job_event(&self, job: &Arc<PrintJob>, details: &JobEventDetails) {
        match details.kind() {
            JobEventKind::NewDoc => {
                let previous = lock(&self.current_jobs).insert(job.id(), Arc::clone(job));
                debug_assert!(previous.is_none(), "job {} started twice", job.id());
            }
            JobEventKind::JobDone => {
                let removed = lock(&self.current_jobs).remove(&job.id());
                debug_assert!(removed.is_some(), "job {} finished but was not active", job.id());
            }
            JobEventKind::Failed => {
                let removed = lock(&self.current_jobs).remove(&job.id());
                if removed.is_none() {
                    debug!(job = %job.id(), "failed job was not active");
                }
            }
            JobEventKind::UserInitDone
            | JobEventKind::UserInitCanceled
            | JobEventKind::DefaultInitDone
            | JobEventKind::NewPage
            | JobEventKind::PageDone
            | JobEventKind::DocDone
            | JobEventKind::AllPagesRequested => {}
        }
    }
}

impl JobEventObserver for PrintJobManager {
    fn on_job_event(&self, job: &Arc<PrintJob>, details: &JobEventDetails) {
        self.on_print_job_event(job, details);
    }
}

impl Drop for PrintJobManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
