use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::context::ContextResult;
use crate::document::{PrintedDocument, PrintedPage};
use crate::events::{
    EventScope, JobEventBus, JobEventDetails, JobEventKind, JobEventObserver, Subscription,
};
use crate::printer_query::PrinterQuery;
use crate::settings::{DocumentCookie, PrintSettings};
use crate::shutdown::{ShutdownStep, WorkerShutdownPolicy};
use crate::task::{lock, Completion, TaskRunner};
use crate::worker::{OwnerHandle, PrintJobWorker, PrintJobWorkerOwner};

/// Opaque identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrintJobId(u64);

impl PrintJobId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for PrintJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PrintJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "print-job-{}", self.0)
    }
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPhase {
    #[default]
    Empty,
    Initialized,
    Printing,
    Done,
    Failed,
    Stopped,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Done | JobPhase::Failed | JobPhase::Stopped)
    }
}

#[derive(Default)]
struct JobState {
    worker: Option<PrintJobWorker>,
    document: Option<Arc<PrintedDocument>>,
    settings: PrintSettings,
    is_job_pending: bool,
    phase: JobPhase,
    flushes: Vec<Completion>,
    subscription: Option<Subscription>,
}

/// One document being printed.
///
/// Lives on the UI runner. Takes over the worker of a settled
/// [`PrinterQuery`], drives it through the document and broadcasts progress
/// on the [`JobEventBus`].
pub struct PrintJob {
    id: PrintJobId,
    weak_self: Weak<PrintJob>,
    runner: TaskRunner,
    bus: Arc<JobEventBus>,
    shutdown_policy: Arc<dyn WorkerShutdownPolicy>,
    is_canceling: AtomicBool,
    state: Mutex<JobState>,
}

impl fmt::Debug for PrintJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("PrintJob")
            .field("id", &self.id)
            .field("phase", &state.phase)
            .field("is_job_pending", &state.is_job_pending)
            .field("document", &state.document)
            .finish()
    }
}

impl PrintJob {
    pub fn new(
        runner: TaskRunner,
        bus: Arc<JobEventBus>,
        shutdown_policy: Arc<dyn WorkerShutdownPolicy>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id: PrintJobId::new(),
            weak_self: weak.clone(),
            runner,
            bus,
            shutdown_policy,
            is_canceling: AtomicBool::new(false),
            state: Mutex::new(JobState::default()),
        })
    }

    pub fn id(&self) -> PrintJobId {
        self.id
    }

    pub fn phase(&self) -> JobPhase {
        lock(&self.state).phase
    }

    pub fn document(&self) -> Option<Arc<PrintedDocument>> {
        lock(&self.state).document.clone()
    }

    pub fn settings(&self) -> PrintSettings {
        lock(&self.state).settings.clone()
    }

    pub fn cookie(&self) -> DocumentCookie {
        lock(&self.state)
            .document
            .as_ref()
            .map_or(DocumentCookie::INVALID, |document| document.cookie())
    }

    /// True between [`PrintJob::start_printing`] and the worker's shutdown.
    pub fn is_job_pending(&self) -> bool {
        lock(&self.state).is_job_pending
    }

    pub fn is_worker_running(&self) -> bool {
        lock(&self.state)
            .worker
            .as_ref()
            .is_some_and(PrintJobWorker::is_running)
    }

    /// Takes over the query's worker and creates the document.
    ///
    /// Returns false if the query no longer has a worker.
    pub fn initialize(&self, query: &PrinterQuery, name: &str, page_count: u32) -> bool {
        let document = {
            let mut state = lock(&self.state);
            debug_assert!(state.worker.is_none(), "job initialized twice");
            debug_assert!(!state.is_job_pending);
            if state.worker.is_some() || state.document.is_some() {
                warn!(job = %self.id, "print job is already initialized");
                return false;
            }

            let owner: Weak<dyn PrintJobWorkerOwner> = self.weak_self.clone();
            let Some(worker) = query.detach_worker(OwnerHandle::new(owner, self.runner.clone()))
            else {
                warn!(job = %self.id, "printer query has no worker to hand over");
                return false;
            };
            state.worker = Some(worker);
            state.settings = query.settings();

            let document = PrintedDocument::new(state.settings.clone(), name, query.cookie());
            document.set_page_count(page_count);

            let observer: Weak<dyn JobEventObserver> = self.weak_self.clone();
            state.subscription = Some(self.bus.subscribe(EventScope::Job(self.id), observer));
            state.phase = JobPhase::Initialized;
            document
        };

        debug!(job = %self.id, cookie = %document.cookie(), page_count, "print job initialized");
        self.update_printed_document(Some(document));
        true
    }

    /// Tells the worker to start spooling and announces `NEW_DOC`.
    pub fn start_printing(&self) {
        let document = {
            let mut state = lock(&self.state);
            let running = state
                .worker
                .as_ref()
                .is_some_and(PrintJobWorker::is_running);
            debug_assert!(running, "worker must be running before printing starts");
            debug_assert!(!state.is_job_pending, "job already started");
            if !running || state.is_job_pending {
                return;
            }
            let Some(document) = state.document.clone() else {
                warn!(job = %self.id, "start requested without a document");
                return;
            };
            let keep_alive = self.weak_self.upgrade();
            if let Some(worker) = state.worker.as_ref() {
                worker.start_printing(document.clone(), keep_alive);
            }
            state.is_job_pending = true;
            state.phase = JobPhase::Printing;
            document
        };

        info!(job = %self.id, cookie = %document.cookie(), "print job started");
        self.broadcast(JobEventKind::NewDoc, Some(document), None);
    }

    /// Ends the job: wakes pending flushes and shuts the worker down.
    pub fn stop(&self) {
        let _hold = self.weak_self.upgrade();
        let (running, flushes) = {
            let mut state = lock(&self.state);
            if !matches!(state.phase, JobPhase::Done | JobPhase::Failed) {
                state.phase = JobPhase::Stopped;
            }
            let running = state
                .worker
                .as_ref()
                .is_some_and(PrintJobWorker::is_running);
            (running, std::mem::take(&mut state.flushes))
        };
        for flush in flushes {
            flush.complete();
        }

        if running {
            self.controlled_worker_shutdown();
        } else {
            // Flush the document from memory.
            self.update_printed_document(None);
        }
    }

    /// Aborts the job and broadcasts `FAILED`.
    ///
    /// Re-entrant calls and calls on a finished job are ignored.
    pub fn cancel(&self) {
        if self.phase().is_terminal() {
            debug!(job = %self.id, "cancel ignored, job already finished");
            return;
        }
        if self.is_canceling.swap(true, Ordering::SeqCst) {
            return;
        }
        let _hold = self.weak_self.upgrade();
        info!(job = %self.id, "canceling print job");

        {
            let state = lock(&self.state);
            if let Some(worker) = state.worker.as_ref().filter(|worker| worker.is_running()) {
                worker.cancel();
            }
        }
        self.broadcast(JobEventKind::Failed, None, None);
        self.stop();

        self.is_canceling.store(false, Ordering::SeqCst);
    }

    /// Pumps the UI runner until the job stops or `timeout` passes.
    ///
    /// Returns immediately when nothing is pending.
    pub fn flush_job(&self, timeout: Duration) -> bool {
        let _hold = self.weak_self.upgrade();
        let completion = {
            let mut state = lock(&self.state);
            if !state.is_job_pending {
                return true;
            }
            let completion = Completion::new();
            state.flushes.push(completion.clone());
            completion
        };

        let finished = self
            .runner
            .wait_for(&completion, Instant::now() + timeout);
        if !finished {
            debug!(job = %self.id, ?timeout, "flush timed out");
            let mut state = lock(&self.state);
            state.flushes.retain(|pending| !pending.same_as(&completion));
        }
        true
    }

    /// Hands a new document (or none) to the worker.
    pub fn update_printed_document(&self, new_document: Option<Arc<PrintedDocument>>) {
        let mut state = lock(&self.state);
        let same = match (&state.document, &new_document) {
            (Some(current), Some(new)) => Arc::ptr_eq(current, new),
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }

        state.document = new_document.clone();
        if let Some(document) = &new_document {
            state.settings = document.settings().clone();
        }
        if let Some(worker) = state.worker.as_ref() {
            debug_assert!(!state.is_job_pending, "document swapped while printing");
            worker.on_document_changed(new_document);
        }
    }

    fn on_document_done(&self) {
        let _hold = self.weak_self.upgrade();
        let document = self.document();
        // Stop the worker before announcing completion.
        self.stop();
        lock(&self.state).phase = JobPhase::Done;

        info!(job = %self.id, "print job done");
        self.broadcast(JobEventKind::JobDone, document, None);
    }

    fn controlled_worker_shutdown(&self) {
        let step = {
            let mut state = lock(&self.state);
            match state.worker.as_mut() {
                Some(worker) => self.shutdown_policy.shutdown_step(worker),
                None => ShutdownStep::Finished,
            }
        };

        match step {
            ShutdownStep::RetryAfter(delay) => {
                trace!(job = %self.id, ?delay, "worker still running, checking again");
                if let Some(job) = self.weak_self.upgrade() {
                    self.runner
                        .post_delayed_task(delay, move || job.controlled_worker_shutdown());
                }
                return;
            }
            ShutdownStep::Join(handle) => self.join_off_thread(handle),
            ShutdownStep::Finished => {}
        }

        let subscription = {
            let mut state = lock(&self.state);
            state.is_job_pending = false;
            state.subscription.take()
        };
        drop(subscription);
        self.update_printed_document(None);
    }

    /// Joins the worker on a helper thread; the job stays alive until the
    /// join finished and the reference came back to the UI runner.
    fn join_off_thread(&self, handle: JoinHandle<()>) {
        let hold = self.weak_self.upgrade();
        let reply = self.runner.clone();
        let job = self.id;
        let spawned = thread::Builder::new()
            .name("PrintJob_WorkerJoin".to_string())
            .spawn(move || {
                if handle.join().is_err() {
                    error!(%job, "printing worker thread panicked");
                }
                trace!(%job, "printing worker joined");
                if let Some(hold) = hold {
                    reply.post_task(move || drop(hold));
                }
            });
        if let Err(err) = spawned {
            warn!(job = %self.id, %err, "could not spawn join thread, worker left detached");
        }
    }

    fn broadcast(
        &self,
        kind: JobEventKind,
        document: Option<Arc<PrintedDocument>>,
        page: Option<Arc<PrintedPage>>,
    ) {
        if let Some(job) = self.weak_self.upgrade() {
            self.bus
                .notify(&job, JobEventDetails::new(kind, document, page));
        }
    }
}

impl PrintJobWorkerOwner for PrintJob {
    fn get_settings_done(&self, _settings: PrintSettings, result: ContextResult) {
        debug_assert!(false, "print jobs never request settings");
        warn!(job = %self.id, ?result, "unexpected settings reply for a print job");
    }

    fn on_worker_event(&self, details: JobEventDetails) {
        let phase = self.phase();
        if phase.is_terminal() {
            // The worker may still drain tasks queued before the job ended.
            trace!(job = %self.id, kind = %details.kind(), ?phase, "dropping late worker event");
            return;
        }
        if let Some(job) = self.weak_self.upgrade() {
            self.bus.notify(&job, details);
        }
    }
}

impl JobEventObserver for PrintJob {
    fn on_job_event(&self, job: &Arc<PrintJob>, details: &JobEventDetails) {
        debug_assert_eq!(job.id(), self.id);
        match details.kind() {
            JobEventKind::Failed => {
                {
                    let mut state = lock(&self.state);
                    state.settings.clear();
                    if state.phase != JobPhase::Done {
                        state.phase = JobPhase::Failed;
                    }
                }
                self.stop();
            }
            JobEventKind::UserInitDone
            | JobEventKind::DefaultInitDone
            | JobEventKind::UserInitCanceled => {
                let current = self.document();
                debug_assert!(
                    match (details.document(), current.as_ref()) {
                        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                        (None, None) => true,
                        _ => false,
                    },
                    "init event for a foreign document"
                );
            }
            JobEventKind::DocDone => {
                // Finish from a fresh task so the worker's event unwinds first.
                if let Some(job) = self.weak_self.upgrade() {
                    self.runner.post_task(move || job.on_document_done());
                }
            }
            JobEventKind::NewDoc
            | JobEventKind::NewPage
            | JobEventKind::PageDone
            | JobEventKind::JobDone
            | JobEventKind::AllPagesRequested => {}
        }
    }
}

impl Drop for PrintJob {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug_assert!(!state.is_job_pending, "print job dropped while printing");
        debug_assert!(!self.is_canceling.load(Ordering::SeqCst));
        trace!(job = %self.id, "print job dropped");
    }
}
