use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::context::{ContextResult, PrintingContext, RenderTarget};
use crate::events::JobEventDetails;
use crate::job_settings::JobSettings;
use crate::queries_queue::PrintDestination;
use crate::settings::{DocumentCookie, PrintSettings};
use crate::task::{lock, PrintThreads, TaskRunner};
use crate::worker::{
    GetSettingsAsk, GetSettingsParams, OwnerHandle, PrintJobWorker, PrintJobWorkerOwner,
};

type SettingsCallback = Box<dyn FnOnce() + Send + 'static>;

struct QueryState {
    worker: Option<PrintJobWorker>,
    settings: PrintSettings,
    cookie: DocumentCookie,
    last_status: ContextResult,
    callback: Option<SettingsCallback>,
    is_print_dialog_box_shown: bool,
    destination: Option<Arc<dyn PrintDestination>>,
}

/// Resolves printer settings for one print request on the I/O runner.
///
/// The query owns a [`PrintJobWorker`] until a print job takes it over with
/// [`PrinterQuery::detach_worker`].
pub struct PrinterQuery {
    weak_self: Weak<PrinterQuery>,
    runner: TaskRunner,
    target: RenderTarget,
    state: Mutex<QueryState>,
}

impl fmt::Debug for PrinterQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("PrinterQuery")
            .field("target", &self.target)
            .field("cookie", &state.cookie)
            .field("last_status", &state.last_status)
            .field("has_worker", &state.worker.is_some())
            .finish()
    }
}

impl PrinterQuery {
    pub fn new(
        threads: &PrintThreads,
        target: RenderTarget,
        context: Arc<dyn PrintingContext>,
        page_poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<PrinterQuery>| {
            let owner: Weak<dyn PrintJobWorkerOwner> = weak.clone();
            let worker = PrintJobWorker::new(
                OwnerHandle::new(owner, threads.io.clone()),
                context,
                threads.ui.clone(),
                page_poll_interval,
            );
            Self {
                weak_self: weak.clone(),
                runner: threads.io.clone(),
                target,
                state: Mutex::new(QueryState {
                    worker: Some(worker),
                    settings: PrintSettings::default(),
                    cookie: DocumentCookie::INVALID,
                    last_status: ContextResult::Ok,
                    callback: None,
                    is_print_dialog_box_shown: false,
                    destination: None,
                }),
            }
        })
    }

    pub fn target(&self) -> RenderTarget {
        self.target
    }

    /// Asks the worker for settings; `callback` runs on the I/O runner once
    /// they are resolved, successfully or not.
    pub fn get_settings<F>(&self, params: GetSettingsParams, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut params = params;
        let mut state = lock(&self.state);
        debug_assert!(state.callback.is_none(), "settings request already pending");

        if state.destination.is_some() && params.ask == GetSettingsAsk::AskUser {
            debug!("print destination is set, skipping the system dialog");
            params.ask = GetSettingsAsk::Defaults;
        }
        state.is_print_dialog_box_shown = params.ask == GetSettingsAsk::AskUser;
        state.callback = Some(Box::new(callback));

        let posted = Self::start_worker(&mut state)
            && state
                .worker
                .as_ref()
                .is_some_and(|worker| worker.get_settings(params));
        drop(state);
        if !posted {
            self.fail_without_worker();
        }
    }

    /// Pushes a settings dictionary to the printing context.
    pub fn set_settings<F>(&self, job_settings: JobSettings, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = lock(&self.state);
        debug_assert!(state.callback.is_none(), "settings request already pending");
        state.callback = Some(Box::new(callback));

        let posted = Self::start_worker(&mut state)
            && state
                .worker
                .as_ref()
                .is_some_and(|worker| worker.set_settings(job_settings));
        drop(state);
        if !posted {
            self.fail_without_worker();
        }
    }

    fn start_worker(state: &mut QueryState) -> bool {
        match state.worker.as_mut() {
            Some(worker) => worker.is_running() || worker.start(),
            None => false,
        }
    }

    fn fail_without_worker(&self) {
        warn!(frame = ?self.target, "printer query has no usable worker");
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        // Reply asynchronously, the way the worker would have.
        self.runner.post_task(move || {
            this.get_settings_done(PrintSettings::default(), ContextResult::Failed);
        });
    }

    /// Hands the worker over to a new owner. Succeeds at most once.
    pub fn detach_worker(&self, new_owner: OwnerHandle) -> Option<PrintJobWorker> {
        let mut state = lock(&self.state);
        debug_assert!(state.callback.is_none(), "detaching while settings are pending");
        let Some(worker) = state.worker.take() else {
            warn!(frame = ?self.target, "printer query worker was already detached");
            return None;
        };
        worker.set_new_owner(new_owner);
        Some(worker)
    }

    /// Stops the worker thread if the query still owns it.
    pub fn stop_worker(&self) {
        let worker = lock(&self.state).worker.take();
        if let Some(mut worker) = worker {
            debug!(frame = ?self.target, "stopping printer query worker");
            worker.stop();
        }
    }

    pub fn settings(&self) -> PrintSettings {
        lock(&self.state).settings.clone()
    }

    pub fn cookie(&self) -> DocumentCookie {
        lock(&self.state).cookie
    }

    pub fn last_status(&self) -> ContextResult {
        lock(&self.state).last_status
    }

    pub fn is_callback_pending(&self) -> bool {
        lock(&self.state).callback.is_some()
    }

    pub fn is_print_dialog_box_shown(&self) -> bool {
        lock(&self.state).is_print_dialog_box_shown
    }

    /// True while the query still owns a worker.
    pub fn is_valid(&self) -> bool {
        lock(&self.state).worker.is_some()
    }

    pub fn set_destination(&self, destination: Option<Arc<dyn PrintDestination>>) {
        lock(&self.state).destination = destination;
    }

    pub fn destination(&self) -> Option<Arc<dyn PrintDestination>> {
        lock(&self.state).destination.clone()
    }
}

impl PrintJobWorkerOwner for PrinterQuery {
    fn get_settings_done(&self, settings: PrintSettings, result: ContextResult) {
        let callback = {
            let mut state = lock(&self.state);
            state.is_print_dialog_box_shown = false;
            state.last_status = result;
            if result.is_ok() {
                state.settings = settings;
                state.cookie = DocumentCookie::generate();
            } else {
                state.cookie = DocumentCookie::INVALID;
            }
            debug!(frame = ?self.target, ?result, cookie = %state.cookie, "printer query settled");
            state.callback.take()
        };
        // The callback may re-enter the query, e.g. to stop the worker.
        if let Some(callback) = callback {
            callback();
        }
    }

    fn on_worker_event(&self, details: JobEventDetails) {
        debug_assert!(false, "printer query received a job event: {details:?}");
        warn!(event = %details.kind(), "printer query ignores job events");
    }
}
