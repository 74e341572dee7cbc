//! Per-renderer controller that turns rendered pages into a print job.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use shellprint_printing::{
    Completion, DocumentCookie, EventScope, JobEventDetails, JobEventKind, JobEventObserver,
    PageMetafile, PrintJob, PrintJobManager, PrintQueriesQueue, PrinterQuery, Rect, Size,
    Subscription,
};

/// The renderer side of one web page, as seen by the print host.
pub trait PrintRenderer: Send + Sync {
    fn is_render_view_live(&self) -> bool;
    /// Used as the document name.
    fn title(&self) -> String;
    /// Asks the renderer to print. Returns false if the request was not sent.
    fn print_pages(&self, silent: bool, print_background: bool) -> bool;
    fn printing_done(&self, success: bool);
    /// The current job, if any, was let go.
    fn print_job_released(&self);
    /// Aborts whatever the page is loading; sent when its output is unusable.
    fn stop_loading(&self);
}

/// One page reported by the renderer.
#[derive(Debug, Clone)]
pub struct DidPrintPageParams {
    pub document_cookie: DocumentCookie,
    pub page_number: u32,
    /// Only the first page of a document must carry data.
    pub metafile: Option<PageMetafile>,
    pub page_size: Size,
    pub content_area: Rect,
}

#[derive(Default)]
struct ViewState {
    print_job: Option<Arc<PrintJob>>,
    subscription: Option<Subscription>,
    number_pages: u32,
    printing_succeeded: bool,
    cookie: DocumentCookie,
    expecting_first_page: bool,
    inner_wait: Option<Completion>,
}

/// Connects one renderer to the print job that spools its pages.
///
/// Lives on the UI runner. The job is created lazily from the settled
/// printer query once the renderer reports its first page or page count.
pub struct PrintViewManager {
    weak_self: Weak<PrintViewManager>,
    renderer: Arc<dyn PrintRenderer>,
    manager: Arc<PrintJobManager>,
    queue: Arc<PrintQueriesQueue>,
    render_pages_timeout: Duration,
    state: Mutex<ViewState>,
}

impl fmt::Debug for PrintViewManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("PrintViewManager")
            .field("print_job", &state.print_job.as_ref().map(|job| job.id()))
            .field("cookie", &state.cookie)
            .field("number_pages", &state.number_pages)
            .field("printing_succeeded", &state.printing_succeeded)
            .finish()
    }
}

impl PrintViewManager {
    pub fn new(renderer: Arc<dyn PrintRenderer>, manager: Arc<PrintJobManager>) -> Arc<Self> {
        let queue = manager.queue();
        let render_pages_timeout = manager.config().render_pages_timeout();
        Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            renderer,
            manager,
            queue,
            render_pages_timeout,
            state: Mutex::new(ViewState {
                expecting_first_page: true,
                ..ViewState::default()
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn print_job(&self) -> Option<Arc<PrintJob>> {
        self.state().print_job.clone()
    }

    pub fn printing_succeeded(&self) -> bool {
        self.state().printing_succeeded
    }

    pub fn cookie(&self) -> DocumentCookie {
        self.state().cookie
    }

    pub fn print_now(&self, silent: bool, print_background: bool) -> bool {
        self.renderer.print_pages(silent, print_background)
    }

    pub fn on_did_get_printed_pages_count(&self, cookie: DocumentCookie, number_pages: u32) {
        debug_assert!(cookie.is_valid());
        debug_assert!(number_pages > 0);
        self.state().number_pages = number_pages;
        if !self.opportunistically_create_print_job(cookie) {
            return;
        }
        // A job created from an earlier page does not know the count yet.
        if let Some(document) = self.print_job().and_then(|job| job.document()) {
            if document.cookie() == cookie && document.page_count() == 0 {
                document.set_page_count(number_pages);
            }
        }
    }

    pub fn on_did_get_document_cookie(&self, cookie: DocumentCookie) {
        self.state().cookie = cookie;
    }

    pub fn on_did_print_page(&self, params: DidPrintPageParams) {
        if !self.opportunistically_create_print_job(params.document_cookie) {
            return;
        }
        let Some(document) = self.print_job().and_then(|job| job.document()) else {
            return;
        };
        if document.cookie() != params.document_cookie {
            // Stale message from an earlier document.
            debug!(cookie = %params.document_cookie, "dropping page for another document");
            return;
        }

        let metafile_must_be_valid = {
            let mut state = self.state();
            std::mem::replace(&mut state.expecting_first_page, false)
        };
        let metafile = match params.metafile {
            Some(metafile) => metafile,
            None if metafile_must_be_valid => {
                warn!(page = params.page_number, "first page arrived without data");
                self.renderer.stop_loading();
                return;
            }
            None => PageMetafile::default(),
        };

        document.set_page(
            params.page_number,
            metafile,
            params.page_size,
            params.content_area,
        );
        self.should_quit_from_inner_wait();
    }

    pub fn on_printing_failed(&self, cookie: DocumentCookie) {
        if cookie != self.cookie() {
            debug_assert!(false, "printing failed for unknown {cookie}");
            return;
        }
        self.release_printer_query();
        self.renderer.print_job_released();
    }

    /// Cancels the current job.
    pub fn navigation_stopped(&self) {
        self.terminate_print_job(true);
    }

    /// A complete document may still finish; anything else is cancelled.
    pub fn render_process_gone(&self) {
        self.release_printer_query();
        let Some(job) = self.print_job() else {
            return;
        };
        if let Some(document) = job.document() {
            self.terminate_print_job(!document.is_complete());
        }
    }

    /// Waits, bounded, until the renderer produced every page of a pending
    /// job. Returns true when the document is complete.
    pub fn render_all_missing_pages_now(&self) -> bool {
        let Some(job) = self.print_job().filter(|job| job.is_job_pending()) else {
            return false;
        };
        if !self.renderer.is_render_view_live() {
            return false;
        }
        if job.document().is_some_and(|document| document.is_complete()) {
            self.state().printing_succeeded = true;
            return true;
        }
        self.run_inner_wait()
    }

    fn run_inner_wait(&self) -> bool {
        let completion = Completion::new();
        self.state().inner_wait = Some(completion.clone());

        debug!(timeout = ?self.render_pages_timeout, "waiting for missing pages");
        let runner = self.manager.threads().ui.clone();
        runner.wait_for(&completion, Instant::now() + self.render_pages_timeout);

        // Whoever ended the wait took the completion; still present means
        // the deadline passed.
        let timed_out = self.state().inner_wait.take().is_some();
        if timed_out {
            warn!(timeout = ?self.render_pages_timeout, "renderer did not produce every page in time");
        }
        !timed_out
    }

    fn should_quit_from_inner_wait(&self) {
        let complete = self
            .print_job()
            .and_then(|job| job.document())
            .is_some_and(|document| document.is_complete());
        if !complete {
            return;
        }
        if let Some(completion) = self.state().inner_wait.take() {
            completion.complete();
        }
    }

    fn opportunistically_create_print_job(&self, cookie: DocumentCookie) -> bool {
        if self.state().print_job.is_some() {
            return true;
        }
        if !cookie.is_valid() {
            // Out of sync with the renderer.
            return false;
        }

        let Some(query) = self.queue.pop_printer_query(cookie) else {
            warn!(%cookie, "no settled printer query for the document");
            return false;
        };
        let Some(job) = self.create_new_print_job(&query) else {
            return false;
        };
        job.start_printing();
        true
    }

    fn create_new_print_job(&self, query: &PrinterQuery) -> Option<Arc<PrintJob>> {
        debug_assert!(self.state().inner_wait.is_none());
        self.disconnect_from_current_print_job();

        if !self.renderer.is_render_view_live() {
            return None;
        }

        let job = self.manager.create_print_job();
        let number_pages = self.state().number_pages;
        if !job.initialize(query, &self.renderer.title(), number_pages) {
            return None;
        }
        let observer: Weak<dyn JobEventObserver> = self.weak_self.clone();
        let subscription = self
            .manager
            .bus()
            .subscribe(EventScope::Job(job.id()), observer);

        let mut state = self.state();
        state.print_job = Some(Arc::clone(&job));
        state.subscription = Some(subscription);
        state.printing_succeeded = false;
        info!(job = %job.id(), cookie = %query.cookie(), "print job created for renderer");
        Some(job)
    }

    fn disconnect_from_current_print_job(&self) {
        let rendered = self.render_all_missing_pages_now();

        let incomplete = self
            .print_job()
            .and_then(|job| job.document())
            .is_some_and(|document| !document.is_complete());
        if incomplete {
            debug_assert!(!rendered);
            self.terminate_print_job(true);
        } else {
            // Does not wait for the job to finish.
            self.release_print_job();
        }
        self.state().expecting_first_page = true;
    }

    /// Cancels or stops the current job and lets go of it.
    pub fn terminate_print_job(&self, cancel: bool) {
        let Some(job) = self.print_job() else {
            return;
        };
        if cancel {
            // Ends a pending wait; the pages are not needed any more.
            let wait = self.state().inner_wait.take();
            if let Some(wait) = wait {
                wait.complete();
            }
            job.cancel();
        } else {
            debug_assert!(self.state().inner_wait.is_none());
            debug_assert!(job.document().map_or(true, |document| document.is_complete()));
            job.stop();
        }
        self.release_print_job();
    }

    /// Drops the current job without stopping it.
    pub fn release_print_job(&self) {
        let (job, subscription, succeeded) = {
            let mut state = self.state();
            let Some(job) = state.print_job.take() else {
                return;
            };
            (job, state.subscription.take(), state.printing_succeeded)
        };
        debug!(job = %job.id(), succeeded, "releasing print job");
        self.renderer.printing_done(succeeded);
        drop(subscription);
    }

    /// Stops the worker of a query the renderer never used.
    pub fn release_printer_query(&self) {
        let cookie = std::mem::take(&mut self.state().cookie);
        if !cookie.is_valid() {
            return;
        }
        let Some(query) = self.queue.pop_printer_query(cookie) else {
            return;
        };
        debug!(%cookie, "releasing unused printer query");
        self.manager
            .threads()
            .io
            .post_task(move || query.stop_worker());
    }

    fn on_print_job_event(&self, details: &JobEventDetails) {
        match details.kind() {
            JobEventKind::Failed => {
                self.terminate_print_job(true);
                self.renderer.print_job_released();
            }
            JobEventKind::UserInitDone
            | JobEventKind::DefaultInitDone
            | JobEventKind::UserInitCanceled => {
                debug_assert!(false, "unexpected {} for a renderer job", details.kind());
            }
            JobEventKind::AllPagesRequested => self.should_quit_from_inner_wait(),
            JobEventKind::NewDoc
            | JobEventKind::NewPage
            | JobEventKind::PageDone
            | JobEventKind::DocDone => {}
            JobEventKind::JobDone => {
                self.state().printing_succeeded = true;
                self.release_print_job();
                self.renderer.print_job_released();
            }
        }
    }
}

impl JobEventObserver for PrintViewManager {
    fn on_job_event(&self, _job: &Arc<PrintJob>, details: &JobEventDetails) {
        self.on_print_job_event(details);
    }
}

impl Drop for PrintViewManager {
    fn drop(&mut self) {
        self.release_printer_query();
        self.disconnect_from_current_print_job();
    }
}
