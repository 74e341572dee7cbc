//! The printing worker: a dedicated thread that drives a
//! [`PrintingContext`] and reports back to whoever currently owns it.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::context::{ContextResult, PrintingContext};
use crate::document::{simplify_document_title, PageCursor, PrintedDocument, PrintedPage};
use crate::events::{JobEventDetails, JobEventKind};
use crate::job_settings::JobSettings;
use crate::settings::{MarginType, PrintSettings};
use crate::task::{lock, TaskRunner};

pub const WORKER_THREAD_NAME: &str = "Printing_Worker";

/// Receives the results a [`PrintJobWorker`] posts to its owner's runner.
pub trait PrintJobWorkerOwner: Send + Sync {
    fn get_settings_done(&self, settings: PrintSettings, result: ContextResult);
    fn on_worker_event(&self, details: JobEventDetails);
}

/// Weak link from a worker to its owner plus the runner the owner lives on.
#[derive(Clone)]
pub struct OwnerHandle {
    owner: Weak<dyn PrintJobWorkerOwner>,
    runner: TaskRunner,
}

impl fmt::Debug for OwnerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerHandle")
            .field("runner", &self.runner)
            .field("alive", &(self.owner.strong_count() > 0))
            .finish()
    }
}

impl OwnerHandle {
    pub fn new(owner: Weak<dyn PrintJobWorkerOwner>, runner: TaskRunner) -> Self {
        Self { owner, runner }
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Runs `task` on the owner's runner; the owner stays alive until it ran.
    fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&dyn PrintJobWorkerOwner) + Send + 'static,
    {
        let Some(owner) = self.owner.upgrade() else {
            trace!("worker owner is gone, dropping reply");
            return false;
        };
        self.runner.post_task(move || task(owner.as_ref()))
    }

    fn post_event(
        &self,
        kind: JobEventKind,
        document: Option<Arc<PrintedDocument>>,
        page: Option<Arc<PrintedPage>>,
    ) -> bool {
        let details = JobEventDetails::new(kind, document, page);
        self.post(move |owner| owner.on_worker_event(details))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GetSettingsAsk {
    #[default]
    Defaults,
    AskUser,
}

/// Parameters of a settings request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetSettingsParams {
    pub ask: GetSettingsAsk,
    /// Page count shown in the dialog.
    pub page_count: u32,
    pub has_selection: bool,
    pub margin_type: MarginType,
    pub is_scripted: bool,
    pub is_modifiable: bool,
    /// Initialise from this printer instead of the system default.
    pub device_name: Option<String>,
}

impl GetSettingsParams {
    pub fn defaults() -> Self {
        Self::default()
    }

    pub fn ask_user(page_count: u32, has_selection: bool, margin_type: MarginType) -> Self {
        Self {
            ask: GetSettingsAsk::AskUser,
            page_count,
            has_selection,
            margin_type,
            is_modifiable: true,
            ..Self::default()
        }
    }

    pub fn for_device(device_name: impl Into<String>) -> Self {
        Self {
            device_name: Some(device_name.into()),
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct SpoolState {
    document: Option<Arc<PrintedDocument>>,
    cursor: Option<PageCursor>,
}

/// State shared between the worker handle and tasks running on its thread.
struct WorkerShared {
    context: Arc<dyn PrintingContext>,
    ui_runner: TaskRunner,
    poll_interval: Duration,
    owner: Mutex<OwnerHandle>,
    spool: Mutex<SpoolState>,
}

impl WorkerShared {
    fn owner(&self) -> OwnerHandle {
        lock(&self.owner).clone()
    }

    fn get_settings(self: &Arc<Self>, worker_runner: &TaskRunner, params: GetSettingsParams) {
        debug_assert!(lock(&self.spool).cursor.is_none());
        let GetSettingsParams {
            ask,
            page_count,
            has_selection,
            margin_type,
            is_scripted,
            is_modifiable,
            device_name,
        } = params;

        self.context.set_margin_type(margin_type);
        self.context.set_is_modifiable(is_modifiable);

        // Platform settings APIs must run on the UI runner.
        let shared = Arc::clone(self);
        match (ask, device_name) {
            (GetSettingsAsk::AskUser, _) => {
                let worker_runner = worker_runner.clone();
                self.ui_runner.post_task(move || {
                    shared.get_settings_with_ui(worker_runner, page_count, has_selection, is_scripted)
                });
            }
            (GetSettingsAsk::Defaults, Some(device_name)) => {
                self.ui_runner
                    .post_task(move || shared.init_with_device_name(&device_name));
            }
            (GetSettingsAsk::Defaults, None) => {
                self.ui_runner.post_task(move || shared.use_default_settings());
            }
        }
    }

    fn get_settings_with_ui(
        self: Arc<Self>,
        worker_runner: TaskRunner,
        page_count: u32,
        has_selection: bool,
        is_scripted: bool,
    ) {
        let shared = Arc::clone(&self);
        self.context.ask_user_for_settings(
            page_count,
            has_selection,
            is_scripted,
            Box::new(move |result| {
                worker_runner.post_task(move || shared.get_settings_done(result));
            }),
        );
    }

    fn use_default_settings(&self) {
        let result = self.context.use_default_settings();
        self.get_settings_done(result);
    }

    fn init_with_device_name(&self, device_name: &str) {
        let result = self.context.init_with_device_name(device_name);
        self.get_settings_done(result);
    }

    fn set_settings(self: &Arc<Self>, job_settings: JobSettings) {
        let shared = Arc::clone(self);
        self.ui_runner.post_task(move || {
            let result = shared.context.update_print_settings(&job_settings);
            shared.get_settings_done(result);
        });
    }

    fn get_settings_done(&self, result: ContextResult) {
        let settings = self.context.settings();
        debug!(?result, dpi = settings.dpi, "printer settings resolved");
        self.owner()
            .post(move |owner| owner.get_settings_done(settings, result));
    }

    fn on_document_changed(&self, document: Option<Arc<PrintedDocument>>) {
        let mut spool = lock(&self.spool);
        debug_assert!(spool.cursor.is_none(), "document changed while printing");
        if spool.cursor.is_some() {
            return;
        }
        spool.document = document;
    }

    fn start_printing(self: &Arc<Self>, worker_runner: &TaskRunner, new_document: Arc<PrintedDocument>) {
        {
            let spool = lock(&self.spool);
            let matches = spool
                .document
                .as_ref()
                .is_some_and(|document| Arc::ptr_eq(document, &new_document));
            debug_assert!(spool.cursor.is_none(), "already printing");
            debug_assert!(matches, "document was not handed to the worker first");
            if spool.cursor.is_some() || !matches {
                warn!(cookie = %new_document.cookie(), "ignoring start request for a foreign document");
                return;
            }
        }

        let title = simplify_document_title(new_document.name());
        if !self.context.new_document(&title).is_ok() {
            self.on_failure();
            return;
        }

        // Spool whatever is already rendered; the rest is polled for.
        self.on_new_page(worker_runner);
    }

    /// Spools every page that is ready, in order.
    ///
    /// When the next page is missing a re-check is scheduled after the poll
    /// interval; a worker that was destroyed in the meantime ignores it.
    fn on_new_page(self: &Arc<Self>, worker_runner: &TaskRunner) {
        let document = {
            let mut spool = lock(&self.spool);
            let Some(document) = spool.document.clone() else {
                return;
            };
            if spool.cursor.is_none() {
                let page_count = document.page_count();
                if page_count == 0 {
                    trace!(cookie = %document.cookie(), "page count not known yet");
                    drop(spool);
                    self.schedule_poll(worker_runner);
                    return;
                }
                spool.cursor = Some(PageCursor::new(&document.settings().ranges, page_count));
            }
            document
        };

        loop {
            let next = lock(&self.spool).cursor.as_ref().and_then(PageCursor::current);
            let Some(page_number) = next else {
                self.on_document_done();
                return;
            };

            let Some(page) = document.get_page(page_number) else {
                trace!(page = page_number, "page not rendered yet, polling");
                self.schedule_poll(worker_runner);
                return;
            };

            if !self.spool_page(&document, &page) {
                return;
            }

            let exhausted = {
                let mut spool = lock(&self.spool);
                match spool.cursor.as_mut() {
                    Some(cursor) => {
                        cursor.advance();
                        cursor.is_exhausted()
                    }
                    None => return,
                }
            };
            if exhausted {
                self.on_document_done();
                return;
            }
        }
    }

    fn schedule_poll(self: &Arc<Self>, worker_runner: &TaskRunner) {
        let weak: Weak<WorkerShared> = Arc::downgrade(self);
        let runner = worker_runner.clone();
        worker_runner.post_delayed_task(self.poll_interval, move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_new_page(&runner);
            }
        });
    }

    fn spool_page(&self, document: &Arc<PrintedDocument>, page: &Arc<PrintedPage>) -> bool {
        let owner = self.owner();
        if !self.context.new_page().is_ok() {
            self.on_failure();
            return false;
        }
        owner.post_event(JobEventKind::NewPage, Some(document.clone()), Some(page.clone()));

        if !self.context.render_page(page).is_ok() {
            self.on_failure();
            return false;
        }
        if !self.context.page_done().is_ok() {
            self.on_failure();
            return false;
        }
        owner.post_event(JobEventKind::PageDone, Some(document.clone()), Some(page.clone()));
        true
    }

    fn on_document_done(&self) {
        let document = {
            let mut spool = lock(&self.spool);
            spool.cursor = None;
            spool.document.clone()
        };
        debug_assert!(document.is_some(), "document finished without a document");
        let Some(document) = document else {
            return;
        };

        // Every selected page has been taken from the document.
        self.owner()
            .post_event(JobEventKind::AllPagesRequested, Some(document.clone()), None);

        if !self.context.document_done().is_ok() {
            self.on_failure();
            return;
        }
        debug!(cookie = %document.cookie(), "document spooled");
        self.owner()
            .post_event(JobEventKind::DocDone, Some(document), None);

        lock(&self.spool).document = None;
    }

    fn on_failure(&self) {
        let document = lock(&self.spool).document.clone();
        warn!(
            cookie = ?document.as_ref().map(|d| d.cookie()),
            "printing context failed, aborting document"
        );
        self.owner().post_event(JobEventKind::Failed, document, None);
        self.context.cancel();

        let mut spool = lock(&self.spool);
        spool.document = None;
        spool.cursor = None;
    }
}

struct WorkerThread {
    runner: TaskRunner,
    handle: JoinHandle<()>,
}

/// Owns the printing worker thread and the [`PrintingContext`] it drives.
///
/// Requests are posted to the worker thread; results go back to the current
/// owner's runner through an [`OwnerHandle`].
pub struct PrintJobWorker {
    shared: Arc<WorkerShared>,
    thread: Option<WorkerThread>,
}

impl fmt::Debug for PrintJobWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintJobWorker")
            .field("running", &self.is_running())
            .finish()
    }
}

impl PrintJobWorker {
    pub fn new(
        owner: OwnerHandle,
        context: Arc<dyn PrintingContext>,
        ui_runner: TaskRunner,
        poll_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                context,
                ui_runner,
                poll_interval,
                owner: Mutex::new(owner),
                spool: Mutex::new(SpoolState::default()),
            }),
            thread: None,
        }
    }

    /// Re-targets replies. Only valid while no page is being spooled.
    pub fn set_new_owner(&self, owner: OwnerHandle) {
        debug_assert!(
            lock(&self.shared.spool).cursor.is_none(),
            "owner changed while printing"
        );
        *lock(&self.shared.owner) = owner;
    }

    pub fn context(&self) -> &Arc<dyn PrintingContext> {
        &self.shared.context
    }

    /// Spawns the worker thread. Returns true if it is running afterwards.
    pub fn start(&mut self) -> bool {
        if self.thread.is_some() {
            return true;
        }
        let runner = TaskRunner::new(WORKER_THREAD_NAME);
        let thread_runner = runner.clone();
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || thread_runner.run());
        match spawned {
            Ok(handle) => {
                trace!("printing worker thread started");
                self.thread = Some(WorkerThread { runner, handle });
                true
            }
            Err(err) => {
                error!(%err, "failed to spawn printing worker thread");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.handle.is_finished())
    }

    /// Asks the thread to exit after the tasks already queued.
    pub fn stop_soon(&self) {
        if let Some(thread) = &self.thread {
            thread.runner.quit();
        }
    }

    /// Stops the thread and waits for it.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        thread.runner.quit();
        if thread.handle.thread().id() == thread::current().id() {
            warn!("printing worker asked to join itself, leaving it detached");
            return;
        }
        if thread.handle.join().is_err() {
            error!("printing worker thread panicked");
        }
    }

    /// Gives up ownership of the thread so someone else can join it.
    ///
    /// Requests posted afterwards are rejected.
    pub fn detach_thread(&mut self) -> Option<JoinHandle<()>> {
        self.thread.take().map(|thread| thread.handle)
    }

    /// Aborts the context from the calling thread.
    pub fn cancel(&self) {
        self.shared.context.cancel();
    }

    fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&Arc<WorkerShared>, &TaskRunner) + Send + 'static,
    {
        let Some(thread) = &self.thread else {
            debug!("printing worker is not running, dropping request");
            return false;
        };
        let shared = Arc::clone(&self.shared);
        let runner = thread.runner.clone();
        thread.runner.post_task(move || task(&shared, &runner))
    }

    pub fn get_settings(&self, params: GetSettingsParams) -> bool {
        self.post(move |shared, runner| shared.get_settings(runner, params))
    }

    pub fn set_settings(&self, job_settings: JobSettings) -> bool {
        self.post(move |shared, _| shared.set_settings(job_settings))
    }

    pub fn on_document_changed(&self, document: Option<Arc<PrintedDocument>>) -> bool {
        self.post(move |shared, _| shared.on_document_changed(document))
    }

    /// Starts spooling `document`. `keep_alive` is released on the owner's
    /// runner once the request has run.
    pub fn start_printing<K>(&self, document: Arc<PrintedDocument>, keep_alive: K) -> bool
    where
        K: Send + 'static,
    {
        let owner_runner = lock(&self.shared.owner).runner().clone();
        self.post(move |shared, runner| {
            shared.start_printing(runner, document);
            owner_runner.post_task(move || drop(keep_alive));
        })
    }
}

impl Drop for PrintJobWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::context::mock::MockContext;
    use crate::metafile::{PageMetafile, Rect, Size};
    use crate::settings::DocumentCookie;

    #[derive(Default)]
    struct RecordingOwner {
        events: Mutex<Vec<(JobEventKind, Option<u32>)>>,
        settings: Mutex<Vec<(u32, ContextResult)>>,
    }

    impl PrintJobWorkerOwner for RecordingOwner {
        fn get_settings_done(&self, settings: PrintSettings, result: ContextResult) {
            self.settings.lock().unwrap().push((settings.dpi, result));
        }

        fn on_worker_event(&self, details: JobEventDetails) {
            self.events
                .lock()
                .unwrap()
                .push((details.kind(), details.page_number()));
        }
    }

    impl RecordingOwner {
        fn kinds(&self) -> Vec<(JobEventKind, Option<u32>)> {
            self.events.lock().unwrap().clone()
        }
    }

    struct Fixture {
        ui: TaskRunner,
        owner: Arc<RecordingOwner>,
        context: Arc<MockContext>,
        worker: PrintJobWorker,
    }

    fn fixture(context: Arc<MockContext>) -> Fixture {
        let ui = TaskRunner::for_current_thread("ui");
        let owner = Arc::new(RecordingOwner::default());
        let weak: Weak<dyn PrintJobWorkerOwner> = Arc::downgrade(&owner) as Weak<dyn PrintJobWorkerOwner>;
        let mut worker = PrintJobWorker::new(
            OwnerHandle::new(weak, ui.clone()),
            context.clone(),
            ui.clone(),
            Duration::from_millis(10),
        );
        assert!(worker.start());
        Fixture {
            ui,
            owner,
            context,
            worker,
        }
    }

    fn document(page_count: u32) -> Arc<PrintedDocument> {
        let settings = PrintSettings {
            dpi: 300,
            ..PrintSettings::default()
        };
        let document = PrintedDocument::new(settings, "Report", DocumentCookie::generate());
        document.set_page_count(page_count);
        document
    }

    fn add_page(document: &PrintedDocument, page_number: u32) {
        document.set_page(
            page_number,
            PageMetafile::default(),
            Size::new(595.0, 842.0),
            Rect::default(),
        );
    }

    fn pump_until(ui: &TaskRunner, mut done: impl FnMut() -> bool) -> bool {
        ui.run_until(Instant::now() + Duration::from_secs(5), &mut done)
    }

    #[test]
    fn default_settings_round_trip_through_ui_runner() {
        let f = fixture(MockContext::new(300));
        assert!(f.worker.get_settings(GetSettingsParams::defaults()));

        let owner = f.owner.clone();
        assert!(pump_until(&f.ui, || !owner.settings.lock().unwrap().is_empty()));
        assert_eq!(*f.owner.settings.lock().unwrap(), vec![(300, ContextResult::Ok)]);
        assert_eq!(f.context.calls(), vec!["use_default_settings"]);
    }

    #[test]
    fn device_name_skips_defaults() {
        let f = fixture(MockContext::new(300));
        f.worker.get_settings(GetSettingsParams::for_device("Office"));

        let owner = f.owner.clone();
        assert!(pump_until(&f.ui, || !owner.settings.lock().unwrap().is_empty()));
        assert_eq!(f.context.calls(), vec!["init_with_device_name:Office"]);
    }

    #[test]
    fn spools_only_after_pages_arrive() {
        let f = fixture(MockContext::new(300));
        let document = document(2);
        f.worker.on_document_changed(Some(document.clone()));
        f.worker.start_printing(document.clone(), ());

        // Nothing is rendered yet, so no page event can be produced.
        std::thread::sleep(Duration::from_millis(40));
        f.ui.run_until_idle();
        assert!(f.owner.kinds().is_empty());

        add_page(&document, 0);
        let owner = f.owner.clone();
        assert!(pump_until(&f.ui, || owner.kinds().len() >= 2));
        assert_eq!(
            f.owner.kinds(),
            vec![(JobEventKind::NewPage, Some(0)), (JobEventKind::PageDone, Some(0))]
        );

        add_page(&document, 1);
        let owner = f.owner.clone();
        assert!(pump_until(&f.ui, || owner.kinds().len() >= 6));
        assert_eq!(
            f.owner.kinds()[2..],
            [
                (JobEventKind::NewPage, Some(1)),
                (JobEventKind::PageDone, Some(1)),
                (JobEventKind::AllPagesRequested, None),
                (JobEventKind::DocDone, None),
            ]
        );
        assert_eq!(
            f.context.calls(),
            vec![
                "new_document:Report",
                "new_page",
                "render_page:0",
                "page_done",
                "new_page",
                "render_page:1",
                "page_done",
                "document_done",
            ]
        );
    }

    #[test]
    fn failing_page_reports_failure_and_cancels() {
        let f = fixture(MockContext::failing_new_page_at(2));
        let document = document(2);
        add_page(&document, 0);
        add_page(&document, 1);
        f.worker.on_document_changed(Some(document.clone()));
        f.worker.start_printing(document, ());

        let owner = f.owner.clone();
        assert!(pump_until(&f.ui, || owner.kinds().len() >= 3));
        assert_eq!(
            f.owner.kinds(),
            vec![
                (JobEventKind::NewPage, Some(0)),
                (JobEventKind::PageDone, Some(0)),
                (JobEventKind::Failed, None),
            ]
        );
        assert_eq!(f.context.calls().last().map(String::as_str), Some("cancel"));
    }

    #[test]
    fn stop_joins_thread() {
        let mut f = fixture(MockContext::new(300));
        assert!(f.worker.is_running());
        f.worker.stop();
        assert!(!f.worker.is_running());
        assert!(!f.worker.get_settings(GetSettingsParams::defaults()));
    }
}
