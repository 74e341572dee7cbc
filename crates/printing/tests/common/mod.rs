#![allow(dead_code)]

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use shellprint_printing::{
    AskUserCallback, ContextResult, DocumentCookie, EventScope, GetSettingsParams, JobEventBus,
    JobEventDetails, JobEventKind, JobEventObserver, JobSettings, MarginType, PageMetafile,
    PipelineConfig, Point, PrintJob, PrintJobId, PrintJobManager, PrintSettings, PrintThreads,
    PrintedPage, PrinterQuery, PrintingContext, PrintingContextFactory, RenderTarget,
    ShutdownPolicyKind, Subscription, TaskRunner,
};

/// Scripted printing backend; every call is recorded.
#[derive(Default)]
pub struct StubContext {
    pub default_dpi: u32,
    pub fail_new_page_at: Option<usize>,
    pub user_answer: Option<ContextResult>,
    state: Mutex<StubState>,
}

#[derive(Default)]
struct StubState {
    calls: Vec<String>,
    settings: PrintSettings,
    canceled: bool,
    new_page_calls: usize,
}

impl StubContext {
    pub fn new(default_dpi: u32) -> Arc<Self> {
        Arc::new(Self {
            default_dpi,
            ..Self::default()
        })
    }

    pub fn failing_new_page_at(call: usize) -> Arc<Self> {
        Arc::new(Self {
            default_dpi: 300,
            fail_new_page_at: Some(call),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn was_canceled(&self) -> bool {
        self.state.lock().unwrap().canceled
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }

    fn status(&self) -> ContextResult {
        if self.state.lock().unwrap().canceled {
            ContextResult::Cancel
        } else {
            ContextResult::Ok
        }
    }
}

impl PrintingContext for StubContext {
    fn set_margin_type(&self, margin_type: MarginType) {
        self.state.lock().unwrap().settings.margin_type = margin_type;
    }

    fn set_is_modifiable(&self, _is_modifiable: bool) {}

    fn ask_user_for_settings(
        &self,
        _max_pages: u32,
        _has_selection: bool,
        _is_scripted: bool,
        done: AskUserCallback,
    ) {
        self.record("ask_user_for_settings");
        let answer = self.user_answer.unwrap_or(ContextResult::Ok);
        if answer.is_ok() {
            self.state.lock().unwrap().settings.dpi = self.default_dpi;
        }
        done(answer);
    }

    fn use_default_settings(&self) -> ContextResult {
        self.record("use_default_settings");
        if self.default_dpi == 0 {
            return ContextResult::Failed;
        }
        let mut state = self.state.lock().unwrap();
        state.settings.dpi = self.default_dpi;
        state.settings.device_name = "Stub Printer".into();
        ContextResult::Ok
    }

    fn init_with_device_name(&self, device_name: &str) -> ContextResult {
        self.record(format!("init_with_device_name:{device_name}"));
        let mut state = self.state.lock().unwrap();
        state.settings.dpi = self.default_dpi.max(72);
        state.settings.device_name = device_name.into();
        ContextResult::Ok
    }

    fn update_print_settings(&self, job_settings: &JobSettings) -> ContextResult {
        self.record("update_print_settings");
        self.state.lock().unwrap().settings.apply(job_settings);
        ContextResult::Ok
    }

    fn settings(&self) -> PrintSettings {
        self.state.lock().unwrap().settings.clone()
    }

    fn new_document(&self, title: &str) -> ContextResult {
        self.record(format!("new_document:{title}"));
        self.status()
    }

    fn new_page(&self) -> ContextResult {
        self.record("new_page");
        let call = {
            let mut state = self.state.lock().unwrap();
            state.new_page_calls += 1;
            state.new_page_calls
        };
        if self.fail_new_page_at == Some(call) {
            return ContextResult::Failed;
        }
        self.status()
    }

    fn render_page(&self, page: &PrintedPage) -> ContextResult {
        self.record(format!("render_page:{}", page.page_number()));
        self.status()
    }

    fn page_done(&self) -> ContextResult {
        self.record("page_done");
        self.status()
    }

    fn document_done(&self) -> ContextResult {
        self.record("document_done");
        self.status()
    }

    fn cancel(&self) {
        self.record("cancel");
        self.state.lock().unwrap().canceled = true;
    }
}

/// Remembers every job event in delivery order.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<(PrintJobId, JobEventKind, Option<u32>)>>,
}

impl EventRecorder {
    pub fn attach(bus: &Arc<JobEventBus>) -> (Arc<Self>, Subscription) {
        let recorder = Arc::new(Self::default());
        let weak: Weak<dyn JobEventObserver> =
            Arc::downgrade(&recorder) as Weak<dyn JobEventObserver>;
        let subscription = bus.subscribe(EventScope::AllJobs, weak);
        (recorder, subscription)
    }

    pub fn kinds_for(&self, job: PrintJobId) -> Vec<(JobEventKind, Option<u32>)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| *id == job)
            .map(|(_, kind, page)| (*kind, *page))
            .collect()
    }

    pub fn count(&self, job: PrintJobId, kind: JobEventKind) -> usize {
        self.kinds_for(job)
            .iter()
            .filter(|(seen, _)| *seen == kind)
            .count()
    }
}

impl JobEventObserver for EventRecorder {
    fn on_job_event(&self, job: &Arc<PrintJob>, details: &JobEventDetails) {
        self.events
            .lock()
            .unwrap()
            .push((job.id(), details.kind(), details.page_number()));
    }
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        page_poll_interval_ms: 10,
        flush_timeout_ms: 200,
        render_pages_timeout_ms: 200,
        shutdown_poll_interval_ms: 5,
        shutdown_policy: ShutdownPolicyKind::Blocking,
    }
}

/// A manager whose UI and I/O runner are both the test thread.
pub struct Harness {
    pub ui: TaskRunner,
    pub bus: Arc<JobEventBus>,
    pub manager: Arc<PrintJobManager>,
    pub recorder: Arc<EventRecorder>,
    _subscription: Subscription,
}

impl Harness {
    pub fn new(factory: Arc<dyn PrintingContextFactory>) -> Self {
        Self::with_config(factory, test_config())
    }

    pub fn with_config(factory: Arc<dyn PrintingContextFactory>, config: PipelineConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let ui = TaskRunner::for_current_thread("ui");
        let bus = JobEventBus::new();
        let manager = PrintJobManager::new(PrintThreads::single(ui.clone()), bus.clone(), factory, config);
        let (recorder, subscription) = EventRecorder::attach(&bus);
        Self {
            ui,
            bus,
            manager,
            recorder,
            _subscription: subscription,
        }
    }

    /// Every query gets the same stub.
    pub fn with_stub(stub: Arc<StubContext>) -> Self {
        Self::new(Arc::new(move |_target: RenderTarget| -> Arc<dyn PrintingContext> {
            stub.clone()
        }))
    }

    pub fn pump_until(&self, condition: impl FnMut() -> bool) -> bool {
        self.ui
            .run_until(Instant::now() + Duration::from_secs(5), condition)
    }

    pub fn pump_for(&self, duration: Duration) {
        self.ui.run_until(Instant::now() + duration, || false);
    }

    /// Resolves default settings and parks the query in the queue.
    pub fn settled_query(&self, params: GetSettingsParams) -> DocumentCookie {
        let queue = self.manager.queue();
        let query = queue.create_printer_query(RenderTarget::new(1, 1));
        query.get_settings(params, || {});
        assert!(self.pump_until(|| !query.is_callback_pending()));
        let cookie = query.cookie();
        queue.queue_printer_query(query);
        cookie
    }

    /// A started job whose document expects `page_count` pages.
    pub fn started_job(&self, page_count: u32) -> (Arc<PrintJob>, Arc<PrinterQuery>) {
        let cookie = self.settled_query(GetSettingsParams::defaults());
        assert!(cookie.is_valid());
        let query = self
            .manager
            .queue()
            .pop_printer_query(cookie)
            .expect("settled query is queued");
        let job = self.manager.create_print_job();
        assert!(job.initialize(&query, "Quarterly report", page_count));
        job.start_printing();
        (job, query)
    }
}

pub fn add_page(job: &PrintJob, page_number: u32) {
    let document = job.document().expect("job has a document");
    let settings = document.settings().clone();
    document.set_page(
        page_number,
        PageMetafile::with_text(
            format!("page {}", page_number + 1),
            Point::new(36.0, 36.0),
            12.0,
        ),
        settings.page_size(),
        settings.content_area(),
    );
}
