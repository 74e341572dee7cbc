#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use shellprint_print_host::PrintRenderer;
use shellprint_printing::{
    AskUserCallback, ContextResult, JobEventBus, JobSettings, MarginType, PipelineConfig,
    PrintJobManager, PrintSettings, PrintThreads, PrintedPage, PrintingContext, RenderTarget,
    ShutdownPolicyKind, TaskRunner,
};

/// Backend whose answers are fixed up front.
pub struct StubContext {
    pub dpi: u32,
    pub dialog_answer: ContextResult,
    pub update_answer: ContextResult,
    settings: Mutex<PrintSettings>,
    canceled: AtomicBool,
}

impl StubContext {
    pub fn new(dpi: u32) -> Arc<Self> {
        Self::answering(dpi, ContextResult::Ok, ContextResult::Ok)
    }

    pub fn answering(dpi: u32, dialog_answer: ContextResult, update_answer: ContextResult) -> Arc<Self> {
        Arc::new(Self {
            dpi,
            dialog_answer,
            update_answer,
            settings: Mutex::new(PrintSettings::default()),
            canceled: AtomicBool::new(false),
        })
    }

    fn status(&self) -> ContextResult {
        if self.canceled.load(Ordering::SeqCst) {
            ContextResult::Cancel
        } else {
            ContextResult::Ok
        }
    }
}

impl PrintingContext for StubContext {
    fn set_margin_type(&self, margin_type: MarginType) {
        self.settings.lock().unwrap().margin_type = margin_type;
    }

    fn set_is_modifiable(&self, _is_modifiable: bool) {}

    fn ask_user_for_settings(
        &self,
        _max_pages: u32,
        _has_selection: bool,
        _is_scripted: bool,
        done: AskUserCallback,
    ) {
        if self.dialog_answer.is_ok() {
            self.settings.lock().unwrap().dpi = self.dpi;
        }
        done(self.dialog_answer);
    }

    fn use_default_settings(&self) -> ContextResult {
        self.settings.lock().unwrap().dpi = self.dpi;
        ContextResult::Ok
    }

    fn init_with_device_name(&self, device_name: &str) -> ContextResult {
        let mut settings = self.settings.lock().unwrap();
        settings.dpi = self.dpi;
        settings.device_name = device_name.into();
        ContextResult::Ok
    }

    fn update_print_settings(&self, job_settings: &JobSettings) -> ContextResult {
        if self.update_answer.is_ok() {
            self.settings.lock().unwrap().apply(job_settings);
        }
        self.update_answer
    }

    fn settings(&self) -> PrintSettings {
        self.settings.lock().unwrap().clone()
    }

    fn new_document(&self, _title: &str) -> ContextResult {
        self.status()
    }

    fn new_page(&self) -> ContextResult {
        self.status()
    }

    fn render_page(&self, _page: &PrintedPage) -> ContextResult {
        self.status()
    }

    fn page_done(&self) -> ContextResult {
        self.status()
    }

    fn document_done(&self) -> ContextResult {
        self.status()
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

/// Records what the host asked of the renderer.
pub struct RecordingRenderer {
    live: bool,
    title: String,
    calls: Mutex<Vec<String>>,
}

impl RecordingRenderer {
    pub fn new(title: &str) -> Arc<Self> {
        Arc::new(Self {
            live: true,
            title: title.into(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn dead() -> Arc<Self> {
        Arc::new(Self {
            live: false,
            title: String::new(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl PrintRenderer for RecordingRenderer {
    fn is_render_view_live(&self) -> bool {
        self.live
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn print_pages(&self, silent: bool, print_background: bool) -> bool {
        self.record(format!("print_pages:{silent}:{print_background}"));
        self.live
    }

    fn printing_done(&self, success: bool) {
        self.record(format!("printing_done:{success}"));
    }

    fn print_job_released(&self) {
        self.record("print_job_released");
    }

    fn stop_loading(&self) {
        self.record("stop_loading");
    }
}

pub struct Harness {
    pub ui: TaskRunner,
    pub manager: Arc<PrintJobManager>,
}

impl Harness {
    pub fn new(context: Arc<StubContext>) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let ui = TaskRunner::for_current_thread("ui");
        let config = PipelineConfig {
            page_poll_interval_ms: 10,
            flush_timeout_ms: 200,
            render_pages_timeout_ms: 300,
            shutdown_poll_interval_ms: 5,
            shutdown_policy: ShutdownPolicyKind::Blocking,
        };
        let factory = Arc::new(move |_target: RenderTarget| -> Arc<dyn PrintingContext> {
            context.clone()
        });
        let manager = PrintJobManager::new(
            PrintThreads::single(ui.clone()),
            JobEventBus::new(),
            factory,
            config,
        );
        Self { ui, manager }
    }

    pub fn pump_until(&self, condition: impl FnMut() -> bool) -> bool {
        self.ui
            .run_until(Instant::now() + Duration::from_secs(5), condition)
    }

    pub fn pump_for(&self, duration: Duration) {
        self.ui.run_until(Instant::now() + duration, || false);
    }
}

/// Slot a reply callback writes into.
pub fn reply_slot<T: Send + 'static>() -> (Arc<Mutex<Option<T>>>, impl FnOnce(T) + Send + 'static) {
    let slot = Arc::new(Mutex::new(None));
    let sink = slot.clone();
    (slot, move |value| {
        *sink.lock().unwrap() = Some(value);
    })
}
