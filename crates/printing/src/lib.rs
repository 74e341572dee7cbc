//! Browser-side printing pipeline: printer queries, print jobs, the worker
//! thread that drives a platform printing context and the manager that keeps
//! track of everything in flight.

pub mod config;
pub mod context;
pub mod document;
pub mod events;
pub mod job_settings;
pub mod manager;
pub mod metafile;
pub mod pdf;
pub mod print_job;
pub mod printer_query;
pub mod queries_queue;
pub mod settings;
pub mod shutdown;
pub mod task;
pub mod worker;

pub use config::{ConfigError, PipelineConfig, ShutdownPolicyKind};
pub use context::{
    AskUserCallback, ContextResult, PrintingContext, PrintingContextFactory, RenderTarget,
};
pub use document::{simplify_document_title, PrintedDocument, PrintedPage};
pub use events::{
    EventScope, JobEventBus, JobEventDetails, JobEventKind, JobEventObserver, Subscription,
};
pub use job_settings::{
    DpiSetting, JobSettings, JobSettingsError, MarginsSetting, PageRangeSetting,
};
pub use manager::PrintJobManager;
pub use metafile::{Color, MetafileOp, PageMetafile, Point, Rect, Size, Stroke, TextRun};
pub use pdf::{PdfCallback, PdfPrintingContext, PrintToPdfError, PDF_DEVICE_NAME};
pub use print_job::{JobPhase, PrintJob, PrintJobId};
pub use printer_query::PrinterQuery;
pub use queries_queue::{PrintDestination, PrintQueriesQueue};
pub use settings::{
    DocumentCookie, DuplexMode, Margin, MarginType, Orientation, PageRange, PaperId, PaperSize,
    PrintColorMode, PrintSettings, MAX_PAGE_COUNT,
};
pub use shutdown::{BlockingShutdown, PollingShutdown, ShutdownStep, WorkerShutdownPolicy};
pub use task::{Completion, PrintThreads, TaskRunner};
pub use worker::{GetSettingsAsk, GetSettingsParams, OwnerHandle, PrintJobWorker, PrintJobWorkerOwner};
