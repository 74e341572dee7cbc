//! Host-side consumers of the printing pipeline: the per-renderer view
//! manager and the settings message filter.

pub mod message_filter;
pub mod view_manager;

pub use message_filter::{PrintPagesParams, PrintParams, PrintingMessageFilter, ScriptedPrintParams};
pub use view_manager::{DidPrintPageParams, PrintRenderer, PrintViewManager};
