use std::sync::Arc;

use crate::document::PrintedPage;
use crate::job_settings::JobSettings;
use crate::settings::{MarginType, PrintSettings};

/// Outcome of a printing-context operation.
/// 列印內容操作的結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextResult {
    Ok,
    Cancel,
    #[default]
    Failed,
}

impl ContextResult {
    pub const fn is_ok(self) -> bool {
        matches!(self, ContextResult::Ok)
    }
}

/// Completion handed to [`PrintingContext::ask_user_for_settings`].
pub type AskUserCallback = Box<dyn FnOnce(ContextResult) + Send + 'static>;

/// Abstraction over a platform print backend for one document.
/// 單一文件所使用之平台列印後端的抽象介面。
///
/// Settings operations run on the UI runner; document and page operations
/// run on the printing worker thread. Only [`PrintingContext::cancel`] may be
/// called from any thread, so implementations use interior mutability.
pub trait PrintingContext: Send + Sync {
    fn set_margin_type(&self, margin_type: MarginType);
    fn set_is_modifiable(&self, is_modifiable: bool);

    /// Shows the system dialog; `done` fires once the user closes it.
    fn ask_user_for_settings(
        &self,
        max_pages: u32,
        has_selection: bool,
        is_scripted: bool,
        done: AskUserCallback,
    );
    fn use_default_settings(&self) -> ContextResult;
    fn init_with_device_name(&self, device_name: &str) -> ContextResult;
    fn update_print_settings(&self, job_settings: &JobSettings) -> ContextResult;
    fn settings(&self) -> PrintSettings;

    fn new_document(&self, title: &str) -> ContextResult;
    fn new_page(&self) -> ContextResult;
    fn render_page(&self, page: &PrintedPage) -> ContextResult;
    fn page_done(&self) -> ContextResult;
    fn document_done(&self) -> ContextResult;
    fn cancel(&self);
}

/// Identifies the frame that asked to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderTarget {
    pub render_process_id: i32,
    pub render_frame_id: i32,
}

impl RenderTarget {
    pub const fn new(render_process_id: i32, render_frame_id: i32) -> Self {
        Self {
            render_process_id,
            render_frame_id,
        }
    }
}

/// Builds one [`PrintingContext`] per printer query.
/// 為每個印表機查詢建立對應的列印內容。
pub trait PrintingContextFactory: Send + Sync {
    fn create_context(&self, target: RenderTarget) -> Arc<dyn PrintingContext>;
}

impl<F> PrintingContextFactory for F
where
    F: Fn(RenderTarget) -> Arc<dyn PrintingContext> + Send + Sync,
{
    fn create_context(&self, target: RenderTarget) -> Arc<dyn PrintingContext> {
        self(target)
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockContext;
    use super::*;

    #[test]
    fn closures_act_as_factories() {
        let factory = |_target: RenderTarget| -> Arc<dyn PrintingContext> { MockContext::new(300) };
        let context = factory.create_context(RenderTarget::new(1, 2));
        assert_eq!(context.use_default_settings(), ContextResult::Ok);
        assert_eq!(context.settings().dpi, 300);
    }

    #[test]
    fn canceled_mock_reports_cancel() {
        let context = MockContext::new(300);
        assert!(context.new_page().is_ok());
        context.cancel();
        assert_eq!(context.page_done(), ContextResult::Cancel);
    }
}
