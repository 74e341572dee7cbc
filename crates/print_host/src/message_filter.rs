//! I/O-side handling of the renderer's settings requests.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use shellprint_printing::{
    ContextResult, DocumentCookie, GetSettingsParams, JobSettings, MarginType, PrintQueriesQueue,
    PrintSettings, PrinterQuery, Rect, RenderTarget, Size,
};

/// Page setup handed back to the renderer, in device units.
///
/// The default value is the zeroed reply sent when settings could not be
/// resolved.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrintParams {
    pub page_size: Size,
    pub content_size: Size,
    pub printable_area: Rect,
    pub margin_top: f32,
    pub margin_left: f32,
    pub dpi: u32,
    pub scale_factor: u32,
    pub document_cookie: DocumentCookie,
    pub selection_only: bool,
    pub should_print_backgrounds: bool,
    pub display_header_footer: bool,
    pub title: String,
    pub url: String,
}

impl PrintParams {
    /// Converts resolved settings; the cookie is always left invalid.
    pub fn from_settings(settings: &PrintSettings) -> Self {
        let scale = settings.dpi as f32 / 72.0;
        let page = settings.page_size();
        let content = settings.content_area();
        Self {
            page_size: Size::new(page.width * scale, page.height * scale),
            content_size: Size::new(content.size.width * scale, content.size.height * scale),
            printable_area: Rect::new(0.0, 0.0, page.width * scale, page.height * scale),
            margin_top: content.origin.y * scale,
            margin_left: content.origin.x * scale,
            dpi: settings.dpi,
            scale_factor: settings.scale_factor,
            document_cookie: DocumentCookie::INVALID,
            selection_only: settings.selection_only,
            should_print_backgrounds: settings.should_print_backgrounds,
            display_header_footer: settings.display_header_footer,
            title: settings.title.clone(),
            url: settings.url.clone(),
        }
    }

    fn for_query(query: &PrinterQuery) -> Self {
        Self {
            document_cookie: query.cookie(),
            ..Self::from_settings(&query.settings())
        }
    }
}

/// Page setup plus the 0-based pages the user selected.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrintPagesParams {
    pub params: PrintParams,
    pub pages: Vec<u32>,
}

impl PrintPagesParams {
    fn for_query(query: &PrinterQuery) -> Self {
        Self {
            params: PrintParams::for_query(query),
            pages: query.settings().ranges.explicit_pages(),
        }
    }
}

/// Request for a script-initiated `window.print()`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScriptedPrintParams {
    pub cookie: DocumentCookie,
    pub expected_pages_count: u32,
    pub has_selection: bool,
    pub margin_type: MarginType,
}

/// Answers settings requests from one renderer process.
///
/// Every handler replies exactly once through its callback, on the I/O
/// runner. Queries that end with usable settings are parked in the queue for
/// the view manager; all others have their worker stopped.
#[derive(Debug)]
pub struct PrintingMessageFilter {
    render_process_id: i32,
    queue: Arc<PrintQueriesQueue>,
}

impl PrintingMessageFilter {
    pub fn new(render_process_id: i32, queue: Arc<PrintQueriesQueue>) -> Self {
        Self {
            render_process_id,
            queue,
        }
    }

    pub fn render_process_id(&self) -> i32 {
        self.render_process_id
    }

    pub fn on_get_default_print_settings<F>(&self, render_frame_id: i32, reply: F)
    where
        F: FnOnce(PrintParams) + Send + 'static,
    {
        let query = self.query_for(DocumentCookie::INVALID, render_frame_id);
        self.get_settings(query, GetSettingsParams::defaults(), reply);
    }

    pub fn on_init_setting_with_device_name<F>(
        &self,
        render_frame_id: i32,
        device_name: &str,
        reply: F,
    ) where
        F: FnOnce(PrintParams) + Send + 'static,
    {
        let query = self.query_for(DocumentCookie::INVALID, render_frame_id);
        let params = GetSettingsParams {
            is_scripted: true,
            is_modifiable: true,
            ..GetSettingsParams::for_device(device_name)
        };
        self.get_settings(query, params, reply);
    }

    fn get_settings<F>(&self, query: Arc<PrinterQuery>, params: GetSettingsParams, reply: F)
    where
        F: FnOnce(PrintParams) + Send + 'static,
    {
        let queue = Arc::clone(&self.queue);
        let settled = Arc::clone(&query);
        query.get_settings(params, move || {
            let params = if settled.last_status().is_ok() {
                PrintParams::for_query(&settled)
            } else {
                PrintParams::default()
            };
            reply(params);
            park_or_stop(&queue, settled);
        });
    }

    pub fn on_scripted_print<F>(
        &self,
        render_frame_id: i32,
        request: ScriptedPrintParams,
        reply: F,
    ) where
        F: FnOnce(PrintPagesParams) + Send + 'static,
    {
        let query = self.query_for(request.cookie, render_frame_id);
        let params = GetSettingsParams {
            is_scripted: true,
            ..GetSettingsParams::ask_user(
                request.expected_pages_count,
                request.has_selection,
                request.margin_type,
            )
        };

        let queue = Arc::clone(&self.queue);
        let settled = Arc::clone(&query);
        query.get_settings(params, move || {
            let params = if settled.last_status().is_ok() && settled.settings().dpi != 0 {
                PrintPagesParams::for_query(&settled)
            } else {
                PrintPagesParams::default()
            };
            let usable = params.params.dpi != 0 && params.params.document_cookie.is_valid();
            reply(params);
            if usable {
                queue.queue_printer_query(settled);
            } else {
                settled.stop_worker();
            }
        });
    }

    /// Applies a settings dictionary. The reply carries `canceled` when the
    /// user backed out of the dialog.
    pub fn on_update_print_settings<F>(
        &self,
        render_frame_id: i32,
        document_cookie: DocumentCookie,
        job_settings: &Value,
        reply: F,
    ) where
        F: FnOnce(PrintPagesParams, bool) + Send + 'static,
    {
        let job_settings = match JobSettings::from_value(job_settings) {
            Ok(job_settings) => job_settings,
            Err(err) => {
                warn!(%err, cookie = %document_cookie, "rejecting print settings");
                reply(PrintPagesParams::default(), false);
                return;
            }
        };

        let query = self.query_for(document_cookie, render_frame_id);
        let queue = Arc::clone(&self.queue);
        let settled = Arc::clone(&query);
        query.set_settings(job_settings, move || {
            let status = settled.last_status();
            let params = if status.is_ok() {
                PrintPagesParams::for_query(&settled)
            } else {
                PrintPagesParams::default()
            };
            reply(params, status == ContextResult::Cancel);
            park_or_stop(&queue, settled);
        });
    }

    fn query_for(&self, cookie: DocumentCookie, render_frame_id: i32) -> Arc<PrinterQuery> {
        match self.queue.pop_printer_query(cookie) {
            Some(query) => {
                debug!(%cookie, "reusing queued printer query");
                query
            }
            None => self
                .queue
                .create_printer_query(RenderTarget::new(self.render_process_id, render_frame_id)),
        }
    }
}

fn park_or_stop(queue: &PrintQueriesQueue, query: Arc<PrinterQuery>) {
    if query.cookie().is_valid() && query.settings().dpi != 0 {
        queue.queue_printer_query(query);
    } else {
        query.stop_worker();
    }
}
