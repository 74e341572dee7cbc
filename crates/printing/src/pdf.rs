use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, warn};

use crate::context::{AskUserCallback, ContextResult, PrintingContext};
use crate::document::PrintedPage;
use crate::job_settings::JobSettings;
use crate::metafile::{Color, MetafileOp, PageMetafile, Size};
use crate::settings::{MarginType, PrintSettings, DEFAULT_DPI};
use crate::task::lock;

/// Device name reported by [`PdfPrintingContext`].
pub const PDF_DEVICE_NAME: &str = "Save as PDF";

/// Errors reported to the caller of a print-to-PDF request.
/// 列印為 PDF 時回報給呼叫端的錯誤。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrintToPdfError {
    #[error("Failed to generate PDF")]
    Failed,
    #[error("PDF generation was cancelled")]
    Cancelled,
    #[error("document has no pages")]
    Empty,
}

/// Receives the finished PDF, or the reason there is none.
pub type PdfCallback = Box<dyn FnOnce(Result<Vec<u8>, PrintToPdfError>) + Send + 'static>;

struct PdfPage {
    metafile: PageMetafile,
    size: Size,
}

#[derive(Default)]
struct PdfState {
    settings: PrintSettings,
    title: String,
    pages: Vec<PdfPage>,
}

/// Printing context that renders the spooled pages into a PDF file.
/// 將佇列頁面輸出為 PDF 檔案的列印內容。
///
/// The callback fires exactly once: with the bytes after `document_done`, or
/// with an error when the document is cancelled or fails. Partial output is
/// never delivered.
pub struct PdfPrintingContext {
    state: Mutex<PdfState>,
    canceled: AtomicBool,
    callback: Mutex<Option<PdfCallback>>,
}

impl PdfPrintingContext {
    pub fn new<F>(callback: F) -> Arc<Self>
    where
        F: FnOnce(Result<Vec<u8>, PrintToPdfError>) + Send + 'static,
    {
        Arc::new(Self {
            state: Mutex::new(PdfState::default()),
            canceled: AtomicBool::new(false),
            callback: Mutex::new(Some(Box::new(callback))),
        })
    }

    pub fn default_settings() -> PrintSettings {
        PrintSettings {
            device_name: PDF_DEVICE_NAME.to_string(),
            dpi: DEFAULT_DPI,
            ..PrintSettings::default()
        }
    }

    fn deliver(&self, result: Result<Vec<u8>, PrintToPdfError>) {
        let callback = lock(&self.callback).take();
        match callback {
            Some(callback) => callback(result),
            None => debug!("PDF result already delivered"),
        }
    }

    fn status(&self) -> ContextResult {
        if self.canceled.load(Ordering::SeqCst) {
            ContextResult::Cancel
        } else {
            ContextResult::Ok
        }
    }

    fn ensure_resolution(settings: &mut PrintSettings) {
        if settings.dpi == 0 {
            settings.dpi = DEFAULT_DPI;
        }
        if settings.device_name.is_empty() {
            settings.device_name = PDF_DEVICE_NAME.to_string();
        }
    }
}

impl PrintingContext for PdfPrintingContext {
    fn set_margin_type(&self, margin_type: MarginType) {
        lock(&self.state).settings.margin_type = margin_type;
    }

    fn set_is_modifiable(&self, _is_modifiable: bool) {}

    fn ask_user_for_settings(
        &self,
        _max_pages: u32,
        _has_selection: bool,
        _is_scripted: bool,
        done: AskUserCallback,
    ) {
        // No dialog: the current settings are the user's choice.
        Self::ensure_resolution(&mut lock(&self.state).settings);
        done(ContextResult::Ok);
    }

    fn use_default_settings(&self) -> ContextResult {
        let mut state = lock(&self.state);
        let margin_type = state.settings.margin_type;
        state.settings = Self::default_settings();
        state.settings.margin_type = margin_type;
        ContextResult::Ok
    }

    fn init_with_device_name(&self, device_name: &str) -> ContextResult {
        let mut state = lock(&self.state);
        state.settings = Self::default_settings();
        state.settings.device_name = device_name.to_string();
        ContextResult::Ok
    }

    fn update_print_settings(&self, job_settings: &JobSettings) -> ContextResult {
        let mut state = lock(&self.state);
        state.settings.apply(job_settings);
        Self::ensure_resolution(&mut state.settings);
        ContextResult::Ok
    }

    fn settings(&self) -> PrintSettings {
        lock(&self.state).settings.clone()
    }

    fn new_document(&self, title: &str) -> ContextResult {
        let status = self.status();
        if status.is_ok() {
            let mut state = lock(&self.state);
            state.title = title.to_string();
            state.pages.clear();
        }
        status
    }

    fn new_page(&self) -> ContextResult {
        self.status()
    }

    fn render_page(&self, page: &PrintedPage) -> ContextResult {
        let status = self.status();
        if status.is_ok() {
            lock(&self.state).pages.push(PdfPage {
                metafile: page.metafile().clone(),
                size: page.page_size(),
            });
        }
        status
    }

    fn page_done(&self) -> ContextResult {
        self.status()
    }

    fn document_done(&self) -> ContextResult {
        let status = self.status();
        if !status.is_ok() {
            return status;
        }
        let (title, pages) = {
            let mut state = lock(&self.state);
            (std::mem::take(&mut state.title), std::mem::take(&mut state.pages))
        };
        match render_pdf_document(&title, &pages) {
            Ok(bytes) => {
                debug!(pages = pages.len(), bytes = bytes.len(), "PDF generated");
                self.deliver(Ok(bytes));
                ContextResult::Ok
            }
            Err(err) => {
                warn!(%err, "PDF generation failed");
                self.deliver(Err(err));
                ContextResult::Failed
            }
        }
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        lock(&self.state).pages.clear();
        self.deliver(Err(PrintToPdfError::Cancelled));
    }
}

fn render_pdf_document(title: &str, pages: &[PdfPage]) -> Result<Vec<u8>, PrintToPdfError> {
    if pages.is_empty() {
        return Err(PrintToPdfError::Empty);
    }

    let mut builder = PdfBuilder::new();
    let pages_object = builder.reserve_object();
    let font_object = builder.add_object("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>");
    let mut page_objects = Vec::new();

    for page in pages {
        let content_stream = render_page_stream(&page.metafile, page.size.height);
        let content_object = builder.add_stream(&content_stream);
        let page_object = builder.add_object(format!(
            "<< /Type /Page /Parent {parent} 0 R /MediaBox [0 0 {width} {height}] \
             /Resources << /Font << /F1 {font} 0 R >> >> /Contents {content} 0 R >>",
            parent = pages_object,
            width = fmt_float(page.size.width),
            height = fmt_float(page.size.height),
            font = font_object,
            content = content_object
        ));
        page_objects.push(page_object);
    }

    let kids = page_objects
        .iter()
        .map(|obj| format!("{obj} 0 R"))
        .collect::<Vec<_>>()
        .join(" ");
    builder.fill_object(
        pages_object,
        format!(
            "<< /Type /Pages /Count {count} /Kids [{kids}] >>",
            count = pages.len()
        ),
    );
    let info_object = builder.add_object(format!(
        "<< /Title {title} /Producer (shellprint) >>",
        title = pdf_info_string(title)
    ));
    builder.set_catalog(format!(
        "<< /Type /Catalog /Pages {pages} 0 R >>",
        pages = pages_object
    ));

    Ok(builder.finish(info_object))
}

fn render_page_stream(metafile: &PageMetafile, page_height: f32) -> Vec<u8> {
    let mut stream = String::new();
    for op in &metafile.ops {
        // Writing into a String cannot fail.
        let _ = match op {
            MetafileOp::Text(run) => writeln!(
                &mut stream,
                "{color} rg\nBT\n/F1 {size} Tf\n1 0 0 1 {x} {y} Tm\n({text}) Tj\nET",
                color = rgb_to_pdf(run.color),
                size = fmt_float(run.font_size_pt),
                x = fmt_float(run.origin.x),
                y = fmt_float(page_height - run.origin.y - run.font_size_pt),
                text = pdf_escape_text(&run.text)
            ),
            MetafileOp::FillRect { rect, color } => writeln!(
                &mut stream,
                "{color} rg\n{x} {y} {w} {h} re f",
                color = rgb_to_pdf(*color),
                x = fmt_float(rect.origin.x),
                y = fmt_float(page_height - rect.origin.y - rect.size.height),
                w = fmt_float(rect.size.width),
                h = fmt_float(rect.size.height)
            ),
            MetafileOp::Line { from, to, stroke } => writeln!(
                &mut stream,
                "{color} RG\n{width} w\n{x0} {y0} m {x1} {y1} l S",
                color = rgb_to_pdf(stroke.color),
                width = fmt_float(stroke.width),
                x0 = fmt_float(from.x),
                y0 = fmt_float(page_height - from.y),
                x1 = fmt_float(to.x),
                y1 = fmt_float(page_height - to.y)
            ),
        };
    }
    stream.into_bytes()
}

fn fmt_float(value: f32) -> String {
    format!("{:.3}", value)
}

fn rgb_to_pdf(color: Color) -> String {
    format!(
        "{:.3} {:.3} {:.3}",
        color.r.clamp(0.0, 1.0),
        color.g.clamp(0.0, 1.0),
        color.b.clamp(0.0, 1.0)
    )
}

/// Escapes text for a WinAnsi-encoded literal string.
///
/// Latin-1 characters become octal escapes; anything the standard fonts
/// cannot show is replaced with `?`.
fn pdf_escape_text(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '(' | ')' | '\\' => {
                output.push('\\');
                output.push(ch);
            }
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            ' '..='~' => output.push(ch),
            '\u{a0}'..='\u{ff}' => {
                // Writing into a String cannot fail.
                let _ = write!(&mut output, "\\{:03o}", u32::from(ch));
            }
            _ => output.push('?'),
        }
    }
    output
}

/// Document information string: a literal for ASCII, UTF-16BE with a byte
/// order mark otherwise.
fn pdf_info_string(input: &str) -> String {
    if input.is_ascii() {
        return format!("({})", pdf_escape_text(input));
    }
    let mut output = String::from("<FEFF");
    for unit in input.encode_utf16() {
        let _ = write!(&mut output, "{unit:04X}");
    }
    output.push('>');
    output
}

/// Minimal PDF object writer: numbered objects, cross-reference table and
/// trailer.
struct PdfBuilder {
    objects: Vec<String>,
    catalog: Option<String>,
}

impl PdfBuilder {
    fn new() -> Self {
        Self {
            objects: Vec::new(),
            catalog: None,
        }
    }

    fn reserve_object(&mut self) -> usize {
        self.add_object(String::new())
    }

    fn fill_object(&mut self, number: usize, body: String) {
        if let Some(slot) = self.objects.get_mut(number - 1) {
            *slot = body;
        }
    }

    fn add_object(&mut self, body: impl Into<String>) -> usize {
        self.objects.push(body.into());
        self.objects.len()
    }

    fn add_stream(&mut self, stream: &[u8]) -> usize {
        let mut body = format!("<< /Length {} >>\nstream\n", stream.len());
        body.push_str(&String::from_utf8_lossy(stream));
        body.push_str("\nendstream");
        self.add_object(body)
    }

    fn set_catalog(&mut self, catalog: String) {
        self.catalog = Some(catalog);
    }

    fn finish(mut self, info_object: usize) -> Vec<u8> {
        let root = match self.catalog.take() {
            Some(catalog) => self.add_object(catalog),
            None => 0,
        };

        let mut output = Vec::new();
        output.extend_from_slice(b"%PDF-1.4\n%\xFF\xFF\xFF\xFF\n");
        let mut offsets = Vec::with_capacity(self.objects.len());

        for (index, body) in self.objects.iter().enumerate() {
            offsets.push(output.len());
            output.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", index + 1, body).as_bytes());
        }

        let xref_start = output.len();
        let mut tail = format!("xref\n0 {}\n0000000000 65535 f \n", self.objects.len() + 1);
        for offset in &offsets {
            let _ = writeln!(&mut tail, "{:010} 00000 n ", offset);
        }
        let _ = write!(
            &mut tail,
            "trailer\n<< /Size {size} /Root {root} 0 R /Info {info} 0 R >>\nstartxref\n{xref_start}\n%%EOF\n",
            size = self.objects.len() + 1,
            info = info_object,
        );
        output.extend_from_slice(tail.as_bytes());
        output
    }
}
