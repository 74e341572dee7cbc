use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::metafile::{PageMetafile, Rect, Size};
use crate::settings::{DocumentCookie, PageRange, PrintSettings, MAX_PAGE_COUNT};
use crate::task::lock;

/// Longest title handed to a printing context, in characters.
pub const MAX_DOCUMENT_TITLE_CHARS: usize = 50;
const UNTITLED: &str = "Untitled";

/// One rendered page of a [`PrintedDocument`].
#[derive(Debug)]
pub struct PrintedPage {
    page_number: u32,
    metafile: PageMetafile,
    page_size: Size,
    content_area: Rect,
}

impl PrintedPage {
    pub fn new(page_number: u32, metafile: PageMetafile, page_size: Size, content_area: Rect) -> Self {
        Self {
            page_number,
            metafile,
            page_size,
            content_area,
        }
    }

    /// 0-based page index.
    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn metafile(&self) -> &PageMetafile {
        &self.metafile
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    pub fn content_area(&self) -> Rect {
        self.content_area
    }
}

#[derive(Default)]
struct DocumentPages {
    page_count: u32,
    pages: BTreeMap<u32, Arc<PrintedPage>>,
}

/// The pages of one print job, filled in by the renderer while the worker
/// spools them.
///
/// Shared between the UI runner (which adds pages) and the worker thread
/// (which reads them), so the page table sits behind a mutex.
pub struct PrintedDocument {
    settings: PrintSettings,
    name: String,
    cookie: DocumentCookie,
    pages: Mutex<DocumentPages>,
}

impl fmt::Debug for PrintedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pages = lock(&self.pages);
        f.debug_struct("PrintedDocument")
            .field("name", &self.name)
            .field("cookie", &self.cookie)
            .field("page_count", &pages.page_count)
            .field("pages_received", &pages.pages.len())
            .finish()
    }
}

impl PrintedDocument {
    pub fn new(settings: PrintSettings, name: impl Into<String>, cookie: DocumentCookie) -> Arc<Self> {
        Arc::new(Self {
            settings,
            name: name.into(),
            cookie,
            pages: Mutex::new(DocumentPages::default()),
        })
    }

    pub fn settings(&self) -> &PrintSettings {
        &self.settings
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cookie(&self) -> DocumentCookie {
        self.cookie
    }

    pub fn set_page_count(&self, page_count: u32) {
        lock(&self.pages).page_count = page_count.min(MAX_PAGE_COUNT);
    }

    /// Total pages in the source document; zero until the renderer reports it.
    pub fn page_count(&self) -> u32 {
        lock(&self.pages).page_count
    }

    /// Number of pages the settings' ranges select.
    pub fn expected_page_count(&self) -> u32 {
        let page_count = self.page_count();
        self.settings.ranges.pages_in(page_count).len() as u32
    }

    pub fn set_page(
        &self,
        page_number: u32,
        metafile: PageMetafile,
        page_size: Size,
        content_area: Rect,
    ) -> Arc<PrintedPage> {
        let page = Arc::new(PrintedPage::new(page_number, metafile, page_size, content_area));
        lock(&self.pages).pages.insert(page_number, page.clone());
        page
    }

    pub fn get_page(&self, page_number: u32) -> Option<Arc<PrintedPage>> {
        lock(&self.pages).pages.get(&page_number).cloned()
    }

    /// True once every selected page has been rendered.
    pub fn is_complete(&self) -> bool {
        let pages = lock(&self.pages);
        if pages.page_count == 0 {
            return false;
        }
        self.settings
            .ranges
            .pages_in(pages.page_count)
            .iter()
            .all(|page| pages.pages.contains_key(page))
    }
}

/// Position of the worker inside the selected pages of a document.
///
/// Absent (`Option::None` at the owner) means "not printing".
#[derive(Debug, Clone)]
pub(crate) struct PageCursor {
    pages: Vec<u32>,
    position: usize,
}

impl PageCursor {
    pub(crate) fn new(ranges: &PageRange, page_count: u32) -> Self {
        Self {
            pages: ranges.pages_in(page_count),
            position: 0,
        }
    }

    pub(crate) fn current(&self) -> Option<u32> {
        self.pages.get(self.position).copied()
    }

    pub(crate) fn advance(&mut self) {
        if self.position < self.pages.len() {
            self.position += 1;
        }
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.position >= self.pages.len()
    }
}

/// Turns a page title into something safe to hand to a print spooler.
///
/// Whitespace runs collapse to one space, control characters are dropped and
/// long titles are elided in the middle.
pub fn simplify_document_title(title: &str) -> String {
    let mut cleaned = String::with_capacity(title.len());
    for ch in title.chars() {
        if ch.is_whitespace() {
            if !cleaned.is_empty() && !cleaned.ends_with(' ') {
                cleaned.push(' ');
            }
        } else if !ch.is_control() {
            cleaned.push(ch);
        }
    }
    let cleaned = cleaned.trim_end();
    if cleaned.is_empty() {
        return UNTITLED.to_string();
    }

    let chars: Vec<char> = cleaned.chars().collect();
    if chars.len() <= MAX_DOCUMENT_TITLE_CHARS {
        return cleaned.to_string();
    }
    let keep = MAX_DOCUMENT_TITLE_CHARS - 1;
    let head = keep.div_ceil(2);
    let tail = keep - head;
    let mut elided: String = chars[..head].iter().collect();
    elided.push('…');
    elided.extend(&chars[chars.len() - tail..]);
    elided
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(ranges: PageRange) -> Arc<PrintedDocument> {
        let settings = PrintSettings {
            dpi: 300,
            ranges,
            ..PrintSettings::default()
        };
        PrintedDocument::new(settings, "doc", DocumentCookie::generate())
    }

    fn add_page(doc: &PrintedDocument, n: u32) {
        doc.set_page(n, PageMetafile::default(), Size::new(10.0, 10.0), Rect::default());
    }

    #[test]
    fn empty_document_is_never_complete() {
        let doc = document(PageRange::All);
        assert!(!doc.is_complete());
    }

    #[test]
    fn completion_tracks_selected_pages() {
        let doc = document(PageRange::All);
        doc.set_page_count(2);
        add_page(&doc, 0);
        assert!(!doc.is_complete());
        add_page(&doc, 1);
        assert!(doc.is_complete());
    }

    #[test]
    fn unselected_pages_are_not_required() {
        let doc = document(PageRange::Selection(vec![1]));
        doc.set_page_count(3);
        assert_eq!(doc.expected_page_count(), 1);
        add_page(&doc, 1);
        assert!(doc.is_complete());
        assert!(doc.get_page(0).is_none());
    }

    #[test]
    fn cursor_walks_selected_pages() {
        let mut cursor = PageCursor::new(&PageRange::Range { start: 1, end: 2 }, 4);
        assert_eq!(cursor.current(), Some(1));
        cursor.advance();
        assert_eq!(cursor.current(), Some(2));
        cursor.advance();
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.current(), None);
    }

    #[test]
    fn cursor_over_empty_selection_starts_exhausted() {
        let cursor = PageCursor::new(&PageRange::Range { start: 5, end: 9 }, 2);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn title_whitespace_and_controls_are_cleaned() {
        assert_eq!(simplify_document_title("  Quarterly\t\n report\u{7}  "), "Quarterly report");
        assert_eq!(simplify_document_title(" \u{1b} "), "Untitled");
    }

    #[test]
    fn long_titles_are_elided_in_the_middle() {
        let title = "a".repeat(30) + &"b".repeat(30);
        let simplified = simplify_document_title(&title);
        assert_eq!(simplified.chars().count(), MAX_DOCUMENT_TITLE_CHARS);
        assert!(simplified.starts_with("aaaa"));
        assert!(simplified.ends_with("bbbb"));
        assert!(simplified.contains('…'));
    }
}
