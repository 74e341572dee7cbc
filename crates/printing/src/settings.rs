use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::job_settings::JobSettings;
use crate::metafile::{Point, Rect, Size};

/// Process-unique token that ties a printer query to the document it prints.
///
/// Zero is reserved for "no document".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DocumentCookie(u32);

impl DocumentCookie {
    pub const INVALID: Self = Self(0);

    /// Mints a cookie that was never handed out before in this process.
    pub fn generate() -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        loop {
            let value = COUNTER.fetch_add(1, Ordering::Relaxed);
            if value != 0 {
                return Self(value);
            }
        }
    }

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for DocumentCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cookie-{}", self.0)
    }
}

/// Orientation of a print page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Duplex (two-sided) printing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplexMode {
    #[default]
    #[serde(rename = "simplex")]
    Off,
    LongEdge,
    ShortEdge,
}

/// Colour mode for the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrintColorMode {
    #[default]
    Color,
    Grayscale,
}

/// How page margins are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarginType {
    #[default]
    Default,
    #[serde(rename = "none")]
    NoMargins,
    PrintableArea,
    Custom,
}

/// Upper bound on the pages a single document may have.
pub const MAX_PAGE_COUNT: u32 = 100_000;

/// Pages to print, as 0-based page indexes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageRange {
    #[default]
    All,
    Range { start: u32, end: u32 },
    Selection(Vec<u32>),
}

impl PageRange {
    pub fn contains(&self, page: u32) -> bool {
        match self {
            PageRange::All => true,
            PageRange::Range { start, end } => *start <= page && page <= *end,
            PageRange::Selection(set) => set.contains(&page),
        }
    }

    /// Selected page indexes of a document with `page_count` pages, ascending.
    ///
    /// Counts above [`MAX_PAGE_COUNT`] are clamped.
    pub fn pages_in(&self, page_count: u32) -> Vec<u32> {
        let page_count = page_count.min(MAX_PAGE_COUNT);
        match self {
            PageRange::All => (0..page_count).collect(),
            PageRange::Range { start, end } => {
                (*start..end.saturating_add(1).min(page_count)).collect()
            }
            PageRange::Selection(set) => sorted_below(set, page_count),
        }
    }

    /// Pages named explicitly by the range; empty for [`PageRange::All`].
    pub fn explicit_pages(&self) -> Vec<u32> {
        match self {
            PageRange::All => Vec::new(),
            PageRange::Range { start, end } => {
                (*start..=(*end).min(MAX_PAGE_COUNT - 1)).collect()
            }
            PageRange::Selection(set) => sorted_below(set, MAX_PAGE_COUNT),
        }
    }
}

fn sorted_below(set: &[u32], limit: u32) -> Vec<u32> {
    let mut pages: Vec<u32> = set.iter().copied().filter(|page| *page < limit).collect();
    pages.sort_unstable();
    pages.dedup();
    pages
}

/// Margin values expressed in points (1/72").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margin {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl Margin {
    pub const fn zero() -> Self {
        Self::uniform(0.0)
    }

    pub const fn uniform(value: f32) -> Self {
        Self {
            top: value,
            bottom: value,
            left: value,
            right: value,
        }
    }
}

impl Default for Margin {
    fn default() -> Self {
        Self::zero()
    }
}

/// Supported paper identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperId {
    A5,
    A4,
    A3,
    Letter,
    Legal,
    Tabloid,
    Custom,
}

/// Represents a paper size in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperSize {
    pub id: PaperId,
    pub width_mm: f32,
    pub height_mm: f32,
}

impl PaperSize {
    pub const A5: Self = Self::new(PaperId::A5, 148.0, 210.0);
    pub const A4: Self = Self::new(PaperId::A4, 210.0, 297.0);
    pub const A3: Self = Self::new(PaperId::A3, 297.0, 420.0);
    pub const LETTER: Self = Self::new(PaperId::Letter, 215.9, 279.4);
    pub const LEGAL: Self = Self::new(PaperId::Legal, 215.9, 355.6);
    pub const TABLOID: Self = Self::new(PaperId::Tabloid, 279.4, 431.8);

    pub const fn new(id: PaperId, width_mm: f32, height_mm: f32) -> Self {
        Self {
            id,
            width_mm,
            height_mm,
        }
    }

    /// Looks up a stock size by its media name (`"A4"`, `"Letter"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let size = match name.to_ascii_lowercase().as_str() {
            "a5" => Self::A5,
            "a4" => Self::A4,
            "a3" => Self::A3,
            "letter" => Self::LETTER,
            "legal" => Self::LEGAL,
            "tabloid" => Self::TABLOID,
            _ => return None,
        };
        Some(size)
    }

    pub fn to_points(&self, orientation: Orientation) -> (f32, f32) {
        const MM_PER_INCH: f32 = 25.4;
        let width_in = self.width_mm / MM_PER_INCH;
        let height_in = self.height_mm / MM_PER_INCH;
        let width_pt = width_in * 72.0;
        let height_pt = height_in * 72.0;
        match orientation {
            Orientation::Portrait => (width_pt, height_pt),
            Orientation::Landscape => (height_pt, width_pt),
        }
    }
}

impl Default for PaperSize {
    fn default() -> Self {
        Self::A4
    }
}

/// Default margin applied when [`MarginType::Default`] is selected, in points.
pub const DEFAULT_MARGIN_PT: f32 = 28.8;
/// Non-printable edge assumed for [`MarginType::PrintableArea`], in points.
pub const PRINTABLE_AREA_MARGIN_PT: f32 = 18.0;
/// Resolution used when a caller never picked one.
pub const DEFAULT_DPI: u32 = 72;

/// Resolved printer configuration for one document.
///
/// A `dpi` of zero means the settings were never filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintSettings {
    pub device_name: String,
    pub title: String,
    pub url: String,
    pub paper: PaperSize,
    pub orientation: Orientation,
    pub margin_type: MarginType,
    pub custom_margins: Margin,
    pub dpi: u32,
    pub scale_factor: u32,
    pub color_mode: PrintColorMode,
    pub duplex: DuplexMode,
    pub copies: u32,
    pub collate: bool,
    pub ranges: PageRange,
    pub selection_only: bool,
    pub should_print_backgrounds: bool,
    pub display_header_footer: bool,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            title: String::new(),
            url: String::new(),
            paper: PaperSize::default(),
            orientation: Orientation::Portrait,
            margin_type: MarginType::Default,
            custom_margins: Margin::zero(),
            dpi: 0,
            scale_factor: 100,
            color_mode: PrintColorMode::Color,
            duplex: DuplexMode::Off,
            copies: 1,
            collate: true,
            ranges: PageRange::All,
            selection_only: false,
            should_print_backgrounds: false,
            display_header_footer: false,
        }
    }
}

impl PrintSettings {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.dpi == 0
    }

    /// Page size in points, honouring orientation.
    pub fn page_size(&self) -> Size {
        let (width, height) = self.paper.to_points(self.orientation);
        Size { width, height }
    }

    pub fn effective_margins(&self) -> Margin {
        match self.margin_type {
            MarginType::Default => Margin::uniform(DEFAULT_MARGIN_PT),
            MarginType::NoMargins => Margin::zero(),
            MarginType::PrintableArea => Margin::uniform(PRINTABLE_AREA_MARGIN_PT),
            MarginType::Custom => self.custom_margins,
        }
    }

    /// Printable region of a page, in points from the top-left corner.
    pub fn content_area(&self) -> Rect {
        let page = self.page_size();
        let margins = self.effective_margins();
        Rect {
            origin: Point {
                x: margins.left,
                y: margins.top,
            },
            size: Size {
                width: (page.width - margins.left - margins.right).max(0.0),
                height: (page.height - margins.top - margins.bottom).max(0.0),
            },
        }
    }

    /// Overlays the fields a caller supplied on top of these settings.
    pub fn apply(&mut self, job: &JobSettings) {
        if let Some(landscape) = job.landscape {
            self.orientation = if landscape {
                Orientation::Landscape
            } else {
                Orientation::Portrait
            };
        }
        if let Some(scale) = job.scale_factor {
            self.scale_factor = scale.round() as u32;
        }
        if let Some(duplex) = job.duplex_mode {
            self.duplex = duplex;
        }
        if let Some(color) = job.color {
            self.color_mode = if color {
                PrintColorMode::Color
            } else {
                PrintColorMode::Grayscale
            };
        }
        if let Some(margins) = &job.margins {
            self.margin_type = margins.margin_type;
            if margins.margin_type == MarginType::Custom {
                self.custom_margins = Margin {
                    top: margins.top.unwrap_or_default(),
                    bottom: margins.bottom.unwrap_or_default(),
                    left: margins.left.unwrap_or_default(),
                    right: margins.right.unwrap_or_default(),
                };
            }
        }
        if let Some(selection_only) = job.print_selection_only {
            self.selection_only = selection_only;
        }
        if let Some(backgrounds) = job.print_background {
            self.should_print_backgrounds = backgrounds;
        }
        if let Some(header_footer) = job.header_footer_enabled {
            self.display_header_footer = header_footer;
        }
        if let Some(collate) = job.collate {
            self.collate = collate;
        }
        if let Some(copies) = job.copies {
            self.copies = copies;
        }
        if let Some(range) = job.page_ranges {
            self.ranges = PageRange::Range {
                start: range.from,
                end: range.to,
            };
        }
        if let Some(device_name) = &job.device_name {
            self.device_name = device_name.clone();
        }
        if let Some(paper) = job.media_size.as_deref().and_then(PaperSize::from_name) {
            self.paper = paper;
        }
        if let Some(title) = &job.title {
            self.title = title.clone();
        }
        if let Some(url) = &job.url {
            self.url = url.clone();
        }
        match job.dpi {
            Some(dpi) => self.dpi = dpi.horizontal,
            None if self.dpi == 0 => self.dpi = DEFAULT_DPI,
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_settings::{MarginsSetting, PageRangeSetting};

    #[test]
    fn generated_cookies_are_valid_and_distinct() {
        let first = DocumentCookie::generate();
        let second = DocumentCookie::generate();
        assert!(first.is_valid());
        assert!(second.is_valid());
        assert_ne!(first, second);
        assert!(!DocumentCookie::INVALID.is_valid());
        assert_eq!(DocumentCookie::default(), DocumentCookie::INVALID);
    }

    #[test]
    fn page_range_selects_zero_based_indexes() {
        assert_eq!(PageRange::All.pages_in(3), vec![0, 1, 2]);
        assert_eq!(PageRange::Range { start: 1, end: 5 }.pages_in(3), vec![1, 2]);
        assert_eq!(PageRange::Selection(vec![4, 0]).pages_in(3), vec![0]);
        assert!(PageRange::Range { start: 3, end: 4 }.pages_in(3).is_empty());
        assert_eq!(
            PageRange::Selection(vec![2, 0, 2]).explicit_pages(),
            vec![0, 2]
        );
    }

    #[test]
    fn huge_ranges_stay_bounded() {
        let range = PageRange::Range { start: 0, end: u32::MAX };
        let explicit = range.explicit_pages();
        assert_eq!(explicit.len(), MAX_PAGE_COUNT as usize);
        assert_eq!(explicit.last(), Some(&(MAX_PAGE_COUNT - 1)));

        assert_eq!(range.pages_in(4), vec![0, 1, 2, 3]);
        assert_eq!(PageRange::All.pages_in(u32::MAX).len(), MAX_PAGE_COUNT as usize);
        assert!(PageRange::Selection(vec![u32::MAX]).explicit_pages().is_empty());
    }

    #[test]
    fn landscape_swaps_page_dimensions() {
        let (w, h) = PaperSize::A4.to_points(Orientation::Portrait);
        let (lw, lh) = PaperSize::A4.to_points(Orientation::Landscape);
        assert!((w - lh).abs() < f32::EPSILON);
        assert!((h - lw).abs() < f32::EPSILON);
        assert!(h > w);
    }

    #[test]
    fn media_names_are_case_insensitive() {
        assert_eq!(PaperSize::from_name("letter"), Some(PaperSize::LETTER));
        assert_eq!(PaperSize::from_name("TABLOID"), Some(PaperSize::TABLOID));
        assert_eq!(PaperSize::from_name("B5"), None);
    }

    #[test]
    fn clear_resets_to_empty_settings() {
        let mut settings = PrintSettings {
            dpi: 300,
            device_name: "Office".into(),
            ..PrintSettings::default()
        };
        assert!(!settings.is_empty());
        settings.clear();
        assert!(settings.is_empty());
        assert!(settings.device_name.is_empty());
    }

    #[test]
    fn apply_overlays_only_supplied_fields() {
        let mut settings = PrintSettings {
            device_name: "Office".into(),
            copies: 3,
            ..PrintSettings::default()
        };
        let job = JobSettings {
            landscape: Some(true),
            margins: Some(MarginsSetting {
                margin_type: MarginType::Custom,
                top: Some(10.0),
                bottom: Some(20.0),
                left: Some(30.0),
                right: Some(40.0),
            }),
            page_ranges: Some(PageRangeSetting { from: 0, to: 1 }),
            media_size: Some("Letter".into()),
            ..JobSettings::default()
        };

        settings.apply(&job);

        assert_eq!(settings.orientation, Orientation::Landscape);
        assert_eq!(settings.device_name, "Office");
        assert_eq!(settings.copies, 3);
        assert_eq!(settings.paper, PaperSize::LETTER);
        assert_eq!(settings.ranges, PageRange::Range { start: 0, end: 1 });
        assert_eq!(settings.dpi, DEFAULT_DPI);
        let area = settings.content_area();
        assert_eq!(area.origin.x, 30.0);
        assert_eq!(area.origin.y, 10.0);
    }

    #[test]
    fn no_margins_uses_whole_page() {
        let settings = PrintSettings {
            margin_type: MarginType::NoMargins,
            ..PrintSettings::default()
        };
        let area = settings.content_area();
        let page = settings.page_size();
        assert_eq!(area.size.width, page.width);
        assert_eq!(area.size.height, page.height);
    }
}
