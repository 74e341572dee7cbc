//! Print settings as supplied by script callers (`webContents.print` and
//! friends), validated before they reach a printing context.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::settings::{DuplexMode, MarginType, PaperSize, MAX_PAGE_COUNT};

const MIN_SCALE_FACTOR: f64 = 10.0;
const MAX_SCALE_FACTOR: f64 = 200.0;

#[derive(Debug, Error)]
pub enum JobSettingsError {
    #[error("invalid print settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("margins of type 'custom' must define top, bottom, left and right")]
    IncompleteCustomMargins,
    #[error("page range start {from} is after its end {to}")]
    InvertedPageRange { from: u32, to: u32 },
    #[error("page range end {0} is beyond the last printable page")]
    PageRangeTooLarge(u32),
    #[error("copies must be at least 1")]
    ZeroCopies,
    #[error("scale factor {0} is outside 10..=200")]
    ScaleFactor(f64),
    #[error("unsupported media size '{0}'")]
    UnknownMediaSize(String),
    #[error("dpi must be positive in both directions")]
    ZeroDpi,
}

/// Margin block of the settings dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginsSetting {
    #[serde(default)]
    pub margin_type: MarginType,
    pub top: Option<f32>,
    pub bottom: Option<f32>,
    pub left: Option<f32>,
    pub right: Option<f32>,
}

/// 0-based inclusive page interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRangeSetting {
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpiSetting {
    pub horizontal: u32,
    pub vertical: u32,
}

/// Settings dictionary accepted by `PrinterQuery::set_settings`.
///
/// Every field is optional; absent fields keep the value the printing
/// context already holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobSettings {
    pub landscape: Option<bool>,
    pub scale_factor: Option<f64>,
    pub duplex_mode: Option<DuplexMode>,
    pub color: Option<bool>,
    pub margins: Option<MarginsSetting>,
    pub print_selection_only: Option<bool>,
    pub print_background: Option<bool>,
    pub header_footer_enabled: Option<bool>,
    pub collate: Option<bool>,
    pub copies: Option<u32>,
    pub page_ranges: Option<PageRangeSetting>,
    pub device_name: Option<String>,
    pub dpi: Option<DpiSetting>,
    pub media_size: Option<String>,
    #[serde(rename = "printToPDF")]
    pub print_to_pdf: Option<bool>,
    /// Correlates a preview request with its reply.
    pub request_id: Option<u64>,
    pub title: Option<String>,
    pub url: Option<String>,
}

impl JobSettings {
    pub fn from_value(value: &Value) -> Result<Self, JobSettingsError> {
        let settings: Self = serde_json::from_value(value.clone())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_str(text: &str) -> Result<Self, JobSettingsError> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), JobSettingsError> {
        if let Some(margins) = &self.margins {
            let complete = margins.top.is_some()
                && margins.bottom.is_some()
                && margins.left.is_some()
                && margins.right.is_some();
            if margins.margin_type == MarginType::Custom && !complete {
                return Err(JobSettingsError::IncompleteCustomMargins);
            }
        }
        if let Some(range) = self.page_ranges {
            if range.from > range.to {
                return Err(JobSettingsError::InvertedPageRange {
                    from: range.from,
                    to: range.to,
                });
            }
            if range.to >= MAX_PAGE_COUNT {
                return Err(JobSettingsError::PageRangeTooLarge(range.to));
            }
        }
        if self.copies == Some(0) {
            return Err(JobSettingsError::ZeroCopies);
        }
        if let Some(scale) = self.scale_factor {
            if !(MIN_SCALE_FACTOR..=MAX_SCALE_FACTOR).contains(&scale) {
                return Err(JobSettingsError::ScaleFactor(scale));
            }
        }
        if let Some(name) = &self.media_size {
            if PaperSize::from_name(name).is_none() {
                return Err(JobSettingsError::UnknownMediaSize(name.clone()));
            }
        }
        if let Some(dpi) = self.dpi {
            if dpi.horizontal == 0 || dpi.vertical == 0 {
                return Err(JobSettingsError::ZeroDpi);
            }
        }
        Ok(())
    }
}
