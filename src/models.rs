use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::recognition::error::ErrorKind;

/// Axis-aligned bounding box in page-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Build from (x1, y1, x2, y2) corner coordinates.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn intersection(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }
        (x2 - x1) * (y2 - y1)
    }

    /// Intersection over union with another box. Zero when the union is empty.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let intersection = self.intersection(other);
        let union = self.area() + other.area() - intersection;
        if union == 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Clamp the box into `[0, width] x [0, height]`. Boxes are clamped,
    /// never dropped: a box entirely outside the page collapses to a
    /// zero-area box on the nearest edge.
    pub fn clamp_to(&self, page_width: f64, page_height: f64) -> BoundingBox {
        let x = self.x.clamp(0.0, page_width);
        let y = self.y.clamp(0.0, page_height);
        let width = (self.x + self.width).clamp(x, page_width) - x;
        let height = (self.y + self.height).clamp(y, page_height) - y;
        BoundingBox { x, y, width, height }
    }

    /// True when the box lies fully within `[0, width] x [0, height]`.
    pub fn within(&self, page_width: f64, page_height: f64) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.width <= page_width
            && self.y + self.height <= page_height
    }
}

/// One recognized span of text with its position and confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    pub text: String,
    #[serde(flatten)]
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub page_index: usize,
}

impl TextRegion {
    /// Whole-page fallback region used when the backend returns flat text
    /// without layout. Marked by a zero-area box at the origin.
    pub fn whole_page(text: String, confidence: f64, page_index: usize) -> Self {
        Self {
            text,
            bbox: BoundingBox::new(0.0, 0.0, 0.0, 0.0),
            confidence,
            page_index,
        }
    }

    pub fn is_whole_page(&self) -> bool {
        self.bbox.area() == 0.0
    }
}

/// Successful outcome for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSuccess {
    pub page_index: usize,
    /// Regions ordered by descending confidence. Overlay stacking draws
    /// them in reverse so the highest-confidence region lands on top.
    pub regions: Vec<TextRegion>,
    pub average_confidence: f64,
    pub attempts: u32,
    /// Enhancement strategy whose variant produced this result.
    pub strategy: String,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub point_width: f64,
    pub point_height: f64,
}

impl PageSuccess {
    /// Concatenated region text in stored (confidence-descending) order.
    pub fn full_text(&self) -> String {
        self.regions
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Failed outcome for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFailure {
    pub page_index: usize,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

/// Outcome of processing one page. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageResult {
    Success(PageSuccess),
    Failure(PageFailure),
}

impl PageResult {
    pub fn page_index(&self) -> usize {
        match self {
            PageResult::Success(s) => s.page_index,
            PageResult::Failure(f) => f.page_index,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PageResult::Success(_))
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PageResult::Success(s) => s.attempts,
            PageResult::Failure(f) => f.attempts,
        }
    }

    pub fn as_success(&self) -> Option<&PageSuccess> {
        match self {
            PageResult::Success(s) => Some(s),
            PageResult::Failure(_) => None,
        }
    }

    pub fn as_failure(&self) -> Option<&PageFailure> {
        match self {
            PageResult::Success(_) => None,
            PageResult::Failure(f) => Some(f),
        }
    }
}

/// Document-level status, derived from the page results and never
/// independently settable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "partial_success")]
    PartialSuccess,
    #[serde(rename = "failed")]
    Failed,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentStatus::Complete => write!(f, "complete"),
            DocumentStatus::PartialSuccess => write!(f, "partial_success"),
            DocumentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregated outcome for a whole document. The single source of truth for
/// both the JSON report and the overlay synthesizer.
#[derive(Debug, Clone)]
pub struct DocumentResult {
    pub source: PathBuf,
    /// Ordered by page index; length always equals the PDF page count.
    pub page_results: Vec<PageResult>,
    pub total_pages: usize,
    pub failed_pages: usize,
    /// Average over successful pages only; `None` when there are none.
    pub average_confidence: Option<f64>,
    pub elapsed: Duration,
    pub status: DocumentStatus,
}

impl DocumentResult {
    pub fn successes(&self) -> impl Iterator<Item = &PageSuccess> {
        self.page_results.iter().filter_map(|p| p.as_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &PageFailure> {
        self.page_results.iter().filter_map(|p| p.as_failure())
    }
}

/// Reference to a page raster persisted for overlay embedding. Kept outside
/// `DocumentResult` so working rasters can be dropped as soon as each page
/// result is captured.
#[derive(Debug, Clone)]
pub struct PageAsset {
    pub page_index: usize,
    pub path: PathBuf,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub point_width: f64,
    pub point_height: f64,
}
