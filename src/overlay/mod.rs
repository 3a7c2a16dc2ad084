//! Overlay synthesis: the final interactive SVG document.
//!
//! Each page raster is embedded as a base64 data URL sized to the page's
//! native point dimensions, with one transparent-but-selectable text
//! element per recognized region aligned over the corresponding glyphs.
//! The full structured page results are embedded as JSON inside a
//! `<metadata>` element so consumers can round-trip text, bounding boxes
//! and confidences without re-running recognition.

pub mod transform;

use std::fmt::Write as _;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{DocumentResult, DocumentStatus, PageAsset, PageResult, TextRegion};
use crate::recognition::error::{ErrorKind, RecognitionError};
use transform::PageTransform;

/// Fallback page box (US Letter, points) for pages whose raster never
/// rendered.
const FALLBACK_POINT_WIDTH: f64 = 612.0;
const FALLBACK_POINT_HEIGHT: f64 = 792.0;

/// How pages are arranged on the canvas. A pure presentation concern: it
/// never alters the embedded text or metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// Pages stacked top to bottom.
    Sequential,
    /// Pages arranged in a grid.
    Tiled,
}

impl FromStr for LayoutMode {
    type Err = RecognitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(LayoutMode::Sequential),
            "tiled" => Ok(LayoutMode::Tiled),
            other => Err(RecognitionError::Configuration {
                details: format!(
                    "unsupported layout mode '{}'. Supported: sequential, tiled",
                    other
                ),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub layout: LayoutMode,
    /// Space between pages, in points.
    pub page_spacing: f64,
    pub background_color: String,
    pub font_family: String,
    /// Columns used by the tiled layout.
    pub tile_columns: usize,
    /// Draw visible region outlines, for debugging alignment.
    pub show_bounding_boxes: bool,
    /// Embed previous/next page controls for viewers that run scripts.
    /// Presentation-only: never alters the text layer or metadata.
    pub show_navigation: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            layout: LayoutMode::Sequential,
            page_spacing: 20.0,
            background_color: "#ffffff".to_string(),
            font_family: "Arial, sans-serif".to_string(),
            tile_columns: 2,
            show_bounding_boxes: false,
            show_navigation: false,
        }
    }
}

/// The synthesized output document. Never mutated after creation;
/// regenerating means rebuilding from the same `DocumentResult`.
#[derive(Debug, Clone)]
pub struct OverlayDocument {
    pub svg: String,
    /// Exact JSON payload embedded in the `<metadata>` element.
    pub metadata_json: String,
}

/// Machine-readable payload embedded in the SVG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayMetadata {
    pub generator: String,
    pub version: String,
    pub source: String,
    pub status: DocumentStatus,
    pub total_pages: usize,
    pub failed_pages: usize,
    pub average_confidence: Option<f64>,
    pub pages: Vec<PageMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMetadata {
    pub page_index: usize,
    pub recognized: bool,
    pub confidence: Option<f64>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_height: Option<u32>,
    pub point_width: f64,
    pub point_height: f64,
    /// Regions in recognition pixel space, confidence-descending.
    pub regions: Vec<TextRegion>,
}

struct PageGeometry {
    point_width: f64,
    point_height: f64,
}

struct PagePlacement {
    x: f64,
    y: f64,
}

pub struct OverlaySynthesizer {
    config: OverlayConfig,
}

impl OverlaySynthesizer {
    pub fn new(config: OverlayConfig) -> Self {
        Self { config }
    }

    /// Build the overlay document from a finalized document result and the
    /// persisted page rasters. The SVG page count always equals the PDF
    /// page count: failed pages still emit their raster (or a placeholder
    /// box) with a failure marker.
    pub fn synthesize(
        &self,
        result: &DocumentResult,
        assets: &[PageAsset],
    ) -> Result<OverlayDocument, RecognitionError> {
        let metadata = build_metadata(result, assets);
        let metadata_json = serde_json::to_string(&metadata).map_err(|e| {
            RecognitionError::MalformedResponse {
                details: format!("failed to serialize overlay metadata: {}", e),
            }
        })?;

        let geometries: Vec<PageGeometry> = metadata
            .pages
            .iter()
            .map(|p| PageGeometry {
                point_width: p.point_width,
                point_height: p.point_height,
            })
            .collect();
        let (canvas_width, canvas_height, placements) = self.layout_pages(&geometries);

        let mut svg = String::new();
        write!(
            svg,
            "<svg xmlns=\"http://www.w3.org/2000/svg\" xmlns:xlink=\"http://www.w3.org/1999/xlink\" \
             version=\"1.1\" width=\"{:.2}\" height=\"{:.2}\" viewBox=\"0 0 {:.2} {:.2}\">\n",
            canvas_width, canvas_height, canvas_width, canvas_height
        )
        .expect("writing to String cannot fail");

        let _ = writeln!(
            svg,
            "<metadata id=\"ocrlay-metadata\">{}</metadata>",
            xml_escape(&metadata_json)
        );
        self.write_styles(&mut svg);
        let _ = writeln!(
            svg,
            "<rect width=\"100%\" height=\"100%\" fill=\"{}\"/>",
            xml_escape(&self.config.background_color)
        );

        for (page, (geometry, placement)) in metadata
            .pages
            .iter()
            .zip(geometries.iter().zip(placements.iter()))
        {
            let asset = assets.iter().find(|a| a.page_index == page.page_index);
            self.write_page(&mut svg, page, geometry, placement, asset)?;
        }

        if self.config.show_navigation && metadata.pages.len() > 1 {
            write_navigation(&mut svg, metadata.pages.len());
        }

        svg.push_str("</svg>\n");

        debug!(
            "synthesized overlay: {} pages, {} layout, {} bytes",
            metadata.pages.len(),
            match self.config.layout {
                LayoutMode::Sequential => "sequential",
                LayoutMode::Tiled => "tiled",
            },
            svg.len()
        );

        Ok(OverlayDocument { svg, metadata_json })
    }

    /// Compute canvas size and per-page origins for the configured layout.
    fn layout_pages(&self, pages: &[PageGeometry]) -> (f64, f64, Vec<PagePlacement>) {
        let spacing = self.config.page_spacing;
        match self.config.layout {
            LayoutMode::Sequential => {
                let width = pages
                    .iter()
                    .map(|p| p.point_width)
                    .fold(0.0f64, f64::max)
                    .max(1.0);
                let mut placements = Vec::with_capacity(pages.len());
                let mut y = 0.0;
                for page in pages {
                    placements.push(PagePlacement { x: 0.0, y });
                    y += page.point_height + spacing;
                }
                let height = (y - spacing).max(1.0);
                (width, height, placements)
            }
            LayoutMode::Tiled => {
                let columns = self.config.tile_columns.max(1);
                let cell_width = pages
                    .iter()
                    .map(|p| p.point_width)
                    .fold(0.0f64, f64::max)
                    .max(1.0);
                let cell_height = pages
                    .iter()
                    .map(|p| p.point_height)
                    .fold(0.0f64, f64::max)
                    .max(1.0);
                let rows = pages.len().div_ceil(columns);

                let placements = (0..pages.len())
                    .map(|i| PagePlacement {
                        x: (i % columns) as f64 * (cell_width + spacing),
                        y: (i / columns) as f64 * (cell_height + spacing),
                    })
                    .collect();

                let used_columns = pages.len().min(columns).max(1);
                let width = used_columns as f64 * cell_width + (used_columns - 1) as f64 * spacing;
                let height =
                    (rows.max(1)) as f64 * cell_height + (rows.max(1) - 1) as f64 * spacing;
                (width, height, placements)
            }
        }
    }

    fn write_styles(&self, svg: &mut String) {
        let _ = writeln!(
            svg,
            "<style>\n\
             .text-layer text {{ fill: transparent; font-family: {}; cursor: text; user-select: text; white-space: pre; }}\n\
             .text-layer text::selection {{ fill: #000000; background-color: rgba(255, 255, 0, 0.3); }}\n\
             .page-border {{ fill: none; stroke: #cccccc; stroke-width: 0.5; }}\n\
             .region-box {{ fill: none; stroke: #ff0000; stroke-width: 0.5; opacity: 0.5; }}\n\
             .failure-note {{ fill: #999999; font-family: {}; font-size: 10px; }}\n\
             </style>",
            self.config.font_family, self.config.font_family
        );
    }

    fn write_page(
        &self,
        svg: &mut String,
        page: &PageMetadata,
        geometry: &PageGeometry,
        placement: &PagePlacement,
        asset: Option<&PageAsset>,
    ) -> Result<(), RecognitionError> {
        let _ = write!(
            svg,
            "<g id=\"page-{}\" class=\"page\" transform=\"translate({:.2} {:.2})\"",
            page.page_index, placement.x, placement.y
        );
        if let Some(kind) = page.error_kind {
            let _ = write!(svg, " data-recognition-failed=\"{}\"", kind);
        }
        svg.push_str(">\n");

        let _ = writeln!(
            svg,
            "<rect class=\"page-border\" width=\"{:.2}\" height=\"{:.2}\"/>",
            geometry.point_width, geometry.point_height
        );

        match asset {
            Some(asset) => match std::fs::read(&asset.path) {
                Ok(bytes) => {
                    let _ = writeln!(
                        svg,
                        "<image x=\"0\" y=\"0\" width=\"{:.2}\" height=\"{:.2}\" \
                         xlink:href=\"data:image/png;base64,{}\"/>",
                        geometry.point_width,
                        geometry.point_height,
                        BASE64_STANDARD.encode(&bytes)
                    );
                }
                Err(e) => {
                    warn!(
                        "page {}: raster {} unreadable ({}), emitting placeholder",
                        page.page_index,
                        asset.path.display(),
                        e
                    );
                    self.write_placeholder(svg, page, geometry);
                }
            },
            None => self.write_placeholder(svg, page, geometry),
        }

        if !page.regions.is_empty() {
            let transform = PageTransform::from_dimensions(
                geometry.point_width,
                geometry.point_height,
                page.pixel_width.unwrap_or(0),
                page.pixel_height.unwrap_or(0),
            );
            svg.push_str("<g class=\"text-layer\">\n");
            // Regions are stored confidence-descending; draw in reverse so
            // the highest-confidence region stacks on top.
            for region in page.regions.iter().rev() {
                self.write_region(svg, region, &transform);
            }
            svg.push_str("</g>\n");
        }

        svg.push_str("</g>\n");
        Ok(())
    }

    fn write_placeholder(&self, svg: &mut String, page: &PageMetadata, geometry: &PageGeometry) {
        let _ = writeln!(
            svg,
            "<rect width=\"{:.2}\" height=\"{:.2}\" fill=\"#f5f5f5\"/>",
            geometry.point_width, geometry.point_height
        );
        let note = match (&page.error_kind, &page.error_message) {
            (Some(kind), _) => format!("page {}: recognition failed ({})", page.page_index + 1, kind),
            (None, _) => format!("page {}: raster unavailable", page.page_index + 1),
        };
        let _ = writeln!(
            svg,
            "<text class=\"failure-note\" x=\"{:.2}\" y=\"{:.2}\" text-anchor=\"middle\">{}</text>",
            geometry.point_width / 2.0,
            geometry.point_height / 2.0,
            xml_escape(&note)
        );
    }

    fn write_region(&self, svg: &mut String, region: &TextRegion, transform: &PageTransform) {
        if region.is_whole_page() {
            // No layout information; anchor the selectable text at the top
            // left so search and copy still work.
            let _ = writeln!(
                svg,
                "<text x=\"2\" y=\"14\" font-size=\"12\" data-confidence=\"{:.3}\">{}</text>",
                region.confidence,
                xml_escape(&region.text)
            );
            return;
        }

        let bbox = transform.apply(&region.bbox);
        if self.config.show_bounding_boxes {
            let _ = writeln!(
                svg,
                "<rect class=\"region-box\" x=\"{:.2}\" y=\"{:.2}\" width=\"{:.2}\" height=\"{:.2}\"/>",
                bbox.x, bbox.y, bbox.width, bbox.height
            );
        }

        let font_size = bbox.height.max(1.0);
        let baseline = bbox.y + bbox.height;
        let _ = write!(
            svg,
            "<text x=\"{:.2}\" y=\"{:.2}\" font-size=\"{:.2}\" data-confidence=\"{:.3}\"",
            bbox.x, baseline, font_size, region.confidence
        );
        if bbox.width > 0.0 {
            let _ = write!(
                svg,
                " textLength=\"{:.2}\" lengthAdjust=\"spacingAndGlyphs\"",
                bbox.width
            );
        }
        let _ = writeln!(svg, ">{}</text>", xml_escape(&region.text));
    }
}

/// Previous/next controls plus a single-page view toggle, for viewers that
/// execute embedded scripts. Static viewers just render the buttons inert;
/// all pages stay visible until the first click.
fn write_navigation(svg: &mut String, page_count: usize) {
    let _ = writeln!(
        svg,
        "<g class=\"nav-controls\" data-page-count=\"{}\" data-current-page=\"0\" \
         transform=\"translate(10 10)\">",
        page_count
    );
    svg.push_str(
        "<style>\n\
         .nav-button { cursor: pointer; user-select: none; }\n\
         .nav-button rect { fill: #f0f0f0; stroke: #ccc; }\n\
         .nav-button:hover rect { fill: #e0e0e0; }\n\
         .nav-button text { fill: #333; font-size: 12px; }\n\
         </style>\n",
    );
    svg.push_str(
        "<g class=\"nav-button prev-button\" onclick=\"ocrlayShowPage(-1)\">\n\
         <rect width=\"80\" height=\"30\" rx=\"4\" ry=\"4\"/>\n\
         <text x=\"40\" y=\"15\" text-anchor=\"middle\" dominant-baseline=\"middle\">Previous</text>\n\
         </g>\n",
    );
    svg.push_str(
        "<g class=\"nav-button next-button\" transform=\"translate(90 0)\" \
         onclick=\"ocrlayShowPage(1)\">\n\
         <rect width=\"80\" height=\"30\" rx=\"4\" ry=\"4\"/>\n\
         <text x=\"40\" y=\"15\" text-anchor=\"middle\" dominant-baseline=\"middle\">Next</text>\n\
         </g>\n",
    );
    let _ = writeln!(
        svg,
        "<text class=\"nav-page-label\" x=\"180\" y=\"15\" dominant-baseline=\"middle\" \
         font-size=\"12\">Page 1 / {}</text>",
        page_count
    );
    svg.push_str("</g>\n");
    let _ = writeln!(
        svg,
        "<script><![CDATA[\n\
         var ocrlayPage = -1;\n\
         function ocrlayShowPage(delta) {{\n\
           var count = {};\n\
           if (ocrlayPage < 0) {{ ocrlayPage = 0; }} else {{ ocrlayPage += delta; }}\n\
           if (ocrlayPage < 0) {{ ocrlayPage = 0; }}\n\
           if (ocrlayPage >= count) {{ ocrlayPage = count - 1; }}\n\
           for (var i = 0; i < count; i++) {{\n\
             var page = document.getElementById('page-' + i);\n\
             if (page) {{ page.style.display = i === ocrlayPage ? '' : 'none'; }}\n\
           }}\n\
           var label = document.querySelector('.nav-page-label');\n\
           if (label) {{ label.textContent = 'Page ' + (ocrlayPage + 1) + ' / ' + count; }}\n\
         }}\n\
         ]]></script>",
        page_count
    );
}

/// Build the embedded metadata purely from the finalized document result.
/// Assets contribute fallback point dimensions for failed pages only, so
/// regenerating from the same result yields byte-identical metadata.
fn build_metadata(result: &DocumentResult, assets: &[PageAsset]) -> OverlayMetadata {
    let pages = result
        .page_results
        .iter()
        .map(|page| match page {
            PageResult::Success(s) => PageMetadata {
                page_index: s.page_index,
                recognized: true,
                confidence: Some(s.average_confidence),
                attempts: s.attempts,
                strategy: Some(s.strategy.clone()),
                error_kind: None,
                error_message: None,
                pixel_width: Some(s.pixel_width),
                pixel_height: Some(s.pixel_height),
                point_width: s.point_width,
                point_height: s.point_height,
                regions: s.regions.clone(),
            },
            PageResult::Failure(f) => {
                let asset = assets.iter().find(|a| a.page_index == f.page_index);
                let (point_width, point_height) = asset
                    .map(|a| (a.point_width, a.point_height))
                    .unwrap_or((FALLBACK_POINT_WIDTH, FALLBACK_POINT_HEIGHT));
                PageMetadata {
                    page_index: f.page_index,
                    recognized: false,
                    confidence: None,
                    attempts: f.attempts,
                    strategy: None,
                    error_kind: Some(f.kind),
                    error_message: Some(f.message.clone()),
                    pixel_width: asset.map(|a| a.pixel_width),
                    pixel_height: asset.map(|a| a.pixel_height),
                    point_width,
                    point_height,
                    regions: Vec::new(),
                }
            }
        })
        .collect();

    OverlayMetadata {
        generator: "ocrlay".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        source: result.source.display().to_string(),
        status: result.status,
        total_pages: result.total_pages,
        failed_pages: result.failed_pages,
        average_confidence: result.average_confidence,
        pages,
    }
}

/// Pull the embedded recognition metadata back out of a synthesized SVG.
pub fn extract_metadata(svg: &str) -> Option<String> {
    let open = "<metadata id=\"ocrlay-metadata\">";
    let start = svg.find(open)? + open.len();
    let end = svg[start..].find("</metadata>")? + start;
    Some(xml_unescape(&svg[start..end]))
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}
