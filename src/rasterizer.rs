//! PDF-to-raster boundary.
//!
//! The pipeline consumes rasterization as a black box behind [`Rasterizer`].
//! The shipped implementation shells out to poppler-utils: `pdfinfo` for
//! page count and native point dimensions, `pdftoppm` for rendering.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::DynamicImage;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::recognition::error::RecognitionError;

/// One rendered page: the raster plus the page's native point dimensions.
#[derive(Debug)]
pub struct PageRaster {
    pub image: DynamicImage,
    pub point_width: f64,
    pub point_height: f64,
}

#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Number of pages in the PDF.
    async fn page_count(&self, pdf: &Path) -> Result<usize, RecognitionError>;

    /// Render one page (0-based index) at the given DPI.
    async fn render_page(
        &self,
        pdf: &Path,
        page_index: usize,
        dpi: u32,
    ) -> Result<PageRaster, RecognitionError>;
}

/// Rasterizer backed by poppler-utils.
pub struct PopplerRasterizer {
    work_dir: PathBuf,
}

impl PopplerRasterizer {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Probe that poppler-utils is installed. Called once at startup so a
    /// missing dependency surfaces as a configuration error, not as N page
    /// failures.
    pub async fn check_available() -> Result<(), RecognitionError> {
        let probe = Command::new("pdftoppm").arg("-v").output().await;
        match probe {
            Ok(_) => Ok(()),
            Err(e) => Err(RecognitionError::Configuration {
                details: format!(
                    "pdftoppm is not available ({}). Install poppler-utils: \
                     'apt-get install poppler-utils' on Debian/Ubuntu, \
                     'brew install poppler' on macOS.",
                    e
                ),
            }),
        }
    }

    async fn pdfinfo(
        &self,
        pdf: &Path,
        page_range: Option<usize>,
    ) -> Result<String, RecognitionError> {
        let mut cmd = Command::new("pdfinfo");
        if let Some(page) = page_range {
            let p = (page + 1).to_string();
            cmd.arg("-f").arg(&p).arg("-l").arg(&p);
        }
        cmd.arg(pdf);

        let output = cmd.output().await.map_err(|e| RecognitionError::PageRender {
            page_index: page_range.unwrap_or(0),
            details: format!("failed to run pdfinfo: {}", e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognitionError::PageRender {
                page_index: page_range.unwrap_or(0),
                details: format!("pdfinfo failed: {}", stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Rasterizer for PopplerRasterizer {
    async fn page_count(&self, pdf: &Path) -> Result<usize, RecognitionError> {
        let info = self.pdfinfo(pdf, None).await?;
        parse_page_count(&info).ok_or_else(|| RecognitionError::PageRender {
            page_index: 0,
            details: "pdfinfo output did not contain a page count".to_string(),
        })
    }

    async fn render_page(
        &self,
        pdf: &Path,
        page_index: usize,
        dpi: u32,
    ) -> Result<PageRaster, RecognitionError> {
        // Point dimensions can vary per page; ask pdfinfo for this page
        // specifically.
        let info = self.pdfinfo(pdf, Some(page_index)).await?;
        let (point_width, point_height) =
            parse_page_size(&info).ok_or_else(|| RecognitionError::PageRender {
                page_index,
                details: "pdfinfo output did not contain a page size".to_string(),
            })?;

        let page_number = (page_index + 1).to_string();
        let prefix = self.work_dir.join(format!(
            "raster_{}_{}",
            std::process::id(),
            page_index
        ));

        let output = Command::new("pdftoppm")
            .arg("-png")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(&page_number)
            .arg("-l")
            .arg(&page_number)
            .arg("-singlefile")
            .arg(pdf)
            .arg(&prefix)
            .output()
            .await
            .map_err(|e| RecognitionError::PageRender {
                page_index,
                details: format!("failed to run pdftoppm: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognitionError::PageRender {
                page_index,
                details: format!("pdftoppm failed: {}", stderr.trim()),
            });
        }

        let png_path = prefix.with_extension("png");
        let image = image::open(&png_path).map_err(|e| RecognitionError::PageRender {
            page_index,
            details: format!("failed to read rendered page {}: {}", png_path.display(), e),
        })?;

        // The decoded image is the working copy; the temp file is done.
        if let Err(e) = std::fs::remove_file(&png_path) {
            warn!("failed to remove temporary raster {}: {}", png_path.display(), e);
        }

        debug!(
            "rendered page {} at {} DPI: {}x{} px, {}x{} pt",
            page_index,
            dpi,
            image.width(),
            image.height(),
            point_width,
            point_height
        );

        Ok(PageRaster {
            image,
            point_width,
            point_height,
        })
    }
}

fn parse_page_count(pdfinfo_output: &str) -> Option<usize> {
    for line in pdfinfo_output.lines() {
        if let Some(rest) = line.strip_prefix("Pages:") {
            return rest.trim().parse().ok();
        }
    }
    None
}

/// Parse a `Page size:` or `Page N size:` line, e.g.
/// `Page size:      612 x 792 pts (letter)`.
fn parse_page_size(pdfinfo_output: &str) -> Option<(f64, f64)> {
    for line in pdfinfo_output.lines() {
        let Some(colon) = line.find(':') else { continue };
        let (key, value) = line.split_at(colon);
        if !(key.starts_with("Page") && key.trim_end().ends_with("size")) {
            continue;
        }
        let value = &value[1..];
        let mut parts = value.split_whitespace();
        let width: f64 = parts.next()?.parse().ok()?;
        if parts.next()? != "x" {
            continue;
        }
        let height: f64 = parts.next()?.parse().ok()?;
        return Some((width, height));
    }
    None
}
