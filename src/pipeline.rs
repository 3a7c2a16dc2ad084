//! Page orchestration for one document job.
//!
//! Pages are processed independently on a bounded worker pool: rasterize,
//! enhance, recognize, record one `PageResult`. A page failure never
//! cancels or blocks sibling pages; the pipeline waits for every page
//! before aggregating. Peak memory stays near concurrency x one page's
//! working set because each page's rasters are dropped as soon as its
//! result is captured.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::aggregate::aggregate;
use crate::config::JobConfig;
use crate::enhancement;
use crate::models::{DocumentResult, PageAsset, PageFailure, PageResult, PageSuccess};
use crate::rasterizer::Rasterizer;
use crate::recognition::error::{ErrorKind, RecognitionError};
use crate::recognition::{RecognitionClient, RecognizedPage};

/// Everything the output writers need: the finalized result plus the
/// persisted page rasters for overlay embedding.
#[derive(Debug)]
pub struct DocumentOutcome {
    pub result: DocumentResult,
    pub assets: Vec<PageAsset>,
}

pub struct DocumentPipeline {
    config: Arc<JobConfig>,
    rasterizer: Arc<dyn Rasterizer>,
    client: Arc<RecognitionClient>,
}

impl DocumentPipeline {
    pub fn new(
        config: JobConfig,
        rasterizer: Arc<dyn Rasterizer>,
        client: RecognitionClient,
    ) -> Self {
        Self {
            config: Arc::new(config),
            rasterizer,
            client: Arc::new(client),
        }
    }

    /// Process one PDF end to end. Configuration problems and model
    /// unavailability surface here, before any page is rasterized; page
    /// processing itself only ever records per-page failures.
    pub async fn process(&self, pdf: &Path) -> Result<DocumentOutcome, RecognitionError> {
        self.config.validate()?;

        // The model list is fetched once per job and treated as read-only
        // for the job's duration.
        self.client.ensure_model_available().await?;

        let total_pages = self.rasterizer.page_count(pdf).await?;
        info!(
            "processing {} ({} pages, {} workers, model {})",
            pdf.display(),
            total_pages,
            self.config.max_workers,
            self.client.model()
        );

        let pages_dir = self.pages_dir(pdf);
        tokio::fs::create_dir_all(&pages_dir).await?;

        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut handles = Vec::with_capacity(total_pages);

        for page_index in 0..total_pages {
            let config = Arc::clone(&self.config);
            let rasterizer = Arc::clone(&self.rasterizer);
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let pdf = pdf.to_path_buf();
            let pages_dir = pages_dir.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            PageResult::Failure(PageFailure {
                                page_index,
                                kind: ErrorKind::TransportError,
                                message: "worker pool shut down".to_string(),
                                attempts: 0,
                            }),
                            None,
                        );
                    }
                };
                process_page(&config, rasterizer.as_ref(), &client, &pdf, page_index, &pages_dir)
                    .await
            }));
        }

        let mut page_results = Vec::with_capacity(total_pages);
        let mut assets = Vec::new();
        for (page_index, joined) in futures::future::join_all(handles)
            .await
            .into_iter()
            .enumerate()
        {
            match joined {
                Ok((result, asset)) => {
                    page_results.push(result);
                    if let Some(asset) = asset {
                        assets.push(asset);
                    }
                }
                Err(e) => {
                    error!("page {} task panicked: {}", page_index, e);
                    page_results.push(PageResult::Failure(PageFailure {
                        page_index,
                        kind: ErrorKind::PageRenderError,
                        message: format!("page task panicked: {}", e),
                        attempts: 0,
                    }));
                }
            }
        }

        assets.sort_by_key(|a| a.page_index);
        let result = aggregate(pdf, page_results, started.elapsed());
        info!(
            "{}: {} ({} of {} pages failed, {:.1}s)",
            pdf.display(),
            result.status,
            result.failed_pages,
            result.total_pages,
            result.elapsed.as_secs_f64()
        );

        Ok(DocumentOutcome { result, assets })
    }

    /// Per-document directory holding the persisted page rasters.
    pub fn pages_dir(&self, pdf: &Path) -> PathBuf {
        let stem = pdf
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        self.config.output_dir.join(stem).join("pages")
    }
}

/// Process a single page: rasterize, persist the raster for overlay
/// embedding, enhance, recognize every variant, keep the best by average
/// confidence.
async fn process_page(
    config: &JobConfig,
    rasterizer: &dyn Rasterizer,
    client: &RecognitionClient,
    pdf: &Path,
    page_index: usize,
    pages_dir: &Path,
) -> (PageResult, Option<PageAsset>) {
    let raster = match rasterizer.render_page(pdf, page_index, config.dpi).await {
        Ok(raster) => raster,
        Err(e) => {
            warn!("page {}: {}", page_index, e);
            return (
                PageResult::Failure(PageFailure {
                    page_index,
                    kind: e.kind(),
                    message: e.to_string(),
                    attempts: 0,
                }),
                None,
            );
        }
    };

    let point_width = raster.point_width;
    let point_height = raster.point_height;
    let png_path = pages_dir.join(format!("page_{:03}.png", page_index + 1));
    let strategies = config.strategies.clone();

    // Saving and enhancement are CPU-bound; keep them off the async
    // workers. The raster is consumed here and freed when the closure
    // returns.
    let blocking = tokio::task::spawn_blocking(move || {
        let image = raster.image;
        let save_result = image.save(&png_path);
        let variants = enhancement::enhance(&image, &strategies);
        let dims = (image.width(), image.height());
        (variants, dims, save_result, png_path)
    })
    .await;

    let (variants, (raster_width, raster_height), save_result, png_path) = match blocking {
        Ok(parts) => parts,
        Err(e) => {
            error!("page {}: enhancement task panicked: {}", page_index, e);
            return (
                PageResult::Failure(PageFailure {
                    page_index,
                    kind: ErrorKind::PageRenderError,
                    message: format!("enhancement task panicked: {}", e),
                    attempts: 0,
                }),
                None,
            );
        }
    };

    let asset = match save_result {
        Ok(()) => Some(PageAsset {
            page_index,
            path: png_path,
            pixel_width: raster_width,
            pixel_height: raster_height,
            point_width,
            point_height,
        }),
        Err(e) => {
            warn!(
                "page {}: could not persist raster ({}), overlay will use a placeholder",
                page_index, e
            );
            None
        }
    };

    let mut best: Option<(RecognizedPage, &'static str)> = None;
    let mut last_failure: Option<(RecognitionError, u32)> = None;

    for variant in &variants {
        match client.recognize(&variant.image, page_index).await {
            Ok(recognized) => {
                let better = best
                    .as_ref()
                    .map_or(true, |(b, _)| recognized.average_confidence > b.average_confidence);
                if better {
                    best = Some((recognized, variant.strategy.as_str()));
                }
            }
            Err(failure) => {
                warn!(
                    "page {}: variant '{}' failed after {} attempts: {}",
                    page_index, variant.strategy, failure.attempts, failure.error
                );
                last_failure = Some((failure.error, failure.attempts));
            }
        }
    }

    match best {
        Some((recognized, strategy)) => {
            info!(
                "page {}: {} regions, confidence {:.2} via '{}' ({} attempts)",
                page_index,
                recognized.regions.len(),
                recognized.average_confidence,
                strategy,
                recognized.attempts
            );
            (
                PageResult::Success(PageSuccess {
                    page_index,
                    regions: recognized.regions,
                    average_confidence: recognized.average_confidence,
                    attempts: recognized.attempts,
                    strategy: strategy.to_string(),
                    pixel_width: recognized.pixel_width,
                    pixel_height: recognized.pixel_height,
                    point_width,
                    point_height,
                }),
                asset,
            )
        }
        None => {
            let (error, attempts) = last_failure.unwrap_or((
                RecognitionError::Configuration {
                    details: "no enhancement strategies configured".to_string(),
                },
                0,
            ));
            (
                PageResult::Failure(PageFailure {
                    page_index,
                    kind: error.kind(),
                    message: error.to_string(),
                    attempts,
                }),
                asset,
            )
        }
    }
}
