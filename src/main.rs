use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ocrlay::config::JobConfig;
use ocrlay::enhancement::EnhancementStrategy;
use ocrlay::models::DocumentStatus;
use ocrlay::overlay::{LayoutMode, OverlayConfig, OverlaySynthesizer};
use ocrlay::pipeline::{DocumentOutcome, DocumentPipeline};
use ocrlay::rasterizer::PopplerRasterizer;
use ocrlay::recognition::RecognitionClient;
use ocrlay::report::DocumentReport;

/// Turn scanned PDFs into searchable SVG overlays with a JSON report,
/// using a vision model served over HTTP for text recognition.
#[derive(Parser, Debug)]
#[command(name = "ocrlay", version, about)]
struct Cli {
    /// PDF files to process.
    #[arg(required = true)]
    pdfs: Vec<PathBuf>,

    /// Directory for overlays, reports, and page rasters.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Recognition backend base URL.
    #[arg(long)]
    backend_url: Option<String>,

    /// Vision model name, e.g. 'llava:7b'.
    #[arg(short, long)]
    model: Option<String>,

    /// Rasterization resolution in dots per inch.
    #[arg(long)]
    dpi: Option<u32>,

    /// Maximum pages processed concurrently.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Comma-separated enhancement strategies tried per page
    /// (original, grayscale, adaptive_threshold, contrast_stretch,
    /// sharpen, denoise, binarization, deskew).
    #[arg(short, long)]
    enhance: Option<String>,

    /// Per-request recognition timeout in seconds.
    #[arg(long)]
    timeout_seconds: Option<u64>,

    /// Total recognition attempts per page image, including the first.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Overlay page layout: sequential or tiled.
    #[arg(long)]
    layout: Option<String>,

    /// Draw visible bounding boxes around recognized regions.
    #[arg(long)]
    show_boxes: bool,

    /// Embed previous/next page controls in multi-page overlays.
    #[arg(long)]
    navigation: bool,

    /// Skip writing plain-text sidecar files.
    #[arg(long)]
    no_text: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {}", e);
            return ExitCode::from(2);
        }
    };
    if let Err(e) = config.validate() {
        error!("configuration error: {}", e);
        return ExitCode::from(2);
    }
    if let Err(e) = PopplerRasterizer::check_available().await {
        error!("configuration error: {}", e);
        return ExitCode::from(2);
    }

    let mut any_failed = false;
    for pdf in &cli.pdfs {
        match run_document(&config, pdf, cli.show_boxes, cli.navigation).await {
            Ok(outcome) => {
                if outcome.result.status == DocumentStatus::Failed {
                    any_failed = true;
                }
            }
            Err(e) => {
                let config_error = e
                    .downcast_ref::<ocrlay::recognition::error::RecognitionError>()
                    .map_or(false, |r| r.is_configuration_error());
                if config_error {
                    error!("{}: configuration error: {}", pdf.display(), e);
                    return ExitCode::from(2);
                }
                error!("{}: {}", pdf.display(), e);
                any_failed = true;
            }
        }
    }

    if any_failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<JobConfig> {
    let mut config = JobConfig::from_env()?;

    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(url) = &cli.backend_url {
        config.backend_url = url.clone();
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(dpi) = cli.dpi {
        config.dpi = dpi;
    }
    if let Some(workers) = cli.workers {
        config.max_workers = workers;
    }
    if let Some(enhance) = &cli.enhance {
        config.strategies = JobConfig::parse_strategies(enhance)?;
    }
    if let Some(secs) = cli.timeout_seconds {
        config.page_timeout = std::time::Duration::from_secs(secs);
    }
    if let Some(attempts) = cli.max_attempts {
        config.retry.max_attempts = attempts;
    }
    if let Some(layout) = &cli.layout {
        config.layout = layout.parse::<LayoutMode>()?;
    }
    config.save_text = !cli.no_text;

    Ok(config)
}

async fn run_document(
    config: &JobConfig,
    pdf: &PathBuf,
    show_boxes: bool,
    navigation: bool,
) -> anyhow::Result<DocumentOutcome> {
    tokio::fs::create_dir_all(&config.output_dir).await?;

    let rasterizer = Arc::new(PopplerRasterizer::new(config.output_dir.clone()));
    let client = RecognitionClient::new(
        config.backend_url.clone(),
        config.model.clone(),
        config.page_timeout,
        config.retry.clone(),
        config.max_image_dimension,
    );
    let pipeline = DocumentPipeline::new(config.clone(), rasterizer, client);

    let outcome = pipeline.process(pdf).await?;
    write_outputs(config, pdf, &outcome, show_boxes, navigation).await?;
    Ok(outcome)
}

async fn write_outputs(
    config: &JobConfig,
    pdf: &PathBuf,
    outcome: &DocumentOutcome,
    show_boxes: bool,
    navigation: bool,
) -> anyhow::Result<()> {
    let stem = pdf
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let doc_dir = config.output_dir.join(&stem);
    tokio::fs::create_dir_all(&doc_dir).await?;

    let overlay_config = OverlayConfig {
        layout: config.layout,
        show_bounding_boxes: show_boxes,
        show_navigation: navigation,
        ..OverlayConfig::default()
    };
    let synthesizer = OverlaySynthesizer::new(overlay_config);
    let overlay = synthesizer.synthesize(&outcome.result, &outcome.assets)?;
    let svg_path = doc_dir.join(format!("{}.svg", stem));
    tokio::fs::write(&svg_path, &overlay.svg).await?;
    info!("wrote overlay to {}", svg_path.display());

    let report = DocumentReport::from_result(&outcome.result);
    report
        .write_to(&doc_dir.join(format!("{}.report.json", stem)))
        .await?;

    if config.save_text {
        write_text_sidecars(&doc_dir, &stem, outcome).await?;
    }
    Ok(())
}

/// Plain-text sidecars: one file per recognized page plus a combined
/// document transcript, pages separated by form feeds.
async fn write_text_sidecars(
    doc_dir: &std::path::Path,
    stem: &str,
    outcome: &DocumentOutcome,
) -> anyhow::Result<()> {
    let text_dir = doc_dir.join("text");
    tokio::fs::create_dir_all(&text_dir).await?;

    let mut combined = Vec::new();
    for page in outcome.result.successes() {
        let text = page.full_text();
        let path = text_dir.join(format!("page_{:03}.txt", page.page_index + 1));
        if let Err(e) = tokio::fs::write(&path, &text).await {
            warn!("could not write {}: {}", path.display(), e);
        }
        combined.push(text);
    }

    if !combined.is_empty() {
        let path = doc_dir.join(format!("{}.txt", stem));
        tokio::fs::write(&path, combined.join("\u{0c}\n")).await?;
        info!("wrote transcript to {}", path.display());
    }
    Ok(())
}
