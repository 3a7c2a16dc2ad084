use std::path::PathBuf;
use std::time::Duration;

use image::{DynamicImage, Rgb, RgbImage};
use tempfile::TempDir;

use ocrlay::models::{
    BoundingBox, DocumentResult, DocumentStatus, PageAsset, PageFailure, PageResult, PageSuccess,
    TextRegion,
};
use ocrlay::overlay::{extract_metadata, LayoutMode, OverlayConfig, OverlayMetadata,
    OverlaySynthesizer};
use ocrlay::recognition::error::ErrorKind;

fn region(text: &str, bbox: BoundingBox, confidence: f64) -> TextRegion {
    TextRegion {
        text: text.to_string(),
        bbox,
        confidence,
        page_index: 0,
    }
}

fn success_page(page_index: usize, regions: Vec<TextRegion>) -> PageResult {
    let average = if regions.is_empty() {
        0.0
    } else {
        regions.iter().map(|r| r.confidence).sum::<f64>() / regions.len() as f64
    };
    PageResult::Success(PageSuccess {
        page_index,
        regions,
        average_confidence: average,
        attempts: 1,
        strategy: "original".to_string(),
        pixel_width: 1700,
        pixel_height: 2200,
        point_width: 612.0,
        point_height: 792.0,
    })
}

fn failed_page(page_index: usize) -> PageResult {
    PageResult::Failure(PageFailure {
        page_index,
        kind: ErrorKind::Timeout,
        message: "recognition timed out after 30 seconds (attempt 3)".to_string(),
        attempts: 3,
    })
}

fn sample_result(page_results: Vec<PageResult>) -> DocumentResult {
    let total_pages = page_results.len();
    let failed_pages = page_results.iter().filter(|p| !p.is_success()).count();
    let confidences: Vec<f64> = page_results
        .iter()
        .filter_map(|p| p.as_success())
        .map(|s| s.average_confidence)
        .collect();
    let average_confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    };
    let status = if confidences.is_empty() {
        DocumentStatus::Failed
    } else if failed_pages == 0 {
        DocumentStatus::Complete
    } else {
        DocumentStatus::PartialSuccess
    };
    DocumentResult {
        source: PathBuf::from("scan.pdf"),
        page_results,
        total_pages,
        failed_pages,
        average_confidence,
        elapsed: Duration::from_secs(4),
        status,
    }
}

fn write_asset(dir: &TempDir, page_index: usize) -> PageAsset {
    let path = dir.path().join(format!("page_{:03}.png", page_index + 1));
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([200, 200, 200])));
    image.save(&path).unwrap();
    PageAsset {
        page_index,
        path,
        pixel_width: 1700,
        pixel_height: 2200,
        point_width: 612.0,
        point_height: 792.0,
    }
}

#[test]
fn svg_page_count_matches_document_including_failures() {
    let dir = TempDir::new().unwrap();
    let result = sample_result(vec![
        success_page(0, vec![region("hello", BoundingBox::new(100.0, 100.0, 400.0, 50.0), 0.9)]),
        failed_page(1),
        success_page(2, vec![]),
    ]);
    let assets = vec![write_asset(&dir, 0), write_asset(&dir, 2)];

    let overlay = OverlaySynthesizer::new(OverlayConfig::default())
        .synthesize(&result, &assets)
        .unwrap();

    assert_eq!(overlay.svg.matches("<g id=\"page-").count(), 3);
    // The failed page has no raster, so it gets a marked placeholder.
    assert!(overlay.svg.contains("data-recognition-failed=\"timeout\""));
    assert!(overlay.svg.contains("recognition failed"));
    // Pages with rasters embed them as data URLs.
    assert_eq!(overlay.svg.matches("data:image/png;base64,").count(), 2);
}

#[test]
fn embedded_metadata_round_trips_and_matches_result() {
    let dir = TempDir::new().unwrap();
    let result = sample_result(vec![
        success_page(0, vec![region("Invoice & <total>", BoundingBox::new(50.0, 60.0, 300.0, 40.0), 0.92)]),
        failed_page(1),
    ]);
    let assets = vec![write_asset(&dir, 0)];

    let overlay = OverlaySynthesizer::new(OverlayConfig::default())
        .synthesize(&result, &assets)
        .unwrap();

    let extracted = extract_metadata(&overlay.svg).unwrap();
    assert_eq!(extracted, overlay.metadata_json);

    let metadata: OverlayMetadata = serde_json::from_str(&extracted).unwrap();
    assert_eq!(metadata.generator, "ocrlay");
    assert_eq!(metadata.status, DocumentStatus::PartialSuccess);
    assert_eq!(metadata.total_pages, 2);
    assert_eq!(metadata.failed_pages, 1);
    assert_eq!(metadata.pages.len(), 2);
    assert_eq!(metadata.pages[0].regions[0].text, "Invoice & <total>");
    assert_eq!(metadata.pages[1].error_kind, Some(ErrorKind::Timeout));
    assert_eq!(metadata.pages[1].attempts, 3);
}

#[test]
fn regenerating_from_same_result_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let result = sample_result(vec![
        success_page(0, vec![region("stable", BoundingBox::new(10.0, 10.0, 100.0, 20.0), 0.8)]),
        failed_page(1),
    ]);
    let assets = vec![write_asset(&dir, 0)];

    let synth = OverlaySynthesizer::new(OverlayConfig::default());
    let first = synth.synthesize(&result, &assets).unwrap();
    let second = synth.synthesize(&result, &assets).unwrap();

    assert_eq!(first.metadata_json, second.metadata_json);
    assert_eq!(first.svg, second.svg);
}

#[test]
fn layout_mode_changes_geometry_but_not_metadata() {
    let dir = TempDir::new().unwrap();
    let result = sample_result(vec![
        success_page(0, vec![]),
        success_page(1, vec![]),
        success_page(2, vec![]),
    ]);
    let assets: Vec<PageAsset> = (0..3).map(|i| write_asset(&dir, i)).collect();

    let sequential = OverlaySynthesizer::new(OverlayConfig::default())
        .synthesize(&result, &assets)
        .unwrap();
    let tiled = OverlaySynthesizer::new(OverlayConfig {
        layout: LayoutMode::Tiled,
        ..OverlayConfig::default()
    })
    .synthesize(&result, &assets)
    .unwrap();

    assert_eq!(sequential.metadata_json, tiled.metadata_json);
    assert_ne!(sequential.svg, tiled.svg);
    assert_eq!(tiled.svg.matches("<g id=\"page-").count(), 3);
}

#[test]
fn region_text_is_escaped_and_carries_confidence() {
    let dir = TempDir::new().unwrap();
    let result = sample_result(vec![success_page(
        0,
        vec![region("a < b & \"c\"", BoundingBox::new(100.0, 200.0, 500.0, 30.0), 0.77)],
    )]);
    let assets = vec![write_asset(&dir, 0)];

    let overlay = OverlaySynthesizer::new(OverlayConfig::default())
        .synthesize(&result, &assets)
        .unwrap();

    assert!(overlay.svg.contains("a &lt; b &amp; &quot;c&quot;"));
    assert!(overlay.svg.contains("data-confidence=\"0.770\""));
    // Raw markup from recognized text must never leak into the SVG.
    assert!(!overlay.svg.contains("a < b"));
}

#[test]
fn whole_page_text_is_emitted_without_box_geometry() {
    let dir = TempDir::new().unwrap();
    let whole = TextRegion::whole_page("flat transcript of the page".to_string(), 0.6, 0);
    let result = sample_result(vec![success_page(0, vec![whole])]);
    let assets = vec![write_asset(&dir, 0)];

    let overlay = OverlaySynthesizer::new(OverlayConfig::default())
        .synthesize(&result, &assets)
        .unwrap();

    assert!(overlay.svg.contains("flat transcript of the page"));
    assert!(!overlay.svg.contains("textLength"));
}

#[test]
fn missing_raster_file_falls_back_to_placeholder() {
    let result = sample_result(vec![success_page(
        0,
        vec![region("text", BoundingBox::new(10.0, 10.0, 50.0, 12.0), 0.9)],
    )]);
    let asset = PageAsset {
        page_index: 0,
        path: PathBuf::from("/nonexistent/page_001.png"),
        pixel_width: 1700,
        pixel_height: 2200,
        point_width: 612.0,
        point_height: 792.0,
    };

    let overlay = OverlaySynthesizer::new(OverlayConfig::default())
        .synthesize(&result, &[asset])
        .unwrap();

    // No embedded image, but the page and its text layer are still there.
    assert!(!overlay.svg.contains("data:image/png;base64,"));
    assert_eq!(overlay.svg.matches("<g id=\"page-").count(), 1);
    assert!(overlay.svg.contains(">text</text>"));
}

#[test]
fn navigation_controls_rendered_only_when_enabled_and_multi_page() {
    let dir = TempDir::new().unwrap();
    let result = sample_result(vec![success_page(0, vec![]), success_page(1, vec![])]);
    let assets: Vec<PageAsset> = (0..2).map(|i| write_asset(&dir, i)).collect();

    let plain = OverlaySynthesizer::new(OverlayConfig::default())
        .synthesize(&result, &assets)
        .unwrap();
    assert!(!plain.svg.contains("nav-controls"));

    let with_nav = OverlaySynthesizer::new(OverlayConfig {
        show_navigation: true,
        ..OverlayConfig::default()
    })
    .synthesize(&result, &assets)
    .unwrap();
    assert!(with_nav.svg.contains("class=\"nav-controls\""));
    assert!(with_nav.svg.contains("data-page-count=\"2\""));
    assert!(with_nav.svg.contains("Previous"));
    assert!(with_nav.svg.contains("Next"));

    // Presentation-only: the embedded metadata is untouched.
    assert_eq!(plain.metadata_json, with_nav.metadata_json);

    // A single-page document gets no controls even when asked.
    let single = sample_result(vec![success_page(0, vec![])]);
    let single_assets = vec![write_asset(&dir, 0)];
    let single_overlay = OverlaySynthesizer::new(OverlayConfig {
        show_navigation: true,
        ..OverlayConfig::default()
    })
    .synthesize(&single, &single_assets)
    .unwrap();
    assert!(!single_overlay.svg.contains("nav-controls"));
}

#[test]
fn bounding_boxes_rendered_only_when_enabled() {
    let dir = TempDir::new().unwrap();
    let result = sample_result(vec![success_page(
        0,
        vec![region("boxed", BoundingBox::new(100.0, 100.0, 200.0, 40.0), 0.9)],
    )]);
    let assets = vec![write_asset(&dir, 0)];

    let plain = OverlaySynthesizer::new(OverlayConfig::default())
        .synthesize(&result, &assets)
        .unwrap();
    assert!(!plain.svg.contains("class=\"region-box\""));

    let debug = OverlaySynthesizer::new(OverlayConfig {
        show_bounding_boxes: true,
        ..OverlayConfig::default()
    })
    .synthesize(&result, &assets)
    .unwrap();
    assert!(debug.svg.contains("class=\"region-box\""));
}
