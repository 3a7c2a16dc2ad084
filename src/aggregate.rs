//! Pure aggregation of page results into a document result.

use std::path::Path;
use std::time::Duration;

use crate::models::{DocumentResult, DocumentStatus, PageResult};

/// Merge collected page results into a document-level result.
///
/// Page results may arrive out of order under concurrency; the output is
/// always reordered by page index. The overall average confidence covers
/// successful pages only and is `None` when there are none. Status is
/// derived: `Complete` with zero failures, `Failed` with zero successes,
/// `PartialSuccess` otherwise.
pub fn aggregate(
    source: &Path,
    mut page_results: Vec<PageResult>,
    elapsed: Duration,
) -> DocumentResult {
    page_results.sort_by_key(|p| p.page_index());

    let total_pages = page_results.len();
    let failed_pages = page_results.iter().filter(|p| !p.is_success()).count();
    let successes = total_pages - failed_pages;

    let average_confidence = if successes == 0 {
        None
    } else {
        let sum: f64 = page_results
            .iter()
            .filter_map(|p| p.as_success())
            .map(|s| s.average_confidence)
            .sum();
        Some(sum / successes as f64)
    };

    let status = if total_pages == 0 || successes == 0 {
        DocumentStatus::Failed
    } else if failed_pages == 0 {
        DocumentStatus::Complete
    } else {
        DocumentStatus::PartialSuccess
    };

    DocumentResult {
        source: source.to_path_buf(),
        page_results,
        total_pages,
        failed_pages,
        average_confidence,
        elapsed,
        status,
    }
}
