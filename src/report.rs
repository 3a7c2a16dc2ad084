//! Document-level JSON report.
//!
//! The report reads from the same finalized `DocumentResult` as the
//! overlay synthesizer, so the two artifacts can never diverge.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{DocumentResult, DocumentStatus, PageResult};
use crate::recognition::error::ErrorKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    pub source: String,
    pub status: DocumentStatus,
    pub total_pages: usize,
    pub failed_pages: usize,
    /// `null` when no page succeeded.
    pub average_confidence: Option<f64>,
    pub elapsed_seconds: f64,
    pub generated_at: DateTime<Utc>,
    pub pages: Vec<PageReport>,
    /// Failures in page order, with enough detail to diagnose without
    /// re-running.
    pub failures: Vec<FailureReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageReport {
    pub page_index: usize,
    pub recognized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub attempts: u32,
    pub region_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub page_index: usize,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

impl DocumentReport {
    pub fn from_result(result: &DocumentResult) -> Self {
        let pages = result
            .page_results
            .iter()
            .map(|page| match page {
                PageResult::Success(s) => PageReport {
                    page_index: s.page_index,
                    recognized: true,
                    confidence: Some(s.average_confidence),
                    attempts: s.attempts,
                    region_count: s.regions.len(),
                    strategy: Some(s.strategy.clone()),
                },
                PageResult::Failure(f) => PageReport {
                    page_index: f.page_index,
                    recognized: false,
                    confidence: None,
                    attempts: f.attempts,
                    region_count: 0,
                    strategy: None,
                },
            })
            .collect();

        let failures = result
            .failures()
            .map(|f| FailureReport {
                page_index: f.page_index,
                kind: f.kind,
                message: f.message.clone(),
                attempts: f.attempts,
            })
            .collect();

        Self {
            source: result.source.display().to_string(),
            status: result.status,
            total_pages: result.total_pages,
            failed_pages: result.failed_pages,
            average_confidence: result.average_confidence,
            elapsed_seconds: result.elapsed.as_secs_f64(),
            generated_at: Utc::now(),
            pages,
            failures,
        }
    }

    pub async fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        info!("wrote report to {}", path.display());
        Ok(())
    }
}
