pub mod aggregate;
pub mod config;
pub mod enhancement;
pub mod models;
pub mod overlay;
pub mod pipeline;
pub mod rasterizer;
pub mod recognition;
pub mod report;

pub use config::JobConfig;
pub use models::{DocumentResult, DocumentStatus, PageResult};
pub use pipeline::{DocumentOutcome, DocumentPipeline};
