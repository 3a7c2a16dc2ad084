use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while talking to the recognition backend or while getting
/// a page in front of it. Per-page errors never abort sibling pages; only
/// `Configuration` and job-start `ModelUnavailable` are fatal.
#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("invalid configuration: {details}")]
    Configuration { details: String },

    #[error("model '{model}' is not available on the backend. Available models: {}", available.join(", "))]
    ModelUnavailable {
        model: String,
        available: Vec<String>,
    },

    #[error("recognition timed out after {seconds} seconds (attempt {attempt})")]
    Timeout { seconds: u64, attempt: u32 },

    #[error("transport error talking to recognition backend: {details}")]
    Transport { details: String },

    #[error("backend response present but unparseable: {details}")]
    MalformedResponse { details: String },

    #[error("failed to render page {page_index}: {details}")]
    PageRender { page_index: usize, details: String },

    #[error("image encoding failed: {details}")]
    ImageEncoding { details: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RecognitionError {
    /// Whether another attempt against the backend can help. HTTP 5xx,
    /// connection resets and timeouts are transient; 4xx and parse
    /// failures are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RecognitionError::Timeout { .. } | RecognitionError::Transport { .. }
        )
    }

    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            RecognitionError::Configuration { .. } | RecognitionError::ModelUnavailable { .. }
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RecognitionError::Configuration { .. } => "OCR_BAD_CONFIG",
            RecognitionError::ModelUnavailable { .. } => "OCR_MODEL_UNAVAILABLE",
            RecognitionError::Timeout { .. } => "OCR_TIMEOUT",
            RecognitionError::Transport { .. } => "OCR_TRANSPORT_ERROR",
            RecognitionError::MalformedResponse { .. } => "OCR_MALFORMED_RESPONSE",
            RecognitionError::PageRender { .. } => "OCR_PAGE_RENDER_ERROR",
            RecognitionError::ImageEncoding { .. } => "OCR_IMAGE_ENCODING",
            RecognitionError::Io(_) => "OCR_IO_ERROR",
        }
    }

    /// Stable kind carried into page failures and the JSON report.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecognitionError::Configuration { .. } => ErrorKind::Configuration,
            RecognitionError::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            RecognitionError::Timeout { .. } => ErrorKind::Timeout,
            RecognitionError::Transport { .. } => ErrorKind::TransportError,
            RecognitionError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            RecognitionError::PageRender { .. } => ErrorKind::PageRenderError,
            RecognitionError::ImageEncoding { .. } => ErrorKind::MalformedResponse,
            RecognitionError::Io(_) => ErrorKind::TransportError,
        }
    }
}

/// Machine-readable error kind, serialized into page failures, the embedded
/// overlay metadata and the JSON report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    ModelUnavailable,
    Timeout,
    TransportError,
    MalformedResponse,
    PageRenderError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::PageRenderError => "page_render_error",
        };
        write!(f, "{}", s)
    }
}
