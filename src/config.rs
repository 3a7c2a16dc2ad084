use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::enhancement::EnhancementStrategy;
use crate::overlay::LayoutMode;
use crate::recognition::error::RecognitionError;
use crate::recognition::RetryPolicy;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llava:7b";
pub const DEFAULT_DPI: u32 = 300;
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 4096;

/// Configuration for one document job. Immutable after `validate`;
/// everything downstream reads from this, no process-wide singletons.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub output_dir: PathBuf,
    pub backend_url: String,
    pub model: String,
    pub dpi: u32,
    pub strategies: Vec<EnhancementStrategy>,
    pub max_workers: usize,
    pub page_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_image_dimension: u32,
    pub layout: LayoutMode,
    /// Also write per-page and combined plain-text files.
    pub save_text: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dpi: DEFAULT_DPI,
            strategies: vec![EnhancementStrategy::Original],
            max_workers: 4,
            page_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            layout: LayoutMode::Sequential,
            save_text: true,
        }
    }
}

impl JobConfig {
    /// Environment-variable defaults, overridable by CLI flags. A value
    /// that is present but malformed is a fatal configuration error, not
    /// a silent fallback to the default.
    pub fn from_env() -> Result<Self, RecognitionError> {
        dotenvy::dotenv().ok();

        let mut config = JobConfig::default();
        if let Ok(url) = env::var("OCRLAY_BACKEND_URL") {
            config.backend_url = url;
        }
        if let Ok(model) = env::var("OCRLAY_MODEL") {
            config.model = model;
        }
        if let Ok(dir) = env::var("OCRLAY_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(dpi) = env_parse("OCRLAY_DPI")? {
            config.dpi = dpi;
        }
        if let Some(workers) = env_parse("OCRLAY_WORKERS")? {
            config.max_workers = workers;
        }
        if let Some(secs) = env_parse("OCRLAY_TIMEOUT_SECONDS")? {
            config.page_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Parse a comma-separated strategy list, failing fast on unknown
    /// names before any recognition call is attempted.
    pub fn parse_strategies(input: &str) -> Result<Vec<EnhancementStrategy>, RecognitionError> {
        let strategies: Vec<EnhancementStrategy> = input
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse())
            .collect::<Result<_, _>>()?;

        if strategies.is_empty() {
            return Err(RecognitionError::Configuration {
                details: "at least one enhancement strategy is required".to_string(),
            });
        }
        Ok(strategies)
    }

    /// Validate the whole job configuration. Called once, before any page
    /// processing begins; all violations are fatal configuration errors.
    pub fn validate(&self) -> Result<(), RecognitionError> {
        if !valid_model_name(&self.model) {
            return Err(RecognitionError::Configuration {
                details: format!(
                    "invalid model name '{}': expected 'name' or 'name:tag'",
                    self.model
                ),
            });
        }
        if self.max_workers == 0 {
            return Err(RecognitionError::Configuration {
                details: "worker count must be at least 1".to_string(),
            });
        }
        if self.page_timeout < Duration::from_secs(1) {
            return Err(RecognitionError::Configuration {
                details: "per-page timeout must be at least 1 second".to_string(),
            });
        }
        if !(72..=600).contains(&self.dpi) {
            return Err(RecognitionError::Configuration {
                details: format!("DPI {} is out of the supported 72-600 range", self.dpi),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(RecognitionError::Configuration {
                details: "retry attempt budget must be at least 1".to_string(),
            });
        }
        if self.strategies.is_empty() {
            return Err(RecognitionError::Configuration {
                details: "at least one enhancement strategy is required".to_string(),
            });
        }
        if self.max_image_dimension < 64 {
            return Err(RecognitionError::Configuration {
                details: "max image dimension must be at least 64 px".to_string(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, RecognitionError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RecognitionError::Configuration {
                details: format!("invalid value '{}' for {}", raw, key),
            }),
        Err(_) => Ok(None),
    }
}

fn valid_model_name(name: &str) -> bool {
    static MODEL_RE: OnceLock<Regex> = OnceLock::new();
    let re = MODEL_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*(:[A-Za-z0-9][A-Za-z0-9._-]*)?$")
            .expect("valid regex")
    });
    re.is_match(name)
}
