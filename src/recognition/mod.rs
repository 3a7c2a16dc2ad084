//! Client for the vision recognition backend.
//!
//! The backend is an Ollama-style local model server: `GET /api/tags` lists
//! the models it has loaded, `POST /api/generate` runs one model over a
//! base64-encoded image. The client owns retry/backoff/timeout discipline
//! and normalizes whatever the model replies with into `TextRegion`s.

pub mod error;
pub mod response;

use std::io::Cursor;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::DynamicImage;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::models::TextRegion;
use error::RecognitionError;
use response::{GenerateRequest, GenerateResponse, TagsResponse};

/// Retry behavior for backend calls: exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Base delay before the given 1-based attempt's retry, capped at
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_delay.as_secs_f64() * exp;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Delay with up to 25% uniform jitter added, so concurrent page tasks
    /// don't hammer a recovering backend in lockstep.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        let jitter = rand::thread_rng().gen_range(0.0..0.25);
        Duration::from_secs_f64(base.as_secs_f64() * (1.0 + jitter))
    }
}

/// Successful recognition of one page image.
///
/// `pixel_width`/`pixel_height` are the dimensions of the image actually
/// submitted to the backend (after any downscaling), which is the
/// coordinate space the regions live in.
#[derive(Debug, Clone)]
pub struct RecognizedPage {
    pub regions: Vec<TextRegion>,
    pub average_confidence: f64,
    pub attempts: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

/// Terminal recognition failure, carrying how many attempts were spent.
#[derive(Debug)]
pub struct RecognitionFailure {
    pub error: RecognitionError,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct RecognitionClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
    retry: RetryPolicy,
    max_image_dimension: u32,
}

impl RecognitionClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
        max_image_dimension: u32,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
            retry,
            max_image_dimension,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// List the model names currently loaded on the backend.
    pub async fn list_models(&self) -> Result<Vec<String>, RecognitionError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_send_error(e, self.timeout, 1))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RecognitionError::Transport {
                details: format!("model listing returned HTTP {}", status),
            });
        }

        let tags: TagsResponse = response.json().await.map_err(|e| {
            RecognitionError::MalformedResponse {
                details: format!("model listing was not valid JSON: {}", e),
            }
        })?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Validate that the configured model is loaded. Invoked once per
    /// document job, before any page is rasterized. A tagged request
    /// (`llava:7b`) must match exactly; a bare base name (`llava`) accepts
    /// any tagged variant of it.
    pub async fn ensure_model_available(&self) -> Result<(), RecognitionError> {
        let available = self.list_models().await?;
        let wanted_has_tag = self.model.contains(':');

        let found = available.iter().any(|name| {
            name == &self.model || (!wanted_has_tag && base_model_name(name) == self.model)
        });

        if found {
            info!("model '{}' is available on the backend", self.model);
            Ok(())
        } else {
            Err(RecognitionError::ModelUnavailable {
                model: self.model.clone(),
                available,
            })
        }
    }

    /// Recognize text in one page image, retrying transient failures up to
    /// the configured attempt budget.
    pub async fn recognize(
        &self,
        image: &DynamicImage,
        page_index: usize,
    ) -> Result<RecognizedPage, RecognitionFailure> {
        let (payload, width, height) = match self.encode_image(image) {
            Ok(v) => v,
            Err(error) => return Err(RecognitionFailure { error, attempts: 0 }),
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(
                "page {}: recognition attempt {}/{}",
                page_index, attempt, self.retry.max_attempts
            );

            match self.generate_once(&payload, attempt).await {
                Ok(raw_text) => {
                    let raw = response::parse_backend_payload(&raw_text);
                    let regions = response::normalize(raw, page_index, width, height);
                    let average_confidence = response::average_confidence(&regions);
                    return Ok(RecognizedPage {
                        regions,
                        average_confidence,
                        attempts: attempt,
                        pixel_width: width,
                        pixel_height: height,
                    });
                }
                Err(error) if error.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_with_jitter(attempt);
                    warn!(
                        "page {}: attempt {} failed ({}), retrying in {:.1}s",
                        page_index,
                        attempt,
                        error,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(RecognitionFailure { error, attempts: attempt });
                }
            }
        }
    }

    async fn generate_once(
        &self,
        image_b64: &str,
        attempt: u32,
    ) -> Result<String, RecognitionError> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: recognition_prompt(),
            images: vec![image_b64.to_string()],
            stream: false,
        };

        let response = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_send_error(e, self.timeout, attempt))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RecognitionError::Transport {
                details: format!("backend returned HTTP {}", status),
            });
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RecognitionError::ModelUnavailable {
                model: self.model.clone(),
                available: Vec::new(),
            });
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognitionError::MalformedResponse {
                details: format!("backend rejected request with HTTP {}: {}", status, body),
            });
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            RecognitionError::MalformedResponse {
                details: format!("generate response was not valid JSON: {}", e),
            }
        })?;

        if body.response.trim().is_empty() {
            return Err(RecognitionError::MalformedResponse {
                details: "backend returned an empty response".to_string(),
            });
        }

        Ok(body.response)
    }

    /// Encode the image as base64 PNG, downscaling first when its largest
    /// dimension exceeds the backend limit. Returns the submitted
    /// dimensions so callers know which pixel space the regions are in.
    fn encode_image(
        &self,
        image: &DynamicImage,
    ) -> Result<(String, u32, u32), RecognitionError> {
        let max_dim = self.max_image_dimension;
        let submitted;
        let image = if image.width().max(image.height()) > max_dim {
            info!(
                "downscaling {}x{} image to fit backend limit of {} px",
                image.width(),
                image.height(),
                max_dim
            );
            submitted = image.thumbnail(max_dim, max_dim);
            &submitted
        } else {
            image
        };

        let (width, height) = (image.width(), image.height());
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| RecognitionError::ImageEncoding {
                details: e.to_string(),
            })?;

        Ok((BASE64_STANDARD.encode(&png), width, height))
    }
}

fn classify_send_error(
    error: reqwest::Error,
    timeout: Duration,
    attempt: u32,
) -> RecognitionError {
    if error.is_timeout() {
        RecognitionError::Timeout {
            seconds: timeout.as_secs(),
            attempt,
        }
    } else {
        RecognitionError::Transport {
            details: error.to_string(),
        }
    }
}

fn base_model_name(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}

fn recognition_prompt() -> String {
    concat!(
        "Extract all text from this image with high accuracy. ",
        "Return a JSON object with the following structure: ",
        r#"{"text": "full text", "blocks": [{"text": "text", "x": 0, "y": 0, "#,
        r#""width": 0, "height": 0, "confidence": 0.95}]} "#,
        "where x, y, width, height are pixel bounding-box coordinates ",
        "and confidence is between 0 and 1. ",
        "Return ONLY the JSON object, no other text."
    )
    .to_string()
}
