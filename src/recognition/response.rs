//! Backend wire types and response normalization.
//!
//! Vision models are inconsistent: some return the structured JSON we ask
//! for, some wrap it in prose, some ignore the instructions entirely and
//! return flat text. Everything funnels through [`RawRecognition`] so call
//! sites only ever see a uniform `TextRegion` list.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::models::{BoundingBox, TextRegion};

/// Request body for the backend's generate endpoint.
#[derive(Debug, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub images: Vec<String>,
    pub stream: bool,
}

/// Response body from the backend's generate endpoint.
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

/// Response body from the backend's model listing endpoint.
#[derive(Debug, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
pub struct ModelTag {
    pub name: String,
}

/// Structured block as the prompt asks the model to emit it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBlock {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default = "default_block_confidence")]
    pub confidence: f64,
}

fn default_block_confidence() -> f64 {
    0.95
}

#[derive(Debug, Clone, Deserialize)]
struct StructuredPayload {
    #[serde(default)]
    text: String,
    #[serde(default)]
    blocks: Vec<RawBlock>,
}

/// What the backend actually gave us, before normalization.
#[derive(Debug, Clone)]
pub enum RawRecognition {
    Structured { text: String, blocks: Vec<RawBlock> },
    FlatText(String),
}

/// Interpret the model's reply. Tries strict JSON first, then a JSON blob
/// embedded in surrounding prose, then falls back to flat text.
pub fn parse_backend_payload(payload: &str) -> RawRecognition {
    let trimmed = payload.trim();

    if let Ok(parsed) = serde_json::from_str::<StructuredPayload>(trimmed) {
        if !parsed.blocks.is_empty() || !parsed.text.is_empty() {
            return RawRecognition::Structured {
                text: parsed.text,
                blocks: parsed.blocks,
            };
        }
    }

    if let Some(blob) = extract_json(trimmed) {
        match serde_json::from_str::<StructuredPayload>(&blob) {
            Ok(parsed) if !parsed.blocks.is_empty() || !parsed.text.is_empty() => {
                debug!("extracted structured payload from chatty model output");
                return RawRecognition::Structured {
                    text: parsed.text,
                    blocks: parsed.blocks,
                };
            }
            Ok(_) => {}
            Err(e) => {
                warn!("embedded JSON blob did not parse as a recognition payload: {}", e);
            }
        }
    }

    RawRecognition::FlatText(trimmed.to_string())
}

/// Pull the outermost `{...}` blob out of free-form text.
pub fn extract_json(text: &str) -> Option<String> {
    static OBJECT_RE: OnceLock<Regex> = OnceLock::new();
    let re = OBJECT_RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));
    re.find(text).map(|m| m.as_str().to_string())
}

/// Confidence heuristic for flat text with no layout information.
///
/// Empty output scores 0.0; refusal or error phrasing scores 0.2; very
/// short output scores 0.4; anything else starts at 0.6 with a bonus for a
/// healthy alphanumeric ratio, capped at 0.7. The cap keeps synthesized
/// whole-page regions below typical structured-block confidences.
pub fn flat_text_confidence(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let lowered = trimmed.to_lowercase();
    const REFUSAL_PHRASES: &[&str] = &[
        "i cannot",
        "i can't",
        "i'm unable",
        "i am unable",
        "no text",
        "unable to",
    ];
    // "sorry" only counts as an opener; page text may legitimately
    // contain the word.
    if lowered.starts_with("sorry") || REFUSAL_PHRASES.iter().any(|p| lowered.contains(p)) {
        return 0.2;
    }

    if trimmed.chars().count() < 8 {
        return 0.4;
    }

    let total = trimmed.chars().filter(|c| !c.is_whitespace()).count();
    let alnum = trimmed.chars().filter(|c| c.is_alphanumeric()).count();
    let ratio = if total == 0 { 0.0 } else { alnum as f64 / total as f64 };

    if ratio >= 0.5 {
        0.7
    } else {
        0.6
    }
}

/// Resolve a raw recognition into the uniform region list for one page.
///
/// Structured blocks are clamped into the page's pixel bounds and ordered
/// by descending confidence. Flat text synthesizes a single whole-page
/// region instead of failing.
pub fn normalize(
    raw: RawRecognition,
    page_index: usize,
    pixel_width: u32,
    pixel_height: u32,
) -> Vec<TextRegion> {
    let page_w = pixel_width as f64;
    let page_h = pixel_height as f64;

    let mut regions = match raw {
        RawRecognition::Structured { text, blocks } => {
            if blocks.is_empty() {
                vec![TextRegion::whole_page(
                    text.trim().to_string(),
                    flat_text_confidence(&text),
                    page_index,
                )]
            } else {
                blocks
                    .into_iter()
                    .filter(|b| !b.text.trim().is_empty())
                    .map(|b| {
                        let bbox = BoundingBox::new(b.x, b.y, b.width.max(0.0), b.height.max(0.0))
                            .clamp_to(page_w, page_h);
                        TextRegion {
                            text: b.text,
                            bbox,
                            confidence: b.confidence.clamp(0.0, 1.0),
                            page_index,
                        }
                    })
                    .collect()
            }
        }
        RawRecognition::FlatText(text) => {
            let confidence = flat_text_confidence(&text);
            vec![TextRegion::whole_page(text.trim().to_string(), confidence, page_index)]
        }
    };

    // Descending confidence; stable so equal-confidence blocks keep the
    // backend's reading order.
    regions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    regions
}

/// Mean region confidence, 0.0 for an empty list.
pub fn average_confidence(regions: &[TextRegion]) -> f64 {
    if regions.is_empty() {
        return 0.0;
    }
    regions.iter().map(|r| r.confidence).sum::<f64>() / regions.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_structured_payload() {
        let payload = r#"{"text": "Faktura VAT", "blocks": [
            {"text": "Faktura VAT", "x": 100, "y": 50, "width": 300, "height": 40, "confidence": 0.97}
        ]}"#;
        match parse_backend_payload(payload) {
            RawRecognition::Structured { text, blocks } => {
                assert_eq!(text, "Faktura VAT");
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].confidence, 0.97);
            }
            RawRecognition::FlatText(_) => panic!("expected structured payload"),
        }
    }

    #[test]
    fn extracts_json_from_chatty_output() {
        let payload = "Sure! Here is the extracted text:\n{\"text\": \"hello world\", \"blocks\": []}\nLet me know if you need more.";
        match parse_backend_payload(payload) {
            RawRecognition::Structured { text, .. } => assert_eq!(text, "hello world"),
            RawRecognition::FlatText(_) => panic!("expected embedded JSON to be extracted"),
        }
    }

    #[test]
    fn falls_back_to_flat_text() {
        let payload = "INVOICE NO 2024/08/114\nTotal due: 1,230.00 PLN";
        match parse_backend_payload(payload) {
            RawRecognition::FlatText(text) => assert!(text.contains("INVOICE")),
            RawRecognition::Structured { .. } => panic!("expected flat text"),
        }
    }

    #[test]
    fn missing_block_confidence_gets_default() {
        let payload = r#"{"text": "x", "blocks": [{"text": "x", "x": 0, "y": 0, "width": 10, "height": 10}]}"#;
        match parse_backend_payload(payload) {
            RawRecognition::Structured { blocks, .. } => {
                assert_eq!(blocks[0].confidence, 0.95);
            }
            _ => panic!("expected structured payload"),
        }
    }

    #[test]
    fn flat_text_confidence_heuristic() {
        assert_eq!(flat_text_confidence(""), 0.0);
        assert_eq!(flat_text_confidence("   \n  "), 0.0);
        assert_eq!(flat_text_confidence("I cannot read any text in this image."), 0.2);
        assert_eq!(flat_text_confidence("Sorry, the image is too blurry."), 0.2);
        // "sorry" mid-text is ordinary page content, not a refusal.
        assert_eq!(
            flat_text_confidence("We are sorry for the delay in shipping your order."),
            0.7
        );
        assert_eq!(flat_text_confidence("Hi"), 0.4);
        assert_eq!(flat_text_confidence("Quarterly report for fiscal year 2024"), 0.7);
        // Mostly punctuation keeps the base score.
        assert_eq!(flat_text_confidence("-- == ** ++ .. // || ~~ ## !!"), 0.6);
    }

    #[test]
    fn normalize_clamps_out_of_bounds_blocks() {
        let raw = RawRecognition::Structured {
            text: String::new(),
            blocks: vec![RawBlock {
                text: "edge".into(),
                x: -20.0,
                y: 2150.0,
                width: 100.0,
                height: 100.0,
                confidence: 0.9,
            }],
        };
        let regions = normalize(raw, 0, 1700, 2200);
        assert_eq!(regions.len(), 1);
        assert!(regions[0].bbox.within(1700.0, 2200.0));
        assert_eq!(regions[0].bbox.x, 0.0);
        assert_eq!(regions[0].bbox.y + regions[0].bbox.height, 2200.0);
    }

    #[test]
    fn normalize_orders_by_descending_confidence() {
        let block = |text: &str, conf: f64| RawBlock {
            text: text.into(),
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence: conf,
        };
        let raw = RawRecognition::Structured {
            text: String::new(),
            blocks: vec![block("low", 0.3), block("high", 0.99), block("mid", 0.7)],
        };
        let regions = normalize(raw, 0, 100, 100);
        let confs: Vec<f64> = regions.iter().map(|r| r.confidence).collect();
        assert_eq!(confs, vec![0.99, 0.7, 0.3]);
    }

    #[test]
    fn normalize_flat_text_synthesizes_whole_page_region() {
        let raw = RawRecognition::FlatText("A full page of recognized prose.".into());
        let regions = normalize(raw, 4, 1700, 2200);
        assert_eq!(regions.len(), 1);
        assert!(regions[0].is_whole_page());
        assert_eq!(regions[0].page_index, 4);
        assert_eq!(regions[0].confidence, 0.7);
    }

    #[test]
    fn normalize_drops_whitespace_only_blocks() {
        let raw = RawRecognition::Structured {
            text: "kept".into(),
            blocks: vec![RawBlock {
                text: "   ".into(),
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
                confidence: 0.9,
            }],
        };
        let regions = normalize(raw, 0, 100, 100);
        assert!(regions.is_empty());
    }

    #[test]
    fn average_confidence_of_empty_is_zero() {
        assert_eq!(average_confidence(&[]), 0.0);
    }
}
