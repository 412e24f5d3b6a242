//! Remote vision classifier.
//!
//! Image attachments are classified by a remote generative-vision service
//! consumed over HTTP. The service is reached through the
//! [`VisionClassifier`] trait so the engine can run against a scripted
//! implementation in tests, and so an outage degrades cleanly: any error
//! from this module sends the classifier down its text-only path.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::classify::{Assessment, CategoryMatch, RiskLevel, Severity};
use crate::mailbox::ImageAttachment;
use crate::monitor::config::Category;

/// Substituted for a per-image annotation when the remote annotator fails
/// or is not configured. Deterministic so repeated runs produce identical
/// findings.
pub const FALLBACK_ANNOTATION: &str =
    "flagged content could not be localized; manual review required";

/// Per-request timeout for vision calls.
const VISION_TIMEOUT: Duration = Duration::from_secs(20);

/// Retries after the first attempt for transient failures.
const VISION_RETRIES: u32 = 2;

/// First retry delay; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Errors from the remote vision service.
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    /// The service could not be reached or kept failing transiently.
    #[error("vision classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    /// The service answered with something unusable.
    #[error("vision response invalid: {0}")]
    InvalidResponse(String),
}

/// Remote classification and annotation of image-bearing messages.
#[async_trait]
pub trait VisionClassifier: Send + Sync {
    /// Classifies message text together with its image attachments.
    ///
    /// # Errors
    ///
    /// Returns an error when the service is unreachable or its response
    /// cannot be normalized; callers degrade to text-only classification.
    async fn classify(
        &self,
        text: &str,
        images: &[ImageAttachment],
    ) -> Result<Assessment, VisionError>;

    /// Describes where flagged content sits inside one image.
    ///
    /// # Errors
    ///
    /// Returns an error when the service is unreachable or its response
    /// cannot be normalized; callers substitute a fallback annotation.
    async fn annotate(
        &self,
        image: &ImageAttachment,
        hints: &[Category],
    ) -> Result<String, VisionError>;
}

/// HTTP client for the vision service.
pub struct HttpVisionClassifier {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpVisionClassifier {
    /// Builds the client with the service base URL and optional bearer
    /// token.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> crate::Result<Self> {
        let http = reqwest::Client::builder().timeout(VISION_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, VisionError> {
        let url = format!("{}/{path}", self.endpoint.trim_end_matches('/'));

        let mut attempt = 0;
        loop {
            match self.try_post(&url, body).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < VISION_RETRIES && is_transient(&e) => {
                    let delay = RETRY_BASE_DELAY * 2_u32.pow(attempt);
                    debug!(
                        "vision request to {url} failed (attempt {}), retrying in {delay:?}: {e}",
                        attempt + 1
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, VisionError> {
        let mut request = self.http.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VisionError::ClassifierUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(VisionError::ClassifierUnavailable(format!(
                "server returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(VisionError::InvalidResponse(format!(
                "server returned {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| VisionError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl VisionClassifier for HttpVisionClassifier {
    async fn classify(
        &self,
        text: &str,
        images: &[ImageAttachment],
    ) -> Result<Assessment, VisionError> {
        let payload = json!({
            "text": text,
            "images": images.iter().map(image_payload).collect::<Vec<_>>(),
        });

        let value = self.post_json("classify", &payload).await?;
        let wire: ClassifyResponse = serde_json::from_value(value)
            .map_err(|e| VisionError::InvalidResponse(e.to_string()))?;
        normalize_classify(wire)
    }

    async fn annotate(
        &self,
        image: &ImageAttachment,
        hints: &[Category],
    ) -> Result<String, VisionError> {
        let payload = json!({
            "image": image_payload(image),
            "hints": hints.iter().map(Category::as_str).collect::<Vec<_>>(),
        });

        let value = self.post_json("annotate", &payload).await?;
        let wire: AnnotateResponse = serde_json::from_value(value)
            .map_err(|e| VisionError::InvalidResponse(e.to_string()))?;

        let annotation = wire.annotation.trim();
        if annotation.is_empty() {
            return Err(VisionError::InvalidResponse(
                "empty annotation".to_string(),
            ));
        }
        Ok(annotation.to_string())
    }
}

const fn is_transient(error: &VisionError) -> bool {
    matches!(error, VisionError::ClassifierUnavailable(_))
}

fn image_payload(image: &ImageAttachment) -> serde_json::Value {
    json!({
        "filename": image.filename,
        "content_type": image.content_type,
        "data": BASE64.encode(&image.data),
    })
}

/// Wire shape of a classify response. Every field is optional so
/// responses from lax services still normalize.
#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    verdict: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    matches: Vec<WireMatch>,
}

#[derive(Debug, Deserialize)]
struct WireMatch {
    #[serde(default)]
    category: String,
    #[serde(default)]
    phrase: String,
    #[serde(default)]
    context: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    annotation: String,
}

fn normalize_classify(wire: ClassifyResponse) -> Result<Assessment, VisionError> {
    let risk = match wire.verdict.to_lowercase().as_str() {
        "safe" => RiskLevel::Safe,
        "warning" => RiskLevel::Warning,
        "danger" => RiskLevel::Danger,
        other => {
            return Err(VisionError::InvalidResponse(format!(
                "unknown verdict {other:?}"
            )));
        }
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = wire.score.map_or_else(
        || match risk {
            RiskLevel::Safe => 0,
            RiskLevel::Warning => 55,
            RiskLevel::Danger => 85,
        },
        |s| s.clamp(0.0, 100.0).round() as u8,
    );

    let matches: Vec<CategoryMatch> = wire
        .matches
        .into_iter()
        .filter_map(|m| {
            let category = Category::parse(&m.category)?;
            Some(CategoryMatch {
                category,
                phrase: m.phrase,
                context: m.context,
                severity: Severity::parse(&m.severity),
                confidence: m.confidence.unwrap_or(0.9).clamp(0.0, 1.0),
            })
        })
        .collect();

    let matched_categories = wire
        .categories
        .iter()
        .filter_map(|c| Category::parse(c))
        .collect();

    Ok(Assessment {
        risk,
        score,
        matched_categories,
        explanation: wire.explanation,
        matches,
        annotated_images: Vec::new(),
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn wire(value: serde_json::Value) -> ClassifyResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_normalize_full_response() {
        let assessment = normalize_classify(wire(json!({
            "verdict": "DANGER",
            "score": 87.4,
            "categories": ["threats", "unknown-category"],
            "explanation": "weapon visible",
            "matches": [{
                "category": "threats",
                "phrase": "weapon",
                "context": "a weapon on a desk",
                "severity": "high",
                "confidence": 0.92
            }]
        })))
        .unwrap();

        assert_eq!(assessment.risk, RiskLevel::Danger);
        assert_eq!(assessment.score, 87);
        assert_eq!(assessment.matched_categories, vec![Category::Threats]);
        assert_eq!(assessment.matches.len(), 1);
        assert_eq!(assessment.matches[0].severity, Severity::High);
    }

    #[test]
    fn test_normalize_missing_score_falls_back_to_verdict() {
        let assessment = normalize_classify(wire(json!({ "verdict": "warning" }))).unwrap();
        assert_eq!(assessment.score, 55);
        assert_eq!(assessment.risk, RiskLevel::Warning);
    }

    #[test]
    fn test_normalize_unknown_verdict_is_rejected() {
        let result = normalize_classify(wire(json!({ "verdict": "maybe" })));
        assert!(matches!(result, Err(VisionError::InvalidResponse(_))));
    }

    #[test]
    fn test_normalize_clamps_out_of_range_values() {
        let assessment = normalize_classify(wire(json!({
            "verdict": "danger",
            "score": 250.0,
            "matches": [{ "category": "threats", "confidence": 1.7 }]
        })))
        .unwrap();

        assert_eq!(assessment.score, 100);
        assert!((assessment.matches[0].confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_match_categories_are_skipped() {
        let assessment = normalize_classify(wire(json!({
            "verdict": "warning",
            "matches": [{ "category": "gossip" }, { "category": "harassment" }]
        })))
        .unwrap();

        assert_eq!(assessment.matches.len(), 1);
        assert_eq!(assessment.matches[0].category, Category::Harassment);
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&VisionError::ClassifierUnavailable(
            "timeout".to_string()
        )));
        assert!(!is_transient(&VisionError::InvalidResponse(
            "bad json".to_string()
        )));
    }

    #[test]
    fn test_image_payload_is_base64() {
        let image = ImageAttachment {
            filename: "a.png".to_string(),
            content_type: "image/png".to_string(),
            data: vec![1, 2, 3],
        };
        let payload = image_payload(&image);
        assert_eq!(payload["data"], "AQID");
        assert_eq!(payload["filename"], "a.png");
    }
}
