//! The classification engine.
//!
//! Text is screened against the built-in lexicon per enabled category.
//! Messages carrying image attachments are delegated to the remote vision
//! classifier; when that service is unavailable the engine falls back to
//! the text verdict, boosted when the text itself talks about an
//! attachment it could not inspect.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::Result;
use crate::classify::lexicon::{self, Lexicon};
use crate::classify::model::{Assessment, CategoryMatch, ImageAnnotation, RiskLevel, Severity};
use crate::mailbox::{ImageAttachment, RawMessage};
use crate::monitor::config::{Category, MonitoringConfig, Sensitivity};
use crate::vision::{FALLBACK_ANNOTATION, VisionClassifier};

/// Confidence assigned to a plain keyword hit.
const KEYWORD_CONFIDENCE: f64 = 0.7;

/// Confidence assigned to a regex pattern hit.
const PATTERN_CONFIDENCE: f64 = 0.9;

/// Score boost applied when images could not be inspected but the text
/// refers to them. Capped so the total never exceeds 100.
const IMAGE_BOOST: u8 = 15;

/// Characters of surrounding text captured on each side of a match.
const CONTEXT_RADIUS: usize = 40;

/// Screens messages for policy violations.
pub struct Classifier {
    lexicon: Lexicon,
    vision: Option<Arc<dyn VisionClassifier>>,
}

impl Classifier {
    /// Builds a text-only classifier.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            lexicon: Lexicon::compile()?,
            vision: None,
        })
    }

    /// Builds a classifier that delegates image-bearing messages to the
    /// given vision service.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn with_vision(vision: Arc<dyn VisionClassifier>) -> Result<Self> {
        Ok(Self {
            lexicon: Lexicon::compile()?,
            vision: Some(vision),
        })
    }

    /// Assesses one message against the account's monitoring config.
    ///
    /// Never fails: remote-classifier problems degrade to the text-only
    /// verdict and annotation problems fall back to a fixed note, so a
    /// flaky sidecar service cannot stall the polling loop.
    pub async fn analyze(&self, message: &RawMessage, config: &MonitoringConfig) -> Assessment {
        let corpus = message.text().to_lowercase();

        let mut assessment = if message.images.is_empty() {
            self.text_assessment(&corpus, config)
        } else {
            self.image_assessment(message, &corpus, config).await
        };

        if assessment.risk != RiskLevel::Safe && !message.images.is_empty() {
            assessment.annotated_images = self
                .annotate_all(&message.images, &assessment.matched_categories)
                .await;
        }

        assessment
    }

    /// Lexicon pass over the lowercased subject and body. Categories are
    /// walked in config order and keywords before patterns within each, so
    /// identical input always yields an identical assessment.
    fn text_assessment(&self, corpus: &str, config: &MonitoringConfig) -> Assessment {
        let mut matches: Vec<CategoryMatch> = Vec::new();
        let mut matched_categories: Vec<Category> = Vec::new();

        for &category in &config.categories {
            let Some(entry) = self.lexicon.category(category) else {
                continue;
            };
            let severity = severity_for(category, config.sensitivity);
            let before = matches.len();

            for keyword in entry.keywords {
                if let Some(start) = corpus.find(keyword) {
                    matches.push(CategoryMatch {
                        category,
                        phrase: (*keyword).to_string(),
                        context: context_window(corpus, start, start + keyword.len()),
                        severity,
                        confidence: KEYWORD_CONFIDENCE,
                    });
                }
            }
            for pattern in &entry.patterns {
                if let Some(found) = pattern.find(corpus) {
                    matches.push(CategoryMatch {
                        category,
                        phrase: found.as_str().to_string(),
                        context: context_window(corpus, found.start(), found.end()),
                        severity,
                        confidence: PATTERN_CONFIDENCE,
                    });
                }
            }

            if matches.len() > before {
                matched_categories.push(category);
            }
        }

        if matches.is_empty() {
            return Assessment::safe("no policy violations detected");
        }

        let score = score_matches(&matches);
        let explanation = explain(&matches, &matched_categories);
        Assessment {
            risk: RiskLevel::from_score(score),
            score,
            matched_categories,
            explanation,
            matches,
            annotated_images: Vec::new(),
        }
    }

    /// Remote classification for image-bearing messages. The service sees
    /// the full text alongside the images, so its verdict stands on its
    /// own; any failure degrades to the local text pass.
    async fn image_assessment(
        &self,
        message: &RawMessage,
        corpus: &str,
        config: &MonitoringConfig,
    ) -> Assessment {
        if let Some(vision) = &self.vision {
            let text = message.text();
            match vision.classify(&text, &message.images).await {
                Ok(remote) => return remote,
                Err(e) => {
                    warn!(
                        uid = message.uid,
                        "vision classification failed, degrading to text: {e}"
                    );
                }
            }
        } else {
            debug!(
                uid = message.uid,
                "no vision classifier configured, classifying text only"
            );
        }

        let mut assessment = self.text_assessment(corpus, config);
        if !assessment.matches.is_empty() && lexicon::has_image_hint(corpus) {
            assessment.score = assessment.score.saturating_add(IMAGE_BOOST).min(100);
            assessment.risk = RiskLevel::from_score(assessment.score);
        }
        assessment
    }

    /// Per-image localization notes. One failed image gets the fallback
    /// text; the rest of the batch still goes through.
    async fn annotate_all(
        &self,
        images: &[ImageAttachment],
        hints: &[Category],
    ) -> Vec<ImageAnnotation> {
        let mut annotated = Vec::with_capacity(images.len());
        for image in images {
            let description = match &self.vision {
                Some(vision) => match vision.annotate(image, hints).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(filename = %image.filename, "image annotation failed: {e}");
                        FALLBACK_ANNOTATION.to_string()
                    }
                },
                None => FALLBACK_ANNOTATION.to_string(),
            };
            annotated.push(ImageAnnotation {
                filename: image.filename.clone(),
                description,
            });
        }
        annotated
    }
}

/// Threats and discrimination are always high severity. The sensitivity
/// knob scales the rest.
const fn severity_for(category: Category, sensitivity: Sensitivity) -> Severity {
    match category {
        Category::Threats | Category::Discrimination => Severity::High,
        Category::Harassment | Category::Inappropriate => match sensitivity {
            Sensitivity::Low => Severity::Low,
            Sensitivity::Medium => Severity::Medium,
            Sensitivity::High => Severity::High,
        },
    }
}

/// Base contribution from the worst severity, plus 3 per additional match,
/// clamped to 100.
fn score_matches(matches: &[CategoryMatch]) -> u8 {
    let base: usize = match matches.iter().map(|m| m.severity).max() {
        Some(Severity::High) => 85,
        Some(Severity::Medium) => 55,
        Some(Severity::Low) => 25,
        None => return 0,
    };
    let extra = matches.len().saturating_sub(1) * 3;
    u8::try_from((base + extra).min(100)).unwrap_or(100)
}

fn explain(matches: &[CategoryMatch], matched_categories: &[Category]) -> String {
    let categories = matched_categories
        .iter()
        .map(|c| Category::as_str(c))
        .collect::<Vec<_>>()
        .join(", ");
    let noun = if matches.len() == 1 {
        "phrase"
    } else {
        "phrases"
    };
    format!(
        "{} suspicious {noun} detected across: {categories}",
        matches.len()
    )
}

/// Snips the text around a match, widened to char boundaries and flattened
/// to one line.
fn context_window(corpus: &str, start: usize, end: usize) -> String {
    let mut lo = start.saturating_sub(CONTEXT_RADIUS);
    while !corpus.is_char_boundary(lo) {
        lo -= 1;
    }
    let mut hi = (end + CONTEXT_RADIUS).min(corpus.len());
    while !corpus.is_char_boundary(hi) {
        hi += 1;
    }
    corpus[lo..hi].replace('\n', " ").trim().to_string()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::map_unwrap_or,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::account::AccountId;
    use crate::monitor::config::{ChannelKind, PollFrequency};
    use crate::vision::VisionError;

    struct ScriptedVision {
        assessment: Option<Assessment>,
        annotation: Option<String>,
    }

    #[async_trait]
    impl VisionClassifier for ScriptedVision {
        async fn classify(
            &self,
            _text: &str,
            _images: &[ImageAttachment],
        ) -> std::result::Result<Assessment, VisionError> {
            self.assessment.clone().ok_or_else(|| {
                VisionError::ClassifierUnavailable("scripted outage".to_string())
            })
        }

        async fn annotate(
            &self,
            _image: &ImageAttachment,
            _hints: &[Category],
        ) -> std::result::Result<String, VisionError> {
            self.annotation.clone().ok_or_else(|| {
                VisionError::ClassifierUnavailable("scripted outage".to_string())
            })
        }
    }

    fn message(subject: &str, body: &str) -> RawMessage {
        RawMessage {
            uid: 7,
            message_id: "<m7@example.com>".to_string(),
            subject: subject.to_string(),
            from: "sender@example.com".to_string(),
            to: "owner@example.com".to_string(),
            date: None,
            body: body.to_string(),
            images: Vec::new(),
        }
    }

    fn with_image(mut msg: RawMessage) -> RawMessage {
        msg.images.push(ImageAttachment {
            filename: "photo.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            data: vec![0xFF, 0xD8, 0xFF],
        });
        msg
    }

    fn config(sensitivity: Sensitivity, categories: &[Category]) -> MonitoringConfig {
        MonitoringConfig::new(
            AccountId::new(1),
            sensitivity,
            categories.to_vec(),
            PollFrequency::OneMinute,
            vec![ChannelKind::Dashboard],
        )
    }

    #[tokio::test]
    async fn test_benign_text_is_safe() {
        let classifier = Classifier::new().unwrap();
        let msg = message("Team update", "Let's circle back Monday");

        let assessment = classifier
            .analyze(&msg, &config(Sensitivity::Medium, &Category::ALL))
            .await;

        assert_eq!(assessment.risk, RiskLevel::Safe);
        assert_eq!(assessment.score, 0);
        assert!(assessment.matches.is_empty());
        assert!(!assessment.is_violation());
    }

    #[tokio::test]
    async fn test_direct_threat_is_danger() {
        let classifier = Classifier::new().unwrap();
        let msg = message("Final warning", "I will kill you if you don't listen");

        let assessment = classifier
            .analyze(&msg, &config(Sensitivity::Medium, &Category::ALL))
            .await;

        assert_eq!(assessment.risk, RiskLevel::Danger);
        assert!(assessment.score >= 71);
        assert!(assessment.matched_categories.contains(&Category::Threats));
        assert!(
            assessment
                .matches
                .iter()
                .any(|m| (m.confidence - 0.9).abs() < f64::EPSILON)
        );
        assert_eq!(assessment.max_severity(), Some(Severity::High));
        assert!(assessment.matches[0].context.contains("kill you"));
    }

    #[tokio::test]
    async fn test_identical_input_identical_assessment() {
        let classifier = Classifier::new().unwrap();
        let msg = message("You are so stupid", "Honestly, nobody likes you. Loser.");
        let cfg = config(Sensitivity::Medium, &Category::ALL);

        let first = classifier.analyze(&msg, &cfg).await;
        let second = classifier.analyze(&msg, &cfg).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_disabled_category_is_ignored() {
        let classifier = Classifier::new().unwrap();
        let msg = message("Final warning", "I will kill you if you don't listen");

        let assessment = classifier
            .analyze(&msg, &config(Sensitivity::High, &[Category::Harassment]))
            .await;

        assert_eq!(assessment.risk, RiskLevel::Safe);
        assert!(assessment.matches.is_empty());
    }

    #[tokio::test]
    async fn test_sensitivity_scales_harassment_severity() {
        let classifier = Classifier::new().unwrap();
        let msg = message("Heads up", "you are stupid");

        let low = classifier
            .analyze(&msg, &config(Sensitivity::Low, &[Category::Harassment]))
            .await;
        let medium = classifier
            .analyze(&msg, &config(Sensitivity::Medium, &[Category::Harassment]))
            .await;
        let high = classifier
            .analyze(&msg, &config(Sensitivity::High, &[Category::Harassment]))
            .await;

        assert_eq!(low.risk, RiskLevel::Safe);
        assert_eq!(medium.risk, RiskLevel::Warning);
        assert_eq!(high.risk, RiskLevel::Danger);
        assert!(low.score < medium.score && medium.score < high.score);
    }

    #[tokio::test]
    async fn test_threats_stay_high_at_low_sensitivity() {
        let classifier = Classifier::new().unwrap();
        let msg = message("Last chance", "I will hurt you");

        let assessment = classifier
            .analyze(&msg, &config(Sensitivity::Low, &[Category::Threats]))
            .await;

        assert_eq!(assessment.max_severity(), Some(Severity::High));
        assert_eq!(assessment.risk, RiskLevel::Danger);
    }

    #[tokio::test]
    async fn test_vision_verdict_used_for_image_messages() {
        let remote = Assessment {
            risk: RiskLevel::Danger,
            score: 90,
            matched_categories: vec![Category::Inappropriate],
            explanation: "explicit image content".to_string(),
            matches: vec![CategoryMatch {
                category: Category::Inappropriate,
                phrase: "explicit imagery".to_string(),
                context: "photo.jpg".to_string(),
                severity: Severity::High,
                confidence: 0.93,
            }],
            annotated_images: Vec::new(),
        };
        let vision = ScriptedVision {
            assessment: Some(remote.clone()),
            annotation: Some("upper left corner".to_string()),
        };
        let classifier = Classifier::with_vision(Arc::new(vision)).unwrap();
        let msg = with_image(message("Vacation", "see attached"));

        let assessment = classifier
            .analyze(&msg, &config(Sensitivity::Medium, &Category::ALL))
            .await;

        assert_eq!(assessment.score, 90);
        assert_eq!(assessment.matched_categories, vec![Category::Inappropriate]);
        assert_eq!(assessment.annotated_images.len(), 1);
        assert_eq!(assessment.annotated_images[0].filename, "photo.jpg");
        assert_eq!(
            assessment.annotated_images[0].description,
            "upper left corner"
        );
    }

    #[tokio::test]
    async fn test_vision_outage_degrades_with_boost() {
        let vision = ScriptedVision {
            assessment: None,
            annotation: None,
        };
        let classifier = Classifier::with_vision(Arc::new(vision)).unwrap();
        let msg = with_image(message("Look", "you are stupid, see the attached photo"));
        let cfg = config(Sensitivity::Medium, &[Category::Harassment]);

        let text_only = Classifier::new()
            .unwrap()
            .analyze(&message("Look", "you are stupid, see the attached photo"), &cfg)
            .await;
        let degraded = classifier.analyze(&msg, &cfg).await;

        assert_eq!(degraded.score, text_only.score + 15);
        assert_eq!(
            degraded.annotated_images[0].description,
            FALLBACK_ANNOTATION
        );
    }

    #[tokio::test]
    async fn test_outage_annotates_every_image_with_fallback() {
        let vision = ScriptedVision {
            assessment: None,
            annotation: None,
        };
        let classifier = Classifier::with_vision(Arc::new(vision)).unwrap();
        let mut msg = with_image(message("Look", "you are stupid, see the attached photos"));
        msg.images.push(ImageAttachment {
            filename: "scan.png".to_string(),
            content_type: "image/png".to_string(),
            data: vec![0x89, 0x50],
        });

        let assessment = classifier
            .analyze(&msg, &config(Sensitivity::Medium, &[Category::Harassment]))
            .await;

        assert_ne!(assessment.risk, RiskLevel::Safe);
        assert_eq!(assessment.annotated_images.len(), 2);
        for annotation in &assessment.annotated_images {
            assert_eq!(annotation.description, FALLBACK_ANNOTATION);
        }
    }

    #[tokio::test]
    async fn test_boost_needs_an_image_hint_in_text() {
        let classifier = Classifier::new().unwrap();
        let msg = with_image(message("Heads up", "you are stupid"));
        let cfg = config(Sensitivity::Medium, &[Category::Harassment]);

        let with_images = classifier.analyze(&msg, &cfg).await;
        let without_images = classifier
            .analyze(&message("Heads up", "you are stupid"), &cfg)
            .await;

        assert_eq!(with_images.score, without_images.score);
    }

    #[tokio::test]
    async fn test_safe_message_with_images_gets_no_annotations() {
        let classifier = Classifier::new().unwrap();
        let msg = with_image(message("Team update", "Let's circle back Monday"));

        let assessment = classifier
            .analyze(&msg, &config(Sensitivity::Medium, &Category::ALL))
            .await;

        assert_eq!(assessment.risk, RiskLevel::Safe);
        assert!(assessment.annotated_images.is_empty());
    }

    #[test]
    fn test_score_clamps_at_one_hundred() {
        let matches: Vec<CategoryMatch> = (0..10)
            .map(|i| CategoryMatch {
                category: Category::Threats,
                phrase: format!("phrase {i}"),
                context: String::new(),
                severity: Severity::High,
                confidence: 0.9,
            })
            .collect();

        assert_eq!(score_matches(&matches), 100);
    }

    #[test]
    fn test_context_window_respects_char_boundaries() {
        let corpus = "ééééééééééééééééééééééééééé kill you ééééééééééééééééééééééééééé";
        let start = corpus.find("kill you").unwrap();

        let context = context_window(corpus, start, start + "kill you".len());
        assert!(context.contains("kill you"));
    }
}
