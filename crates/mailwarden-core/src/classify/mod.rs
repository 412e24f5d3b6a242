//! Content classification.
//!
//! [`Classifier`] screens fetched messages against the built-in lexicon
//! and, for image-bearing mail, the remote vision service. Its verdict is
//! an [`Assessment`]: a risk bucket, a 0..=100 score, and the individual
//! matches that produced them.

mod engine;
mod lexicon;
mod model;

pub use engine::Classifier;
pub use model::{Assessment, CategoryMatch, ImageAnnotation, RiskLevel, Severity};
