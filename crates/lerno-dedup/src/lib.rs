//! # lerno-dedup
//!
//! Semantic content-deduplication safeguard for the AI course-creation
//! flow: cosine similarity against a tenant's catalog embeddings plus
//! usage-saturation counts for videos and modules. Advisory only — the
//! engine surfaces warnings, it never blocks creation.

pub mod cosine;
pub mod engine;
pub mod thresholds;

pub use cosine::cosine_similarity;
pub use engine::{AnalyzeRequest, SimilarityEngine};
pub use thresholds::{SaturationBand, SimilarityBand, Thresholds};
