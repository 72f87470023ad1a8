//! Threshold configuration and band classification.

use lerno_core::defaults;

/// Similarity and saturation thresholds used by the engine.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Cosine similarity at or above which a "related content" warning fires.
    pub similarity_warn: f32,
    /// Cosine similarity at or above which the warning escalates to
    /// "near-duplicate".
    pub similarity_high: f32,
    /// Maximum similar courses reported.
    pub similar_courses_cap: usize,
    /// Distinct-course usage at or above which content is saturated.
    pub saturation_warn: i64,
    /// Distinct-course usage at or above which remediation escalates.
    pub saturation_high: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            similarity_warn: defaults::SIMILARITY_WARN,
            similarity_high: defaults::SIMILARITY_HIGH,
            similar_courses_cap: defaults::SIMILAR_COURSES_CAP,
            saturation_warn: defaults::SATURATION_WARN,
            saturation_high: defaults::SATURATION_HIGH,
        }
    }
}

/// Band a similarity score falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimilarityBand {
    /// Below the warning threshold: not reported.
    None,
    /// Related content exists.
    Warn,
    /// Near-duplicate exists.
    High,
}

/// Band a usage count falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SaturationBand {
    None,
    Warn,
    High,
}

impl Thresholds {
    /// Classify a cosine similarity score.
    pub fn similarity_band(&self, score: f32) -> SimilarityBand {
        if score >= self.similarity_high {
            SimilarityBand::High
        } else if score >= self.similarity_warn {
            SimilarityBand::Warn
        } else {
            SimilarityBand::None
        }
    }

    /// Classify a distinct-course usage count.
    pub fn saturation_band(&self, used_in_courses: i64) -> SaturationBand {
        if used_in_courses >= self.saturation_high {
            SaturationBand::High
        } else if used_in_courses >= self.saturation_warn {
            SaturationBand::Warn
        } else {
            SaturationBand::None
        }
    }
}
