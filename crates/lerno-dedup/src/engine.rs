//! The similarity & saturation engine.
//!
//! Invoked synchronously from the AI tool-call that gates course creation.
//! Reads a live snapshot of the tenant's catalog (read-skew is accepted)
//! and writes nothing. Warnings must be trustworthy or absent: any
//! embedding or catalog failure propagates instead of degrading silently.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};
use uuid::Uuid;

use lerno_core::{
    CatalogRepository, ContentSaturation, ContentUsage, Result, SimilarCourse, SimilarityResult,
};
use lerno_embed::EmbeddingBackend;

use crate::cosine::cosine_similarity;
use crate::thresholds::{SaturationBand, SimilarityBand, Thresholds};

/// A proposed piece of content to check against the catalog.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub tenant_id: Uuid,
    pub title: String,
    pub description: String,
    pub video_ids: Vec<Uuid>,
    pub module_ids: Vec<Uuid>,
}

/// Computes [`SimilarityResult`]s for proposed catalog content.
///
/// Stateless between calls: concurrent analyses share nothing mutable.
pub struct SimilarityEngine {
    catalog: Arc<dyn CatalogRepository>,
    backend: Arc<dyn EmbeddingBackend>,
    thresholds: Thresholds,
}

impl SimilarityEngine {
    /// Create an engine with default thresholds.
    pub fn new(catalog: Arc<dyn CatalogRepository>, backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            catalog,
            backend,
            thresholds: Thresholds::default(),
        }
    }

    /// Override the default thresholds.
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Analyze a proposal against the tenant's catalog.
    ///
    /// `can_proceed` is always true — the result is advisory.
    #[instrument(skip(self, request), fields(subsystem = "dedup", op = "analyze", tenant_id = %request.tenant_id))]
    pub async fn analyze(&self, request: &AnalyzeRequest) -> Result<SimilarityResult> {
        let start = Instant::now();
        let mut result = SimilarityResult::empty();

        self.check_course_similarity(request, &mut result).await?;

        // Empty id lists skip saturation entirely; that is not an error.
        if !request.video_ids.is_empty() {
            let usage = self
                .catalog
                .video_usage(request.tenant_id, &request.video_ids)
                .await?;
            result.video_saturation =
                self.check_saturation(usage, "Video", &mut result.warnings, &mut result.suggestions);
        }
        if !request.module_ids.is_empty() {
            let usage = self
                .catalog
                .module_usage(request.tenant_id, &request.module_ids)
                .await?;
            result.module_saturation =
                self.check_saturation(usage, "Module", &mut result.warnings, &mut result.suggestions);
        }

        debug!(
            subsystem = "dedup",
            component = "engine",
            op = "analyze",
            result_count = result.similar_courses.len(),
            warning_count = result.warnings.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Analysis complete"
        );
        Ok(result)
    }

    async fn check_course_similarity(
        &self,
        request: &AnalyzeRequest,
        result: &mut SimilarityResult,
    ) -> Result<()> {
        let text = format!("{}\n\n{}", request.title, request.description);
        let query = self.backend.embed(&text).await?;

        // An empty catalog is a valid state, not a failure.
        let catalog = self.catalog.course_embeddings(request.tenant_id).await?;

        let mut hits: Vec<SimilarCourse> = Vec::new();
        for course in catalog {
            let similarity = cosine_similarity(&query, &course.embedding)?;
            if self.thresholds.similarity_band(similarity) != SimilarityBand::None {
                hits.push(SimilarCourse {
                    id: course.id,
                    title: course.title,
                    similarity,
                    status: course.status,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(self.thresholds.similar_courses_cap);

        let mut any_high = false;
        for hit in &hits {
            let percent = (hit.similarity * 100.0).round() as i32;
            match self.thresholds.similarity_band(hit.similarity) {
                SimilarityBand::High => {
                    any_high = true;
                    result.warnings.push(format!(
                        "A near-duplicate course exists: \"{}\" is {}% similar to the proposal",
                        hit.title, percent
                    ));
                }
                SimilarityBand::Warn => {
                    result.warnings.push(format!(
                        "Related content exists: \"{}\" is {}% similar to the proposal",
                        hit.title, percent
                    ));
                }
                SimilarityBand::None => {}
            }
        }

        if any_high {
            result.suggestions.push(
                "Consider updating the existing course instead of creating a near-duplicate"
                    .to_string(),
            );
        } else if !hits.is_empty() {
            result.suggestions.push(
                "Review the related courses and differentiate the new content before creating it"
                    .to_string(),
            );
        }

        result.similar_courses = hits;
        Ok(())
    }

    fn check_saturation(
        &self,
        usage: Vec<ContentUsage>,
        kind: &str,
        warnings: &mut Vec<String>,
        suggestions: &mut Vec<String>,
    ) -> Vec<ContentSaturation> {
        let mut saturated = Vec::new();
        let mut worst = SaturationBand::None;

        for item in usage {
            let used_in_courses = item.course_names.len() as i64;
            let band = self.thresholds.saturation_band(used_in_courses);
            if band == SaturationBand::None {
                continue;
            }
            worst = worst.max(band);

            warnings.push(format!(
                "{} \"{}\" already appears in {} courses",
                kind, item.title, used_in_courses
            ));
            saturated.push(ContentSaturation {
                id: item.id,
                title: item.title,
                used_in_courses,
                course_names: item.course_names,
            });
        }

        match worst {
            SaturationBand::High => suggestions.push(format!(
                "{} reuse is heavily saturated; upload new content instead of reusing it again",
                kind
            )),
            SaturationBand::Warn => suggestions.push(format!(
                "Some {} overlap exists across courses; check whether the reuse is intentional",
                kind.to_lowercase()
            )),
            SaturationBand::None => {}
        }

        saturated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lerno_core::{CourseEmbedding, Error};
    use lerno_embed::MockEmbeddingBackend;
    use std::collections::HashMap;

    /// In-memory catalog fixture.
    #[derive(Default)]
    struct FakeCatalog {
        courses: Vec<CourseEmbedding>,
        video_usage: HashMap<Uuid, ContentUsage>,
        module_usage: HashMap<Uuid, ContentUsage>,
    }

    #[async_trait]
    impl CatalogRepository for FakeCatalog {
        async fn course_embeddings(&self, _tenant_id: Uuid) -> Result<Vec<CourseEmbedding>> {
            Ok(self.courses.clone())
        }

        async fn video_usage(
            &self,
            _tenant_id: Uuid,
            video_ids: &[Uuid],
        ) -> Result<Vec<ContentUsage>> {
            Ok(video_ids
                .iter()
                .filter_map(|id| self.video_usage.get(id).cloned())
                .collect())
        }

        async fn module_usage(
            &self,
            _tenant_id: Uuid,
            module_ids: &[Uuid],
        ) -> Result<Vec<ContentUsage>> {
            Ok(module_ids
                .iter()
                .filter_map(|id| self.module_usage.get(id).cloned())
                .collect())
        }

        async fn store_course_embedding(
            &self,
            _tenant_id: Uuid,
            _course_id: Uuid,
            _embedding: &[f32],
        ) -> Result<()> {
            Err(Error::Internal("read-only fixture".into()))
        }
    }

    fn request(title: &str) -> AnalyzeRequest {
        AnalyzeRequest {
            tenant_id: Uuid::new_v4(),
            title: title.to_string(),
            description: String::new(),
            video_ids: Vec::new(),
            module_ids: Vec::new(),
        }
    }

    fn engine_with(
        catalog: FakeCatalog,
        backend: MockEmbeddingBackend,
    ) -> SimilarityEngine {
        SimilarityEngine::new(Arc::new(catalog), Arc::new(backend))
    }

    #[tokio::test]
    async fn test_empty_catalog_yields_empty_result() {
        let engine = engine_with(FakeCatalog::default(), MockEmbeddingBackend::new());
        let result = engine.analyze(&request("Intro to React")).await.unwrap();
        assert!(result.similar_courses.is_empty());
        assert!(result.warnings.is_empty());
        assert!(result.can_proceed);
    }

    #[tokio::test]
    async fn test_high_similarity_escalates_to_near_duplicate() {
        // Pin the proposal and an existing course to vectors with cosine 0.93.
        let proposal = vec![1.0, 0.0];
        let angle = 0.93_f32.acos();
        let existing = vec![angle.cos(), angle.sin()];

        let backend = MockEmbeddingBackend::new()
            .with_dimension(2)
            .with_fixed_vector("React Hooks Deep Dive\n\n", proposal);
        let catalog = FakeCatalog {
            courses: vec![CourseEmbedding {
                id: Uuid::new_v4(),
                title: "React Hooks In-Depth".into(),
                status: "published".into(),
                embedding: existing,
            }],
            ..Default::default()
        };

        let engine = engine_with(catalog, backend);
        let result = engine
            .analyze(&request("React Hooks Deep Dive"))
            .await
            .unwrap();

        assert_eq!(result.similar_courses.len(), 1);
        assert!(result.similar_courses[0].similarity > 0.9);
        assert!(result.warnings[0].contains("near-duplicate"));
        assert!(!result.warnings[0].contains("Related content"));
        assert!(result.can_proceed);
    }

    #[tokio::test]
    async fn test_warn_band_uses_weaker_wording() {
        let proposal = vec![1.0, 0.0];
        let angle = 0.78_f32.acos();
        let existing = vec![angle.cos(), angle.sin()];

        let backend = MockEmbeddingBackend::new()
            .with_dimension(2)
            .with_fixed_vector("Vue Basics\n\n", proposal);
        let catalog = FakeCatalog {
            courses: vec![CourseEmbedding {
                id: Uuid::new_v4(),
                title: "Vue Fundamentals".into(),
                status: "draft".into(),
                embedding: existing,
            }],
            ..Default::default()
        };

        let engine = engine_with(catalog, backend);
        let result = engine.analyze(&request("Vue Basics")).await.unwrap();

        assert_eq!(result.similar_courses.len(), 1);
        assert!(result.warnings[0].contains("Related content exists"));
    }

    #[tokio::test]
    async fn test_results_sorted_and_capped_at_five() {
        let proposal = vec![1.0, 0.0];
        let backend = MockEmbeddingBackend::new()
            .with_dimension(2)
            .with_fixed_vector("Crowded Topic\n\n", proposal);

        // Seven courses all above the high threshold, at distinct scores.
        let courses = (0..7)
            .map(|i| {
                let angle = (0.86 + 0.01 * i as f32).acos();
                CourseEmbedding {
                    id: Uuid::new_v4(),
                    title: format!("Course {i}"),
                    status: "published".into(),
                    embedding: vec![angle.cos(), angle.sin()],
                }
            })
            .collect();

        let engine = engine_with(
            FakeCatalog {
                courses,
                ..Default::default()
            },
            backend,
        );
        let result = engine.analyze(&request("Crowded Topic")).await.unwrap();

        assert_eq!(result.similar_courses.len(), 5);
        for pair in result.similar_courses.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[tokio::test]
    async fn test_video_saturation_flagged_above_threshold() {
        let video_id = Uuid::new_v4();
        let mut video_usage = HashMap::new();
        video_usage.insert(
            video_id,
            ContentUsage {
                id: video_id,
                title: "Intro Clip".into(),
                course_names: vec![
                    "Course A".into(),
                    "Course B".into(),
                    "Course C".into(),
                    "Course D".into(),
                ],
            },
        );

        let engine = engine_with(
            FakeCatalog {
                video_usage,
                ..Default::default()
            },
            MockEmbeddingBackend::new(),
        );

        let mut req = request("Intro to React");
        req.video_ids = vec![video_id];
        let result = engine.analyze(&req).await.unwrap();

        assert_eq!(result.video_saturation.len(), 1);
        assert_eq!(result.video_saturation[0].used_in_courses, 4);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("Intro Clip") && w.contains("4 courses")));
        assert!(result.can_proceed);
    }

    #[tokio::test]
    async fn test_unsaturated_video_not_reported() {
        let video_id = Uuid::new_v4();
        let mut video_usage = HashMap::new();
        video_usage.insert(
            video_id,
            ContentUsage {
                id: video_id,
                title: "Rare Clip".into(),
                course_names: vec!["Course A".into()],
            },
        );

        let engine = engine_with(
            FakeCatalog {
                video_usage,
                ..Default::default()
            },
            MockEmbeddingBackend::new(),
        );

        let mut req = request("Anything");
        req.video_ids = vec![video_id];
        let result = engine.analyze(&req).await.unwrap();

        assert!(result.video_saturation.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_empty_id_lists_skip_saturation() {
        let engine = engine_with(FakeCatalog::default(), MockEmbeddingBackend::new());
        let result = engine.analyze(&request("No attachments")).await.unwrap();
        assert!(result.video_saturation.is_empty());
        assert!(result.module_saturation.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let engine = engine_with(
            FakeCatalog::default(),
            MockEmbeddingBackend::new().with_failure("provider unreachable"),
        );
        let err = engine.analyze(&request("Broken")).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn test_result_serializes_to_tool_contract() {
        let video_id = Uuid::new_v4();
        let mut video_usage = HashMap::new();
        video_usage.insert(
            video_id,
            ContentUsage {
                id: video_id,
                title: "Intro Clip".into(),
                course_names: (0..4).map(|i| format!("Course {i}")).collect(),
            },
        );

        let engine = engine_with(
            FakeCatalog {
                video_usage,
                ..Default::default()
            },
            MockEmbeddingBackend::new(),
        );
        let mut req = request("Contract Check");
        req.video_ids = vec![video_id];
        let result = engine.analyze(&req).await.unwrap();

        // The AI harness consumes camelCase field names.
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("similarCourses").is_some());
        assert!(json.get("moduleSaturation").is_some());
        assert_eq!(
            json["videoSaturation"][0]["usedInCourses"],
            serde_json::json!(4)
        );
        assert_eq!(json["canProceed"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_can_proceed_is_always_true_even_when_saturated() {
        let video_id = Uuid::new_v4();
        let mut video_usage = HashMap::new();
        video_usage.insert(
            video_id,
            ContentUsage {
                id: video_id,
                title: "Everywhere Clip".into(),
                course_names: (0..10).map(|i| format!("Course {i}")).collect(),
            },
        );

        let proposal = vec![1.0, 0.0];
        let backend = MockEmbeddingBackend::new()
            .with_dimension(2)
            .with_fixed_vector("Duplicate Everything\n\n", proposal.clone());
        let catalog = FakeCatalog {
            courses: vec![CourseEmbedding {
                id: Uuid::new_v4(),
                title: "Duplicate Everything Original".into(),
                status: "published".into(),
                embedding: proposal,
            }],
            video_usage,
            ..Default::default()
        };

        let engine = engine_with(catalog, backend);
        let mut req = request("Duplicate Everything");
        req.video_ids = vec![video_id];
        let result = engine.analyze(&req).await.unwrap();

        assert!(!result.warnings.is_empty());
        assert!(result.can_proceed);
        // High saturation escalates the remediation wording.
        assert!(result
            .suggestions
            .iter()
            .any(|s| s.contains("upload new content")));
    }
}
