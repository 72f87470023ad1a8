//! Mock embedding backend for deterministic testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::backend::EmbeddingBackend;
use lerno_core::{Error, Result};

/// Deterministic embedding generator.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Generate a deterministic embedding from text.
    ///
    /// Uses character-based hashing for reproducibility: the same text
    /// always produces the same unit vector.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % dimension;
            vec[idx] += 0.1;
        }
        Self::normalize(&mut vec);
        vec
    }

    fn normalize(vec: &mut [f32]) {
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vec.iter_mut() {
                *v /= norm;
            }
        }
    }
}

#[derive(Debug, Clone)]
struct MockConfig {
    dimension: usize,
    fixed_vectors: HashMap<String, Vec<f32>>,
    fail_with: Option<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            dimension: 8,
            fixed_vectors: HashMap::new(),
            fail_with: None,
        }
    }
}

/// Mock embedding backend with a call log and optional failure injection.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<String>>>,
}

impl Default for MockEmbeddingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbeddingBackend {
    /// Create a new mock backend with default configuration.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension;
        self
    }

    /// Return a fixed vector for a specific input instead of the hashed one.
    pub fn with_fixed_vector(mut self, input: impl Into<String>, vector: Vec<f32>) -> Self {
        Arc::make_mut(&mut self.config)
            .fixed_vectors
            .insert(input.into(), vector);
        self
    }

    /// Make every call fail with the given message.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).fail_with = Some(message.into());
        self
    }

    /// Inputs passed to `embed`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }

    /// Number of embed calls made.
    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.call_log.lock().unwrap().push(text.to_string());

        if let Some(message) = &self.config.fail_with {
            return Err(Error::Embedding(message.clone()));
        }

        if let Some(vector) = self.config.fixed_vectors.get(text) {
            return Ok(vector.clone());
        }

        Ok(MockEmbeddingGenerator::generate(text, self.config.dimension))
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let backend = MockEmbeddingBackend::new().with_dimension(16);
        let a = backend.embed("rust async pipelines").await.unwrap();
        let b = backend.embed("rust async pipelines").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn test_mock_output_is_unit_length() {
        let backend = MockEmbeddingBackend::new().with_dimension(32);
        let v = backend.embed("normalize me").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_fixed_vector_overrides_hash() {
        let backend = MockEmbeddingBackend::new()
            .with_dimension(3)
            .with_fixed_vector("pinned", vec![1.0, 0.0, 0.0]);
        assert_eq!(backend.embed("pinned").await.unwrap(), vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let backend = MockEmbeddingBackend::new().with_failure("provider unreachable");
        let err = backend.embed("anything").await.unwrap_err();
        assert!(err.to_string().contains("provider unreachable"));
    }

    #[tokio::test]
    async fn test_mock_call_log() {
        let backend = MockEmbeddingBackend::new();
        backend.embed("first").await.unwrap();
        backend.embed("second").await.unwrap();
        assert_eq!(backend.call_count(), 2);
        assert_eq!(backend.calls(), vec!["first", "second"]);
    }
}
