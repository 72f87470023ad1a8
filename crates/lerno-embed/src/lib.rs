//! # lerno-embed
//!
//! Embedding provider for the lerno pipeline. A single trait seam,
//! [`EmbeddingBackend`], is consumed both by the `generate_course_embedding`
//! job handler and synchronously by the similarity engine.

pub mod backend;
pub mod mock;

pub use backend::{EmbeddingBackend, HttpBackendConfig, HttpEmbeddingBackend};
pub use mock::{MockEmbeddingBackend, MockEmbeddingGenerator};
