//! # lerno-jobs
//!
//! Multi-queue background job pipeline for lerno.
//!
//! This crate provides:
//! - Typed job payloads routed to named queues
//! - Per-queue worker pools with independent concurrency budgets
//! - Durable job history decoupled from the queue transport
//! - Retry with per-queue backoff, and liveness recovery for stalled jobs
//!
//! ## Example
//!
//! ```ignore
//! use lerno_jobs::{EnqueueGateway, Pipeline, PipelineConfig};
//! use lerno_core::{JobPayload, SendWelcomeEmailPayload};
//! use lerno_db::Database;
//!
//! let db = Database::connect("postgres://...").await?;
//!
//! let gateway = EnqueueGateway::new(db.history.clone(), db.transport.clone());
//! gateway
//!     .enqueue(JobPayload::SendWelcomeEmail(SendWelcomeEmailPayload {
//!         email: "ada@example.com".into(),
//!         user_name: "Ada".into(),
//!     }))
//!     .await?;
//!
//! let pipeline = Pipeline::builder(db.transport.clone(), db.history.clone())
//!     .with_handler(my_handler)
//!     .build()?;
//! let handle = pipeline.start();
//!
//! // Graceful shutdown: drain, then interrupt what remains.
//! handle.shutdown(std::time::Duration::from_secs(30)).await?;
//! ```

pub mod gateway;
pub mod handler;
pub mod handlers;
pub mod lifecycle;
pub mod queue;
pub mod testing;
pub mod worker;

// Re-export core types
pub use lerno_core::*;

pub use gateway::{EnqueueGateway, EnqueuedJob};
pub use handler::{JobContext, JobHandler, JobResult, NoOpHandler};
pub use lifecycle::{Pipeline, PipelineBuilder, PipelineConfig, PipelineHandle};
pub use queue::{BackoffStrategy, QueueDefinition, QueueSet};
pub use worker::{QueueWorker, WorkerEvent, WorkerHandle};

pub use handlers::{
    AiMessagesHandler, ConnectedCustomerHandler, CourseEmbeddingHandler, EmailSender,
    HttpEmailSender, HttpPaymentProvider, HttpThumbnailRenderer, PaymentProvider,
    ThumbnailHandler, ThumbnailRenderer, WelcomeEmailHandler,
};
