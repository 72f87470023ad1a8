//! Concrete handlers, one per job type.
//!
//! External effects (SMTP, payment provider, media rendering) sit behind
//! ports so handlers stay testable; database effects go through the
//! repository traits in `lerno-core`.

mod ai_messages;
mod connected_customer;
mod course_embedding;
mod thumbnail;
mod welcome_email;

pub use ai_messages::AiMessagesHandler;
pub use connected_customer::{ConnectedCustomerHandler, HttpPaymentProvider, PaymentProvider};
pub use course_embedding::CourseEmbeddingHandler;
pub use thumbnail::{HttpThumbnailRenderer, ThumbnailHandler, ThumbnailRenderer};
pub use welcome_email::{EmailSender, HttpEmailSender, WelcomeEmailHandler};
