//! Welcome email handler and the HTTP email delivery port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use lerno_core::{Error, JobPayload, JobType, Result};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Outbound email port. Delivery failures are transient by default; the
/// queue's retry budget decides when to give up.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_welcome(&self, email: &str, user_name: &str) -> Result<()>;
}

/// Sends the post-signup welcome email.
pub struct WelcomeEmailHandler {
    sender: Arc<dyn EmailSender>,
}

impl WelcomeEmailHandler {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl JobHandler for WelcomeEmailHandler {
    fn job_type(&self) -> JobType {
        JobType::SendWelcomeEmail
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload = match ctx.payload() {
            JobPayload::SendWelcomeEmail(payload) => payload.clone(),
            other => {
                return JobResult::Failed(format!(
                    "Payload {} does not match handler {}",
                    other.job_type(),
                    self.job_type()
                ))
            }
        };

        match self.sender.send_welcome(&payload.email, &payload.user_name).await {
            Ok(()) => {
                info!(
                    subsystem = "jobs",
                    job_type = %self.job_type(),
                    attempt = ctx.attempt(),
                    "Welcome email sent"
                );
                JobResult::Success
            }
            Err(e) => JobResult::Retry(format!("Welcome email delivery failed: {e}")),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    to: &'a str,
    template: &'a str,
    user_name: &'a str,
}

/// [`EmailSender`] over a transactional email HTTP API.
pub struct HttpEmailSender {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpEmailSender {
    /// Read `EMAIL_API_URL` and `EMAIL_API_KEY` from the environment.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("EMAIL_API_URL")
            .map_err(|_| Error::Config("EMAIL_API_URL is not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var("EMAIL_API_KEY").ok(),
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send_welcome(&self, email: &str, user_name: &str) -> Result<()> {
        let url = format!("{}/emails", self.base_url);
        let mut request = self.client.post(&url).json(&SendEmailRequest {
            to: email,
            template: "welcome",
            user_name,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Request(format!(
                "email endpoint returned {status}: {body}"
            )));
        }
        debug!(subsystem = "jobs", component = "email", "Email accepted for delivery");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::job_fixture;
    use lerno_core::{SaveAiMessagesPayload, SendWelcomeEmailPayload};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingSender {
        fn new(fail: bool) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send_welcome(&self, email: &str, user_name: &str) -> Result<()> {
            if self.fail {
                return Err(Error::Request("smtp connection refused".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((email.to_string(), user_name.to_string()));
            Ok(())
        }
    }

    fn payload() -> JobPayload {
        JobPayload::SendWelcomeEmail(SendWelcomeEmailPayload {
            email: "ada@example.com".into(),
            user_name: "Ada".into(),
        })
    }

    #[tokio::test]
    async fn test_sends_email_and_succeeds() {
        let sender = Arc::new(RecordingSender::new(false));
        let handler = WelcomeEmailHandler::new(sender.clone());

        let result = handler.execute(JobContext::new(job_fixture(payload()))).await;
        assert!(matches!(result, JobResult::Success));
        assert_eq!(
            sender.sent.lock().unwrap().as_slice(),
            &[("ada@example.com".to_string(), "Ada".to_string())]
        );
    }

    #[tokio::test]
    async fn test_delivery_failure_is_transient() {
        let handler = WelcomeEmailHandler::new(Arc::new(RecordingSender::new(true)));
        let result = handler.execute(JobContext::new(job_fixture(payload()))).await;
        assert!(matches!(result, JobResult::Retry(_)));
    }

    #[tokio::test]
    async fn test_mismatched_payload_is_permanent() {
        let handler = WelcomeEmailHandler::new(Arc::new(RecordingSender::new(false)));
        let wrong = JobPayload::SaveAiMessages(SaveAiMessagesPayload {
            tenant_id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            messages: Vec::new(),
        });
        let result = handler.execute(JobContext::new(job_fixture(wrong))).await;
        assert!(matches!(result, JobResult::Failed(_)));
    }
}
