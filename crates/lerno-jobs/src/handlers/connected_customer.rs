//! Payment-provider customer synchronization handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use lerno_core::{BillingRepository, Error, JobPayload, JobType, Result};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Payment provider port. `create_customer` returns the provider-side
/// customer reference.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_customer(&self, email: &str) -> Result<String>;
}

/// Creates the payment-provider customer for a tenant user.
///
/// Checks for an existing mapping before calling the provider, so a
/// redelivered job never creates a duplicate customer.
pub struct ConnectedCustomerHandler {
    billing: Arc<dyn BillingRepository>,
    provider: Arc<dyn PaymentProvider>,
}

impl ConnectedCustomerHandler {
    pub fn new(billing: Arc<dyn BillingRepository>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self { billing, provider }
    }
}

#[async_trait]
impl JobHandler for ConnectedCustomerHandler {
    fn job_type(&self) -> JobType {
        JobType::CreateConnectedCustomer
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload = match ctx.payload() {
            JobPayload::CreateConnectedCustomer(payload) => payload.clone(),
            other => {
                return JobResult::Failed(format!(
                    "Payload {} does not match handler {}",
                    other.job_type(),
                    self.job_type()
                ))
            }
        };

        match self
            .billing
            .find_customer(payload.tenant_id, payload.user_id)
            .await
        {
            Ok(Some(customer_ref)) => {
                debug!(
                    subsystem = "jobs",
                    job_type = %self.job_type(),
                    tenant_id = %payload.tenant_id,
                    customer_ref,
                    "Customer already exists, skipping provider call"
                );
                return JobResult::Success;
            }
            Ok(None) => {}
            Err(e) => return JobResult::Retry(format!("Customer lookup failed: {e}")),
        }

        let customer_ref = match self.provider.create_customer(&payload.email).await {
            Ok(customer_ref) => customer_ref,
            Err(e) => return JobResult::Retry(format!("Provider customer creation failed: {e}")),
        };

        match self
            .billing
            .record_customer(payload.tenant_id, payload.user_id, &customer_ref)
            .await
        {
            Ok(inserted) => {
                info!(
                    subsystem = "jobs",
                    job_type = %self.job_type(),
                    tenant_id = %payload.tenant_id,
                    inserted,
                    "Connected customer synchronized"
                );
                JobResult::Success
            }
            Err(e) => JobResult::Retry(format!("Customer mapping write failed: {e}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateCustomerResponse {
    id: String,
}

/// [`PaymentProvider`] over a Stripe-style HTTP API.
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentProvider {
    /// Read `PAYMENT_API_URL` and `PAYMENT_API_KEY` from the environment.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("PAYMENT_API_URL")
            .map_err(|_| Error::Config("PAYMENT_API_URL is not set".into()))?;
        let api_key = std::env::var("PAYMENT_API_KEY")
            .map_err(|_| Error::Config("PAYMENT_API_KEY is not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn create_customer(&self, email: &str) -> Result<String> {
        let url = format!("{}/v1/customers", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .form(&[("email", email)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Request(format!(
                "payment endpoint returned {status}: {body}"
            )));
        }

        let parsed: CreateCustomerResponse = response.json().await?;
        Ok(parsed.id)
    }
}
