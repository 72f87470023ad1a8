//! Payment-provider customer mapping repository.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use lerno_core::{BillingRepository, Error, Result};

/// PostgreSQL implementation of [`BillingRepository`].
#[derive(Clone)]
pub struct PgBillingRepository {
    pool: PgPool,
}

impl PgBillingRepository {
    /// Create a new repository over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingRepository for PgBillingRepository {
    async fn find_customer(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<String>> {
        let customer_ref: Option<String> = sqlx::query_scalar(
            "SELECT customer_ref FROM billing_customers WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(customer_ref)
    }

    async fn record_customer(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        customer_ref: &str,
    ) -> Result<bool> {
        // ON CONFLICT DO NOTHING: a concurrent or redelivered attempt for
        // the same tenant+user pair leaves the first mapping in place.
        let result = sqlx::query(
            "INSERT INTO billing_customers (tenant_id, user_id, customer_ref)
             VALUES ($1, $2, $3)
             ON CONFLICT (tenant_id, user_id) DO NOTHING",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(customer_ref)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }
}
