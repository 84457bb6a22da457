use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{entity, QuotaCounter};
use crate::store::{ItemStore, StoreError};

/// Billing plan. Limits apply to every counter independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    pub fn limit(&self) -> Option<i64> {
        match self {
            Tier::Free => Some(10),
            Tier::Pro => Some(100),
            Tier::Enterprise => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }
}

/// The three billable counters. Nothing else in the system is allowed to
/// touch quota state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Conversions,
    ApiCalls,
    Exports,
}

impl Counter {
    pub fn field(&self) -> &'static str {
        match self {
            Counter::Conversions => "conversions_used",
            Counter::ApiCalls => "api_calls_used",
            Counter::Exports => "exports_used",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaSnapshot {
    pub owner_email: String,
    pub tier: Tier,
    pub conversions_used: i64,
    pub api_calls_used: i64,
    pub exports_used: i64,
    pub conversions_limit: Option<i64>,
    pub api_calls_limit: Option<i64>,
    pub exports_limit: Option<i64>,
}

pub struct QuotaLedger {
    store: Arc<dyn ItemStore>,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self { store }
    }

    /// Atomically bump one counter, refusing at the tier limit. The
    /// increment happens at the store so concurrent calls from the same
    /// user each observe a distinct count and a refused call leaves the
    /// counter untouched.
    pub async fn check_and_increment(
        &self,
        user_email: &str,
        tier: Tier,
        counter: Counter,
    ) -> AppResult<i64> {
        let limit = tier.limit();
        match self
            .increment(user_email, counter.field(), limit)
            .await
        {
            Err(StoreError::NotFound) => {
                self.ensure_counter(user_email).await?;
                self.increment(user_email, counter.field(), limit)
                    .await
                    .map_err(|err| Self::map_increment_error(err, counter))
            }
            other => other.map_err(|err| Self::map_increment_error(err, counter)),
        }
        .map(|count| {
            debug!(user_email, counter = counter.field(), count, "quota incremented");
            count
        })
    }

    /// Read-only snapshot of all counters and limits; never mutates.
    pub async fn get_quota(&self, user_email: &str, tier: Tier) -> AppResult<QuotaSnapshot> {
        let counter = match self
            .store
            .read(entity::QUOTA_COUNTER, user_email, user_email)
            .await?
        {
            Some(item) => serde_json::from_value(item.data)?,
            None => QuotaCounter::zeroed(user_email),
        };

        let limit = tier.limit();
        Ok(QuotaSnapshot {
            owner_email: counter.owner_email,
            tier,
            conversions_used: counter.conversions_used,
            api_calls_used: counter.api_calls_used,
            exports_used: counter.exports_used,
            conversions_limit: limit,
            api_calls_limit: limit,
            exports_limit: limit,
        })
    }

    async fn increment(
        &self,
        user_email: &str,
        field: &str,
        limit: Option<i64>,
    ) -> Result<i64, StoreError> {
        self.store
            .increment_bounded(entity::QUOTA_COUNTER, user_email, user_email, field, limit)
            .await
    }

    /// Lazily create the counter row. A concurrent creator winning the
    /// race is fine; the subsequent increment retry goes through the row
    /// either way.
    async fn ensure_counter(&self, user_email: &str) -> AppResult<()> {
        let zeroed = json!(QuotaCounter::zeroed(user_email));
        match self
            .store
            .create(entity::QUOTA_COUNTER, user_email, user_email, zeroed)
            .await
        {
            Ok(_) | Err(StoreError::AlreadyExists) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn map_increment_error(err: StoreError, counter: Counter) -> AppError {
        match err {
            StoreError::LimitReached => AppError::quota_exceeded(counter.field()),
            other => other.into(),
        }
    }
}
