use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{entity, FeedbackRecord};
use crate::store::{Filter, ItemStore};
use crate::tenant::TenantContext;

#[derive(Debug, Clone, Deserialize)]
pub struct NewFeedback {
    pub quality_rating: Option<i32>,
    pub accuracy_rating: Option<i32>,
    pub completeness_rating: Option<i32>,
    pub comments: Option<String>,
}

/// Append-only feedback per export or document. Multiple submissions for
/// the same resource are all retained; nothing here is billable.
pub struct FeedbackStore {
    store: Arc<dyn ItemStore>,
}

impl FeedbackStore {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self { store }
    }

    pub async fn submit_feedback(
        &self,
        ctx: &TenantContext,
        resource_id: &str,
        feedback: NewFeedback,
    ) -> AppResult<FeedbackRecord> {
        validate_rating("quality_rating", feedback.quality_rating)?;
        validate_rating("accuracy_rating", feedback.accuracy_rating)?;
        validate_rating("completeness_rating", feedback.completeness_rating)?;

        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            resource_id: resource_id.to_string(),
            quality_rating: feedback.quality_rating,
            accuracy_rating: feedback.accuracy_rating,
            completeness_rating: feedback.completeness_rating,
            comments: feedback.comments,
            submitted_by: ctx.user_email.clone(),
            submitted_at: Utc::now(),
        };
        self.store
            .create(
                entity::FEEDBACK,
                &record.id.to_string(),
                resource_id,
                json!(record),
            )
            .await?;
        Ok(record)
    }

    pub async fn get_feedback(&self, feedback_id: Uuid) -> AppResult<Option<FeedbackRecord>> {
        let filter = Filter::new().eq("id", feedback_id.to_string());
        let mut matches = self.store.query(entity::FEEDBACK, &filter, None).await?;
        match matches.pop() {
            Some(item) => Ok(Some(serde_json::from_value(item.data)?)),
            None => Ok(None),
        }
    }

    /// All feedback for a resource, submission time ascending.
    pub async fn list_feedback(&self, resource_id: &str) -> AppResult<Vec<FeedbackRecord>> {
        let items = self
            .store
            .query(entity::FEEDBACK, &Filter::new(), Some(resource_id))
            .await?;
        items
            .into_iter()
            .map(|item| serde_json::from_value(item.data).map_err(AppError::from))
            .collect()
    }
}

fn validate_rating(field: &str, value: Option<i32>) -> AppResult<()> {
    match value {
        Some(rating) if !(1..=5).contains(&rating) => Err(AppError::validation(format!(
            "{field} must be between 1 and 5"
        ))),
        _ => Ok(()),
    }
}
