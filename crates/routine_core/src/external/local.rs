use super::{ExternalTaskService, ExternalTaskSpec};
use crate::error::AppError;
use async_trait::async_trait;
use uuid::Uuid;

/// Used when no external service is configured: ids are minted locally
/// and closing always succeeds.
pub struct LocalTaskService;

#[async_trait]
impl ExternalTaskService for LocalTaskService {
    async fn create_task(&self, spec: &ExternalTaskSpec) -> Result<String, AppError> {
        let id = format!("local-{}", Uuid::new_v4());
        tracing::debug!(external_id = %id, content = %spec.content, "local task created");
        Ok(id)
    }

    async fn close_task(&self, external_id: &str) -> Result<bool, AppError> {
        tracing::debug!(external_id, "local task closed");
        Ok(true)
    }
}
