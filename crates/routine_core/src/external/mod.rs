//! The external task-tracking service that mirrors generated tasks.

use crate::config::Config;
use crate::dates::{apply_time_of_day, normalize_to_day};
use crate::error::AppError;
use crate::model::{Routine, RoutineTask};
use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

mod http;
mod local;

pub use http::HttpTaskService;
pub use local::LocalTaskService;

/// Payload for creating one external task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalTaskSpec {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub due_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

#[async_trait]
pub trait ExternalTaskService: Send + Sync {
    /// Creates the task and returns its external id.
    async fn create_task(&self, spec: &ExternalTaskSpec) -> Result<String, AppError>;

    /// Closes the task. `Ok(false)` means the service declined.
    async fn close_task(&self, external_id: &str) -> Result<bool, AppError>;
}

/// Builds the external payload for `task`. Dates are expressed in the
/// local calendar given by `utc_offset_minutes`; a time-of-day preference
/// pins the due moment to that local hour.
pub fn build_task_spec(
    routine: &Routine,
    task: &RoutineTask,
    utc_offset_minutes: i32,
    default_project_id: Option<&str>,
) -> Result<ExternalTaskSpec, AppError> {
    let offset_millis = i64::from(utc_offset_minutes) * 60 * 1000;
    let ready_day = normalize_to_day(task.ready_date + offset_millis);
    let due_day = normalize_to_day(task.due_date + offset_millis);

    let due_datetime = match routine.time_of_day {
        Some(time_of_day) => {
            let anchored = apply_time_of_day(task.due_date, time_of_day, utc_offset_minutes);
            Some(format_rfc3339(anchored)?)
        }
        None => None,
    };

    Ok(ExternalTaskSpec {
        content: routine.name.clone(),
        description: routine.description.clone(),
        deadline_date: (due_day != ready_day).then_some(due_day),
        due_date: ready_day,
        due_datetime,
        priority: Some(routine.priority),
        labels: routine.labels.clone(),
        project_id: routine
            .project_id
            .clone()
            .or_else(|| default_project_id.map(str::to_string)),
    })
}

fn format_rfc3339(ts: i64) -> Result<String, AppError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ts) * 1_000_000)
        .map_err(|err| AppError::invalid_data(err.to_string()))?
        .format(&Rfc3339)
        .map_err(|err| AppError::invalid_data(err.to_string()))
}

/// The configured service, or a local stand-in when none is configured.
pub fn service_from_config(config: &Config) -> Result<Box<dyn ExternalTaskService>, AppError> {
    match config.external.as_ref() {
        Some(external) if !external.api_token.trim().is_empty() => {
            Ok(Box::new(HttpTaskService::new(external)?))
        }
        Some(_) => Err(AppError::invalid_data("external.api_token is required")),
        None => Ok(Box::new(LocalTaskService)),
    }
}
