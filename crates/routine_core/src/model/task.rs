use serde::{Deserialize, Serialize};
use std::fmt;

/// External id carried by a task until the external system has created it.
pub const PLACEHOLDER_EXTERNAL_ID: &str = "pending";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineTask {
    pub id: String,
    pub routine_id: String,
    pub external_task_id: String,
    pub ready_date: i64,
    pub due_date: i64,
    pub status: TaskStatus,
    #[serde(default)]
    pub completed_date: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RoutineTask {
    pub fn is_linked(&self) -> bool {
        self.external_task_id != PLACEHOLDER_EXTERNAL_ID
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Missed,
    Skipped,
    Deferred,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Deferred instances were cancelled, not failed, and stay out of the
    /// completion-rate denominator.
    pub fn counts_toward_rate(self) -> bool {
        matches!(self, Self::Completed | Self::Missed | Self::Skipped)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        self == Self::Pending && next.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Missed => "missed",
            Self::Skipped => "skipped",
            Self::Deferred => "deferred",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::error::AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "missed" => Ok(Self::Missed),
            "skipped" => Ok(Self::Skipped),
            "deferred" => Ok(Self::Deferred),
            _ => Err(crate::error::AppError::invalid_input(format!(
                "unknown status '{raw}'"
            ))),
        }
    }
}
