//! Task status transitions.
//!
//! `Pending` is the only non-terminal status. Every status change in the
//! crate goes through [`transition`], so a terminal task is never touched
//! again.

use crate::dates::MILLIS_PER_DAY;
use crate::error::AppError;
use crate::model::{RoutineTask, TaskStatus};
use crate::storage::RoutineStore;
use std::collections::BTreeSet;

pub fn transition(task: &mut RoutineTask, next: TaskStatus, now: i64) -> Result<(), AppError> {
    if !task.status.can_transition_to(next) {
        return Err(AppError::invalid_input(format!(
            "task {} cannot move from {} to {}",
            task.id, task.status, next
        )));
    }
    task.status = next;
    task.updated_at = now;
    if next == TaskStatus::Completed {
        task.completed_date = Some(now);
    }
    Ok(())
}

/// Loads `task_id`, applies the transition and persists it.
pub fn mark_task(
    store: &dyn RoutineStore,
    task_id: &str,
    next: TaskStatus,
    now: i64,
) -> Result<RoutineTask, AppError> {
    let mut task = store.get_task(task_id)?;
    transition(&mut task, next, now)?;
    store.update_task(&task)?;
    tracing::debug!(task_id, status = %next, "task transitioned");
    Ok(task)
}

/// Pending and overdue by more than the grace period.
pub fn is_missed(task: &RoutineTask, now: i64, grace_days: i64) -> bool {
    task.status == TaskStatus::Pending
        && task.due_date < now
        && now - task.due_date > grace_days * MILLIS_PER_DAY
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MissedSweep {
    pub missed: Vec<RoutineTask>,
    /// External ids to close; tasks that were never linked have none.
    pub external_ids: Vec<String>,
    pub routine_ids: BTreeSet<String>,
    pub errors: Vec<String>,
}

/// Flips every pending task that is past its grace period to `Missed`.
pub fn mark_overdue_missed(
    store: &dyn RoutineStore,
    now: i64,
    grace_days: i64,
) -> Result<MissedSweep, AppError> {
    let mut sweep = MissedSweep::default();

    for mut task in store.tasks_with_status(TaskStatus::Pending)? {
        if !is_missed(&task, now, grace_days) {
            continue;
        }
        transition(&mut task, TaskStatus::Missed, now)?;
        if let Err(err) = store.update_task(&task) {
            tracing::warn!(task_id = %task.id, error = %err, "failed to mark task missed");
            sweep.errors.push(format!("task {}: {}", task.id, err));
            continue;
        }
        if task.is_linked() {
            sweep.external_ids.push(task.external_task_id.clone());
        }
        sweep.routine_ids.insert(task.routine_id.clone());
        sweep.missed.push(task);
    }

    Ok(sweep)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeferSweep {
    pub deferred: Vec<RoutineTask>,
    pub errors: Vec<String>,
}

/// Cancels the pending tasks of every deferred routine. Terminal tasks
/// keep their status.
pub fn defer_pending_tasks(store: &dyn RoutineStore, now: i64) -> Result<DeferSweep, AppError> {
    let mut sweep = DeferSweep::default();

    for routine in store.deferred_routines()? {
        let pending = store
            .tasks_for_routine(&routine.id)?
            .into_iter()
            .filter(|task| task.status == TaskStatus::Pending);
        for mut task in pending {
            transition(&mut task, TaskStatus::Deferred, now)?;
            match store.update_task(&task) {
                Ok(()) => sweep.deferred.push(task),
                Err(err) => {
                    tracing::warn!(task_id = %task.id, error = %err, "failed to defer task");
                    sweep.errors.push(format!("task {}: {}", task.id, err));
                }
            }
        }
    }

    Ok(sweep)
}

/// Skips every pending task of one routine. Used by soft delete.
pub fn skip_pending_tasks(
    store: &dyn RoutineStore,
    routine_id: &str,
    now: i64,
) -> Result<Vec<RoutineTask>, AppError> {
    let mut skipped = Vec::new();
    for mut task in store.tasks_for_routine(routine_id)? {
        if task.status != TaskStatus::Pending {
            continue;
        }
        transition(&mut task, TaskStatus::Skipped, now)?;
        store.update_task(&task)?;
        skipped.push(task);
    }
    Ok(skipped)
}
