//! Rolling completion statistics.

use crate::dates::add_days;
use crate::error::AppError;
use crate::model::{Routine, RoutineTask, TaskStatus};
use crate::storage::RoutineStore;

pub const MONTH_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRates {
    /// `None` when no task counts toward the rate.
    pub overall: Option<u8>,
    pub month: Option<u8>,
}

fn percent(completed: usize, total: usize) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let rounded = (completed * 100 + total / 2) / total;
    Some(rounded.min(100) as u8)
}

fn ratio<'a, I>(tasks: I) -> Option<u8>
where
    I: Iterator<Item = &'a RoutineTask>,
{
    let (completed, total) = tasks
        .filter(|task| task.status.counts_toward_rate())
        .fold((0, 0), |(completed, total), task| {
            let done = usize::from(task.status == TaskStatus::Completed);
            (completed + done, total + 1)
        });
    percent(completed, total)
}

pub fn compute_completion_rates(tasks: &[RoutineTask], now: i64) -> CompletionRates {
    let window_start = add_days(now, -MONTH_WINDOW_DAYS);
    CompletionRates {
        overall: ratio(tasks.iter()),
        month: ratio(
            tasks
                .iter()
                .filter(|task| task.ready_date >= window_start && task.ready_date <= now),
        ),
    }
}

/// Applies `rates` to `routine`; a missing rate keeps the stored value.
pub fn apply_rates(routine: &mut Routine, rates: CompletionRates) {
    if let Some(overall) = rates.overall {
        routine.completion_rate_overall = overall;
    }
    if let Some(month) = rates.month {
        routine.completion_rate_month = month;
    }
}

pub fn recompute_completion_rates(
    store: &dyn RoutineStore,
    routine_id: &str,
    now: i64,
) -> Result<Routine, AppError> {
    let mut routine = store.get_routine(routine_id)?;
    let tasks = store.tasks_for_routine(routine_id)?;
    let rates = compute_completion_rates(&tasks, now);
    apply_rates(&mut routine, rates);
    routine.updated_at = now;
    store.update_routine(&routine)?;
    tracing::debug!(
        routine_id,
        overall = routine.completion_rate_overall,
        month = routine.completion_rate_month,
        "completion rates recomputed"
    );
    Ok(routine)
}
