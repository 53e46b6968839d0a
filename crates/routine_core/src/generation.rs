//! Turns a routine into dated task instances.
//!
//! High-frequency routines keep a rolling buffer of instances. Sparse
//! routines only ever stage the next one, plus the one after it when the
//! next is imminent.

use crate::dates::{
    MILLIS_PER_DAY, adjust_to_ideal_day, calculate_due_date, calculate_next_ready_date,
    get_business_days_ahead, get_twice_a_week_dates, normalize_to_day, should_generate_task,
    was_recently_undeferred,
};
use crate::error::AppError;
use crate::model::{Frequency, PLACEHOLDER_EXTERNAL_ID, Routine, RoutineTask, TaskStatus};
use crate::storage::RoutineStore;
use std::collections::HashSet;
use uuid::Uuid;

const DAILY_BUSINESS_DAYS: usize = 5;
const TWICE_A_WEEK_PAIRS: usize = 2;
const SECOND_INSTANCE_WITHIN_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPlan {
    pub ready_date: i64,
    pub due_date: i64,
}

pub fn new_task_id() -> String {
    format!("task-{}", Uuid::new_v4())
}

pub fn existing_day_keys(tasks: &[RoutineTask]) -> HashSet<String> {
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Pending)
        .map(|task| normalize_to_day(task.ready_date))
        .collect()
}

fn gate_and_plan(
    routine: &Routine,
    keys: &mut HashSet<String>,
    plans: &mut Vec<TaskPlan>,
    ready_date: i64,
    now: i64,
) {
    if !should_generate_task(routine, keys, ready_date, now) {
        return;
    }
    keys.insert(normalize_to_day(ready_date));
    plans.push(TaskPlan {
        ready_date,
        due_date: calculate_due_date(ready_date, routine.time_of_day, routine.frequency),
    });
}

fn align(routine: &Routine, date: i64) -> i64 {
    match routine.ideal_day {
        Some(day) => adjust_to_ideal_day(date, day, routine.frequency),
        None => date,
    }
}

/// New instances for `routine` given its existing tasks, earliest first.
/// Only pending tasks block a day.
pub fn plan_tasks(routine: &Routine, existing: &[RoutineTask], now: i64) -> Vec<TaskPlan> {
    let mut keys = existing_day_keys(existing);
    let mut plans = Vec::new();

    match routine.frequency {
        Frequency::Daily => {
            for date in get_business_days_ahead(now, DAILY_BUSINESS_DAYS) {
                gate_and_plan(routine, &mut keys, &mut plans, date, now);
            }
        }
        Frequency::TwiceAWeek => {
            for date in get_twice_a_week_dates(now, TWICE_A_WEEK_PAIRS) {
                gate_and_plan(routine, &mut keys, &mut plans, date, now);
            }
        }
        Frequency::Weekly
        | Frequency::BiWeekly
        | Frequency::Monthly
        | Frequency::BiMonthly
        | Frequency::Quarterly
        | Frequency::SemiAnnually
        | Frequency::Annually => {
            let recently_undeferred = was_recently_undeferred(routine, now);
            // A period that lapsed long ago restarts today.
            let next = calculate_next_ready_date(
                routine,
                routine.last_completed_date,
                recently_undeferred,
                now,
            )
            .max(now);
            let first = align(routine, next);
            gate_and_plan(routine, &mut keys, &mut plans, first, now);

            if first - now <= SECOND_INSTANCE_WITHIN_DAYS * MILLIS_PER_DAY {
                let second = align(
                    routine,
                    calculate_next_ready_date(routine, Some(first), false, now),
                );
                gate_and_plan(routine, &mut keys, &mut plans, second, now);
            }
        }
    }

    plans.sort_by_key(|plan| plan.ready_date);
    plans
}

/// Plans and persists new pending tasks for `routine`, each carrying the
/// placeholder external id until the orchestrator links it.
pub fn generate_tasks(
    store: &dyn RoutineStore,
    routine: &Routine,
    now: i64,
) -> Result<Vec<RoutineTask>, AppError> {
    let existing = store.tasks_for_routine(&routine.id)?;
    let plans = plan_tasks(routine, &existing, now);

    let mut created = Vec::with_capacity(plans.len());
    for plan in plans {
        let task = RoutineTask {
            id: new_task_id(),
            routine_id: routine.id.clone(),
            external_task_id: PLACEHOLDER_EXTERNAL_ID.to_string(),
            ready_date: plan.ready_date,
            due_date: plan.due_date,
            status: TaskStatus::Pending,
            completed_date: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_task(&task)?;
        created.push(task);
    }

    tracing::info!(
        routine_id = %routine.id,
        frequency = %routine.frequency,
        created = created.len(),
        "generated routine tasks"
    );
    Ok(created)
}
