use crate::error::AppError;
use crate::external::ExternalTaskService;
use crate::lifecycle::{mark_task, skip_pending_tasks};
use crate::model::{NewRoutine, Routine, RoutinePatch, RoutineTask, TaskStatus};
use crate::stats::recompute_completion_rates;
use crate::storage::RoutineStore;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub routine_id: Option<String>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipOutcome {
    pub task: RoutineTask,
    /// False when there was nothing to close or the close failed.
    pub external_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub routine: Routine,
    pub skipped: Vec<RoutineTask>,
    pub external_closed: usize,
    pub external_close_failures: usize,
}

fn required_id(id: &str) -> Result<&str, AppError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input("id is required"));
    }
    Ok(trimmed)
}

fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn clean_labels(labels: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let trimmed = label.trim();
        if !trimmed.is_empty() && !cleaned.iter().any(|existing| existing == trimmed) {
            cleaned.push(trimmed.to_string());
        }
    }
    cleaned
}

fn validate(routine: &Routine) -> Result<(), AppError> {
    if routine.name.trim().is_empty() {
        return Err(AppError::invalid_input("name is required"));
    }
    if !(1..=4).contains(&routine.priority) {
        return Err(AppError::invalid_input("priority must be between 1 and 4"));
    }
    if let Some(day) = routine.ideal_day {
        if day > 6 {
            return Err(AppError::invalid_input("ideal day must be between 0 and 6"));
        }
        if !routine.frequency.supports_ideal_day() {
            return Err(AppError::invalid_input(
                "ideal day requires a weekly or longer frequency",
            ));
        }
    }
    Ok(())
}

pub fn create_routine(
    store: &dyn RoutineStore,
    new: NewRoutine,
    now: i64,
) -> Result<Routine, AppError> {
    let routine = Routine {
        id: format!("routine-{}", Uuid::new_v4()),
        name: new.name.trim().to_string(),
        description: clean_optional(new.description),
        category: clean_optional(new.category),
        frequency: new.frequency,
        duration: new.duration,
        time_of_day: new.time_of_day,
        ideal_day: new.ideal_day,
        project_id: clean_optional(new.project_id),
        labels: clean_labels(new.labels),
        priority: new.priority,
        defer: false,
        deferral_date: None,
        undeferred_date: None,
        last_completed_date: None,
        completion_rate_overall: 100,
        completion_rate_month: 100,
        created_at: now,
        updated_at: now,
    };
    validate(&routine)?;
    store.insert_routine(&routine)?;
    tracing::info!(routine_id = %routine.id, name = %routine.name, "routine created");
    Ok(routine)
}

pub fn update_routine(
    store: &dyn RoutineStore,
    id: &str,
    patch: RoutinePatch,
    now: i64,
) -> Result<Routine, AppError> {
    let id = required_id(id)?;
    if patch.is_empty() {
        return Err(AppError::invalid_input("nothing to update"));
    }

    let mut routine = store.get_routine(id)?;
    if let Some(name) = patch.name {
        routine.name = name.trim().to_string();
    }
    if let Some(description) = patch.description {
        routine.description = clean_optional(description);
    }
    if let Some(category) = patch.category {
        routine.category = clean_optional(category);
    }
    if let Some(frequency) = patch.frequency {
        routine.frequency = frequency;
    }
    if let Some(duration) = patch.duration {
        routine.duration = duration;
    }
    if let Some(time_of_day) = patch.time_of_day {
        routine.time_of_day = time_of_day;
    }
    if let Some(ideal_day) = patch.ideal_day {
        routine.ideal_day = ideal_day;
    }
    if let Some(project_id) = patch.project_id {
        routine.project_id = clean_optional(project_id);
    }
    if let Some(labels) = patch.labels {
        routine.labels = clean_labels(labels);
    }
    if let Some(priority) = patch.priority {
        routine.priority = priority;
    }
    routine.updated_at = now;

    validate(&routine)?;
    store.update_routine(&routine)?;
    Ok(routine)
}

/// Soft delete: the routine is deferred and its pending tasks skipped, so
/// history keeps counting toward completion rates.
pub async fn delete_routine(
    store: &dyn RoutineStore,
    service: &dyn ExternalTaskService,
    id: &str,
    now: i64,
) -> Result<DeleteOutcome, AppError> {
    let id = required_id(id)?;
    let mut routine = store.get_routine(id)?;
    routine.defer = true;
    routine.deferral_date = Some(now);
    routine.undeferred_date = None;
    routine.updated_at = now;
    store.update_routine(&routine)?;

    let skipped = skip_pending_tasks(store, id, now)?;
    let routine = recompute_completion_rates(store, id, now)?;

    let mut outcome = DeleteOutcome {
        routine,
        skipped,
        external_closed: 0,
        external_close_failures: 0,
    };
    for task in outcome.skipped.iter().filter(|task| task.is_linked()) {
        if close_best_effort(service, task).await {
            outcome.external_closed += 1;
        } else {
            outcome.external_close_failures += 1;
        }
    }

    tracing::info!(
        routine_id = id,
        skipped = outcome.skipped.len(),
        "routine deleted"
    );
    Ok(outcome)
}

pub fn defer_routine(store: &dyn RoutineStore, id: &str, now: i64) -> Result<Routine, AppError> {
    let id = required_id(id)?;
    let mut routine = store.get_routine(id)?;
    if routine.defer {
        return Err(AppError::invalid_input("routine is already deferred"));
    }
    routine.defer = true;
    routine.deferral_date = Some(now);
    routine.undeferred_date = None;
    routine.updated_at = now;
    store.update_routine(&routine)?;
    Ok(routine)
}

/// Clears the pause flag. Tasks already deferred stay deferred; the next
/// cycle generates fresh ones.
pub fn undefer_routine(store: &dyn RoutineStore, id: &str, now: i64) -> Result<Routine, AppError> {
    let id = required_id(id)?;
    let mut routine = store.get_routine(id)?;
    if !routine.defer {
        return Err(AppError::invalid_input("routine is not deferred"));
    }
    routine.defer = false;
    routine.deferral_date = None;
    routine.undeferred_date = Some(now);
    routine.updated_at = now;
    store.update_routine(&routine)?;
    Ok(routine)
}

async fn close_best_effort(service: &dyn ExternalTaskService, task: &RoutineTask) -> bool {
    match service.close_task(&task.external_task_id).await {
        Ok(closed) => closed,
        Err(err) => {
            tracing::warn!(
                task_id = %task.id,
                external_id = %task.external_task_id,
                error = %err,
                "failed to close external task"
            );
            false
        }
    }
}

/// Skips one task. The local skip stands even when the external close
/// fails.
pub async fn skip_task(
    store: &dyn RoutineStore,
    service: &dyn ExternalTaskService,
    id: &str,
    now: i64,
) -> Result<SkipOutcome, AppError> {
    let id = required_id(id)?;
    let task = mark_task(store, id, TaskStatus::Skipped, now)?;
    if let Err(err) = recompute_completion_rates(store, &task.routine_id, now) {
        tracing::warn!(routine_id = %task.routine_id, error = %err, "failed to recompute completion rates");
    }

    let external_closed = task.is_linked() && close_best_effort(service, &task).await;
    Ok(SkipOutcome {
        task,
        external_closed,
    })
}

/// Records a completion reported by the external service.
pub fn complete_task(store: &dyn RoutineStore, id: &str, now: i64) -> Result<RoutineTask, AppError> {
    let id = required_id(id)?;
    let task = mark_task(store, id, TaskStatus::Completed, now)?;

    let mut routine = store.get_routine(&task.routine_id)?;
    routine.last_completed_date = Some(now);
    routine.updated_at = now;
    store.update_routine(&routine)?;
    recompute_completion_rates(store, &task.routine_id, now)?;

    Ok(task)
}

/// Completes the pending task linked to `external_id`.
pub fn complete_external_task(
    store: &dyn RoutineStore,
    external_id: &str,
    now: i64,
) -> Result<RoutineTask, AppError> {
    let external_id = required_id(external_id)?;
    let task = store
        .tasks_with_status(TaskStatus::Pending)?
        .into_iter()
        .find(|task| task.external_task_id == external_id)
        .ok_or_else(|| AppError::not_found(format!("no pending task linked to {external_id}")))?;
    complete_task(store, &task.id, now)
}

pub fn get_routine(store: &dyn RoutineStore, id: &str) -> Result<Routine, AppError> {
    store.get_routine(required_id(id)?)
}

pub fn get_task(store: &dyn RoutineStore, id: &str) -> Result<RoutineTask, AppError> {
    store.get_task(required_id(id)?)
}

pub fn list_routines(store: &dyn RoutineStore) -> Result<Vec<Routine>, AppError> {
    let mut routines = store.list_routines()?;
    routines.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(routines)
}

/// Tasks matching `filter`, earliest ready date first.
pub fn list_tasks(
    store: &dyn RoutineStore,
    filter: &TaskFilter,
) -> Result<Vec<RoutineTask>, AppError> {
    let mut tasks = match filter.routine_id.as_deref() {
        Some(routine_id) => {
            store.get_routine(routine_id)?;
            store.tasks_for_routine(routine_id)?
        }
        None => store.list_tasks()?,
    };
    if let Some(status) = filter.status {
        tasks.retain(|task| task.status == status);
    }
    tasks.sort_by_key(|task| task.ready_date);
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::{
        TaskFilter, complete_external_task, complete_task, create_routine, defer_routine,
        delete_routine, list_routines, list_tasks, skip_task, undefer_routine, update_routine,
    };
    use crate::dates::add_days;
    use crate::error::AppError;
    use crate::external::{ExternalTaskService, ExternalTaskSpec, LocalTaskService};
    use crate::model::{
        Frequency, NewRoutine, PLACEHOLDER_EXTERNAL_ID, RoutinePatch, RoutineTask, TaskStatus,
    };
    use crate::storage::{MemoryStore, RoutineStore};
    use async_trait::async_trait;

    const NOW: i64 = 1_704_697_200_000;

    struct FailingService;

    #[async_trait]
    impl ExternalTaskService for FailingService {
        async fn create_task(&self, _spec: &ExternalTaskSpec) -> Result<String, AppError> {
            Err(AppError::external_create_failed("down"))
        }

        async fn close_task(&self, _external_id: &str) -> Result<bool, AppError> {
            Err(AppError::external_close_failed("down"))
        }
    }

    fn add_task(store: &MemoryStore, id: &str, routine_id: &str, status: TaskStatus) {
        store
            .insert_task(&RoutineTask {
                id: id.to_string(),
                routine_id: routine_id.to_string(),
                external_task_id: format!("ext-{id}"),
                ready_date: NOW,
                due_date: NOW,
                status,
                completed_date: None,
                created_at: NOW,
                updated_at: NOW,
            })
            .unwrap();
    }

    #[test]
    fn create_routine_starts_active_with_full_rates() {
        let store = MemoryStore::new();
        let mut new = NewRoutine::new("  Weekly review ", Frequency::Weekly);
        new.labels = vec!["work".into(), " work ".into(), "".into()];
        new.ideal_day = Some(5);

        let routine = create_routine(&store, new, NOW).unwrap();

        assert!(routine.id.starts_with("routine-"));
        assert_eq!(routine.name, "Weekly review");
        assert!(!routine.defer);
        assert_eq!(routine.completion_rate_overall, 100);
        assert_eq!(routine.completion_rate_month, 100);
        assert_eq!(routine.labels, ["work"]);
        assert_eq!(store.list_routines().unwrap().len(), 1);
    }

    #[test]
    fn create_routine_validates_fields() {
        let store = MemoryStore::new();

        let blank = create_routine(&store, NewRoutine::new(" ", Frequency::Daily), NOW);
        assert_eq!(blank.unwrap_err().code(), "invalid_input");

        let mut bad_priority = NewRoutine::new("x", Frequency::Daily);
        bad_priority.priority = 5;
        assert!(create_routine(&store, bad_priority, NOW).is_err());

        let mut daily_ideal = NewRoutine::new("x", Frequency::Daily);
        daily_ideal.ideal_day = Some(2);
        assert!(create_routine(&store, daily_ideal, NOW).is_err());

        let mut bad_day = NewRoutine::new("x", Frequency::Weekly);
        bad_day.ideal_day = Some(7);
        assert!(create_routine(&store, bad_day, NOW).is_err());

        assert!(store.list_routines().unwrap().is_empty());
    }

    #[test]
    fn update_routine_patches_only_given_fields() {
        let store = MemoryStore::new();
        let mut new = NewRoutine::new("run", Frequency::Weekly);
        new.description = Some("5k".into());
        let routine = create_routine(&store, new, NOW).unwrap();

        let patch = RoutinePatch {
            priority: Some(4),
            description: Some(None),
            ..RoutinePatch::default()
        };
        let updated = update_routine(&store, &routine.id, patch, NOW + 1).unwrap();

        assert_eq!(updated.priority, 4);
        assert_eq!(updated.description, None);
        assert_eq!(updated.name, "run");
        assert_eq!(updated.updated_at, NOW + 1);

        let invalid = RoutinePatch {
            frequency: Some(Frequency::Daily),
            ideal_day: Some(Some(1)),
            ..RoutinePatch::default()
        };
        assert!(update_routine(&store, &routine.id, invalid, NOW).is_err());
        assert_eq!(
            update_routine(&store, "routine-x", RoutinePatch { priority: Some(2), ..RoutinePatch::default() }, NOW)
                .unwrap_err()
                .code(),
            "not_found"
        );
        assert_eq!(
            update_routine(&store, &routine.id, RoutinePatch::default(), NOW)
                .unwrap_err()
                .code(),
            "invalid_input"
        );
    }

    #[tokio::test]
    async fn delete_is_defer_plus_skip() {
        let store = MemoryStore::new();
        let routine = create_routine(&store, NewRoutine::new("read", Frequency::Daily), NOW).unwrap();
        add_task(&store, "p1", &routine.id, TaskStatus::Pending);
        add_task(&store, "p2", &routine.id, TaskStatus::Pending);
        add_task(&store, "c1", &routine.id, TaskStatus::Completed);

        let outcome = delete_routine(&store, &LocalTaskService, &routine.id, NOW)
            .await
            .unwrap();

        assert!(outcome.routine.defer);
        assert_eq!(outcome.routine.deferral_date, Some(NOW));
        assert_eq!(outcome.skipped.len(), 2);
        assert_eq!(outcome.external_closed, 2);
        assert_eq!(store.get_task("p1").unwrap().status, TaskStatus::Skipped);
        assert_eq!(store.get_task("c1").unwrap().status, TaskStatus::Completed);
        // one completed out of three rate-counting tasks
        assert_eq!(outcome.routine.completion_rate_overall, 33);
        assert!(store.get_routine(&routine.id).is_ok());
    }

    #[test]
    fn defer_and_undefer_toggle_flag_only() {
        let store = MemoryStore::new();
        let routine = create_routine(&store, NewRoutine::new("read", Frequency::Daily), NOW).unwrap();
        add_task(&store, "d1", &routine.id, TaskStatus::Deferred);

        let deferred = defer_routine(&store, &routine.id, NOW).unwrap();
        assert!(deferred.defer);
        assert_eq!(deferred.deferral_date, Some(NOW));
        assert!(defer_routine(&store, &routine.id, NOW).is_err());

        let resumed = undefer_routine(&store, &routine.id, NOW + 5).unwrap();
        assert!(!resumed.defer);
        assert_eq!(resumed.deferral_date, None);
        assert_eq!(resumed.undeferred_date, Some(NOW + 5));
        assert_eq!(store.get_task("d1").unwrap().status, TaskStatus::Deferred);
        assert!(undefer_routine(&store, &routine.id, NOW).is_err());
    }

    #[tokio::test]
    async fn skip_stands_when_external_close_fails() {
        let store = MemoryStore::new();
        let routine = create_routine(&store, NewRoutine::new("read", Frequency::Daily), NOW).unwrap();
        add_task(&store, "p1", &routine.id, TaskStatus::Pending);

        let outcome = skip_task(&store, &FailingService, "p1", NOW).await.unwrap();

        assert_eq!(outcome.task.status, TaskStatus::Skipped);
        assert!(!outcome.external_closed);
        assert_eq!(store.get_task("p1").unwrap().status, TaskStatus::Skipped);
        assert_eq!(store.get_routine(&routine.id).unwrap().completion_rate_overall, 0);

        let again = skip_task(&store, &FailingService, "p1", NOW).await.unwrap_err();
        assert_eq!(again.code(), "invalid_input");
    }

    #[test]
    fn completion_updates_routine_history() {
        let store = MemoryStore::new();
        let routine = create_routine(&store, NewRoutine::new("read", Frequency::Weekly), NOW).unwrap();
        add_task(&store, "p1", &routine.id, TaskStatus::Pending);
        add_task(&store, "m1", &routine.id, TaskStatus::Missed);

        let done = complete_task(&store, "p1", add_days(NOW, 1)).unwrap();

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.completed_date, Some(add_days(NOW, 1)));
        let updated = store.get_routine(&routine.id).unwrap();
        assert_eq!(updated.last_completed_date, Some(add_days(NOW, 1)));
        assert_eq!(updated.completion_rate_overall, 50);
        assert_eq!(complete_task(&store, "m1", NOW).unwrap_err().code(), "invalid_input");
        assert_eq!(complete_task(&store, " ", NOW).unwrap_err().code(), "invalid_input");
        assert_eq!(complete_task(&store, "zz", NOW).unwrap_err().code(), "not_found");
    }

    #[test]
    fn completion_by_external_id() {
        let store = MemoryStore::new();
        let routine = create_routine(&store, NewRoutine::new("read", Frequency::Weekly), NOW).unwrap();
        add_task(&store, "p1", &routine.id, TaskStatus::Pending);

        let done = complete_external_task(&store, "ext-p1", NOW).unwrap();
        assert_eq!(done.id, "p1");
        assert_eq!(
            complete_external_task(&store, "ext-p1", NOW).unwrap_err().code(),
            "not_found"
        );
    }

    #[test]
    fn list_tasks_filters_and_orders() {
        let store = MemoryStore::new();
        let a = create_routine(&store, NewRoutine::new("b-side", Frequency::Daily), NOW).unwrap();
        let b = create_routine(&store, NewRoutine::new("A-side", Frequency::Daily), NOW).unwrap();
        for (id, routine_id, offset, status) in [
            ("t3", &a.id, 3, TaskStatus::Pending),
            ("t1", &a.id, 1, TaskStatus::Pending),
            ("t2", &a.id, 2, TaskStatus::Skipped),
            ("t4", &b.id, 0, TaskStatus::Pending),
        ] {
            store
                .insert_task(&RoutineTask {
                    id: id.to_string(),
                    routine_id: routine_id.clone(),
                    external_task_id: PLACEHOLDER_EXTERNAL_ID.to_string(),
                    ready_date: add_days(NOW, offset),
                    due_date: add_days(NOW, offset),
                    status,
                    completed_date: None,
                    created_at: NOW,
                    updated_at: NOW,
                })
                .unwrap();
        }

        let filter = TaskFilter {
            routine_id: Some(a.id.clone()),
            status: Some(TaskStatus::Pending),
        };
        let ids: Vec<String> = list_tasks(&store, &filter)
            .unwrap()
            .into_iter()
            .map(|task| task.id)
            .collect();
        assert_eq!(ids, ["t1", "t3"]);
        assert_eq!(list_tasks(&store, &TaskFilter::default()).unwrap().len(), 4);

        let names: Vec<String> = list_routines(&store)
            .unwrap()
            .into_iter()
            .map(|routine| routine.name)
            .collect();
        assert_eq!(names, ["A-side", "b-side"]);
    }
}
