//! The scheduling cycle: sweep, sync with the external service, generate.
//!
//! A cycle is best-effort. Failures are counted and logged per item and
//! reported in the returned [`CycleSummary`]; nothing short of a failed
//! store listing stops a later step from running.

use crate::clock::Clock;
use crate::config::Config;
use crate::dates::{GENERATION_WINDOW_DAYS, add_days, start_of_day};
use crate::error::AppError;
use crate::external::{ExternalTaskService, build_task_spec};
use crate::generation::generate_tasks;
use crate::lifecycle::{MissedSweep, defer_pending_tasks, mark_overdue_missed};
use crate::model::{Routine, RoutineTask, TaskStatus};
use crate::stats::recompute_completion_rates;
use crate::storage::RoutineStore;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub missed_grace_days: i64,
    pub utc_offset_minutes: i32,
    pub default_project_id: Option<String>,
    pub external_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            missed_grace_days: config.missed_grace_days,
            utc_offset_minutes: config.utc_offset_minutes,
            default_project_id: config
                .external
                .as_ref()
                .and_then(|external| external.project_id.clone()),
            external_timeout: Duration::from_secs(config.external_timeout_secs()),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Counts emitted by one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub missed: usize,
    pub external_closed: usize,
    pub external_close_failures: usize,
    pub rates_updated: usize,
    pub rate_failures: usize,
    pub deferred: usize,
    pub relinked: usize,
    pub relink_failures: usize,
    pub links_abandoned: usize,
    pub routines_needing_generation: usize,
    pub routines_succeeded: usize,
    pub routines_failed: usize,
    pub tasks_created: usize,
    pub tasks_linked: usize,
    pub external_create_failures: usize,
    pub errors: Vec<String>,
}

impl CycleSummary {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
            && self.external_close_failures == 0
            && self.external_create_failures == 0
            && self.relink_failures == 0
    }
}

#[derive(Debug, Default)]
struct RoutineOutcome {
    created: usize,
    linked: usize,
    abandoned: usize,
    failures: Vec<String>,
    store_errors: Vec<String>,
}

/// True when the routine holds fewer pending instances in the coming
/// window than its frequency calls for.
///
/// Rolling-buffer frequencies only count instances ready today or later;
/// an overdue one is on its way to missed and does not fill the buffer.
/// Sparse routines count any outstanding instance, overdue or not.
pub fn needs_generation(routine: &Routine, tasks: &[RoutineTask], now: i64) -> bool {
    if routine.defer {
        return false;
    }
    let floor = routine.frequency.pending_floor();
    let horizon = add_days(now, GENERATION_WINDOW_DAYS);
    let earliest = if floor > 1 { start_of_day(now) } else { i64::MIN };
    let upcoming = tasks
        .iter()
        .filter(|task| task.routine_id == routine.id)
        .filter(|task| task.status == TaskStatus::Pending)
        .filter(|task| (earliest..=horizon).contains(&task.ready_date))
        .count();
    upcoming < floor
}

pub fn routines_needing_generation(
    store: &dyn RoutineStore,
    now: i64,
) -> Result<Vec<Routine>, AppError> {
    let pending = store.tasks_with_status(TaskStatus::Pending)?;
    Ok(store
        .list_routines()?
        .into_iter()
        .filter(|routine| needs_generation(routine, &pending, now))
        .collect())
}

pub struct Orchestrator {
    store: Arc<dyn RoutineStore>,
    service: Arc<dyn ExternalTaskService>,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RoutineStore>,
        service: Arc<dyn ExternalTaskService>,
        clock: Arc<dyn Clock>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            service,
            clock,
            settings,
        }
    }

    async fn with_timeout<T, F>(&self, what: &str, call: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        tokio::time::timeout(self.settings.external_timeout, call)
            .await
            .map_err(|_| {
                AppError::timeout(format!(
                    "{what} did not finish within {:?}",
                    self.settings.external_timeout
                ))
            })?
    }

    /// Runs every step once.
    pub async fn run_cycle(&self) -> CycleSummary {
        let now = self.clock.now_millis();
        let mut summary = CycleSummary::default();
        tracing::info!(now, "routine cycle started");

        let sweep = match mark_overdue_missed(self.store.as_ref(), now, self.settings.missed_grace_days) {
            Ok(sweep) => sweep,
            Err(err) => {
                tracing::error!(error = %err, "overdue sweep failed");
                summary.errors.push(format!("overdue sweep: {err}"));
                MissedSweep::default()
            }
        };
        summary.missed = sweep.missed.len();
        summary.errors.extend(sweep.errors.iter().cloned());

        self.close_missed(&sweep, &mut summary).await;
        self.refresh_rates(&sweep, now, &mut summary);

        match defer_pending_tasks(self.store.as_ref(), now) {
            Ok(deferred) => {
                summary.deferred = deferred.deferred.len();
                summary.errors.extend(deferred.errors);
            }
            Err(err) => {
                tracing::error!(error = %err, "defer sweep failed");
                summary.errors.push(format!("defer sweep: {err}"));
            }
        }

        self.relink_unlinked(&mut summary).await;
        self.generate(now, &mut summary).await;

        tracing::info!(
            missed = summary.missed,
            closed = summary.external_closed,
            close_failures = summary.external_close_failures,
            deferred = summary.deferred,
            created = summary.tasks_created,
            linked = summary.tasks_linked,
            routines_failed = summary.routines_failed,
            "routine cycle finished"
        );
        summary
    }

    async fn close_missed(&self, sweep: &MissedSweep, summary: &mut CycleSummary) {
        for external_id in &sweep.external_ids {
            let result = self
                .with_timeout("close", self.service.close_task(external_id))
                .await;
            match result {
                Ok(true) => summary.external_closed += 1,
                Ok(false) => {
                    tracing::warn!(external_id = %external_id, "external service declined to close task");
                    summary.external_close_failures += 1;
                }
                Err(err) => {
                    tracing::warn!(external_id = %external_id, error = %err, "failed to close external task");
                    summary.external_close_failures += 1;
                    summary.errors.push(format!("close {external_id}: {err}"));
                }
            }
        }
    }

    fn refresh_rates(&self, sweep: &MissedSweep, now: i64, summary: &mut CycleSummary) {
        for routine_id in &sweep.routine_ids {
            match recompute_completion_rates(self.store.as_ref(), routine_id, now) {
                Ok(_) => summary.rates_updated += 1,
                Err(err) => {
                    tracing::warn!(routine_id = %routine_id, error = %err, "failed to recompute completion rates");
                    summary.rate_failures += 1;
                    summary.errors.push(format!("rates {routine_id}: {err}"));
                }
            }
        }
    }

    /// Creates the external task for `task` and records the returned id.
    ///
    /// The task is re-read when the id comes back. If it left pending while
    /// the call was in flight the link is dropped, the fresh external task
    /// is closed and `Ok(false)` is returned.
    async fn link(&self, routine: &Routine, task: &mut RoutineTask) -> Result<bool, AppError> {
        let spec = build_task_spec(
            routine,
            task,
            self.settings.utc_offset_minutes,
            self.settings.default_project_id.as_deref(),
        )?;
        let external_id = self
            .with_timeout("create", self.service.create_task(&spec))
            .await?;
        match self.store.link_task(&task.id, &external_id) {
            Ok(Some(linked)) => {
                *task = linked;
                Ok(true)
            }
            Ok(None) => {
                tracing::info!(
                    task_id = %task.id,
                    external_id = %external_id,
                    "task changed while its external task was created; closing it"
                );
                self.discard_external(&external_id).await;
                Ok(false)
            }
            Err(err) => {
                tracing::error!(
                    task_id = %task.id,
                    external_id = %external_id,
                    error = %err,
                    "external task created but link could not be stored"
                );
                Err(err)
            }
        }
    }

    async fn discard_external(&self, external_id: &str) {
        match self
            .with_timeout("close", self.service.close_task(external_id))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(external_id, "external service declined to close orphaned task");
            }
            Err(err) => {
                tracing::warn!(external_id, error = %err, "failed to close orphaned external task");
            }
        }
    }

    /// Retries external creation for pending tasks that a previous cycle
    /// failed to link.
    async fn relink_unlinked(&self, summary: &mut CycleSummary) {
        let unlinked: Vec<RoutineTask> = match self.store.tasks_with_status(TaskStatus::Pending) {
            Ok(tasks) => tasks.into_iter().filter(|task| !task.is_linked()).collect(),
            Err(err) => {
                summary.errors.push(format!("relink: {err}"));
                return;
            }
        };
        if unlinked.is_empty() {
            return;
        }

        let routines: HashMap<String, Routine> = match self.store.list_routines() {
            Ok(routines) => routines
                .into_iter()
                .map(|routine| (routine.id.clone(), routine))
                .collect(),
            Err(err) => {
                summary.errors.push(format!("relink: {err}"));
                return;
            }
        };

        for mut task in unlinked {
            let Some(routine) = routines.get(&task.routine_id).filter(|r| !r.defer) else {
                continue;
            };
            match self.link(routine, &mut task).await {
                Ok(true) => summary.relinked += 1,
                Ok(false) => summary.links_abandoned += 1,
                Err(err) => {
                    tracing::warn!(task_id = %task.id, error = %err, "relink failed");
                    summary.relink_failures += 1;
                    summary.errors.push(format!("relink {}: {err}", task.id));
                }
            }
        }
    }

    async fn generate(&self, now: i64, summary: &mut CycleSummary) {
        let routines = match routines_needing_generation(self.store.as_ref(), now) {
            Ok(routines) => routines,
            Err(err) => {
                tracing::error!(error = %err, "failed to query routines needing generation");
                summary.errors.push(format!("generation query: {err}"));
                return;
            }
        };
        summary.routines_needing_generation = routines.len();

        for routine in routines {
            match self.process_routine(&routine, now).await {
                Ok(outcome) => {
                    summary.tasks_created += outcome.created;
                    summary.tasks_linked += outcome.linked;
                    summary.links_abandoned += outcome.abandoned;
                    summary.external_create_failures += outcome.failures.len();
                    if outcome.failures.is_empty() && outcome.store_errors.is_empty() {
                        summary.routines_succeeded += 1;
                    } else {
                        summary.routines_failed += 1;
                        summary.errors.extend(outcome.failures);
                        summary.errors.extend(outcome.store_errors);
                    }
                }
                Err(err) => {
                    tracing::warn!(routine_id = %routine.id, error = %err, "routine generation failed");
                    summary.routines_failed += 1;
                    summary.errors.push(format!("routine {}: {err}", routine.id));
                }
            }
        }
    }

    async fn process_routine(&self, routine: &Routine, now: i64) -> Result<RoutineOutcome, AppError> {
        let created = generate_tasks(self.store.as_ref(), routine, now)?;
        let mut outcome = RoutineOutcome {
            created: created.len(),
            ..RoutineOutcome::default()
        };

        for mut task in created {
            match self.link(routine, &mut task).await {
                Ok(true) => outcome.linked += 1,
                Ok(false) => outcome.abandoned += 1,
                Err(err) => {
                    tracing::warn!(
                        routine_id = %routine.id,
                        task_id = %task.id,
                        error = %err,
                        "external task creation failed; task keeps its placeholder"
                    );
                    let message = format!("routine {} task {}: {err}", routine.id, task.id);
                    if err.is_external() {
                        outcome.failures.push(message);
                    } else {
                        outcome.store_errors.push(message);
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Runs a cycle on every tick of `interval`, forever.
    pub async fn run_forever(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let summary = self.run_cycle().await;
            if !summary.is_clean() {
                tracing::warn!(errors = summary.errors.len(), "routine cycle finished with failures");
            }
        }
    }
}
