//! Plain-text and JSON rendering for command results.

use crate::cli::weekday_name;
use routine_core::dates::normalize_to_day;
use routine_core::error::AppError;
use routine_core::model::{Routine, RoutineTask};
use routine_core::orchestrator::CycleSummary;
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let rendered =
        serde_json::to_string(value).map_err(|err| AppError::invalid_data(err.to_string()))?;
    println!("{rendered}");
    Ok(())
}

/// `YYYY-MM-DD HH:MM` in the configured offset, or `-` when out of range.
pub fn format_timestamp(ts: i64, utc_offset_minutes: i32) -> String {
    let offset = UtcOffset::from_whole_seconds(utc_offset_minutes * 60).unwrap_or(UtcOffset::UTC);
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ts) * 1_000_000)
        .ok()
        .and_then(|moment| {
            moment
                .to_offset(offset)
                .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
                .ok()
        })
        .unwrap_or_else(|| "-".to_string())
}

fn optional_timestamp(ts: Option<i64>, utc_offset_minutes: i32) -> String {
    ts.map(|ts| format_timestamp(ts, utc_offset_minutes))
        .unwrap_or_else(|| "-".to_string())
}

fn state_label(routine: &Routine) -> &'static str {
    if routine.defer { "deferred" } else { "active" }
}

#[derive(Tabled)]
struct RoutineRow {
    id: String,
    name: String,
    frequency: String,
    #[tabled(rename = "time of day")]
    time_of_day: String,
    #[tabled(rename = "ideal day")]
    ideal_day: String,
    state: &'static str,
    overall: String,
    month: String,
}

impl From<&Routine> for RoutineRow {
    fn from(routine: &Routine) -> Self {
        Self {
            id: routine.id.clone(),
            name: routine.name.clone(),
            frequency: routine.frequency.to_string(),
            time_of_day: routine
                .time_of_day
                .map(|time_of_day| time_of_day.to_string())
                .unwrap_or_else(|| "-".to_string()),
            ideal_day: routine
                .ideal_day
                .map(|day| weekday_name(day).to_string())
                .unwrap_or_else(|| "-".to_string()),
            state: state_label(routine),
            overall: format!("{}%", routine.completion_rate_overall),
            month: format!("{}%", routine.completion_rate_month),
        }
    }
}

#[derive(Tabled)]
struct TaskRow {
    id: String,
    routine: String,
    ready: String,
    due: String,
    status: String,
    external: String,
}

impl From<&RoutineTask> for TaskRow {
    fn from(task: &RoutineTask) -> Self {
        Self {
            id: task.id.clone(),
            routine: task.routine_id.clone(),
            ready: normalize_to_day(task.ready_date),
            due: normalize_to_day(task.due_date),
            status: task.status.to_string(),
            external: if task.is_linked() {
                task.external_task_id.clone()
            } else {
                "-".to_string()
            },
        }
    }
}

pub fn routines_table(routines: &[Routine]) -> String {
    if routines.is_empty() {
        return "No routines.".to_string();
    }
    let rows: Vec<RoutineRow> = routines.iter().map(RoutineRow::from).collect();
    Table::new(rows).with(Style::sharp()).to_string()
}

pub fn tasks_table(tasks: &[RoutineTask]) -> String {
    if tasks.is_empty() {
        return "No tasks.".to_string();
    }
    let rows: Vec<TaskRow> = tasks.iter().map(TaskRow::from).collect();
    Table::new(rows).with(Style::sharp()).to_string()
}

pub fn routine_details(routine: &Routine, utc_offset_minutes: i32) -> String {
    let mut builder = Builder::default();
    builder.push_record(["id", routine.id.as_str()]);
    builder.push_record(["name", routine.name.as_str()]);
    builder.push_record(["description", routine.description.as_deref().unwrap_or("-")]);
    builder.push_record(["category", routine.category.as_deref().unwrap_or("-")]);
    builder.push_record(["frequency", routine.frequency.as_str()]);
    builder.push_record(["duration", routine.duration.as_str()]);
    builder.push_record([
        "time of day",
        routine.time_of_day.map(|tod| tod.as_str()).unwrap_or("-"),
    ]);
    builder.push_record(["ideal day", routine.ideal_day.map(weekday_name).unwrap_or("-")]);
    builder.push_record(["priority", routine.priority.to_string().as_str()]);
    builder.push_record(["labels", routine.labels.join(", ").as_str()]);
    builder.push_record(["project", routine.project_id.as_deref().unwrap_or("-")]);
    builder.push_record(["state", state_label(routine)]);
    builder.push_record([
        "deferred since",
        optional_timestamp(routine.deferral_date, utc_offset_minutes).as_str(),
    ]);
    builder.push_record([
        "last completed",
        optional_timestamp(routine.last_completed_date, utc_offset_minutes).as_str(),
    ]);
    builder.push_record([
        "completion",
        format!(
            "{}% overall, {}% last 30 days",
            routine.completion_rate_overall, routine.completion_rate_month
        )
        .as_str(),
    ]);
    builder.push_record([
        "created",
        format_timestamp(routine.created_at, utc_offset_minutes).as_str(),
    ]);
    builder.build().with(Style::sharp()).to_string()
}

pub fn cycle_summary(summary: &CycleSummary) -> String {
    let mut lines = vec![
        format!(
            "Missed: {} (closed {}, close failures {})",
            summary.missed, summary.external_closed, summary.external_close_failures
        ),
        format!("Deferred: {}", summary.deferred),
        format!(
            "Relinked: {} (failures {})",
            summary.relinked, summary.relink_failures
        ),
        format!(
            "Routines generated: {} of {} ({} failed)",
            summary.routines_succeeded,
            summary.routines_needing_generation,
            summary.routines_failed
        ),
        format!(
            "Tasks created: {} (linked {}, create failures {})",
            summary.tasks_created, summary.tasks_linked, summary.external_create_failures
        ),
    ];
    if summary.links_abandoned > 0 {
        lines.push(format!(
            "Links abandoned: {} (task changed while being created)",
            summary.links_abandoned
        ));
    }
    for error in &summary.errors {
        lines.push(format!("  {error}"));
    }
    lines.join("\n")
}
