use crate::error::AppError;
use crate::model::{Routine, RoutineTask, TaskStatus};

pub mod json_store;
mod memory;

pub use json_store::JsonStore;
pub use memory::MemoryStore;

/// Everything persisted: routines and their generated tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutineState {
    pub routines: Vec<Routine>,
    pub tasks: Vec<RoutineTask>,
}

/// Document store for routines and tasks. Every method reads or writes a
/// single document and is atomic on its own.
pub trait RoutineStore: Send + Sync {
    fn list_routines(&self) -> Result<Vec<Routine>, AppError>;

    fn get_routine(&self, id: &str) -> Result<Routine, AppError>;

    fn insert_routine(&self, routine: &Routine) -> Result<(), AppError>;

    fn update_routine(&self, routine: &Routine) -> Result<(), AppError>;

    fn list_tasks(&self) -> Result<Vec<RoutineTask>, AppError>;

    fn get_task(&self, id: &str) -> Result<RoutineTask, AppError>;

    fn insert_task(&self, task: &RoutineTask) -> Result<(), AppError>;

    fn update_task(&self, task: &RoutineTask) -> Result<(), AppError>;

    /// Records `external_id` on the task only while it is still pending and
    /// carries the placeholder. Returns the linked task, or `None` when the
    /// task moved on in the meantime; status is never written here.
    fn link_task(&self, id: &str, external_id: &str) -> Result<Option<RoutineTask>, AppError>;

    fn tasks_for_routine(&self, routine_id: &str) -> Result<Vec<RoutineTask>, AppError> {
        Ok(self
            .list_tasks()?
            .into_iter()
            .filter(|task| task.routine_id == routine_id)
            .collect())
    }

    fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<RoutineTask>, AppError> {
        Ok(self
            .list_tasks()?
            .into_iter()
            .filter(|task| task.status == status)
            .collect())
    }

    fn deferred_routines(&self) -> Result<Vec<Routine>, AppError> {
        Ok(self
            .list_routines()?
            .into_iter()
            .filter(|routine| routine.defer)
            .collect())
    }
}

fn routine_not_found(id: &str) -> AppError {
    AppError::not_found(format!("routine {id} not found"))
}

fn task_not_found(id: &str) -> AppError {
    AppError::not_found(format!("task {id} not found"))
}

/// Shared document-level edits applied by both stores.
impl RoutineState {
    fn get_routine(&self, id: &str) -> Result<Routine, AppError> {
        self.routines
            .iter()
            .find(|routine| routine.id == id)
            .cloned()
            .ok_or_else(|| routine_not_found(id))
    }

    fn insert_routine(&mut self, routine: &Routine) -> Result<(), AppError> {
        if self.routines.iter().any(|existing| existing.id == routine.id) {
            return Err(AppError::invalid_input(format!(
                "routine {} already exists",
                routine.id
            )));
        }
        self.routines.push(routine.clone());
        Ok(())
    }

    fn update_routine(&mut self, routine: &Routine) -> Result<(), AppError> {
        let slot = self
            .routines
            .iter_mut()
            .find(|existing| existing.id == routine.id)
            .ok_or_else(|| routine_not_found(&routine.id))?;
        *slot = routine.clone();
        Ok(())
    }

    fn get_task(&self, id: &str) -> Result<RoutineTask, AppError> {
        self.tasks
            .iter()
            .find(|task| task.id == id)
            .cloned()
            .ok_or_else(|| task_not_found(id))
    }

    fn insert_task(&mut self, task: &RoutineTask) -> Result<(), AppError> {
        if !self.routines.iter().any(|routine| routine.id == task.routine_id) {
            return Err(routine_not_found(&task.routine_id));
        }
        if self.tasks.iter().any(|existing| existing.id == task.id) {
            return Err(AppError::invalid_input(format!(
                "task {} already exists",
                task.id
            )));
        }
        self.tasks.push(task.clone());
        Ok(())
    }

    fn link_task(&mut self, id: &str, external_id: &str) -> Result<Option<RoutineTask>, AppError> {
        let slot = self
            .tasks
            .iter_mut()
            .find(|existing| existing.id == id)
            .ok_or_else(|| task_not_found(id))?;
        if slot.status != TaskStatus::Pending || slot.is_linked() {
            return Ok(None);
        }
        slot.external_task_id = external_id.to_string();
        Ok(Some(slot.clone()))
    }

    fn update_task(&mut self, task: &RoutineTask) -> Result<(), AppError> {
        let slot = self
            .tasks
            .iter_mut()
            .find(|existing| existing.id == task.id)
            .ok_or_else(|| task_not_found(&task.id))?;
        *slot = task.clone();
        Ok(())
    }
}
