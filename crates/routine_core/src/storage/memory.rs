use super::{RoutineState, RoutineStore};
use crate::error::AppError;
use crate::model::{Routine, RoutineTask};
use std::sync::{Mutex, MutexGuard};

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<RoutineState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: RoutineState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RoutineState>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::io("memory store lock poisoned"))
    }
}

impl RoutineStore for MemoryStore {
    fn list_routines(&self) -> Result<Vec<Routine>, AppError> {
        Ok(self.lock()?.routines.clone())
    }

    fn get_routine(&self, id: &str) -> Result<Routine, AppError> {
        self.lock()?.get_routine(id)
    }

    fn insert_routine(&self, routine: &Routine) -> Result<(), AppError> {
        self.lock()?.insert_routine(routine)
    }

    fn update_routine(&self, routine: &Routine) -> Result<(), AppError> {
        self.lock()?.update_routine(routine)
    }

    fn list_tasks(&self) -> Result<Vec<RoutineTask>, AppError> {
        Ok(self.lock()?.tasks.clone())
    }

    fn get_task(&self, id: &str) -> Result<RoutineTask, AppError> {
        self.lock()?.get_task(id)
    }

    fn insert_task(&self, task: &RoutineTask) -> Result<(), AppError> {
        self.lock()?.insert_task(task)
    }

    fn update_task(&self, task: &RoutineTask) -> Result<(), AppError> {
        self.lock()?.update_task(task)
    }

    fn link_task(&self, id: &str, external_id: &str) -> Result<Option<RoutineTask>, AppError> {
        self.lock()?.link_task(id, external_id)
    }
}
