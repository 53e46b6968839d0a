use super::{RoutineState, RoutineStore};
use crate::error::AppError;
use crate::model::{Routine, RoutineTask};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: u32 = 1;
const STORE_FILE_NAME: &str = "routines.json";
const STORE_ENV_VAR: &str = "ROUTINES_STORE_PATH";

#[derive(Debug, Serialize, Deserialize)]
struct StoredRoutines {
    schema_version: u32,
    #[serde(default)]
    routines: Vec<Routine>,
    #[serde(default)]
    tasks: Vec<RoutineTask>,
}

pub fn store_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(STORE_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata)
            .join("routines")
            .join(STORE_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("routines")
            .join(STORE_FILE_NAME))
    }
}

pub fn load_state(path: &Path) -> Result<RoutineState, AppError> {
    if !path.exists() {
        return Ok(RoutineState::default());
    }

    let content = std::fs::read_to_string(path).map_err(|err| AppError::io(err.to_string()))?;
    let stored: StoredRoutines =
        serde_json::from_str(&content).map_err(|err| AppError::invalid_data(err.to_string()))?;

    if !(1..=SCHEMA_VERSION).contains(&stored.schema_version) {
        return Err(AppError::invalid_data("schema_version mismatch"));
    }

    if let Some(orphan) = stored
        .tasks
        .iter()
        .find(|task| !stored.routines.iter().any(|r| r.id == task.routine_id))
    {
        return Err(AppError::invalid_data(format!(
            "task {} references unknown routine {}",
            orphan.id, orphan.routine_id
        )));
    }

    Ok(RoutineState {
        routines: stored.routines,
        tasks: stored.tasks,
    })
}

pub fn save_state(path: &Path, state: &RoutineState) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| AppError::io(err.to_string()))?;
    }

    let stored = StoredRoutines {
        schema_version: SCHEMA_VERSION,
        routines: state.routines.clone(),
        tasks: state.tasks.clone(),
    };
    let content = serde_json::to_string_pretty(&stored)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;
    std::fs::write(path, content).map_err(|err| AppError::io(err.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, permissions).map_err(|err| AppError::io(err.to_string()))?;
    }

    Ok(())
}

/// File-backed store. Each mutation loads the document, applies one
/// change and writes it back.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self::new(store_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn modify<T, F>(&self, change: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut RoutineState) -> Result<T, AppError>,
    {
        let mut state = load_state(&self.path)?;
        let result = change(&mut state)?;
        save_state(&self.path, &state)?;
        Ok(result)
    }
}

impl RoutineStore for JsonStore {
    fn list_routines(&self) -> Result<Vec<Routine>, AppError> {
        Ok(load_state(&self.path)?.routines)
    }

    fn get_routine(&self, id: &str) -> Result<Routine, AppError> {
        load_state(&self.path)?.get_routine(id)
    }

    fn insert_routine(&self, routine: &Routine) -> Result<(), AppError> {
        self.modify(|state| state.insert_routine(routine))
    }

    fn update_routine(&self, routine: &Routine) -> Result<(), AppError> {
        self.modify(|state| state.update_routine(routine))
    }

    fn list_tasks(&self) -> Result<Vec<RoutineTask>, AppError> {
        Ok(load_state(&self.path)?.tasks)
    }

    fn get_task(&self, id: &str) -> Result<RoutineTask, AppError> {
        load_state(&self.path)?.get_task(id)
    }

    fn insert_task(&self, task: &RoutineTask) -> Result<(), AppError> {
        self.modify(|state| state.insert_task(task))
    }

    fn update_task(&self, task: &RoutineTask) -> Result<(), AppError> {
        self.modify(|state| state.update_task(task))
    }

    fn link_task(&self, id: &str, external_id: &str) -> Result<Option<RoutineTask>, AppError> {
        self.modify(|state| state.link_task(id, external_id))
    }
}
