mod routine;
mod task;

pub use routine::{Duration, Frequency, NewRoutine, Routine, RoutinePatch, TimeOfDay};
pub use task::{PLACEHOLDER_EXTERNAL_ID, RoutineTask, TaskStatus};
