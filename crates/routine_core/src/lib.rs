pub mod clock;
pub mod config;
pub mod dates;
pub mod error;
pub mod external;
pub mod generation;
pub mod lifecycle;
pub mod model;
pub mod orchestrator;
pub mod routine_api;
pub mod stats;
pub mod storage;
