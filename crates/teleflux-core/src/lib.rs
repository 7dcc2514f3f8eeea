pub mod config;
pub mod logging;
pub mod settings;

pub mod admission;
pub mod control;
pub mod error;
pub mod history;
pub mod ids;
pub mod job;
pub mod lifecycle;
pub mod orchestrator;
pub mod publisher;
pub mod registry;
pub mod storage;
pub mod transfer;

pub use error::OrchestratorError;
pub use ids::{JobId, OwnerId};
pub use orchestrator::{Orchestrator, Snapshot};
