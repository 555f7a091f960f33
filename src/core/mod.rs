pub mod analyzer;
pub mod classifier;
pub mod codec;
pub mod heuristic;
pub mod history;
pub mod manager;
pub mod models;
pub mod naming;
pub mod notifications;
pub mod optimizer;
pub mod orchestrator;
pub mod progress;
pub mod transfer_engine;

pub use heuristic::Heuristic;
pub use manager::{JobManager, ManagerError, StartOutcome};
pub use models::{Job, JobConfig, JobId, JobStatus, Operation};
pub use notifications::{JobNotification, Notifier};
pub use orchestrator::{ManagerHandle, ManagerStatus, Orchestrator, TransferAdvice};
pub use progress::ProgressSnapshot;
