// Application Layer - Use Cases and Business Logic

pub mod aggregate;
pub mod control;
pub mod recovery;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod worker;

// Re-exports
pub use control::{PutRollupRequest, RollupControl};
pub use recovery::RecoveryService;
pub use retry::ConflictRetry;
pub use runner::{ExecutionOutcome, ResumePolicy, RollupRunner, RunnerConfig, SkipReason};
pub use scheduler::Scheduler;
pub use worker::{shutdown_channel, RollupWorker, ShutdownSender, ShutdownToken, TickReport};
