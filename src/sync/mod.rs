//! Sync orchestration: run lifecycle, control signals, progress fan-out.

mod control;
mod orchestrator;
mod progress;

pub use control::SyncControl;
pub use orchestrator::{
    ActiveSyncView, ControlAction, RunClaim, SyncOptions, SyncOrchestrator, SyncReport,
};
pub use progress::ProgressReporter;
