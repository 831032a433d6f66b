pub mod controller;
pub mod state;

pub use controller::{PlaytestController, QuitDecision};
pub use state::{PipelinePhase, PipelineState};

/// Notifications fanned out to pipeline observers (progress UI and the
/// like); delivery happens before the phase transition that follows it.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    UploadStarted,
    UploadProgress { fraction: f32 },
    UploadCompleted,
}
