use serde::Serialize;

use crate::session::Session;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PipelinePhase {
    Idle,
    Recording,
    Stopping,
    Archiving,
    Uploading,
    Done,
}

impl Default for PipelinePhase {
    fn default() -> Self {
        PipelinePhase::Idle
    }
}

/// Orchestrator state: the current phase, the single owned session, and the
/// one-shot latch in front of the stop→archive→upload pipeline.
#[derive(Debug, Default)]
pub struct PipelineState {
    pub phase: PipelinePhase,
    pub pipeline_started: bool,
    pub session: Option<Session>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the pipeline latch. Only the first caller gets `true`; every
    /// later trigger is a no-op for as long as the process lives.
    pub fn try_begin_pipeline(&mut self) -> bool {
        if self.pipeline_started {
            return false;
        }
        self.pipeline_started = true;
        true
    }

    pub fn is_done(&self) -> bool {
        self.phase == PipelinePhase::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_latch_fires_exactly_once() {
        let mut state = PipelineState::new();
        assert!(state.try_begin_pipeline());
        assert!(!state.try_begin_pipeline());
        assert!(!state.try_begin_pipeline());
    }

    #[test]
    fn fresh_state_is_idle_and_unlatched() {
        let state = PipelineState::new();
        assert_eq!(state.phase, PipelinePhase::Idle);
        assert!(!state.pipeline_started);
        assert!(state.session.is_none());
        assert!(!state.is_done());
    }
}
