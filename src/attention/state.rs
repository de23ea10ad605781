//! Per-invocation state machine of the orchestrator and of each head
//!
//! ```text
//! Idle -> Preparing -> Projecting -> Scoring -> Aggregating
//!      -> Concatenating -> ProjectingOutput -> Done
//! ```
//!
//! `Preparing -> Projecting` fans out into one [`HeadStage`] sequence per
//! head; the heads rejoin before `Concatenating`. Nothing survives an
//! invocation: every call starts a fresh [`InvocationTrace`] at `Idle`.

use std::fmt;

use crate::error::{MhaError, MhaResult};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    Preparing,
    Projecting,
    Scoring,
    Aggregating,
    Concatenating,
    ProjectingOutput,
    Done,
}

impl PipelineState {
    /// The only legal successor, `None` for the terminal state
    pub fn next(self) -> Option<PipelineState> {
        use PipelineState::*;
        match self {
            Idle => Some(Preparing),
            Preparing => Some(Projecting),
            Projecting => Some(Scoring),
            Scoring => Some(Aggregating),
            Aggregating => Some(Concatenating),
            Concatenating => Some(ProjectingOutput),
            ProjectingOutput => Some(Done),
            Done => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == PipelineState::Done
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Stage of one head pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeadStage {
    Projecting,
    Scoring,
    Aggregating,
    Done,
}

/// Ordered record of the states visited by one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationTrace {
    states: Vec<PipelineState>,
}

impl Default for InvocationTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl InvocationTrace {
    /// Fresh trace positioned at `Idle`
    pub fn new() -> Self {
        InvocationTrace {
            states: vec![PipelineState::Idle],
        }
    }

    pub fn current(&self) -> PipelineState {
        // states is never empty
        self.states[self.states.len() - 1]
    }

    /// Move to `to`, which must be the successor of the current state
    pub fn advance(&mut self, to: PipelineState) -> MhaResult<()> {
        let from = self.current();
        if from.next() != Some(to) {
            return Err(MhaError::InvalidStateTransition { from, to });
        }
        tracing::debug!(%from, %to, "pipeline state transition");
        self.states.push(to);
        Ok(())
    }

    /// Every state visited so far, starting with `Idle`
    pub fn states(&self) -> &[PipelineState] {
        &self.states
    }

    pub fn is_done(&self) -> bool {
        self.current().is_terminal()
    }
}
