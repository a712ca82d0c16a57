//! Request workflow: state machine, trace and coordinator
//!
//! A request moves through `Validating → RateChecking → CacheChecking →
//! Fetching → Processing → Caching → Completed`. Any failure jumps straight to
//! `Errored` carrying the error kind; nothing later runs and nothing is cached.
//! The path taken is recorded in a [`WorkflowRun`] returned with the outcome.

pub mod coordinator;

pub use coordinator::{Collaborators, WorkflowCoordinator};

use crate::error::{ErrorKind, WorkflowError};
use crate::protocol::WorkflowResponse;
use serde::Serialize;
use std::fmt;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Validating,
    RateChecking,
    CacheChecking,
    Fetching,
    Processing,
    Caching,
    Completed,
    Errored { kind: ErrorKind },
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Errored { .. })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Validating => f.write_str("validating"),
            Stage::RateChecking => f.write_str("rate_checking"),
            Stage::CacheChecking => f.write_str("cache_checking"),
            Stage::Fetching => f.write_str("fetching"),
            Stage::Processing => f.write_str("processing"),
            Stage::Caching => f.write_str("caching"),
            Stage::Completed => f.write_str("completed"),
            Stage::Errored { kind } => write!(f, "errored({kind})"),
        }
    }
}

/// Per-request trace of visited stages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowRun {
    stages: Vec<Stage>,
    cache_hit: bool,
}

impl WorkflowRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to `stage`. Ignored once the run reached a terminal stage.
    pub fn enter(&mut self, stage: Stage) {
        if self.is_finished() {
            return;
        }
        self.stages.push(stage);
    }

    pub(crate) fn mark_cache_hit(&mut self) {
        self.cache_hit = true;
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn current(&self) -> Option<Stage> {
        self.stages.last().copied()
    }

    pub fn is_finished(&self) -> bool {
        self.current().is_some_and(|stage| stage.is_terminal())
    }

    pub fn cache_hit(&self) -> bool {
        self.cache_hit
    }

    pub fn visited(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }
}

/// What the coordinator hands back for one request
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub run: WorkflowRun,
    pub result: Result<WorkflowResponse, WorkflowError>,
}

impl WorkflowOutcome {
    /// HTTP status for the outcome
    pub fn status(&self) -> u16 {
        match &self.result {
            Ok(_) => 200,
            Err(e) => e.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_stops_recording_after_terminal_stage() {
        let mut run = WorkflowRun::new();
        run.enter(Stage::Validating);
        run.enter(Stage::Errored {
            kind: ErrorKind::ValidationError,
        });
        run.enter(Stage::Fetching);

        assert_eq!(run.stages().len(), 2);
        assert!(run.is_finished());
        assert!(!run.visited(Stage::Fetching));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::CacheChecking.to_string(), "cache_checking");
        assert_eq!(
            Stage::Errored {
                kind: ErrorKind::RateLimited
            }
            .to_string(),
            "errored(rate_limited)"
        );
    }
}
