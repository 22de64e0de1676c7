//! Retrieval error types.

use thiserror::Error;

use recall_types::RecallError;

use crate::types::Stage;

/// Errors reported by external collaborators.
///
/// Optional stages absorb these and degrade to a no-op; required stages
/// wrap them in [`PipelineError::RequiredStage`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    /// Backend is down or not configured
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    /// Call exceeded its time budget
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// Backend returned an error
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Errors that fail a query outright.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed filter combination or missing capability
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Fetch, Filter (or Tags when a tag filter is present) failed
    #[error("Required stage '{stage}' failed: {source}")]
    RequiredStage {
        stage: Stage,
        #[source]
        source: CollaboratorError,
    },

    /// A stage was invoked before the stage it depends on
    #[error("Stage '{stage}' requires '{requires}' to have completed")]
    MissingPrerequisite { stage: Stage, requires: Stage },
}

impl From<RecallError> for PipelineError {
    fn from(err: RecallError) -> Self {
        PipelineError::Configuration(err.to_string())
    }
}
