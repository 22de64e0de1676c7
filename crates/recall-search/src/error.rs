//! Search error types.

use thiserror::Error;

use recall_retrieval::CollaboratorError;

/// Errors that can occur during index or search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Existing index was built with a different schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Writer mutex poisoned
    #[error("Index writer is locked: {0}")]
    IndexLocked(String),
}

impl From<SearchError> for CollaboratorError {
    fn from(err: SearchError) -> Self {
        CollaboratorError::Backend(err.to_string())
    }
}
