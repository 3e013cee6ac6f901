use thiserror::Error;

use crate::codegen::CodeGenError;
use crate::validation::ValidationErrors;

/// Everything a workflow operation can fail with.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Malformed input; carries every violated field.
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationErrors),

    /// No valid session.
    #[error("authentication required")]
    Unauthenticated,

    /// Authenticated, but the role does not allow the operation.
    #[error("admin access required")]
    Forbidden,

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Unknown, expired, or otherwise unusable salary code.
    #[error("invalid salary code")]
    InvalidCode,

    /// Someone already holds a live claim on the code.
    #[error("salary code has already been redeemed")]
    AlreadyRedeemed,

    /// The item already left `pending`; review outcomes never overwrite each other.
    #[error("{entity} {id} is already {current}; cannot mark it {requested}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        current: String,
        requested: String,
    },

    /// Submissions are only accepted for active tasks.
    #[error("task {0} is not accepting submissions")]
    TaskNotActive(String),

    /// The upload collaborator failed.
    #[error("upload failed")]
    Upload(#[source] anyhow::Error),

    /// The storage collaborator failed.
    #[error("persistence failure")]
    Persistence(#[source] anyhow::Error),

    /// Code generation could not get entropy.
    #[error(transparent)]
    CodeGen(#[from] CodeGenError),
}

impl WorkflowError {
    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Validation error for a single field.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errs = ValidationErrors::new();
        errs.push(field, message);
        Self::Validation(errs)
    }
}

/// Wraps a store failure.
pub(crate) fn persistence(e: anyhow::Error) -> WorkflowError {
    WorkflowError::Persistence(e)
}
