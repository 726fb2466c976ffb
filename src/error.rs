//! Error types for the branch/merge/conflict engine.
//!
//! Storage backends report failures through `anyhow::Error`; the logic layer
//! wraps them into [`VcError::Storage`] so callers can tell a malfunctioning
//! engine apart from the policy and validation outcomes below.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcError {
    /// Malformed registry registration or an invalid name. Nothing was mutated.
    #[error("validation error: {0}")]
    Validation(String),

    /// A non-versioned entity was written while a non-primary branch was active.
    #[error(
        "error writing model '{entity}' on branch '{branch}': non-versioned models must be written on branch '{required}'"
    )]
    PolicyViolation {
        entity: String,
        branch: String,
        required: String,
    },

    /// The engine refused or failed to build a merge candidate.
    #[error("could not merge '{source_branch}' into '{destination_branch}': {detail}")]
    MergeFailure {
        source_branch: String,
        destination_branch: String,
        detail: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("branch '{branch}' cannot be deleted: {reason}")]
    BranchProtected { branch: String, reason: String },

    #[error("branch '{0}' already exists")]
    BranchExists(String),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for VcError {
    fn from(err: anyhow::Error) -> Self {
        VcError::Storage(err)
    }
}

impl VcError {
    /// Errors that are shown to the user while the request otherwise completes.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, VcError::Storage(_))
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        VcError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

pub type VcResult<T> = std::result::Result<T, VcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_violation_message_names_entity_and_branches() {
        let err = VcError::PolicyViolation {
            entity: "users.user".into(),
            branch: "feature".into(),
            required: "main".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("users.user"));
        assert!(msg.contains("'feature'"));
        assert!(msg.contains("'main'"));
        assert!(err.is_user_facing());
    }

    #[test]
    fn test_storage_error_is_not_user_facing() {
        let err: VcError = anyhow::anyhow!("connection reset").into();
        assert!(!err.is_user_facing());
        assert!(err.to_string().contains("connection reset"));
    }
}
