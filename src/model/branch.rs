use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VcError;

/// Head of a branch as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchHead {
    pub name: String,
    pub hash: String,
    pub latest_committer: Option<String>,
    pub latest_committer_email: Option<String>,
    pub latest_commit_date: Option<DateTime<Utc>>,
    pub latest_commit_message: Option<String>,
}

/// Bookkeeping the engine does not track itself: who forked a branch and from where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchMeta {
    pub branch: String,
    pub starting_branch: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BranchMeta {
    pub fn new(
        branch: String,
        starting_branch: Option<String>,
        created_by: Option<String>,
    ) -> Self {
        Self {
            branch,
            starting_branch,
            created_by,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub starting_branch: Option<String>, // None for the primary branch
    pub hash: String,
    pub created_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub latest_committer: Option<String>,
    pub latest_commit_message: Option<String>,
    pub latest_commit_date: Option<DateTime<Utc>>,
    pub ahead: u64,
    pub behind: u64,
}

impl Branch {
    pub fn from_parts(head: BranchHead, meta: Option<BranchMeta>, ahead: u64, behind: u64) -> Self {
        let (starting_branch, created_by, created_at) = match meta {
            Some(meta) => (meta.starting_branch, meta.created_by, Some(meta.created_at)),
            None => (None, None, None),
        };
        Self {
            name: head.name,
            starting_branch,
            hash: head.hash,
            created_by,
            created_at,
            latest_committer: head.latest_committer,
            latest_commit_message: head.latest_commit_message,
            latest_commit_date: head.latest_commit_date,
            ahead,
            behind,
        }
    }
}

/// Checks that `name` is usable as an engine ref name.
pub fn validate_branch_name(name: &str) -> Result<(), VcError> {
    let invalid = name.is_empty()
        || name.len() > 255
        || name.starts_with('-')
        || name.starts_with('/')
        || name.ends_with('/')
        || name.ends_with(".lock")
        || name.contains("..")
        || name.contains("//")
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if invalid {
        return Err(VcError::Validation(format!("invalid branch name: '{}'", name)));
    }
    Ok(())
}
