//! Ephemeral branches that hold "destination with source merged in".
//!
//! A candidate is named deterministically from its (source, destination)
//! pair and is only ever replaced wholesale: when either side has moved the
//! branch is force-recreated from the destination and the merge is redone.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;

use crate::error::{VcError, VcResult};
use crate::logic::scope::BranchScope;
use crate::model::{Author, Branch, BranchHead, CommitRequest};
use crate::store::EngineSession;

const SEPARATOR: &str = "--";

pub struct MergeCandidateManager {
    prefix: String,
    author: Author,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MergeCandidateManager {
    pub fn new(prefix: impl Into<String>, author: Author) -> Self {
        Self {
            prefix: prefix.into(),
            author,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn candidate_name(&self, source: &str, destination: &str) -> String {
        format!("{}{sep}{}{sep}{}", self.prefix, source, destination, sep = SEPARATOR)
    }

    pub fn is_candidate(&self, branch: &str) -> bool {
        branch
            .strip_prefix(self.prefix.as_str())
            .map(|rest| rest.starts_with(SEPARATOR))
            .unwrap_or(false)
    }

    /// Every (source, destination) pair that could have produced `branch`.
    /// Branch names may themselves contain the separator, so more than one
    /// split can be valid.
    pub fn candidate_pairs(&self, branch: &str) -> Vec<(String, String)> {
        let Some(rest) = branch
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(SEPARATOR))
        else {
            return Vec::new();
        };
        rest.match_indices(SEPARATOR)
            .map(|(at, _)| (&rest[..at], &rest[at + SEPARATOR.len()..]))
            .filter(|(source, destination)| !source.is_empty() && !destination.is_empty())
            .map(|(source, destination)| (source.to_string(), destination.to_string()))
            .collect()
    }

    /// A candidate is fresh while neither side has moved since it was built.
    pub async fn is_fresh<S: EngineSession>(
        &self,
        session: &mut S,
        candidate: &BranchHead,
        source: &BranchHead,
        destination: &BranchHead,
    ) -> anyhow::Result<bool> {
        let source_base = session.merge_base(&candidate.hash, &source.hash).await?;
        if source_base.as_deref() != Some(source.hash.as_str()) {
            return Ok(false);
        }
        let destination_base = session.merge_base(&candidate.hash, &destination.hash).await?;
        Ok(destination_base.as_deref() == Some(destination.hash.as_str()))
    }

    /// Existing candidate for the pair, if it is still fresh.
    pub async fn find<S: EngineSession>(
        &self,
        session: &mut S,
        source: &BranchHead,
        destination: &BranchHead,
    ) -> anyhow::Result<Option<BranchHead>> {
        let name = self.candidate_name(&source.name, &destination.name);
        let Some(candidate) = session.branch_head(&name).await? else {
            return Ok(None);
        };
        if self.is_fresh(session, &candidate, source, destination).await? {
            Ok(Some(candidate))
        } else {
            Ok(None)
        }
    }

    pub async fn get_or_create<S: EngineSession>(
        &self,
        session: &mut S,
        source: &str,
        destination: &str,
    ) -> VcResult<Branch> {
        let source_head = require_branch(session, source).await?;
        let destination_head = require_branch(session, destination).await?;
        let name = self.candidate_name(source, destination);

        let lock = self.lock_for(&name);
        let _guard = lock.lock().await;

        let head = match self.find(session, &source_head, &destination_head).await? {
            Some(head) => {
                log::info!("reusing merge candidate '{}' at {}", name, head.hash);
                head
            }
            None => {
                log::info!("building merge candidate '{}'", name);
                self.build(session, &name, source, destination).await?
            }
        };

        let ahead = session.count_commits(destination, &head.hash).await?;
        let behind = session.count_commits(&head.hash, destination).await?;
        let mut branch = Branch::from_parts(head, None, ahead, behind);
        branch.starting_branch = Some(destination.to_string());
        branch.created_by = Some(self.author.to_string());
        Ok(branch)
    }

    /// Force-recreate the candidate and merge into it. Either the candidate
    /// ends up committed or it is removed again; the session's checkout is
    /// restored in both cases.
    async fn build<S: EngineSession>(
        &self,
        session: &mut S,
        name: &str,
        source: &str,
        destination: &str,
    ) -> VcResult<BranchHead> {
        let failure = |err: anyhow::Error| VcError::MergeFailure {
            source_branch: source.to_string(),
            destination_branch: destination.to_string(),
            detail: format!("{:#}", err),
        };

        session
            .create_branch(name, destination, true)
            .await
            .with_context(|| format!("Failed to fork '{}' from '{}'", name, destination))
            .map_err(failure)?;

        let built = self.merge_into(session, name, source, destination).await;
        match built {
            Ok(head) => Ok(head),
            Err(err) => {
                log::warn!("merge candidate '{}' could not be built: {:#}", name, err);
                if let Err(cleanup) = session.delete_branch(name).await {
                    log::warn!("failed to remove half-built candidate '{}': {:#}", name, cleanup);
                }
                Err(failure(err))
            }
        }
    }

    async fn merge_into<S: EngineSession>(
        &self,
        session: &mut S,
        name: &str,
        source: &str,
        destination: &str,
    ) -> anyhow::Result<BranchHead> {
        let mut scope = BranchScope::enter(session, name).await?;
        let merged = async {
            scope.allow_conflicted_commits(true).await?;
            scope.merge(source).await?;
            scope.stage_all().await?;
            let message = format!(
                "creating merge candidate with src: \"{}\" and dest: \"{}\".",
                source, destination
            );
            scope.commit(&CommitRequest::forced(message, self.author.clone())).await?;
            scope
                .branch_head(name)
                .await?
                .with_context(|| format!("merge candidate '{}' vanished", name))
        }
        .await;
        // the setting belongs to the connection, not to this candidate
        let reset = scope.allow_conflicted_commits(false).await;
        let restored = scope.exit().await;
        let head = merged?;
        reset?;
        restored?;
        Ok(head)
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }
}

async fn require_branch<S: EngineSession>(session: &mut S, name: &str) -> VcResult<BranchHead> {
    session
        .branch_head(name)
        .await?
        .ok_or_else(|| VcError::not_found("branch", name))
}
