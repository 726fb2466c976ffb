//! Branch listing, forking and deletion, plus cleanup of merge candidates
//! that no longer describe a live pair of branches.

use std::sync::Arc;

use anyhow::Context;

use crate::error::{VcError, VcResult};
use crate::logic::conflicts::total_issue_count;
use crate::logic::merge_candidate::MergeCandidateManager;
use crate::logic::scope::BranchScope;
use crate::model::{
    validate_branch_name, Author, Branch, BranchHead, BranchMeta, Commit, CommitRequest,
};
use crate::store::{EngineSession, VersionedEngine};

pub struct BranchDirectory<E: VersionedEngine> {
    engine: Arc<E>,
    candidates: Arc<MergeCandidateManager>,
}

impl<E: VersionedEngine> BranchDirectory<E> {
    pub fn new(engine: Arc<E>, candidates: Arc<MergeCandidateManager>) -> Self {
        Self { engine, candidates }
    }

    pub fn default_branch(&self) -> &str {
        self.engine.default_branch()
    }

    pub async fn list(&self, include_candidates: bool) -> VcResult<Vec<Branch>> {
        let mut session = self.engine.global_session().await?;
        let heads = session.list_branch_heads().await?;
        let mut branches = Vec::with_capacity(heads.len());
        for head in heads {
            if !include_candidates && self.candidates.is_candidate(&head.name) {
                continue;
            }
            branches.push(self.describe(&mut session, head).await?);
        }
        Ok(branches)
    }

    pub async fn get(&self, name: &str) -> VcResult<Branch> {
        let mut session = self.engine.global_session().await?;
        let head = session
            .branch_head(name)
            .await?
            .ok_or_else(|| VcError::not_found("branch", name))?;
        self.describe(&mut session, head).await
    }

    pub async fn exists(&self, name: &str) -> VcResult<bool> {
        let mut session = self.engine.global_session().await?;
        Ok(session.branch_head(name).await?.is_some())
    }

    /// Fork `name` from `starting_branch` and record who did it.
    pub async fn create(
        &self,
        name: &str,
        starting_branch: &str,
        creator: Option<&str>,
    ) -> VcResult<Branch> {
        validate_branch_name(name)?;
        if self.candidates.is_candidate(name) {
            return Err(VcError::Validation(format!(
                "branch names starting with '{}' are reserved",
                self.candidates.prefix()
            )));
        }

        let mut session = self.engine.global_session().await?;
        if session.branch_head(name).await?.is_some() {
            return Err(VcError::BranchExists(name.to_string()));
        }
        if session.branch_head(starting_branch).await?.is_none() {
            return Err(VcError::not_found("branch", starting_branch));
        }
        session
            .create_branch(name, starting_branch, false)
            .await
            .with_context(|| format!("Failed to create branch '{}'", name))?;
        let meta = BranchMeta::new(
            name.to_string(),
            Some(starting_branch.to_string()),
            creator.map(str::to_string),
        );
        session.save_branch_meta(&meta).await?;
        log::info!("created branch '{}' from '{}'", name, starting_branch);

        let head = session
            .branch_head(name)
            .await?
            .ok_or_else(|| VcError::not_found("branch", name))?;
        self.describe(&mut session, head).await
    }

    /// Delete a branch. The primary branch and the caller's active branch are protected.
    pub async fn delete(&self, name: &str, active_branch: &str) -> VcResult<()> {
        if name == self.engine.default_branch() {
            return Err(VcError::BranchProtected {
                branch: name.to_string(),
                reason: "it is the primary branch".to_string(),
            });
        }
        if name == active_branch {
            return Err(VcError::BranchProtected {
                branch: name.to_string(),
                reason: "it is the active branch".to_string(),
            });
        }
        let mut session = self.engine.global_session().await?;
        if session.branch_head(name).await?.is_none() {
            return Err(VcError::not_found("branch", name));
        }
        self.remove(&mut session, name).await?;
        log::info!("deleted branch '{}'", name);
        Ok(())
    }

    /// Merge `source` into `destination` and commit the result as `author`.
    ///
    /// Refused while the merge preview of the pair reports any conflict or
    /// constraint violation, so a merge never leaves either behind.
    pub async fn merge(&self, source: &str, destination: &str, author: Author) -> VcResult<Branch> {
        if source == destination {
            return Err(VcError::Validation(format!("cannot merge '{}' into itself", source)));
        }
        if self.candidates.is_candidate(destination) {
            return Err(VcError::Validation(format!(
                "'{}' is a merge candidate and cannot be merged into",
                destination
            )));
        }

        let mut session = self.engine.session().await?;
        let source_head = session
            .branch_head(source)
            .await?
            .ok_or_else(|| VcError::not_found("branch", source))?;
        let destination_head = session
            .branch_head(destination)
            .await?
            .ok_or_else(|| VcError::not_found("branch", destination))?;

        let base = session.merge_base(&source_head.hash, &destination_head.hash).await?;
        if base.as_deref() == Some(source_head.hash.as_str()) {
            log::info!("'{}' is already merged into '{}'", source, destination);
            return self.describe(&mut session, destination_head).await;
        }

        let candidate = self.candidates.get_or_create(&mut session, source, destination).await?;
        let mut scope = BranchScope::enter(&mut session, &candidate.name).await?;
        let issues = total_issue_count(&mut scope).await;
        scope.exit().await?;
        let issues = issues?;
        if issues > 0 {
            return Err(VcError::MergeFailure {
                source_branch: source.to_string(),
                destination_branch: destination.to_string(),
                detail: format!(
                    "the merge preview reports {} conflict(s) or constraint violation(s)",
                    issues
                ),
            });
        }

        let mut scope = BranchScope::enter(&mut session, destination).await?;
        let merged = merge_checked_out(&mut *scope, source, &destination_head, author).await;
        let restored = scope.exit().await;
        merged.map_err(|err| VcError::MergeFailure {
            source_branch: source.to_string(),
            destination_branch: destination.to_string(),
            detail: format!("{:#}", err),
        })?;
        restored?;
        log::info!("merged '{}' into '{}'", source, destination);

        let head = session
            .branch_head(destination)
            .await?
            .ok_or_else(|| VcError::not_found("branch", destination))?;
        self.describe(&mut session, head).await
    }

    /// The requested branch when it exists, otherwise the primary branch.
    pub async fn resolve_active(&self, requested: Option<&str>) -> VcResult<String> {
        let default = self.engine.default_branch().to_string();
        let Some(requested) = requested.filter(|name| !name.is_empty()) else {
            return Ok(default);
        };
        if self.exists(requested).await? {
            return Ok(requested.to_string());
        }
        log::warn!("branch '{}' does not exist, using '{}'", requested, default);
        Ok(default)
    }

    pub async fn log(&self, name: &str, limit: usize) -> VcResult<Vec<Commit>> {
        let mut session = self.engine.global_session().await?;
        if session.branch_head(name).await?.is_none() {
            return Err(VcError::not_found("branch", name));
        }
        Ok(session.log(name, limit).await?)
    }

    /// Delete merge candidates whose source or destination is gone or has
    /// moved on. Returns the names removed.
    pub async fn collect_stale_merge_candidates(&self) -> VcResult<Vec<String>> {
        let mut session = self.engine.global_session().await?;
        let heads = session.list_branch_heads().await?;
        let mut removed = Vec::new();
        for candidate in heads.iter().filter(|h| self.candidates.is_candidate(&h.name)) {
            if self.is_live_candidate(&mut session, candidate).await? {
                continue;
            }
            self.remove(&mut session, &candidate.name).await?;
            removed.push(candidate.name.clone());
        }
        if !removed.is_empty() {
            log::info!("removed {} stale merge candidate(s)", removed.len());
        }
        Ok(removed)
    }

    async fn is_live_candidate(
        &self,
        session: &mut E::Session,
        candidate: &BranchHead,
    ) -> VcResult<bool> {
        for (source, destination) in self.candidates.candidate_pairs(&candidate.name) {
            let (Some(source), Some(destination)) = (
                session.branch_head(&source).await?,
                session.branch_head(&destination).await?,
            ) else {
                continue;
            };
            if self
                .candidates
                .is_fresh(session, candidate, &source, &destination)
                .await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn remove(&self, session: &mut E::Session, name: &str) -> VcResult<()> {
        session
            .delete_branch(name)
            .await
            .with_context(|| format!("Failed to delete branch '{}'", name))?;
        session.delete_branch_meta(name).await?;
        Ok(())
    }

    async fn describe(&self, session: &mut E::Session, head: BranchHead) -> VcResult<Branch> {
        let meta = session.branch_meta(&head.name).await?;
        let mut counts = (0, 0);
        if let Some(start) = meta.as_ref().and_then(|m| m.starting_branch.as_deref()) {
            // the starting branch may have been deleted since the fork
            if session.branch_head(start).await?.is_some() {
                counts = (
                    session.count_commits(start, &head.name).await?,
                    session.count_commits(&head.name, start).await?,
                );
            }
        }
        let (ahead, behind) = counts;
        Ok(Branch::from_parts(head, meta, ahead, behind))
    }
}

/// Merge into the checked-out branch. Fast-forwards, and engines that commit
/// clean merges themselves, have already moved the head; otherwise the merge
/// is committed here.
async fn merge_checked_out<S: EngineSession>(
    session: &mut S,
    source: &str,
    destination: &BranchHead,
    author: Author,
) -> anyhow::Result<()> {
    session.merge(source).await?;
    let head = session
        .branch_head(&destination.name)
        .await?
        .with_context(|| format!("branch '{}' vanished during merge", destination.name))?;
    if head.hash == destination.hash {
        session.stage_all().await?;
        let message = format!("Merged branch \"{}\" into \"{}\"", source, destination.name);
        session.commit(&CommitRequest::new(message, author)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Author, CommitRequest, Identifier};
    use crate::store::{MemoryEngine, TableSchema};
    use serde_json::json;

    fn directory() -> (
        Arc<MemoryEngine>,
        Arc<MergeCandidateManager>,
        BranchDirectory<MemoryEngine>,
    ) {
        let engine = Arc::new(MemoryEngine::new("main"));
        engine.define_table("dcim_site", TableSchema::new(&["name"]));
        let candidates = Arc::new(MergeCandidateManager::new(
            "xxx-merge-candidate",
            Author::new("nautobot", "nautobot@ntc.com"),
        ));
        let directory = BranchDirectory::new(Arc::clone(&engine), Arc::clone(&candidates));
        (engine, candidates, directory)
    }

    async fn commit_on(engine: &MemoryEngine, branch: &str, id: &str) {
        commit_named(engine, branch, id, &format!("site-{}", id)).await;
    }

    async fn commit_named(engine: &MemoryEngine, branch: &str, id: &str, name: &str) {
        let mut session = engine.session().await.unwrap();
        session.checkout(branch).await.unwrap();
        let row = json!({"id": id, "name": name});
        session
            .upsert_row(&Identifier::new("dcim_site").unwrap(), row.as_object().unwrap())
            .await
            .unwrap();
        session
            .commit(&CommitRequest::new("add site", Author::new("t", "t@example.com")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_records_metadata_and_ahead_behind() {
        let (engine, _, directory) = directory();
        let branch = directory.create("feature", "main", Some("alice")).await.unwrap();
        assert_eq!(branch.starting_branch.as_deref(), Some("main"));
        assert_eq!(branch.created_by.as_deref(), Some("alice"));
        assert_eq!((branch.ahead, branch.behind), (0, 0));

        commit_on(&engine, "feature", "1").await;
        commit_on(&engine, "feature", "2").await;
        commit_on(&engine, "main", "3").await;
        let branch = directory.get("feature").await.unwrap();
        assert_eq!((branch.ahead, branch.behind), (2, 1));

        let branches = directory.list(false).await.unwrap();
        let names: Vec<String> = branches.into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["feature".to_string(), "main".to_string()]);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_requests() {
        let (_, _, directory) = directory();
        directory.create("feature", "main", None).await.unwrap();

        assert!(matches!(
            directory.create("feature", "main", None).await.unwrap_err(),
            VcError::BranchExists(_)
        ));
        assert!(matches!(
            directory.create("other", "nope", None).await.unwrap_err(),
            VcError::NotFound { .. }
        ));
        assert!(matches!(
            directory.create("bad name", "main", None).await.unwrap_err(),
            VcError::Validation(_)
        ));
        assert!(matches!(
            directory.create("xxx-merge-candidate--a--main", "main", None).await.unwrap_err(),
            VcError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_protects_primary_and_active_branch() {
        let (_, _, directory) = directory();
        directory.create("feature", "main", None).await.unwrap();

        assert!(matches!(
            directory.delete("main", "feature").await.unwrap_err(),
            VcError::BranchProtected { .. }
        ));
        assert!(matches!(
            directory.delete("feature", "feature").await.unwrap_err(),
            VcError::BranchProtected { .. }
        ));
        assert!(matches!(
            directory.delete("ghost", "main").await.unwrap_err(),
            VcError::NotFound { .. }
        ));
        directory.delete("feature", "main").await.unwrap();
        assert!(!directory.exists("feature").await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_active_falls_back_to_primary() {
        let (_, _, directory) = directory();
        directory.create("feature", "main", None).await.unwrap();
        assert_eq!(directory.resolve_active(Some("feature")).await.unwrap(), "feature");
        assert_eq!(directory.resolve_active(Some("ghost")).await.unwrap(), "main");
        assert_eq!(directory.resolve_active(Some("")).await.unwrap(), "main");
        assert_eq!(directory.resolve_active(None).await.unwrap(), "main");
    }

    #[tokio::test]
    async fn test_stale_candidates_are_collected() {
        let (engine, candidates, directory) = directory();
        directory.create("feature", "main", None).await.unwrap();
        directory.create("doomed", "main", None).await.unwrap();
        commit_on(&engine, "feature", "1").await;

        let mut session = engine.session().await.unwrap();
        candidates.get_or_create(&mut session, "feature", "main").await.unwrap();
        candidates.get_or_create(&mut session, "doomed", "main").await.unwrap();
        assert_eq!(directory.list(true).await.unwrap().len(), 5);
        assert_eq!(directory.list(false).await.unwrap().len(), 3);

        assert!(directory.collect_stale_merge_candidates().await.unwrap().is_empty());

        directory.delete("doomed", "main").await.unwrap();
        commit_on(&engine, "main", "2").await;
        let mut removed = directory.collect_stale_merge_candidates().await.unwrap();
        removed.sort();
        assert_eq!(
            removed,
            vec![
                "xxx-merge-candidate--doomed--main".to_string(),
                "xxx-merge-candidate--feature--main".to_string(),
            ]
        );
    }

    fn alice() -> Author {
        Author::new("alice", "alice@example.com")
    }

    async fn site_on(engine: &MemoryEngine, branch: &str, id: &str) -> Option<String> {
        let mut session = engine.session().await.unwrap();
        session.checkout(branch).await.unwrap();
        session
            .fetch_display(
                &Identifier::new("dcim_site").unwrap(),
                &json!(id),
                &Identifier::new("name").unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_merge_commits_divergent_branches() {
        let (engine, _, directory) = directory();
        directory.create("feature", "main", None).await.unwrap();
        commit_on(&engine, "feature", "1").await;
        commit_on(&engine, "main", "2").await;

        let main = directory.merge("feature", "main", alice()).await.unwrap();
        assert_eq!(site_on(&engine, "main", "1").await.as_deref(), Some("site-1"));
        assert_eq!(site_on(&engine, "main", "2").await.as_deref(), Some("site-2"));

        let log = directory.log("main", 1).await.unwrap();
        assert_eq!(log[0].hash, main.hash);
        assert_eq!(log[0].message, "Merged branch \"feature\" into \"main\"");
        assert_eq!(log[0].committer, "alice");
        assert_eq!(log[0].parents.len(), 2);
        assert_eq!(directory.get("feature").await.unwrap().behind, 2);
    }

    #[tokio::test]
    async fn test_merge_fast_forwards_and_skips_merged_sources() {
        let (engine, _, directory) = directory();
        directory.create("feature", "main", None).await.unwrap();
        commit_on(&engine, "feature", "1").await;
        let feature = directory.get("feature").await.unwrap();

        let main = directory.merge("feature", "main", alice()).await.unwrap();
        assert_eq!(main.hash, feature.hash);

        let again = directory.merge("feature", "main", alice()).await.unwrap();
        assert_eq!(again.hash, feature.hash);
    }

    #[tokio::test]
    async fn test_merge_refuses_reported_conflicts() {
        let (engine, _, directory) = directory();
        commit_named(&engine, "main", "1", "ams01").await;
        directory.create("feature", "main", None).await.unwrap();
        commit_named(&engine, "feature", "1", "ams-feature").await;
        commit_named(&engine, "main", "1", "ams-main").await;
        let before = directory.get("main").await.unwrap();

        let err = directory.merge("feature", "main", alice()).await.unwrap_err();
        assert!(matches!(err, VcError::MergeFailure { .. }));
        assert!(err.to_string().contains("1 conflict"));
        assert_eq!(directory.get("main").await.unwrap().hash, before.hash);
        assert_eq!(site_on(&engine, "main", "1").await.as_deref(), Some("ams-main"));
    }

    #[tokio::test]
    async fn test_merge_rejects_bad_pairs() {
        let (_, _, directory) = directory();
        directory.create("feature", "main", None).await.unwrap();
        assert!(matches!(
            directory.merge("main", "main", alice()).await.unwrap_err(),
            VcError::Validation(_)
        ));
        assert!(matches!(
            directory.merge("ghost", "main", alice()).await.unwrap_err(),
            VcError::NotFound { .. }
        ));
        assert!(matches!(
            directory
                .merge("feature", "xxx-merge-candidate--feature--main", alice())
                .await
                .unwrap_err(),
            VcError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_log_lists_newest_first() {
        let (engine, _, directory) = directory();
        commit_on(&engine, "main", "1").await;
        let log = directory.log("main", 10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].message, "add site");
        assert!(matches!(directory.log("ghost", 10).await.unwrap_err(), VcError::NotFound { .. }));
    }
}
