//! Batches the row changes of one request into a single commit per store.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Context;

use crate::error::VcResult;
use crate::logic::catalog::ModelInfo;
use crate::logic::routing::StoreId;
use crate::model::{Author, CommitRequest, RequestContext};
use crate::store::{EngineSession, VersionedEngine};

pub const MIGRATION_COMMIT_MESSAGE: &str = "Completed database migrations";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            ChangeKind::Created => "Created",
            ChangeKind::Updated => "Updated",
            ChangeKind::Deleted => "Deleted",
        };
        f.write_str(verb)
    }
}

/// Change descriptions collected while a request runs, keyed by routing
/// target (`None` is the request's branch). Call [`UnitOfWork::commit`]
/// once the request's writes are done.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    changes: BTreeMap<Option<StoreId>, Vec<String>>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_save(
        &mut self,
        target: Option<StoreId>,
        model: &ModelInfo,
        display: &str,
        created: bool,
    ) {
        let kind = if created { ChangeKind::Created } else { ChangeKind::Updated };
        self.record(target, kind, model, display);
    }

    pub fn record_delete(&mut self, target: Option<StoreId>, model: &ModelInfo, display: &str) {
        self.record(target, ChangeKind::Deleted, model, display);
    }

    fn record(
        &mut self,
        target: Option<StoreId>,
        kind: ChangeKind,
        model: &ModelInfo,
        display: &str,
    ) {
        self.changes
            .entry(target)
            .or_default()
            .push(format!("{} {} \"{}\"", kind, model.verbose_name, display));
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Commit message for one target: its change lines joined with `"; "`.
    pub fn message_for(&self, target: &Option<StoreId>) -> Option<String> {
        self.changes.get(target).map(|lines| lines.join("; "))
    }

    /// Write one commit per target and return the new head hashes. Targets
    /// not committed when an error is returned stay pending.
    pub async fn commit<E: VersionedEngine>(
        mut self,
        engine: &E,
        ctx: &RequestContext,
    ) -> VcResult<Vec<String>> {
        let author = ctx.user.author();
        let targets: Vec<Option<StoreId>> = self.changes.keys().cloned().collect();
        let mut hashes = Vec::with_capacity(targets.len());
        for target in targets {
            let Some(message) = self.message_for(&target) else {
                continue;
            };
            let mut session = match &target {
                None => {
                    let mut session = engine.session().await?;
                    session.checkout(ctx.active_branch()).await?;
                    session
                }
                Some(_) => engine.global_session().await?,
            };
            let request = CommitRequest {
                // rewriting a row with identical values still records the request
                allow_empty: true,
                ..CommitRequest::new(message, author.clone())
            };
            let hash = session
                .commit(&request)
                .await
                .with_context(|| {
                    format!("Failed to commit changes on '{}'", describe(&target, ctx))
                })?;
            let committed = self.changes.remove(&target).map_or(0, |lines| lines.len());
            log::info!(
                "committed {} change(s) on '{}' as {}",
                committed,
                describe(&target, ctx),
                hash
            );
            hashes.push(hash);
        }
        Ok(hashes)
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.changes.is_empty() {
            let pending: usize = self.changes.values().map(Vec::len).sum();
            log::warn!("unit of work dropped with {} uncommitted change(s)", pending);
        }
    }
}

fn describe(target: &Option<StoreId>, ctx: &RequestContext) -> String {
    match target {
        None => ctx.active_branch().to_string(),
        Some(store) => store.to_string(),
    }
}

/// Record completed schema migrations on the global store.
pub async fn commit_migrations<E: VersionedEngine>(engine: &E, author: Author) -> VcResult<String> {
    let mut session = engine.global_session().await?;
    let hash = session
        .commit(&CommitRequest::forced(MIGRATION_COMMIT_MESSAGE, author))
        .await
        .context("Failed to commit migrations")?;
    log::info!("recorded database migrations as {}", hash);
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, Identifier, UserContext};
    use crate::store::{MemoryEngine, TableSchema};
    use serde_json::json;

    fn site_model() -> ModelInfo {
        ModelInfo::new(EntityType::new("dcim", "site"), "site", "name").unwrap()
    }

    #[test]
    fn test_messages_are_grouped_per_target() {
        let mut uow = UnitOfWork::new();
        let site = site_model();
        uow.record_save(None, &site, "ams01", true);
        uow.record_save(None, &site, "ams02", false);
        uow.record_delete(Some(StoreId::new("global")), &site, "old");

        assert_eq!(
            uow.message_for(&None).unwrap(),
            "Created site \"ams01\"; Updated site \"ams02\""
        );
        assert_eq!(
            uow.message_for(&Some(StoreId::new("global"))).unwrap(),
            "Deleted site \"old\""
        );
        assert!(uow.message_for(&Some(StoreId::new("elsewhere"))).is_none());
    }

    #[tokio::test]
    async fn test_commit_writes_one_commit_per_target() {
        let engine = MemoryEngine::new("main");
        engine.define_table("dcim_site", TableSchema::new(&["name"]));
        let mut session = engine.session().await.unwrap();
        session.create_branch("feature", "main", false).await.unwrap();
        session.checkout("feature").await.unwrap();
        session
            .upsert_row(
                &Identifier::new("dcim_site").unwrap(),
                json!({"id": "1", "name": "ams01"}).as_object().unwrap(),
            )
            .await
            .unwrap();

        let mut uow = UnitOfWork::new();
        uow.record_save(None, &site_model(), "ams01", true);
        let ctx = RequestContext::new(
            "feature",
            UserContext::with_details(
                "u1".into(),
                Some("alice@example.com".into()),
                Some("alice".into()),
            ),
        );
        let hashes = uow.commit(&engine, &ctx).await.unwrap();
        assert_eq!(hashes.len(), 1);

        let head = session.branch_head("feature").await.unwrap().unwrap();
        assert_eq!(head.hash, hashes[0]);
        assert_eq!(head.latest_commit_message.as_deref(), Some("Created site \"ams01\""));
        assert_eq!(head.latest_committer.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_empty_unit_of_work_commits_nothing() {
        let engine = MemoryEngine::new("main");
        let ctx = RequestContext::new("main", UserContext::default_user());
        assert!(UnitOfWork::new().commit(&engine, &ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_migration_commit_lands_on_primary_branch() {
        let engine = MemoryEngine::new("main");
        let hash = commit_migrations(&engine, Author::new("nautobot", "nautobot@ntc.com"))
            .await
            .unwrap();
        let mut session = engine.global_session().await.unwrap();
        let head = session.branch_head("main").await.unwrap().unwrap();
        assert_eq!(head.hash, hash);
        assert_eq!(head.latest_commit_message.as_deref(), Some(MIGRATION_COMMIT_MESSAGE));
    }
}
