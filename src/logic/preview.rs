use std::sync::Arc;

use crate::error::{VcError, VcResult};
use crate::logic::catalog::ModelCatalog;
use crate::logic::conflicts::{total_issue_count, MergeConflicts};
use crate::logic::merge_candidate::MergeCandidateManager;
use crate::logic::scope::BranchScope;
use crate::model::{MergePreview, MergeReport};
use crate::store::VersionedEngine;

/// Entry point for merge previews and pull-request conflict counts.
///
/// Previews are advisory. A candidate the engine refuses to build is
/// reported as unavailable (or as zero issues) rather than as an error;
/// unknown branches and storage malfunctions still surface as errors.
pub struct MergePreviewService<E: VersionedEngine> {
    engine: Arc<E>,
    candidates: Arc<MergeCandidateManager>,
    catalog: Arc<ModelCatalog>,
}

impl<E: VersionedEngine> MergePreviewService<E> {
    pub fn new(
        engine: Arc<E>,
        candidates: Arc<MergeCandidateManager>,
        catalog: Arc<ModelCatalog>,
    ) -> Self {
        Self {
            engine,
            candidates,
            catalog,
        }
    }

    pub async fn conflicts_for_merge(
        &self,
        source: &str,
        destination: &str,
    ) -> VcResult<MergePreview> {
        match self.build_report(source, destination).await {
            Ok(report) => Ok(MergePreview::Ready(report)),
            Err(err @ VcError::MergeFailure { .. }) => {
                log::warn!(
                    "merge preview of '{}' into '{}' unavailable: {}",
                    source,
                    destination,
                    err
                );
                Ok(MergePreview::Unavailable {
                    reason: err.to_string(),
                })
            }
            Err(err) => {
                if !err.is_user_facing() {
                    log::error!(
                        "merge preview of '{}' into '{}' failed: {}",
                        source,
                        destination,
                        err
                    );
                }
                Err(err)
            }
        }
    }

    pub async fn conflicts_count_for_merge(
        &self,
        source: &str,
        destination: &str,
    ) -> VcResult<u64> {
        match self.count_issues(source, destination).await {
            Ok(count) => Ok(count),
            Err(err @ VcError::MergeFailure { .. }) => {
                log::warn!(
                    "conflict count for '{}' into '{}' unavailable: {}",
                    source,
                    destination,
                    err
                );
                Ok(0)
            }
            Err(err) => {
                if !err.is_user_facing() {
                    log::error!(
                        "conflict count for '{}' into '{}' failed: {}",
                        source,
                        destination,
                        err
                    );
                }
                Err(err)
            }
        }
    }

    async fn build_report(&self, source: &str, destination: &str) -> VcResult<MergeReport> {
        let mut session = self.engine.session().await?;
        let candidate = self
            .candidates
            .get_or_create(&mut session, source, destination)
            .await?;

        let reporter = MergeConflicts::new(&self.catalog, source, destination);
        let mut scope = BranchScope::enter(&mut session, &candidate.name).await?;
        let report = reporter.report(&mut scope).await;
        scope.exit().await?;
        report
    }

    async fn count_issues(&self, source: &str, destination: &str) -> VcResult<u64> {
        let mut session = self.engine.session().await?;
        let candidate = self
            .candidates
            .get_or_create(&mut session, source, destination)
            .await?;

        let mut scope = BranchScope::enter(&mut session, &candidate.name).await?;
        let count = total_issue_count(&mut scope).await;
        scope.exit().await?;
        count
    }
}
