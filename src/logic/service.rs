use std::sync::Arc;

use crate::config::VersionControlConfig;
use crate::error::VcError;
use crate::logic::branches::BranchDirectory;
use crate::logic::catalog::ModelCatalog;
use crate::logic::data_access::DataAccess;
use crate::logic::merge_candidate::MergeCandidateManager;
use crate::logic::preview::MergePreviewService;
use crate::logic::registry::VersioningRegistry;
use crate::logic::routing::{RoutingPolicy, StoreId};
use crate::model::Author;
use crate::store::VersionedEngine;

/// Everything a request handler needs, wired once at startup.
///
/// The registry and catalog are finished before this is built and are only
/// read afterwards.
pub struct VersionControl<E: VersionedEngine> {
    pub engine: Arc<E>,
    pub catalog: Arc<ModelCatalog>,
    pub policy: Arc<RoutingPolicy>,
    pub candidates: Arc<MergeCandidateManager>,
    pub branches: BranchDirectory<E>,
    pub previews: MergePreviewService<E>,
    pub data: DataAccess<E>,
    pub branch_header: String,
    pub system_author: Author,
}

impl<E: VersionedEngine> VersionControl<E> {
    pub fn new(engine: E, settings: &VersionControlConfig) -> Result<Self, VcError> {
        if engine.default_branch() != settings.default_branch {
            return Err(VcError::Validation(format!(
                "engine primary branch '{}' does not match configured '{}'",
                engine.default_branch(),
                settings.default_branch
            )));
        }

        let mut registry = VersioningRegistry::with_defaults();
        if let Some(extra) = &settings.versioned_models {
            registry.register(extra)?;
        }
        let mut catalog = ModelCatalog::with_defaults();
        catalog.register_definitions(&settings.models)?;

        let engine = Arc::new(engine);
        let catalog = Arc::new(catalog);
        let system_author = Author::parse(&settings.system_author);
        let policy = Arc::new(RoutingPolicy::new(
            Arc::new(registry),
            StoreId::new(settings.global_store.as_str()),
            settings.default_branch.as_str(),
            settings.routing_enabled,
        ));
        let candidates = Arc::new(MergeCandidateManager::new(
            settings.merge_candidate_prefix.as_str(),
            system_author.clone(),
        ));

        Ok(Self {
            branches: BranchDirectory::new(Arc::clone(&engine), Arc::clone(&candidates)),
            previews: MergePreviewService::new(
                Arc::clone(&engine),
                Arc::clone(&candidates),
                Arc::clone(&catalog),
            ),
            data: DataAccess::new(Arc::clone(&engine), Arc::clone(&policy), Arc::clone(&catalog)),
            engine,
            catalog,
            policy,
            candidates,
            branch_header: settings.branch_header.to_lowercase(),
            system_author,
        })
    }
}
